//! Fakes shared by unit tests across the crate.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use renderer_link::{CommandSink, LinkError, RendererCommand, SendOutcome};

/// Command sink that records everything it is handed while "connected".
pub(crate) struct RecordingSink {
    active: AtomicBool,
    commands: Mutex<Vec<RendererCommand>>,
}

impl RecordingSink {
    pub(crate) fn connected() -> Self {
        Self {
            active: AtomicBool::new(true),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn disconnected() -> Self {
        Self {
            active: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn commands(&self) -> Vec<RendererCommand> {
        self.commands.lock().unwrap().clone()
    }

    fn record(&self, command: RendererCommand) -> SendOutcome {
        if !self.active.load(Ordering::SeqCst) {
            return SendOutcome::NotConnected;
        }
        self.commands.lock().unwrap().push(command);
        SendOutcome::Queued
    }
}

impl CommandSink for RecordingSink {
    fn send(&self, command: RendererCommand) -> Result<SendOutcome, LinkError> {
        Ok(self.record(command))
    }

    fn offer(&self, command: RendererCommand) -> Result<SendOutcome, LinkError> {
        Ok(self.record(command))
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
