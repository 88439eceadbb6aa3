//! Single-peer TCP link to the renderer process.
//!
//! The renderer connects back to a listener bound at start-up. Commands from
//! any thread are queued into one bounded channel drained by a dedicated
//! writer thread, so each command reaches the socket as one contiguous
//! `write_all` and per-caller ordering is the queue's FIFO order.

use std::{
    io::{self, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use bytes::BytesMut;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError, bounded};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::protocol::RendererCommand;

/// Default listener address the renderer connects to.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:42842";

#[derive(Clone, Copy, Debug)]
pub struct LinkOptions {
    /// Capacity of the outbound command queue.
    pub queue_capacity: usize,
    /// How long [`RendererLink::send`] waits for queue space.
    pub send_timeout: Duration,
    /// Socket write timeout; a renderer that stops reading fails the link.
    pub write_timeout: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            send_timeout: Duration::from_millis(250),
            write_timeout: Duration::from_secs(2),
        }
    }
}

/// What happened to a command handed to the link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for the writer thread.
    Queued,
    /// No renderer has connected yet; the command was discarded.
    NotConnected,
    /// The queue was full and the command was discarded (`offer` only).
    Dropped,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to bind renderer listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("renderer acceptor already started")]
    AlreadyAccepting,
    #[error("renderer link is closed")]
    Closed,
    #[error("renderer command queue stayed full for {0:?}")]
    Backpressure(Duration),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Outbound command channel shared by every producer of renderer commands.
pub trait CommandSink: Send + Sync {
    /// Queue `command`, waiting a bounded time for space.
    fn send(&self, command: RendererCommand) -> Result<SendOutcome, LinkError>;

    /// Queue `command` only if space is available right now.
    fn offer(&self, command: RendererCommand) -> Result<SendOutcome, LinkError>;

    /// Whether a renderer is connected and the link has not failed.
    fn is_active(&self) -> bool;
}

struct Inner {
    local_addr: SocketAddr,
    options: LinkOptions,
    listener: Mutex<Option<TcpListener>>,
    tx: Sender<RendererCommand>,
    rx: Mutex<Option<Receiver<RendererCommand>>>,
    connected: AtomicBool,
    closed: AtomicBool,
    writer: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Cloneable handle to the renderer connection.
#[derive(Clone)]
pub struct RendererLink {
    inner: Arc<Inner>,
}

impl RendererLink {
    /// Bind the listener with default options.
    pub fn bind(addr: SocketAddr) -> Result<Self, LinkError> {
        Self::bind_with(addr, LinkOptions::default())
    }

    pub fn bind_with(addr: SocketAddr, options: LinkOptions) -> Result<Self, LinkError> {
        let listener =
            TcpListener::bind(addr).map_err(|source| LinkError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = bounded(options.queue_capacity.max(1));
        info!(%local_addr, "waiting for renderer connection");
        Ok(Self {
            inner: Arc::new(Inner {
                local_addr,
                options,
                listener: Mutex::new(Some(listener)),
                tx,
                rx: Mutex::new(Some(rx)),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                writer: Mutex::new(None),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Spawn the one-shot acceptor thread.
    ///
    /// Once the renderer connects, `greeting` is evaluated and its commands are
    /// queued ahead of anything else, then the link becomes active. The thread
    /// exits after the first connection; later connection attempts are refused
    /// because the listener is dropped.
    pub fn spawn_acceptor<F>(&self, greeting: F) -> Result<thread::JoinHandle<()>, LinkError>
    where
        F: FnOnce() -> Vec<RendererCommand> + Send + 'static,
    {
        let listener = lock(&self.inner.listener)
            .take()
            .ok_or(LinkError::AlreadyAccepting)?;
        let inner = self.inner.clone();
        let handle = spawn_thread("renderer-acceptor", move || {
            match listener.accept() {
                Ok((stream, peer)) => {
                    drop(listener);
                    info!(%peer, "renderer connected");
                    if let Err(err) = inner.activate(stream, greeting) {
                        error!("failed to start renderer writer: {err}");
                        inner.closed.store(true, Ordering::SeqCst);
                    }
                }
                Err(err) => {
                    error!("renderer accept failed: {err}");
                    inner.closed.store(true, Ordering::SeqCst);
                }
            }
        })?;
        Ok(handle)
    }

    /// Send a final `Shutdown` (best effort) and wait for the writer to exit.
    pub fn shutdown(&self) {
        if self.is_active() {
            if let Err(err) = self.send(RendererCommand::Shutdown) {
                // The writer only exits after Shutdown or a failed write; joining
                // it now could block forever.
                warn!("failed to queue renderer shutdown: {err}");
                return;
            }
            debug!("renderer shutdown queued");
        }
        let handle = lock(&self.inner.writer).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("renderer writer thread panicked");
            }
        }
    }

    fn check_open(&self) -> Result<bool, LinkError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        Ok(self.is_connected())
    }
}

impl CommandSink for RendererLink {
    fn send(&self, command: RendererCommand) -> Result<SendOutcome, LinkError> {
        if !self.check_open()? {
            debug!(command = command.label(), "renderer not connected; command discarded");
            return Ok(SendOutcome::NotConnected);
        }
        let timeout = self.inner.options.send_timeout;
        match self.inner.tx.send_timeout(command, timeout) {
            Ok(()) => Ok(SendOutcome::Queued),
            Err(SendTimeoutError::Timeout(_)) => Err(LinkError::Backpressure(timeout)),
            Err(SendTimeoutError::Disconnected(_)) => Err(LinkError::Closed),
        }
    }

    fn offer(&self, command: RendererCommand) -> Result<SendOutcome, LinkError> {
        if !self.check_open()? {
            return Ok(SendOutcome::NotConnected);
        }
        match self.inner.tx.try_send(command) {
            Ok(()) => Ok(SendOutcome::Queued),
            Err(TrySendError::Full(command)) => {
                metrics::counter!("renderer_commands_dropped_total", "command" => command.label())
                    .increment(1);
                Ok(SendOutcome::Dropped)
            }
            Err(TrySendError::Disconnected(_)) => Err(LinkError::Closed),
        }
    }

    fn is_active(&self) -> bool {
        self.is_connected() && !self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn activate<F>(self: &Arc<Self>, stream: TcpStream, greeting: F) -> Result<(), LinkError>
    where
        F: FnOnce() -> Vec<RendererCommand>,
    {
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(self.options.write_timeout))?;
        let rx = lock(&self.rx).take().ok_or(LinkError::Closed)?;

        for command in greeting() {
            if self.tx.try_send(command).is_err() {
                warn!("renderer greeting exceeded the command queue; remainder dropped");
                break;
            }
        }

        let inner = self.clone();
        let handle = spawn_thread("renderer-writer", move || run_writer(stream, rx, inner))?;
        *lock(&self.writer) = Some(handle);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn run_writer(mut stream: TcpStream, rx: Receiver<RendererCommand>, inner: Arc<Inner>) {
    let mut buf = BytesMut::with_capacity(64);
    for command in rx.iter() {
        buf.clear();
        command.encode(&mut buf);
        if let Err(err) = stream.write_all(&buf) {
            error!(
                command = command.label(),
                "renderer write failed, closing link: {err}"
            );
            metrics::counter!("renderer_link_failures_total").increment(1);
            inner.closed.store(true, Ordering::SeqCst);
            return;
        }
        metrics::counter!("renderer_commands_sent_total", "command" => command.label())
            .increment(1);
        if command == RendererCommand::Shutdown {
            let _ = stream.flush();
            debug!("renderer shutdown sent; writer exiting");
            break;
        }
    }
    inner.closed.store(true, Ordering::SeqCst);
}

/// Spawn a named thread that inherits the current tracing dispatcher.
fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
