//! UI thread: console commands, wizard actions and frame refreshes.
//!
//! The event loop multiplexes three sources with `select!`: console events,
//! the display channel's wake signal, and a periodic tick that notices a
//! Ctrl+C shutdown request.

pub(crate) mod console;
pub(crate) mod preview;
pub(crate) mod server;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, select};
use renderer_link::{CommandSink, RendererCommand, SendOutcome};
use tracing::{debug, info, warn};

use crate::{
    calibration::{CalibrationWizard, SessionHandle},
    ui::{console::ConsoleCommand, preview::FrameView},
    vision::DisplayChannel,
};

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

pub(crate) enum UiEvent {
    Command(ConsoleCommand),
    Rejected(String),
    InputClosed,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Exit,
}

/// Applies console commands to the wizard and the renderer link.
pub(crate) struct UiController {
    wizard: CalibrationWizard,
    session: SessionHandle,
    link: Arc<dyn CommandSink>,
}

impl UiController {
    pub(crate) fn new(
        wizard: CalibrationWizard,
        session: SessionHandle,
        link: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            wizard,
            session,
            link,
        }
    }

    /// Run one command, returning the text to show the user.
    pub(crate) fn handle(&mut self, command: ConsoleCommand) -> (Flow, String) {
        let reply = match command {
            ConsoleCommand::Calibrate => self
                .wizard
                .start()
                .map(|()| "Hold the marker in view, then type `capture`.".to_string()),
            ConsoleCommand::Capture => self.wizard.capture_fov().map(|ratio| {
                format!(
                    "Marker captured (frame/marker ratio {ratio:.3}). \
                     Enter `measure <distance> <lpi> <ior>`."
                )
            }),
            ConsoleCommand::Measure {
                distance,
                density,
                ior,
            } => self
                .wizard
                .submit_measurements(&distance, &density, &ior)
                .map(|fov| {
                    format!(
                        "Webcam FOV {fov:.2} degrees. Read the green to red line distance \
                         on the display and enter `density <distance>`."
                    )
                }),
            ConsoleCommand::Density(distance) => {
                self.wizard.submit_display_density(&distance).map(|params| {
                    format!(
                        "Calibration complete: fov {:.2} deg, {:.4} pixels per lens, ior {:.3}.",
                        params.fov_deg, params.pixels_per_lens, params.index_of_refraction
                    )
                })
            }
            ConsoleCommand::Load(path) => {
                return (Flow::Continue, describe(load_object(self.link.as_ref(), &path)));
            }
            ConsoleCommand::Track(enabled) => {
                self.session.set_tracking_enabled(enabled);
                info!(enabled, "head tracking toggled");
                Ok(format!("Tracking {}.", if enabled { "on" } else { "off" }))
            }
            ConsoleCommand::Status => Ok(self.status_line()),
            ConsoleCommand::Help => Ok(console::HELP.to_string()),
            ConsoleCommand::Quit => return (Flow::Exit, "Shutting down.".to_string()),
        };
        match reply {
            Ok(text) => (Flow::Continue, text),
            Err(err) => (Flow::Continue, format!("error: {err}")),
        }
    }

    fn status_line(&self) -> String {
        let derived = self.wizard.derived();
        let angles = match self.session.latest_angles() {
            Some(a) => format!(
                "L({:+.1}, {:+.1}) R({:+.1}, {:+.1})",
                a.left_horizontal, a.left_vertical, a.right_horizontal, a.right_vertical
            ),
            None => "none".to_string(),
        };
        format!(
            "stage {} | detector {} | renderer {} | tracking {} | fov {:.2} | lpi {} | ppl {:.4} | ior {:.3} | angles {}",
            self.wizard.stage(),
            self.session.detector_kind(),
            if self.link.is_active() { "connected" } else { "waiting" },
            if self.session.tracking_enabled() { "on" } else { "off" },
            self.session.fov_deg(),
            self.wizard.working().lenticule_density,
            derived.pixels_per_lens,
            derived.index_of_refraction,
            angles,
        )
    }
}

/// Ask the renderer to load the object at `path`.
pub(crate) fn load_object(link: &dyn CommandSink, path: &str) -> Result<SendOutcome> {
    let path = path.trim();
    if path.is_empty() {
        bail!("object path must not be empty");
    }
    let outcome = link.send(RendererCommand::LoadObject {
        path: path.to_string(),
    })?;
    info!(path, ?outcome, "object load requested");
    Ok(outcome)
}

fn describe(result: Result<SendOutcome>) -> String {
    match result {
        Ok(SendOutcome::Queued) => "Object sent to the renderer.".to_string(),
        Ok(SendOutcome::NotConnected) => "Renderer is not connected yet.".to_string(),
        Ok(SendOutcome::Dropped) => "Renderer queue is full; try again.".to_string(),
        Err(err) => format!("error: {err:#}"),
    }
}

/// Service UI events until the user quits, input closes, or `shutdown` is set.
pub(crate) fn run_event_loop(
    controller: &mut UiController,
    events: &Receiver<UiEvent>,
    display: &DisplayChannel,
    view: &mut dyn FrameView,
    shutdown: &AtomicBool,
) {
    let wake = display.wake();
    println!("{}", console::HELP);
    loop {
        if shutdown.load(Ordering::SeqCst) {
            debug!("shutdown requested");
            break;
        }
        let flow = select! {
            recv(events) -> event => match event {
                Ok(UiEvent::Command(command)) => {
                    let (flow, reply) = controller.handle(command);
                    println!("{reply}");
                    flow
                }
                Ok(UiEvent::Rejected(message)) => {
                    println!("{message}");
                    Flow::Continue
                }
                Ok(UiEvent::InputClosed) | Err(_) => {
                    warn!("console input closed; running until interrupted");
                    wait_for_shutdown(display, view, shutdown);
                    Flow::Exit
                }
            },
            recv(wake) -> _ => {
                if let Some(frame) = display.consume() {
                    view.show(&frame);
                }
                Flow::Continue
            },
            default(SHUTDOWN_POLL) => Flow::Continue,
        };
        if flow == Flow::Exit {
            break;
        }
    }
}

fn wait_for_shutdown(display: &DisplayChannel, view: &mut dyn FrameView, shutdown: &AtomicBool) {
    let wake = display.wake();
    while !shutdown.load(Ordering::SeqCst) {
        if wake.recv_timeout(SHUTDOWN_POLL).is_ok() {
            if let Some(frame) = display.consume() {
                view.show(&frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use crossbeam_channel::unbounded;
    use detection::DetectorKind;

    use super::*;
    use crate::{
        calibration::{CalibrationStage, CalibrationStore},
        test_support::RecordingSink,
        vision::ProcessedFrame,
    };

    fn controller(sink: Arc<RecordingSink>) -> (UiController, SessionHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionHandle::new();
        let store = CalibrationStore::new(dir.path().join("calibration_settings.txt"));
        let wizard = CalibrationWizard::new(session.clone(), sink.clone(), store);
        (UiController::new(wizard, session.clone(), sink), session, dir)
    }

    #[test]
    fn console_walks_through_the_wizard() {
        let sink = Arc::new(RecordingSink::connected());
        let (mut ui, session, _dir) = controller(sink.clone());

        for command in [
            ConsoleCommand::Calibrate,
            ConsoleCommand::Capture,
            ConsoleCommand::Measure {
                distance: "6".into(),
                density: "100".into(),
                ior: "1.5".into(),
            },
            ConsoleCommand::Density("2".into()),
        ] {
            let (flow, reply) = ui.handle(command);
            assert_eq!(flow, Flow::Continue);
            assert!(!reply.starts_with("error"), "{reply}");
        }
        assert_eq!(session.stage(), CalibrationStage::Done);
        assert_eq!(sink.commands().len(), 3);
    }

    #[test]
    fn invalid_measurement_is_reported() {
        let sink = Arc::new(RecordingSink::connected());
        let (mut ui, session, _dir) = controller(sink.clone());
        ui.handle(ConsoleCommand::Calibrate);
        ui.handle(ConsoleCommand::Capture);
        let (_, reply) = ui.handle(ConsoleCommand::Measure {
            distance: "six".into(),
            density: "100".into(),
            ior: "1.5".into(),
        });
        assert!(reply.contains("marker distance"), "{reply}");
        assert_eq!(session.stage(), CalibrationStage::Measurement);
        assert!(sink.commands().is_empty());
    }

    #[test]
    fn load_sends_object_path() {
        let sink = RecordingSink::connected();
        assert_eq!(
            load_object(&sink, " /tmp/teapot.obj ").unwrap(),
            SendOutcome::Queued
        );
        assert!(load_object(&sink, "  ").is_err());
        assert_eq!(
            sink.commands(),
            vec![RendererCommand::LoadObject {
                path: "/tmp/teapot.obj".into()
            }]
        );
    }

    #[test]
    fn track_toggle_updates_session() {
        let sink = Arc::new(RecordingSink::connected());
        let (mut ui, session, _dir) = controller(sink);
        ui.handle(ConsoleCommand::Track(false));
        assert!(!session.tracking_enabled());
        ui.handle(ConsoleCommand::Track(true));
        assert!(session.tracking_enabled());
    }

    #[test]
    fn status_reports_the_loaded_calibration() {
        let sink = Arc::new(RecordingSink::connected());
        let (mut ui, session, _dir) = controller(sink);
        session.seed_saved_calibration(crate::calibration::params::DerivedParameters {
            fov_deg: 48.5,
            pixels_per_lens: 2.5,
            index_of_refraction: 1.49,
        });

        let (_, reply) = ui.handle(ConsoleCommand::Status);
        assert!(reply.contains("fov 48.50"), "{reply}");
        assert!(reply.contains("ppl 2.5000"), "{reply}");
        assert!(reply.contains("ior 1.490"), "{reply}");
    }

    struct CountingView(usize);

    impl FrameView for CountingView {
        fn show(&mut self, _frame: &ProcessedFrame) {
            self.0 += 1;
        }
    }

    #[test]
    fn event_loop_shows_frames_and_quits() {
        let sink = Arc::new(RecordingSink::connected());
        let (mut ui, _session, _dir) = controller(sink);
        let display = DisplayChannel::new();
        let (tx, rx) = unbounded();
        let shutdown = AtomicBool::new(false);

        display.publish(ProcessedFrame {
            data: vec![0; 12],
            width: 2,
            height: 2,
            stride: 6,
            sequence: 1,
            timestamp_ms: 0,
            detector: DetectorKind::Face,
        });
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            tx.send(UiEvent::Command(ConsoleCommand::Quit)).unwrap();
        });

        let mut view = CountingView(0);
        run_event_loop(&mut ui, &rx, &display, &mut view, &shutdown);
        sender.join().unwrap();
        assert_eq!(view.0, 1);
    }
}
