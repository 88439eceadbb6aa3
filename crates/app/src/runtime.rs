//! Process wiring: starts every thread, runs the UI loop on the calling
//! thread, then tears everything down in order.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use detection::DetectorSet;
use renderer_link::{CommandSink, RendererCommand, RendererLink};
use tracing::{error, info, warn};
use video_ingest::{FrameSource, UnavailableSource};

use crate::{
    calibration::{CalibrationStore, CalibrationWizard, SessionHandle, display_parameters_command},
    cli::AppConfig,
    telemetry,
    ui::{
        self, UiController, console,
        preview::{FrameView, NullView, PreviewView, SharedPacket},
        server::{PreviewServer, spawn_preview_server},
    },
    vision::{DisplayChannel, LoopHealth, TrackingSink, VisionLoop, spawn_watchdog},
};

pub fn run(config: AppConfig) -> Result<()> {
    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    if let Err(err) = telemetry::init_metrics_recorder() {
        warn!("metrics disabled: {err:#}");
    }
    let app_span = tracing::info_span!(
        "lenticular",
        source = %config.camera_uri,
        width = config.width,
        height = config.height,
        fps = config.fps,
        listen = %config.listen_addr
    );
    let _app_guard = app_span.enter();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(err) = ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst)) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    }

    let session = SessionHandle::new();
    let store = CalibrationStore::new(&config.calibration_file);

    let link = RendererLink::bind(config.listen_addr).context("Failed to start renderer listener")?;
    {
        let store = store.clone();
        let session = session.clone();
        // The acceptor blocks until the renderer connects; it is never joined.
        link.spawn_acceptor(move || connect_greeting(&store, &session))
            .context("Failed to start renderer acceptor")?;
    }
    let sink: Arc<dyn CommandSink> = Arc::new(link.clone());

    let source: Box<dyn FrameSource> =
        match video_ingest::open_camera(&config.camera_uri, (config.width, config.height), config.fps) {
            Ok(source) => source,
            Err(err) => {
                error!("Camera unavailable, continuing without frames: {err}");
                Box::new(UnavailableSource::new(config.camera_uri.clone()))
            }
        };
    let detectors = DetectorSet::load(&config.face_model);

    let display = DisplayChannel::new();
    let health = Arc::new(LoopHealth::new());
    let running = Arc::new(AtomicBool::new(true));
    let vision = VisionLoop::new(
        source,
        detectors,
        display.clone(),
        TrackingSink::new(sink.clone(), session.clone(), config.verbose),
        session.clone(),
        health.clone(),
        config.frame_period(),
        config.verbose,
    );
    let vision_handle = vision
        .spawn(running.clone())
        .context("Failed to spawn vision loop")?;
    let watchdog_handle =
        spawn_watchdog(health, running.clone()).context("Failed to spawn watchdog")?;

    let latest: SharedPacket = Arc::new(Mutex::new(None));
    let mut preview_server: Option<PreviewServer> = None;
    let mut view: Box<dyn FrameView> = Box::new(NullView);
    if let Some(addr) = config.preview_addr {
        preview_server = Some(
            spawn_preview_server(addr, latest.clone(), session.clone(), sink.clone())
                .context("Failed to start preview server")?,
        );
        view = Box::new(PreviewView::new(latest, config.jpeg_quality));
    }

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    // Blocks on stdin; left detached at exit.
    console::spawn_stdin_reader(event_tx).context("Failed to spawn console reader")?;

    let wizard = CalibrationWizard::new(session.clone(), sink.clone(), store);
    let mut controller = UiController::new(wizard, session, sink);
    info!(renderer = %link.local_addr(), "Waiting for renderer; type `help` for commands");
    ui::run_event_loop(
        &mut controller,
        &event_rx,
        &display,
        view.as_mut(),
        &shutdown,
    );

    info!("Stopping");
    running.store(false, Ordering::SeqCst);
    if vision_handle.join().is_err() {
        error!("vision loop panicked");
    }
    let _ = watchdog_handle.join();
    link.shutdown();
    if let Some(server) = preview_server {
        server.stop();
    }
    Ok(())
}

/// Commands queued ahead of everything else once the renderer connects.
///
/// A valid calibration file pushes the saved display parameters and, unless
/// a calibration run already produced a field of view, seeds the session with
/// it. A missing or malformed file sends nothing.
fn connect_greeting(store: &CalibrationStore, session: &SessionHandle) -> Vec<RendererCommand> {
    match store.load() {
        Ok(Some(params)) => {
            let seeded = session.seed_saved_calibration(params);
            info!(
                fov_deg = params.fov_deg,
                pixels_per_lens = params.pixels_per_lens,
                index_of_refraction = params.index_of_refraction,
                seeded,
                "Loaded saved calibration"
            );
            vec![display_parameters_command(&params)]
        }
        Ok(None) => {
            info!(path = %store.path().display(), "No saved calibration");
            Vec::new()
        }
        Err(err) => {
            warn!("Ignoring calibration file: {err}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn greeting_replays_saved_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration_settings.txt");
        fs::write(&path, "48.5\n2.5\n1.5\n").unwrap();
        let session = SessionHandle::new();

        let commands = connect_greeting(&CalibrationStore::new(&path), &session);
        assert_eq!(
            commands,
            vec![RendererCommand::SetDisplayParameters {
                pixels_per_lens: 2.5,
                index_of_refraction: 1.5,
            }]
        );
        assert_eq!(session.fov_deg(), 48.5);
        assert_eq!(
            session.saved_calibration().map(|p| p.pixels_per_lens),
            Some(2.5)
        );
    }

    #[test]
    fn late_greeting_keeps_the_calibrated_field_of_view() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration_settings.txt");
        fs::write(&path, "10
2.5
1.5
").unwrap();
        let session = SessionHandle::new();
        session.set_fov_deg(53.13);

        let commands = connect_greeting(&CalibrationStore::new(&path), &session);
        assert_eq!(commands.len(), 1);
        assert_eq!(session.fov_deg(), 53.13);
        assert!(session.saved_calibration().is_none());
    }

    #[test]
    fn greeting_skips_missing_or_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration_settings.txt");
        let session = SessionHandle::new();
        assert!(connect_greeting(&CalibrationStore::new(&path), &session).is_empty());

        fs::write(&path, "wide\n").unwrap();
        assert!(connect_greeting(&CalibrationStore::new(&path), &session).is_empty());
        assert_eq!(session.fov_deg(), 0.0);
    }
}
