//! Fixed-rate capture → detect → publish loop.
//!
//! The loop owns the frame source and the detectors. Each tick it runs the
//! detector the calibration stage asks for, forwards measurements to the
//! session and the tracking sink, and publishes the annotated frame for the
//! UI. Failures only cost the current tick.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use detection::{DetectorSet, Measurement};
use tracing::{debug, warn};
use video_ingest::{CaptureError, FrameSource};

use crate::{
    calibration::SessionHandle,
    telemetry,
    vision::{
        data::{DisplayChannel, ProcessedFrame},
        tracking::TrackingSink,
        watchdog::{HealthComponent, LoopHealth},
    },
};

/// What a single tick accomplished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// No frame could be acquired.
    NoFrame,
    /// A frame was published; `tracked` tells whether eye offsets were found.
    Published { tracked: bool },
}

pub(crate) struct VisionLoop {
    source: Box<dyn FrameSource>,
    detectors: DetectorSet,
    display: DisplayChannel,
    tracking: TrackingSink,
    session: SessionHandle,
    health: Arc<LoopHealth>,
    period: Duration,
    verbose: bool,
    sequence: u64,
    overruns: u64,
    last_capture_error: Option<String>,
}

impl VisionLoop {
    pub(crate) fn new(
        source: Box<dyn FrameSource>,
        detectors: DetectorSet,
        display: DisplayChannel,
        tracking: TrackingSink,
        session: SessionHandle,
        health: Arc<LoopHealth>,
        period: Duration,
        verbose: bool,
    ) -> Self {
        Self {
            source,
            detectors,
            display,
            tracking,
            session,
            health,
            period,
            verbose,
            sequence: 0,
            overruns: 0,
            last_capture_error: None,
        }
    }

    /// Run on a dedicated thread until `running` is cleared.
    ///
    /// The frame source is dropped, releasing the camera, before the thread
    /// exits.
    pub(crate) fn spawn(self, running: Arc<AtomicBool>) -> io::Result<thread::JoinHandle<()>> {
        telemetry::spawn_thread("vision-loop", move || self.run(&running))
    }

    pub(crate) fn run(mut self, running: &AtomicBool) {
        let span = tracing::info_span!(
            "vision.loop",
            source = %self.source.name(),
            period_ms = self.period.as_secs_f64() * 1_000.0
        );
        let _guard = span.enter();
        debug!("vision loop started");

        while running.load(Ordering::Relaxed) {
            let started = Instant::now();
            self.tick();
            let elapsed = started.elapsed();
            metrics::histogram!("vision_tick_seconds").record(elapsed.as_secs_f64());
            if let Some(remaining) = self.pace(elapsed) {
                thread::sleep(remaining);
            }
        }
        debug!(
            frames = self.sequence,
            overruns = self.overruns,
            "vision loop stopped"
        );
    }

    /// Time left in the current period, or `None` when the tick overran it.
    fn pace(&mut self, elapsed: Duration) -> Option<Duration> {
        match self.period.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => Some(remaining),
            _ => {
                self.overruns += 1;
                metrics::counter!("vision_tick_overruns_total").increment(1);
                if self.verbose {
                    debug!(elapsed_ms = elapsed.as_millis() as u64, "vision tick overran");
                }
                None
            }
        }
    }

    pub(crate) fn tick(&mut self) -> TickOutcome {
        let kind = self.session.detector_kind();

        let frame = match self.source.grab() {
            Ok(frame) => {
                self.last_capture_error = None;
                frame
            }
            Err(err) => {
                self.report_capture_error(&err);
                return TickOutcome::NoFrame;
            }
        };
        self.health.beat(HealthComponent::Capture);
        self.sequence = self.sequence.wrapping_add(1);

        let detector = self.detectors.get_mut(kind);
        let (annotated, measurement) = match detector.detect(&frame) {
            Ok(detection) => (detection.annotated, detection.measurement),
            Err(err) => {
                metrics::counter!("vision_detector_errors_total", "detector" => kind.label())
                    .increment(1);
                debug!(detector = %kind, "detection failed: {err}");
                (frame, None)
            }
        };
        self.health.beat(HealthComponent::Detection);

        let mut tracked = false;
        match measurement {
            Some(Measurement::Eyes(offsets)) => {
                tracked = true;
                self.tracking.submit(&offsets);
            }
            Some(Measurement::MarkerScale { inverse_proportion }) => {
                self.session.record_marker(inverse_proportion);
            }
            None => {}
        }

        self.display
            .publish(ProcessedFrame::from_frame(&annotated, self.sequence, kind));
        metrics::counter!("vision_frames_published_total").increment(1);
        TickOutcome::Published { tracked }
    }

    fn report_capture_error(&mut self, err: &CaptureError) {
        metrics::counter!("vision_capture_errors_total").increment(1);
        let message = err.to_string();
        if self.last_capture_error.as_deref() != Some(message.as_str()) {
            warn!("frame capture failed: {message}");
            self.last_capture_error = Some(message);
        }
    }
}
