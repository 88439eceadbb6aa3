//! Calibration state shared between the UI thread and the vision loop.
//!
//! The wizard writes the stage and the calibrated field of view; the vision
//! loop writes the marker measurement and the latest tracking angles. A saved
//! calibration may seed the field of view once, and only while nothing has
//! been calibrated in this process. Scalars live in atomics so neither side
//! ever blocks the other.

use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
};

use detection::DetectorKind;
use renderer_link::TrackingAngles;
use serde::Serialize;

use crate::calibration::params::DerivedParameters;

// Field of view before any calibration has been applied.
const UNCALIBRATED_FOV: f64 = 0.0;

/// Wizard progress. Transitions only move forward; `Done` may restart the
/// wizard at `FovCapture`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStage {
    Idle,
    FovCapture,
    Measurement,
    DisplayDensity,
    Done,
}

impl CalibrationStage {
    pub fn label(self) -> &'static str {
        match self {
            CalibrationStage::Idle => "idle",
            CalibrationStage::FovCapture => "fov_capture",
            CalibrationStage::Measurement => "measurement",
            CalibrationStage::DisplayDensity => "display_density",
            CalibrationStage::Done => "done",
        }
    }

    /// Detection strategy the vision loop runs while in this stage.
    pub fn detector_kind(self) -> DetectorKind {
        match self {
            CalibrationStage::FovCapture => DetectorKind::Marker,
            _ => DetectorKind::Face,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            CalibrationStage::Idle => 0,
            CalibrationStage::FovCapture => 1,
            CalibrationStage::Measurement => 2,
            CalibrationStage::DisplayDensity => 3,
            CalibrationStage::Done => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => CalibrationStage::FovCapture,
            2 => CalibrationStage::Measurement,
            3 => CalibrationStage::DisplayDensity,
            4 => CalibrationStage::Done,
            _ => CalibrationStage::Idle,
        }
    }
}

impl fmt::Display for CalibrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

struct SessionShared {
    stage: AtomicU8,
    fov_bits: AtomicU64,
    // NaN bits mean no marker has been measured yet.
    marker_bits: AtomicU64,
    tracking_enabled: AtomicBool,
    latest_angles: Mutex<Option<TrackingAngles>>,
    saved: Mutex<Option<DerivedParameters>>,
}

/// Cloneable accessor to the live calibration session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SessionShared {
                stage: AtomicU8::new(CalibrationStage::Idle.to_u8()),
                fov_bits: AtomicU64::new(UNCALIBRATED_FOV.to_bits()),
                marker_bits: AtomicU64::new(f64::NAN.to_bits()),
                tracking_enabled: AtomicBool::new(true),
                latest_angles: Mutex::new(None),
                saved: Mutex::new(None),
            }),
        }
    }

    pub fn stage(&self) -> CalibrationStage {
        CalibrationStage::from_u8(self.shared.stage.load(Ordering::Acquire))
    }

    pub(crate) fn set_stage(&self, stage: CalibrationStage) {
        self.shared.stage.store(stage.to_u8(), Ordering::Release);
    }

    pub fn detector_kind(&self) -> DetectorKind {
        self.stage().detector_kind()
    }

    /// Calibrated camera field of view in degrees.
    pub fn fov_deg(&self) -> f64 {
        f64::from_bits(self.shared.fov_bits.load(Ordering::Acquire))
    }

    pub(crate) fn set_fov_deg(&self, fov_deg: f64) {
        self.shared
            .fov_bits
            .store(fov_deg.to_bits(), Ordering::Release);
    }

    /// Latest marker inverse proportion reported by marker detection.
    pub fn marker_inverse_proportion(&self) -> Option<f64> {
        let value = f64::from_bits(self.shared.marker_bits.load(Ordering::Acquire));
        (!value.is_nan()).then_some(value)
    }

    pub fn record_marker(&self, inverse_proportion: f64) {
        self.shared
            .marker_bits
            .store(inverse_proportion.to_bits(), Ordering::Release);
    }

    /// Forget the marker measurement so a new run starts without one.
    pub(crate) fn clear_marker(&self) {
        self.shared
            .marker_bits
            .store(f64::NAN.to_bits(), Ordering::Release);
    }

    /// Adopt a persisted calibration if the field of view is still
    /// uncalibrated. Returns `false` when a calibration already took effect.
    pub(crate) fn seed_saved_calibration(&self, params: DerivedParameters) -> bool {
        let mut saved = match self.shared.saved.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let seeded = self
            .shared
            .fov_bits
            .compare_exchange(
                UNCALIBRATED_FOV.to_bits(),
                params.fov_deg.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if seeded {
            *saved = Some(params);
        }
        seeded
    }

    /// Calibration adopted from disk, if any.
    pub fn saved_calibration(&self) -> Option<DerivedParameters> {
        match self.shared.saved.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn tracking_enabled(&self) -> bool {
        self.shared.tracking_enabled.load(Ordering::Relaxed)
    }

    pub fn set_tracking_enabled(&self, enabled: bool) {
        self.shared
            .tracking_enabled
            .store(enabled, Ordering::Relaxed);
    }

    pub fn latest_angles(&self) -> Option<TrackingAngles> {
        match self.shared.latest_angles.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn record_angles(&self, angles: TrackingAngles) {
        match self.shared.latest_angles.lock() {
            Ok(mut guard) => *guard = Some(angles),
            Err(poisoned) => *poisoned.into_inner() = Some(angles),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fov_capture_runs_the_marker_detector() {
        let session = SessionHandle::new();
        assert_eq!(session.stage(), CalibrationStage::Idle);
        assert_eq!(session.detector_kind(), DetectorKind::Face);

        session.set_stage(CalibrationStage::FovCapture);
        assert_eq!(session.detector_kind(), DetectorKind::Marker);

        for stage in [
            CalibrationStage::Measurement,
            CalibrationStage::DisplayDensity,
            CalibrationStage::Done,
        ] {
            session.set_stage(stage);
            assert_eq!(session.stage(), stage);
            assert_eq!(session.detector_kind(), DetectorKind::Face);
        }
    }

    #[test]
    fn marker_measurement_starts_absent() {
        let session = SessionHandle::new();
        assert_eq!(session.marker_inverse_proportion(), None);
        session.record_marker(3.75);
        assert_eq!(session.marker_inverse_proportion(), Some(3.75));
    }

    #[test]
    fn clearing_the_marker_forgets_the_last_measurement() {
        let session = SessionHandle::new();
        session.record_marker(4.0);
        session.clear_marker();
        assert_eq!(session.marker_inverse_proportion(), None);
    }

    #[test]
    fn saved_calibration_only_seeds_an_uncalibrated_session() {
        let saved = DerivedParameters {
            fov_deg: 10.0,
            pixels_per_lens: 2.5,
            index_of_refraction: 1.4,
        };

        let fresh = SessionHandle::new();
        assert!(fresh.seed_saved_calibration(saved));
        assert_eq!(fresh.fov_deg(), 10.0);
        assert_eq!(fresh.saved_calibration(), Some(saved));

        let calibrated = SessionHandle::new();
        calibrated.set_fov_deg(53.0);
        assert!(!calibrated.seed_saved_calibration(saved));
        assert_eq!(calibrated.fov_deg(), 53.0);
        assert_eq!(calibrated.saved_calibration(), None);
    }

    #[test]
    fn clones_observe_the_same_session() {
        let ui = SessionHandle::new();
        let vision = ui.clone();
        ui.set_fov_deg(61.5);
        ui.set_tracking_enabled(false);
        vision.record_angles(TrackingAngles {
            left_horizontal: 1.0,
            ..TrackingAngles::default()
        });

        assert_eq!(vision.fov_deg(), 61.5);
        assert!(!vision.tracking_enabled());
        assert_eq!(ui.latest_angles().map(|a| a.left_horizontal), Some(1.0));
    }
}
