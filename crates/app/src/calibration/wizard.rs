//! Stage machine behind the calibration screens.
//!
//! Each public operation is one "continue" action of the UI. Operations
//! validate the stage first, parse their inputs, and only then touch the
//! renderer, so a rejected action never emits a command.

use std::sync::Arc;

use renderer_link::{CommandSink, RendererCommand, SendOutcome};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::calibration::{
    params::{self, DerivedParameters, WorkingParameters},
    session::{CalibrationStage, SessionHandle},
    store::CalibrationStore,
};

#[derive(Debug, Error, PartialEq)]
pub enum WizardError {
    #[error("cannot {action} during the {actual} stage")]
    WrongStage {
        action: &'static str,
        actual: CalibrationStage,
    },
    #[error("invalid {field}: {value:?} is not a number")]
    InvalidField { field: &'static str, value: String },
    #[error("invalid {field}: {value:?} must be greater than zero")]
    NotPositive { field: &'static str, value: String },
    #[error("{field} is not finite for these measurements")]
    NotFinite { field: &'static str },
}

pub struct CalibrationWizard {
    session: SessionHandle,
    link: Arc<dyn CommandSink>,
    store: CalibrationStore,
    working: WorkingParameters,
    derived: DerivedParameters,
    // Set once a run in this process has written derived values.
    computed: bool,
}

impl CalibrationWizard {
    pub fn new(session: SessionHandle, link: Arc<dyn CommandSink>, store: CalibrationStore) -> Self {
        let derived = DerivedParameters {
            fov_deg: session.fov_deg(),
            ..DerivedParameters::default()
        };
        Self {
            session,
            link,
            store,
            working: WorkingParameters::default(),
            derived,
            computed: false,
        }
    }

    pub fn stage(&self) -> CalibrationStage {
        self.session.stage()
    }

    pub fn working(&self) -> &WorkingParameters {
        &self.working
    }

    /// Current derived parameters. Before the first run computes anything,
    /// a calibration loaded from disk stands in.
    pub fn derived(&self) -> DerivedParameters {
        if self.computed {
            return self.derived;
        }
        self.session.saved_calibration().unwrap_or(self.derived)
    }

    /// Begin a calibration run: the vision loop switches to marker detection.
    pub fn start(&mut self) -> Result<(), WizardError> {
        self.expect_stage("start calibration", &[CalibrationStage::Idle, CalibrationStage::Done])?;
        self.session.clear_marker();
        self.session.set_stage(CalibrationStage::FovCapture);
        info!("calibration started; show the marker to the camera");
        Ok(())
    }

    /// Freeze the current marker measurement and switch back to face detection.
    ///
    /// Returns the inverse proportion that will scale the field of view.
    pub fn capture_fov(&mut self) -> Result<f64, WizardError> {
        self.expect_stage("capture the marker", &[CalibrationStage::FovCapture])?;
        let inverse_proportion = match self.session.marker_inverse_proportion() {
            Some(value) => value,
            None => {
                warn!("no marker measured yet; assuming it spans the whole frame");
                1.0
            }
        };
        self.working.marker_inverse_proportion = inverse_proportion;
        self.session.set_stage(CalibrationStage::Measurement);
        info!(inverse_proportion, "marker captured");
        Ok(inverse_proportion)
    }

    /// Apply the marker distance, lenticule density and index of refraction.
    ///
    /// Fields are applied in order as they parse. When a later field is
    /// rejected the earlier ones stay applied, the stage is unchanged and no
    /// command is sent.
    pub fn submit_measurements(
        &mut self,
        marker_distance: &str,
        lenticule_density: &str,
        index_of_refraction: &str,
    ) -> Result<f64, WizardError> {
        self.expect_stage("submit measurements", &[CalibrationStage::Measurement])?;

        self.working.marker_distance = parse_field("marker distance", marker_distance)?;
        self.working.lenticule_density =
            parse_positive("lenticule density", lenticule_density)?;
        let ior = parse_field("index of refraction", index_of_refraction)?;

        let fov_deg = params::field_of_view_deg(
            self.working.marker_distance,
            self.working.marker_inverse_proportion,
        );
        if !self.computed {
            self.derived = self.derived();
            self.computed = true;
        }
        self.derived.index_of_refraction = ior;
        self.derived.fov_deg = fov_deg;
        self.session.set_fov_deg(fov_deg);
        info!(
            marker_distance = self.working.marker_distance,
            lenticule_density = self.working.lenticule_density,
            index_of_refraction = ior,
            fov_deg,
            "measurements accepted"
        );

        self.emit(RendererCommand::EnterMeasurementMode);
        self.session.set_stage(CalibrationStage::DisplayDensity);
        Ok(fov_deg)
    }

    /// Finish the run from the green-to-red line distance shown by the renderer.
    pub fn submit_display_density(
        &mut self,
        green_to_red_distance: &str,
    ) -> Result<DerivedParameters, WizardError> {
        self.expect_stage("submit the display density", &[CalibrationStage::DisplayDensity])?;

        self.working.green_to_red_distance =
            parse_positive("green to red line distance", green_to_red_distance)?;
        let pixels_per_lens = params::pixels_per_lens(
            self.working.green_to_red_distance,
            self.working.lenticule_density,
        );
        if !pixels_per_lens.is_finite() {
            return Err(WizardError::NotFinite {
                field: "pixels per lens",
            });
        }
        self.derived.pixels_per_lens = pixels_per_lens;
        info!(
            pixels_per_lens = self.derived.pixels_per_lens,
            "display density accepted"
        );

        self.emit(RendererCommand::ExitMeasurementMode);
        self.emit(display_parameters_command(&self.derived));

        if let Err(err) = self.store.save(&self.derived) {
            error!("failed to persist calibration: {err}");
        } else {
            debug!(path = %self.store.path().display(), "calibration persisted");
        }

        self.session.set_stage(CalibrationStage::Done);
        Ok(self.derived)
    }

    fn expect_stage(
        &self,
        action: &'static str,
        allowed: &[CalibrationStage],
    ) -> Result<(), WizardError> {
        let actual = self.stage();
        if allowed.contains(&actual) {
            Ok(())
        } else {
            Err(WizardError::WrongStage { action, actual })
        }
    }

    fn emit(&self, command: RendererCommand) {
        let label = command.label();
        match self.link.send(command) {
            Ok(SendOutcome::Queued) => debug!(command = label, "renderer command queued"),
            Ok(SendOutcome::NotConnected) => {
                warn!(command = label, "renderer not connected; command not delivered")
            }
            Ok(SendOutcome::Dropped) => warn!(command = label, "renderer command dropped"),
            Err(err) => warn!(command = label, "failed to send renderer command: {err}"),
        }
    }
}

/// The command that pushes persisted display parameters to the renderer.
pub fn display_parameters_command(params: &DerivedParameters) -> RendererCommand {
    RendererCommand::SetDisplayParameters {
        pixels_per_lens: params.pixels_per_lens as f32,
        index_of_refraction: params.index_of_refraction as f32,
    }
}

fn parse_field(field: &'static str, raw: &str) -> Result<f64, WizardError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| WizardError::InvalidField {
            field,
            value: raw.to_string(),
        })
}

fn parse_positive(field: &'static str, raw: &str) -> Result<f64, WizardError> {
    let value = parse_field(field, raw)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err(WizardError::NotPositive {
            field,
            value: raw.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::test_support::RecordingSink;

    struct Harness {
        wizard: CalibrationWizard,
        session: SessionHandle,
        sink: Arc<RecordingSink>,
        store: CalibrationStore,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path().join("calibration_settings.txt"));
        let session = SessionHandle::new();
        let sink = Arc::new(RecordingSink::connected());
        let wizard = CalibrationWizard::new(session.clone(), sink.clone(), store.clone());
        Harness {
            wizard,
            session,
            sink,
            store,
            _dir: dir,
        }
    }

    fn advance_to_measurement(h: &mut Harness, inverse_proportion: f64) {
        h.wizard.start().unwrap();
        h.session.record_marker(inverse_proportion);
        h.wizard.capture_fov().unwrap();
    }

    #[test]
    fn full_run_sends_commands_in_order_and_persists() {
        let mut h = harness();
        advance_to_measurement(&mut h, 1.0);

        let fov = h.wizard.submit_measurements("6", "100", "1.49").unwrap();
        assert_relative_eq!(fov, 53.130_102_354_155_98, epsilon = 1e-9);
        assert_relative_eq!(h.session.fov_deg(), fov);
        assert_eq!(h.wizard.stage(), CalibrationStage::DisplayDensity);

        let derived = h.wizard.submit_display_density("2.0").unwrap();
        assert_relative_eq!(derived.pixels_per_lens, 2.5);
        assert_eq!(h.wizard.stage(), CalibrationStage::Done);

        assert_eq!(
            h.sink.commands(),
            vec![
                RendererCommand::EnterMeasurementMode,
                RendererCommand::ExitMeasurementMode,
                RendererCommand::SetDisplayParameters {
                    pixels_per_lens: 2.5,
                    index_of_refraction: 1.49,
                },
            ]
        );

        let saved = h.store.load().unwrap().unwrap();
        assert_relative_eq!(saved.fov_deg, fov);
        assert_relative_eq!(saved.pixels_per_lens, 2.5);
        assert_relative_eq!(saved.index_of_refraction, 1.49);
    }

    #[test]
    fn stage_drives_detector_selection() {
        let mut h = harness();
        assert_eq!(h.session.detector_kind(), detection::DetectorKind::Face);
        h.wizard.start().unwrap();
        assert_eq!(h.session.detector_kind(), detection::DetectorKind::Marker);
        h.wizard.capture_fov().unwrap();
        assert_eq!(h.session.detector_kind(), detection::DetectorKind::Face);
    }

    #[test]
    fn non_numeric_measurement_keeps_stage_and_sends_nothing() {
        let mut h = harness();
        advance_to_measurement(&mut h, 2.0);

        let err = h.wizard.submit_measurements("6", "abc", "1.5").unwrap_err();
        assert_eq!(
            err,
            WizardError::InvalidField {
                field: "lenticule density",
                value: "abc".into(),
            }
        );
        assert_eq!(h.wizard.stage(), CalibrationStage::Measurement);
        assert!(h.sink.commands().is_empty());
        assert_eq!(h.session.fov_deg(), 0.0);
        // Fields before the rejected one stay applied.
        assert_eq!(h.wizard.working().marker_distance, 6.0);
        assert_eq!(h.wizard.working().lenticule_density, 0.0);
    }

    #[test]
    fn rejected_density_keeps_stage() {
        let mut h = harness();
        advance_to_measurement(&mut h, 1.0);
        h.wizard.submit_measurements("6", "100", "1.5").unwrap();
        let sent = h.sink.commands().len();

        assert!(h.wizard.submit_display_density("").is_err());
        assert!(h.wizard.submit_display_density("inf").is_err());
        assert_eq!(h.wizard.stage(), CalibrationStage::DisplayDensity);
        assert_eq!(h.sink.commands().len(), sent);
        assert!(h.store.load().unwrap().is_none());
    }

    #[test]
    fn zero_divisors_are_rejected_before_anything_is_sent() {
        let mut h = harness();
        advance_to_measurement(&mut h, 1.0);
        assert_eq!(
            h.wizard.submit_measurements("6", "0", "1.5").unwrap_err(),
            WizardError::NotPositive {
                field: "lenticule density",
                value: "0".into(),
            }
        );
        assert_eq!(h.wizard.stage(), CalibrationStage::Measurement);

        h.wizard.submit_measurements("6", "100", "1.5").unwrap();
        let sent = h.sink.commands().len();
        assert_eq!(
            h.wizard.submit_display_density("0").unwrap_err(),
            WizardError::NotPositive {
                field: "green to red line distance",
                value: "0".into(),
            }
        );
        assert!(h.wizard.submit_display_density("-2").is_err());
        assert_eq!(h.wizard.stage(), CalibrationStage::DisplayDensity);
        assert_eq!(h.sink.commands().len(), sent);
        assert!(h.store.load().unwrap().is_none());
    }

    #[test]
    fn overflowing_pixels_per_lens_is_rejected() {
        let mut h = harness();
        advance_to_measurement(&mut h, 1.0);
        h.wizard.submit_measurements("6", "1e-300", "1.5").unwrap();
        assert_eq!(
            h.wizard.submit_display_density("1e-300").unwrap_err(),
            WizardError::NotFinite {
                field: "pixels per lens",
            }
        );
        assert_eq!(h.wizard.stage(), CalibrationStage::DisplayDensity);
        assert!(h.store.load().unwrap().is_none());
    }

    #[test]
    fn rerun_without_marker_does_not_reuse_the_previous_measurement() {
        let mut h = harness();
        advance_to_measurement(&mut h, 4.0);
        h.wizard.submit_measurements("6", "100", "1.5").unwrap();
        h.wizard.submit_display_density("2").unwrap();

        h.wizard.start().unwrap();
        assert_eq!(h.session.marker_inverse_proportion(), None);
        assert_eq!(h.wizard.capture_fov().unwrap(), 1.0);
    }

    #[test]
    fn saved_calibration_shows_until_a_run_computes_values() {
        let mut h = harness();
        let saved = DerivedParameters {
            fov_deg: 10.0,
            pixels_per_lens: 3.0,
            index_of_refraction: 1.4,
        };
        assert!(h.session.seed_saved_calibration(saved));
        assert_eq!(h.wizard.derived(), saved);

        advance_to_measurement(&mut h, 1.0);
        let fov = h.wizard.submit_measurements("6", "100", "1.5").unwrap();
        let derived = h.wizard.derived();
        assert_relative_eq!(derived.fov_deg, fov);
        assert_relative_eq!(derived.index_of_refraction, 1.5);
        // Not recomputed until the density step.
        assert_relative_eq!(derived.pixels_per_lens, 3.0);
    }

    #[test]
    fn late_saved_calibration_does_not_override_a_new_run() {
        let mut h = harness();
        advance_to_measurement(&mut h, 1.0);
        let fov = h.wizard.submit_measurements("6", "100", "1.5").unwrap();

        let stale = DerivedParameters {
            fov_deg: 10.0,
            pixels_per_lens: 3.0,
            index_of_refraction: 1.4,
        };
        assert!(!h.session.seed_saved_calibration(stale));
        assert_relative_eq!(h.session.fov_deg(), fov);

        let derived = h.wizard.submit_display_density("2").unwrap();
        assert_relative_eq!(derived.fov_deg, fov);
        assert_relative_eq!(h.session.fov_deg(), fov);
        assert_relative_eq!(h.store.load().unwrap().unwrap().fov_deg, fov);
    }

    #[test]
    fn actions_out_of_order_are_rejected() {
        let mut h = harness();
        assert!(matches!(
            h.wizard.capture_fov(),
            Err(WizardError::WrongStage {
                actual: CalibrationStage::Idle,
                ..
            })
        ));
        assert!(h.wizard.submit_measurements("6", "100", "1.5").is_err());
        h.wizard.start().unwrap();
        assert!(h.wizard.start().is_err());
        assert!(h.wizard.submit_display_density("2").is_err());
        assert!(h.sink.commands().is_empty());
    }

    #[test]
    fn missing_marker_falls_back_to_unit_proportion() {
        let mut h = harness();
        h.wizard.start().unwrap();
        assert_eq!(h.wizard.capture_fov().unwrap(), 1.0);
        assert_eq!(h.wizard.working().marker_inverse_proportion, 1.0);
    }

    #[test]
    fn finished_wizard_can_run_again() {
        let mut h = harness();
        advance_to_measurement(&mut h, 1.0);
        h.wizard.submit_measurements("6", "100", "1.5").unwrap();
        h.wizard.submit_display_density("2").unwrap();

        h.wizard.start().unwrap();
        assert_eq!(h.wizard.stage(), CalibrationStage::FovCapture);
        // Previous values survive until overwritten.
        assert_eq!(h.wizard.working().lenticule_density, 100.0);
    }

    #[test]
    fn disconnected_renderer_does_not_block_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path().join("calibration_settings.txt"));
        let session = SessionHandle::new();
        let sink = Arc::new(RecordingSink::disconnected());
        let mut wizard = CalibrationWizard::new(session.clone(), sink.clone(), store);

        wizard.start().unwrap();
        wizard.capture_fov().unwrap();
        wizard.submit_measurements("10", "60", "1.5").unwrap();
        wizard.submit_display_density("4").unwrap();
        assert_eq!(wizard.stage(), CalibrationStage::Done);
        assert!(sink.commands().is_empty());
    }
}
