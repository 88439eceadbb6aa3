//! Calibration wizard, its shared session, and persistence of the results.

pub mod params;
pub mod session;
pub mod store;
pub mod wizard;

pub use session::{CalibrationStage, SessionHandle};
pub use store::CalibrationStore;
pub use wizard::{CalibrationWizard, display_parameters_command};
