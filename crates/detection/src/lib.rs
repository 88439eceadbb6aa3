//! Detection strategies consumed by the vision loop.
//!
//! Each strategy maps a raw frame to an annotated frame plus an optional
//! measurement: the marker strategy reports how large the calibration marker
//! appears, the face strategy reports where the eyes sit relative to the frame
//! centre. OpenCV-backed strategies require the `opencv` feature; without it
//! [`DetectorSet::load`] hands out pass-through strategies.

#[cfg(feature = "opencv")]
mod cv;
mod detector;
#[cfg(feature = "opencv")]
mod face;
pub mod geometry;
#[cfg(feature = "opencv")]
mod marker;

use std::path::Path;

pub use detector::{
    DetectError, Detection, Detector, DetectorKind, DetectorSet, EyeOffsets, Measurement,
    PassthroughDetector,
};
#[cfg(feature = "opencv")]
pub use face::FaceDetector;
#[cfg(feature = "opencv")]
pub use marker::MarkerDetector;

impl DetectorSet {
    /// Build the compiled-in strategies, falling back to pass-through for any
    /// strategy that fails to initialise.
    #[cfg(feature = "opencv")]
    pub fn load(face_model: &Path) -> Self {
        let marker: Box<dyn Detector> = match MarkerDetector::new() {
            Ok(detector) => Box::new(detector),
            Err(err) => {
                tracing::error!("marker detector unavailable: {err}");
                Box::new(PassthroughDetector::new(DetectorKind::Marker))
            }
        };
        let face: Box<dyn Detector> = match FaceDetector::load(face_model) {
            Ok(detector) => Box::new(detector),
            Err(err) => {
                tracing::error!("face detector unavailable: {err}");
                Box::new(PassthroughDetector::new(DetectorKind::Face))
            }
        };
        Self::new(marker, face)
    }

    /// Build the compiled-in strategies, falling back to pass-through for any
    /// strategy that fails to initialise.
    #[cfg(not(feature = "opencv"))]
    pub fn load(face_model: &Path) -> Self {
        tracing::warn!(
            model = %face_model.display(),
            "built without the `opencv` feature; detection is pass-through"
        );
        Self::passthrough()
    }
}
