use std::fmt;

use thiserror::Error;
use video_ingest::Frame;

/// Which detection strategy the vision loop should run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Marker,
    Face,
}

impl DetectorKind {
    pub fn label(self) -> &'static str {
        match self {
            DetectorKind::Marker => "marker",
            DetectorKind::Face => "face",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Eye positions expressed as proportions of the half-frame, in image axes
/// (x grows right, y grows down), so the frame centre is `(0, 0)` and the
/// edges sit at `±1`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EyeOffsets {
    pub left: (f64, f64),
    pub right: (f64, f64),
}

/// Quantity extracted from a frame alongside its annotation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Measurement {
    /// Ratio of frame width to the detected marker's width, both in pixels.
    MarkerScale { inverse_proportion: f64 },
    /// Per-eye offsets from the frame centre.
    Eyes(EyeOffsets),
}

/// Output of a single detector invocation.
pub struct Detection {
    pub annotated: Frame,
    pub measurement: Option<Measurement>,
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("frame layout not supported by the {kind} detector: {reason}")]
    UnsupportedFrame { kind: DetectorKind, reason: String },
    #[error("failed to load detector model {path:?}")]
    Model { path: String },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A frame-in, annotated-frame-out detection strategy.
pub trait Detector: Send {
    fn kind(&self) -> DetectorKind;

    fn detect(&mut self, frame: &Frame) -> Result<Detection, DetectError>;
}

/// Returns frames untouched and never measures anything.
///
/// Stands in for a strategy whose backend is unavailable (no `opencv` feature,
/// missing model file) so the loop keeps publishing the live feed.
pub struct PassthroughDetector {
    kind: DetectorKind,
}

impl PassthroughDetector {
    pub fn new(kind: DetectorKind) -> Self {
        Self { kind }
    }
}

impl Detector for PassthroughDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn detect(&mut self, frame: &Frame) -> Result<Detection, DetectError> {
        Ok(Detection {
            annotated: frame.clone(),
            measurement: None,
        })
    }
}

/// One detector per [`DetectorKind`], selected per frame by the vision loop.
pub struct DetectorSet {
    marker: Box<dyn Detector>,
    face: Box<dyn Detector>,
}

impl DetectorSet {
    pub fn new(marker: Box<dyn Detector>, face: Box<dyn Detector>) -> Self {
        Self { marker, face }
    }

    pub fn passthrough() -> Self {
        Self::new(
            Box::new(PassthroughDetector::new(DetectorKind::Marker)),
            Box::new(PassthroughDetector::new(DetectorKind::Face)),
        )
    }

    pub fn get_mut(&mut self, kind: DetectorKind) -> &mut dyn Detector {
        match kind {
            DetectorKind::Marker => self.marker.as_mut(),
            DetectorKind::Face => self.face.as_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use video_ingest::FrameFormat;

    use super::*;

    #[test]
    fn passthrough_returns_frame_without_measurement() {
        let frame = Frame::packed(vec![9; 12], 2, 2, FrameFormat::Bgr8, 7).unwrap();
        let mut set = DetectorSet::passthrough();
        let detector = set.get_mut(DetectorKind::Face);
        assert_eq!(detector.kind(), DetectorKind::Face);
        let out = detector.detect(&frame).unwrap();
        assert!(out.measurement.is_none());
        assert_eq!(out.annotated.data, frame.data);
        assert_eq!(set.get_mut(DetectorKind::Marker).kind(), DetectorKind::Marker);
    }
}
