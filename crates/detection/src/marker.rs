//! QR-code marker detector used during field-of-view capture.

use opencv::{
    core::{Point, Point2f, Scalar, Vector},
    imgproc,
    objdetect::QRCodeDetector,
    prelude::*,
};
use tracing::trace;
use video_ingest::Frame;

use crate::{
    cv::{frame_to_mat, mat_to_frame},
    detector::{DetectError, Detection, Detector, DetectorKind, Measurement},
    geometry::marker_inverse_proportion,
};

pub struct MarkerDetector {
    detector: QRCodeDetector,
}

impl MarkerDetector {
    pub fn new() -> Result<Self, DetectError> {
        let detector = QRCodeDetector::default().map_err(|e| DetectError::Backend(e.into()))?;
        Ok(Self { detector })
    }
}

impl Detector for MarkerDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Marker
    }

    fn detect(&mut self, frame: &Frame) -> Result<Detection, DetectError> {
        let mut image = frame_to_mat(frame, DetectorKind::Marker)?;
        let mut points = Vector::<Point2f>::new();
        let found = self
            .detector
            .detect(&image, &mut points)
            .map_err(|e| DetectError::Backend(e.into()))?;

        let mut measurement = None;
        if found && points.len() == 4 {
            let corners: Vec<(f32, f32)> = points.iter().map(|p| (p.x, p.y)).collect();
            let quad = [corners[0], corners[1], corners[2], corners[3]];
            if let Some(inverse_proportion) = marker_inverse_proportion(frame.width, &quad) {
                trace!(inverse_proportion, "marker located");
                measurement = Some(Measurement::MarkerScale { inverse_proportion });
            }

            let outline = Scalar::new(0.0, 255.0, 0.0, 0.0);
            for idx in 0..4 {
                let a = quad[idx];
                let b = quad[(idx + 1) % 4];
                imgproc::line(
                    &mut image,
                    Point::new(a.0.round() as i32, a.1.round() as i32),
                    Point::new(b.0.round() as i32, b.1.round() as i32),
                    outline,
                    3,
                    imgproc::LINE_8,
                    0,
                )
                .map_err(|e| DetectError::Backend(e.into()))?;
            }
        }

        Ok(Detection {
            annotated: mat_to_frame(&image, frame)?,
            measurement,
        })
    }
}
