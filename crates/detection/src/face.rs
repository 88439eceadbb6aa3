//! YuNet face detector producing per-eye offsets for head tracking.

use std::path::Path;

use opencv::{
    core::{Mat, Point, Ptr, Rect, Scalar, Size},
    imgproc,
    objdetect::FaceDetectorYN,
    prelude::*,
};
use tracing::{debug, info};
use video_ingest::Frame;

use crate::{
    cv::{frame_to_mat, mat_to_frame},
    detector::{DetectError, Detection, Detector, DetectorKind, EyeOffsets, Measurement},
    geometry::offset_from_center,
};

const SCORE_THRESHOLD: f32 = 0.9;
const NMS_THRESHOLD: f32 = 0.3;
const TOP_K: i32 = 1;

// YuNet row layout: x, y, w, h, right eye (x, y), left eye (x, y), nose,
// mouth corners, score.
const COL_RIGHT_EYE: i32 = 4;
const COL_LEFT_EYE: i32 = 6;

pub struct FaceDetector {
    detector: Ptr<FaceDetectorYN>,
    input_size: Option<(u32, u32)>,
}

impl FaceDetector {
    /// Load the ONNX face model at `model_path`.
    pub fn load(model_path: &Path) -> Result<Self, DetectError> {
        let path = model_path.to_string_lossy();
        if !model_path.is_file() {
            return Err(DetectError::Model {
                path: path.into_owned(),
            });
        }
        let detector = FaceDetectorYN::create(
            &path,
            "",
            Size::new(1, 1),
            SCORE_THRESHOLD,
            NMS_THRESHOLD,
            TOP_K,
            0,
            0,
        )
        .map_err(|e| DetectError::Backend(e.into()))?;
        info!(model = %path, "face detector loaded");
        Ok(Self {
            detector,
            input_size: None,
        })
    }

    fn ensure_input_size(&mut self, frame: &Frame) -> Result<(), DetectError> {
        let size = (frame.width, frame.height);
        if self.input_size != Some(size) {
            self.detector
                .set_input_size(Size::new(frame.width as i32, frame.height as i32))
                .map_err(|e| DetectError::Backend(e.into()))?;
            debug!(width = size.0, height = size.1, "face detector input resized");
            self.input_size = Some(size);
        }
        Ok(())
    }
}

impl Detector for FaceDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Face
    }

    fn detect(&mut self, frame: &Frame) -> Result<Detection, DetectError> {
        self.ensure_input_size(frame)?;
        let mut image = frame_to_mat(frame, DetectorKind::Face)?;
        let mut faces = Mat::default();
        self.detector
            .detect(&image, &mut faces)
            .map_err(|e| DetectError::Backend(e.into()))?;

        if faces.rows() < 1 {
            return Ok(Detection {
                annotated: mat_to_frame(&image, frame)?,
                measurement: None,
            });
        }

        let at = |col: i32| -> Result<f32, DetectError> {
            faces
                .at_2d::<f32>(0, col)
                .copied()
                .map_err(|e| DetectError::Backend(e.into()))
        };
        let bbox = Rect::new(
            at(0)?.round() as i32,
            at(1)?.round() as i32,
            at(2)?.round() as i32,
            at(3)?.round() as i32,
        );
        let right_eye = (at(COL_RIGHT_EYE)?, at(COL_RIGHT_EYE + 1)?);
        let left_eye = (at(COL_LEFT_EYE)?, at(COL_LEFT_EYE + 1)?);

        imgproc::rectangle(
            &mut image,
            bbox,
            Scalar::new(0.0, 255.0, 0.0, 0.0),
            2,
            imgproc::LINE_8,
            0,
        )
        .map_err(|e| DetectError::Backend(e.into()))?;
        for (eye, color) in [
            (left_eye, Scalar::new(255.0, 0.0, 0.0, 0.0)),
            (right_eye, Scalar::new(0.0, 0.0, 255.0, 0.0)),
        ] {
            imgproc::circle(
                &mut image,
                Point::new(eye.0.round() as i32, eye.1.round() as i32),
                4,
                color,
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )
            .map_err(|e| DetectError::Backend(e.into()))?;
        }

        let offsets = EyeOffsets {
            left: offset_from_center(left_eye.0, left_eye.1, frame.width, frame.height),
            right: offset_from_center(right_eye.0, right_eye.1, frame.width, frame.height),
        };

        Ok(Detection {
            annotated: mat_to_frame(&image, frame)?,
            measurement: Some(Measurement::Eyes(offsets)),
        })
    }
}
