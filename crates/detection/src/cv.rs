//! Conversions between pipeline frames and OpenCV matrices.

use opencv::{
    core::{Mat, MatTraitConstManual},
    prelude::*,
};
use video_ingest::{Frame, FrameFormat};

use crate::detector::{DetectError, DetectorKind};

/// Copy a packed BGR frame into an owned `CV_8UC3` matrix.
pub(crate) fn frame_to_mat(frame: &Frame, kind: DetectorKind) -> Result<Mat, DetectError> {
    if frame.format != FrameFormat::Bgr8 {
        return Err(DetectError::UnsupportedFrame {
            kind,
            reason: format!("expected BGR8, got {:?}", frame.format),
        });
    }
    if frame.stride != frame.width as usize * 3 {
        return Err(DetectError::UnsupportedFrame {
            kind,
            reason: format!("row padding not supported (stride {})", frame.stride),
        });
    }
    let flat = Mat::from_slice(&frame.data).map_err(|e| DetectError::Backend(e.into()))?;
    let shaped = flat
        .reshape(3, frame.height as i32)
        .map_err(|e| DetectError::Backend(e.into()))?;
    shaped
        .try_clone()
        .map_err(|e| DetectError::Backend(e.into()))
}

/// Copy an annotated BGR matrix back into a frame carrying `source`'s timestamp.
pub(crate) fn mat_to_frame(mat: &Mat, source: &Frame) -> Result<Frame, DetectError> {
    let data = mat
        .data_bytes()
        .map_err(|e| DetectError::Backend(e.into()))?
        .to_vec();
    Frame::packed(
        data,
        source.width,
        source.height,
        FrameFormat::Bgr8,
        source.timestamp_ms,
    )
    .map_err(|e| DetectError::Backend(e.into()))
}
