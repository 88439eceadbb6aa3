use anyhow::Error;
use thiserror::Error;

/// Packed 8-bit frame captured from (or derived from) a video source.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row. Always at least `width * 3` for the packed formats.
    pub stride: usize,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Rgb8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        3
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source {uri:?} is not available in this build (enable the `opencv` feature)")]
    Unsupported { uri: String },
    #[error("camera returned an empty frame")]
    EmptyFrame,
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error(transparent)]
    Other(#[from] Error),
}

impl Frame {
    /// Wrap a tightly packed buffer, checking its length against the dimensions.
    pub fn packed(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
        timestamp_ms: i64,
    ) -> Result<Self, CaptureError> {
        let stride = width as usize * format.bytes_per_pixel();
        let expected = stride * height as usize;
        if data.len() != expected {
            return Err(CaptureError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
            timestamp_ms,
            format,
        })
    }

    /// Copy the frame into a tightly packed RGB8 buffer, dropping any row padding.
    pub fn to_rgb8(&self) -> Frame {
        let row_bytes = self.width as usize * 3;
        let mut data = Vec::with_capacity(row_bytes * self.height as usize);
        // `chunks` panics on a zero stride; zero-width frames have no rows to copy.
        if row_bytes > 0 && self.stride > 0 {
            for row in self.data.chunks(self.stride).take(self.height as usize) {
                let row = &row[..row_bytes.min(row.len())];
                match self.format {
                    FrameFormat::Rgb8 => data.extend_from_slice(row),
                    FrameFormat::Bgr8 => {
                        for px in row.chunks_exact(3) {
                            data.extend_from_slice(&[px[2], px[1], px[0]]);
                        }
                    }
                }
            }
        }
        Frame {
            data,
            width: self.width,
            height: self.height,
            stride: row_bytes,
            timestamp_ms: self.timestamp_ms,
            format: FrameFormat::Rgb8,
        }
    }
}
