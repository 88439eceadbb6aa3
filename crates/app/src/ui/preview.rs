//! Frame views fed by the UI thread.

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use image::{ImageBuffer, Rgb, codecs::jpeg::JpegEncoder};
use tracing::warn;

use crate::vision::ProcessedFrame;

/// Something that shows processed frames. Called on the UI thread only.
pub(crate) trait FrameView {
    fn show(&mut self, frame: &ProcessedFrame);
}

#[derive(Clone)]
pub(crate) struct FramePacket {
    pub(crate) jpeg: Vec<u8>,
    pub(crate) sequence: u64,
    pub(crate) timestamp_ms: i64,
    pub(crate) detector: &'static str,
}

pub(crate) type SharedPacket = Arc<Mutex<Option<FramePacket>>>;

pub(crate) fn encode_jpeg(frame: &ProcessedFrame, quality: u8) -> Result<FramePacket> {
    let row_bytes = frame.width as usize * 3;
    if frame.stride != row_bytes {
        bail!(
            "frame stride {} does not match packed RGB row of {} bytes",
            frame.stride,
            row_bytes
        );
    }
    let image = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(frame.width, frame.height, &frame.data)
        .ok_or_else(|| anyhow!("frame buffer smaller than {}x{}", frame.width, frame.height))?;
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode_image(&image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(FramePacket {
        jpeg,
        sequence: frame.sequence,
        timestamp_ms: frame.timestamp_ms,
        detector: frame.detector.label(),
    })
}

/// JPEG-encodes each shown frame into the slot served by the preview server.
pub(crate) struct PreviewView {
    latest: SharedPacket,
    quality: u8,
}

impl PreviewView {
    pub(crate) fn new(latest: SharedPacket, quality: u8) -> Self {
        Self { latest, quality }
    }
}

impl FrameView for PreviewView {
    fn show(&mut self, frame: &ProcessedFrame) {
        match encode_jpeg(frame, self.quality) {
            Ok(packet) => {
                metrics::counter!("preview_frames_encoded_total").increment(1);
                if let Ok(mut guard) = self.latest.lock() {
                    *guard = Some(packet);
                }
            }
            Err(err) => warn!(sequence = frame.sequence, "preview encode failed: {err}"),
        }
    }
}

/// Discards frames; used when the preview server is disabled.
pub(crate) struct NullView;

impl FrameView for NullView {
    fn show(&mut self, _frame: &ProcessedFrame) {}
}

#[cfg(test)]
mod tests {
    use detection::DetectorKind;

    use super::*;

    fn frame(width: u32, height: u32) -> ProcessedFrame {
        ProcessedFrame {
            data: vec![128; (width * height * 3) as usize],
            width,
            height,
            stride: (width * 3) as usize,
            sequence: 42,
            timestamp_ms: 1_000,
            detector: DetectorKind::Face,
        }
    }

    #[test]
    fn encodes_a_valid_jpeg() {
        let packet = encode_jpeg(&frame(16, 8), 80).unwrap();
        assert_eq!(packet.sequence, 42);
        assert_eq!(packet.detector, "face");
        assert_eq!(&packet.jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&packet.jpeg[packet.jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn rejects_padded_rows() {
        let mut padded = frame(4, 4);
        padded.stride += 2;
        assert!(encode_jpeg(&padded, 80).is_err());
    }

    #[test]
    fn preview_view_fills_the_shared_slot() {
        let latest: SharedPacket = Arc::new(Mutex::new(None));
        let mut view = PreviewView::new(latest.clone(), 70);
        view.show(&frame(8, 8));
        assert_eq!(latest.lock().unwrap().as_ref().map(|p| p.sequence), Some(42));
    }
}
