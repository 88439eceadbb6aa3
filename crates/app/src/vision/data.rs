use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use detection::DetectorKind;
use video_ingest::Frame;

/// Annotated frame ready for display, always packed RGB8.
#[derive(Debug)]
pub(crate) struct ProcessedFrame {
    pub(crate) data: Vec<u8>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) stride: usize,
    pub(crate) sequence: u64,
    pub(crate) timestamp_ms: i64,
    pub(crate) detector: DetectorKind,
}

impl ProcessedFrame {
    pub(crate) fn from_frame(frame: &Frame, sequence: u64, detector: DetectorKind) -> Self {
        let rgb = frame.to_rgb8();
        Self {
            data: rgb.data,
            width: rgb.width,
            height: rgb.height,
            stride: rgb.stride,
            sequence,
            timestamp_ms: rgb.timestamp_ms,
            detector,
        }
    }
}

struct Slot {
    frame: Option<Arc<ProcessedFrame>>,
    unseen: bool,
}

/// Single-slot hand-off of the latest processed frame to the UI thread.
///
/// Publishing replaces whatever the slot holds and never waits for the
/// consumer. The wake channel has room for one pending signal, so a slow UI
/// sees at most one wake per burst of frames.
#[derive(Clone)]
pub(crate) struct DisplayChannel {
    slot: Arc<Mutex<Slot>>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl DisplayChannel {
    pub(crate) fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            slot: Arc::new(Mutex::new(Slot {
                frame: None,
                unseen: false,
            })),
            wake_tx,
            wake_rx,
        }
    }

    /// Move `frame` into the slot, releasing the previous occupant.
    pub(crate) fn publish(&self, frame: ProcessedFrame) {
        let frame = Arc::new(frame);
        let displaced = {
            let mut slot = match self.slot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let skipped = slot.unseen;
            slot.unseen = true;
            let displaced = slot.frame.replace(frame);
            if skipped {
                metrics::counter!("display_frames_replaced_total").increment(1);
            }
            displaced
        };
        // Release outside the lock.
        drop(displaced);

        // Full means a wake is already pending.
        if let Err(TrySendError::Disconnected(())) = self.wake_tx.try_send(()) {
            tracing::debug!("display wake receiver dropped");
        }
    }

    /// Latest frame, if any has been published.
    pub(crate) fn consume(&self) -> Option<Arc<ProcessedFrame>> {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.unseen = false;
        slot.frame.clone()
    }

    /// Receiver that yields once per wake signal.
    pub(crate) fn wake(&self) -> Receiver<()> {
        self.wake_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn frame(sequence: u64, fill: u8, width: u32, height: u32) -> ProcessedFrame {
        ProcessedFrame {
            data: vec![fill; (width * height * 3) as usize],
            width,
            height,
            stride: (width * 3) as usize,
            sequence,
            timestamp_ms: sequence as i64,
            detector: DetectorKind::Face,
        }
    }

    #[test]
    fn empty_channel_yields_nothing() {
        let channel = DisplayChannel::new();
        assert!(channel.consume().is_none());
        assert!(channel.wake().try_recv().is_err());
    }

    #[test]
    fn consume_returns_the_most_recent_frame() {
        let channel = DisplayChannel::new();
        channel.publish(frame(1, 1, 4, 4));
        channel.publish(frame(2, 2, 4, 4));
        let latest = channel.consume().unwrap();
        assert_eq!(latest.sequence, 2);
        assert!(latest.data.iter().all(|&b| b == 2));
        // Consuming does not empty the slot.
        assert_eq!(channel.consume().unwrap().sequence, 2);
    }

    #[test]
    fn displaced_frame_is_released() {
        let channel = DisplayChannel::new();
        channel.publish(frame(1, 1, 8, 8));
        let first = Arc::downgrade(&channel.consume().unwrap());
        assert!(first.upgrade().is_some());

        channel.publish(frame(2, 2, 8, 8));
        assert!(first.upgrade().is_none(), "slot kept the displaced frame alive");
    }

    #[test]
    fn wake_signals_coalesce() {
        let channel = DisplayChannel::new();
        let wake = channel.wake();
        for seq in 0..10 {
            channel.publish(frame(seq, 0, 2, 2));
        }
        assert!(wake.try_recv().is_ok());
        assert!(wake.try_recv().is_err());
        channel.publish(frame(10, 0, 2, 2));
        assert!(wake.try_recv().is_ok());
    }

    #[test]
    fn concurrent_consumers_never_see_torn_frames() {
        const FRAMES: u64 = 2_000;
        let channel = DisplayChannel::new();
        let publisher = {
            let channel = channel.clone();
            thread::spawn(move || {
                for seq in 1..=FRAMES {
                    // Size varies with the sequence so a torn frame would also
                    // show up as a dimension mismatch.
                    let side = 2 + (seq % 7) as u32;
                    channel.publish(frame(seq, (seq % 251) as u8, side, side));
                }
            })
        };

        let mut last_seen = 0;
        while last_seen < FRAMES {
            if let Some(current) = channel.consume() {
                assert!(current.sequence >= last_seen);
                let side = 2 + (current.sequence % 7) as u32;
                assert_eq!((current.width, current.height), (side, side));
                assert_eq!(current.data.len(), current.stride * current.height as usize);
                let fill = (current.sequence % 251) as u8;
                assert!(current.data.iter().all(|&b| b == fill));
                last_seen = current.sequence;
            }
        }
        publisher.join().unwrap();
    }
}
