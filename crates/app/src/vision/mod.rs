//! Real-time side of the application: the capture/detect loop and the
//! hand-off of its output to the UI and the renderer.
//!
//! - `pipeline`: the fixed-rate `VisionLoop`.
//! - `data`: `ProcessedFrame` and the single-slot `DisplayChannel`.
//! - `tracking`: eye offsets to renderer tracking commands.
//! - `watchdog`: stall reporting for the loop stages.

pub(crate) mod data;
pub(crate) mod pipeline;
pub(crate) mod tracking;
pub(crate) mod watchdog;

pub(crate) use data::{DisplayChannel, ProcessedFrame};
pub(crate) use pipeline::VisionLoop;
pub(crate) use tracking::TrackingSink;
pub(crate) use watchdog::{LoopHealth, spawn_watchdog};
