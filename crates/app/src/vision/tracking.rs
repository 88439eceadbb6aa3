//! Conversion of eye offsets into renderer tracking updates.

use std::sync::Arc;

use detection::EyeOffsets;
use renderer_link::{CommandSink, RendererCommand, SendOutcome, TrackingAngles};
use tracing::{debug, warn};

use crate::calibration::SessionHandle;

/// Scale half-frame offsets by half the field of view.
pub(crate) fn angles_from_offsets(offsets: &EyeOffsets, fov_deg: f64) -> TrackingAngles {
    let half_fov = fov_deg / 2.0;
    TrackingAngles {
        left_horizontal: offsets.left.0 * half_fov,
        left_vertical: offsets.left.1 * half_fov,
        right_horizontal: offsets.right.0 * half_fov,
        right_vertical: offsets.right.1 * half_fov,
    }
}

pub(crate) struct TrackingSink {
    link: Arc<dyn CommandSink>,
    session: SessionHandle,
    verbose: bool,
}

impl TrackingSink {
    pub(crate) fn new(link: Arc<dyn CommandSink>, session: SessionHandle, verbose: bool) -> Self {
        Self {
            link,
            session,
            verbose,
        }
    }

    /// Record the angles for `offsets` and forward them when a renderer is
    /// listening and tracking is switched on.
    ///
    /// Returns `None` when nothing was offered to the link.
    pub(crate) fn submit(&self, offsets: &EyeOffsets) -> Option<SendOutcome> {
        let angles = angles_from_offsets(offsets, self.session.fov_deg());
        self.session.record_angles(angles);

        if !self.session.tracking_enabled() || !self.link.is_active() {
            return None;
        }
        match self.link.offer(RendererCommand::TrackingAngles(angles)) {
            Ok(SendOutcome::Dropped) => {
                if self.verbose {
                    debug!("renderer queue full; tracking update dropped");
                }
                Some(SendOutcome::Dropped)
            }
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!("tracking update not sent: {err}");
                None
            }
        }
    }
}
