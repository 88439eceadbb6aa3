//! Command link from the control application to the renderer process.
//!
//! [`protocol`] defines the byte layout of each command; [`RendererLink`]
//! owns the single TCP connection and serialises every producer through one
//! writer thread.

mod link;
pub mod protocol;

pub use link::{CommandSink, DEFAULT_LISTEN_ADDR, LinkError, LinkOptions, RendererLink, SendOutcome};
pub use protocol::{DecodeError, RendererCommand, TrackingAngles};
