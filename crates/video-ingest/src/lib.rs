//! Frame acquisition for the calibration pipeline.
//!
//! Frames are pulled on demand through [`FrameSource`]; the vision loop owns the
//! source and decides when to ask for the next frame. The OpenCV camera backend
//! is behind the `opencv` feature so the rest of the workspace builds without
//! native libraries.

#[cfg(feature = "opencv")]
mod camera;
mod types;

#[cfg(feature = "opencv")]
pub use camera::CameraSource;
pub use types::{CaptureError, Frame, FrameFormat};

/// Anything that can hand out raw frames one at a time.
pub trait FrameSource: Send {
    /// Human readable identifier used in logs.
    fn name(&self) -> &str;

    /// Block until the next frame is available.
    fn grab(&mut self) -> Result<Frame, CaptureError>;
}

/// Placeholder used when the camera could not be opened at start-up.
///
/// Every `grab` fails, which the vision loop treats as "no frame this tick".
pub struct UnavailableSource {
    uri: String,
}

impl UnavailableSource {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

impl FrameSource for UnavailableSource {
    fn name(&self) -> &str {
        &self.uri
    }

    fn grab(&mut self) -> Result<Frame, CaptureError> {
        Err(CaptureError::Open {
            uri: self.uri.clone(),
        })
    }
}

/// Open the camera identified by `uri` using the compiled-in backend.
#[cfg(feature = "opencv")]
pub fn open_camera(
    uri: &str,
    target_size: (u32, u32),
    fps: f64,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    let source = CameraSource::open(uri, (target_size.0 as i32, target_size.1 as i32), fps)?;
    Ok(Box::new(source))
}

/// Open the camera identified by `uri` using the compiled-in backend.
#[cfg(not(feature = "opencv"))]
pub fn open_camera(
    uri: &str,
    _target_size: (u32, u32),
    _fps: f64,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::Unsupported {
        uri: uri.to_string(),
    })
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}
