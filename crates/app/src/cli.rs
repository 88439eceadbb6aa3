//! Command-line parsing for the `lenticular` binary.
//!
//! Raw flags land in [`CliArgs`]; everything downstream works from the
//! validated [`AppConfig`] so no stage has to re-check flag combinations.

use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use renderer_link::DEFAULT_LISTEN_ADDR;

pub const DEFAULT_CALIBRATION_FILE: &str = "calibration_settings.txt";
pub const DEFAULT_FACE_MODEL: &str = "face_detection_yunet_2023mar.onnx";
pub const DEFAULT_PREVIEW_ADDR: &str = "127.0.0.1:8080";

#[derive(Clone, Debug)]
/// Validated runtime configuration.
pub struct AppConfig {
    /// Camera URI or device index handed to the capture backend.
    pub camera_uri: String,
    /// Capture width in pixels.
    pub width: u32,
    /// Capture height in pixels.
    pub height: u32,
    /// Target vision loop rate.
    pub fps: f64,
    /// Address the renderer connects back to.
    pub listen_addr: SocketAddr,
    /// Preview HTTP server address, `None` when disabled.
    pub preview_addr: Option<SocketAddr>,
    /// File holding the persisted calibration triple.
    pub calibration_file: PathBuf,
    /// ONNX face detection model.
    pub face_model: PathBuf,
    /// JPEG quality of preview frames.
    pub jpeg_quality: u8,
    /// Log every dropped tracking update and loop overrun.
    pub verbose: bool,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing loop spans.
    pub chrome_trace_path: Option<PathBuf>,
}

impl AppConfig {
    /// Duration of one vision loop period.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }
}

/// Lenticular display calibration and head tracking.
#[derive(Debug, Parser)]
#[command(name = "lenticular", version, about)]
pub struct CliArgs {
    /// Camera URI or device index.
    #[arg(long = "source", value_name = "URI", default_value = "0")]
    pub source: String,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: u32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: u32,
    /// Vision loop rate in frames per second.
    #[arg(long = "fps", value_name = "HZ", default_value_t = 60.0)]
    pub fps: f64,
    /// Address the renderer process connects to.
    #[arg(long = "listen", value_name = "ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: String,
    /// Address of the HTTP preview server.
    #[arg(long = "preview-addr", value_name = "ADDR", default_value = DEFAULT_PREVIEW_ADDR)]
    pub preview_addr: String,
    /// Disable the HTTP preview server.
    #[arg(long = "no-preview", action = clap::ArgAction::SetTrue)]
    pub no_preview: bool,
    /// Persisted calibration file.
    #[arg(long = "calibration-file", value_name = "PATH", default_value = DEFAULT_CALIBRATION_FILE)]
    pub calibration_file: PathBuf,
    /// YuNet face detection model.
    #[arg(long = "face-model", value_name = "PATH", default_value = DEFAULT_FACE_MODEL)]
    pub face_model: PathBuf,
    /// JPEG quality used for preview frames (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 80)]
    pub jpeg_quality: u8,
    /// Enable verbose logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self> {
        if args.source.trim().is_empty() {
            bail!("--source must not be empty");
        }
        if args.width == 0 || args.height == 0 {
            bail!("Capture width and height must be positive integers");
        }
        if !args.fps.is_finite() || args.fps <= 0.0 || args.fps > 1000.0 {
            bail!("--fps must be a number in (0, 1000]");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        let listen_addr =
            resolve_addr(&args.listen).with_context(|| format!("invalid --listen {}", args.listen))?;
        let preview_addr = if args.no_preview {
            None
        } else {
            Some(
                resolve_addr(&args.preview_addr)
                    .with_context(|| format!("invalid --preview-addr {}", args.preview_addr))?,
            )
        };

        Ok(Self {
            camera_uri: args.source,
            width: args.width,
            height: args.height,
            fps: args.fps,
            listen_addr,
            preview_addr,
            calibration_file: args.calibration_file,
            face_model: args.face_model,
            jpeg_quality: args.jpeg_quality,
            verbose: args.verbose,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}

fn resolve_addr(raw: &str) -> Result<SocketAddr> {
    raw.to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow!("{raw} did not resolve to an address"))
}
