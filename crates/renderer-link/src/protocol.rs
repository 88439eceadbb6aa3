//! Wire format of the renderer command stream.
//!
//! Every command is an 8-byte little-endian signed opcode followed by a payload
//! whose length is implied by the opcode. The only variable-length payload is
//! `LoadObject`, which carries its own 8-byte length prefix. There is no other
//! framing, so a single torn write desynchronises the renderer for good.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const OPCODE_ENTER_MEASUREMENT_MODE: i64 = 0;
pub const OPCODE_EXIT_MEASUREMENT_MODE: i64 = 1;
pub const OPCODE_SET_DISPLAY_PARAMETERS: i64 = 2;
/// Allocated by the renderer but never emitted.
pub const OPCODE_RESERVED: i64 = 3;
pub const OPCODE_TRACKING_ANGLES: i64 = 4;
pub const OPCODE_SHUTDOWN: i64 = 5;
pub const OPCODE_LOAD_OBJECT: i64 = 6;

const OPCODE_LEN: usize = 8;
/// Upper bound on `LoadObject` paths accepted by the decoder.
pub const MAX_PATH_LEN: usize = 64 * 1024;

/// Per-eye gaze angles in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrackingAngles {
    pub left_horizontal: f64,
    pub left_vertical: f64,
    pub right_horizontal: f64,
    pub right_vertical: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RendererCommand {
    EnterMeasurementMode,
    ExitMeasurementMode,
    SetDisplayParameters {
        pixels_per_lens: f32,
        index_of_refraction: f32,
    },
    TrackingAngles(TrackingAngles),
    Shutdown,
    LoadObject {
        path: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown renderer opcode {0}")]
    UnknownOpcode(i64),
    #[error("invalid object path length {0}")]
    InvalidLength(i64),
    #[error("object path is not valid UTF-8")]
    InvalidUtf8,
    #[error("stream ended inside a command ({remaining} trailing byte(s))")]
    Truncated { remaining: usize },
}

impl RendererCommand {
    pub fn opcode(&self) -> i64 {
        match self {
            RendererCommand::EnterMeasurementMode => OPCODE_ENTER_MEASUREMENT_MODE,
            RendererCommand::ExitMeasurementMode => OPCODE_EXIT_MEASUREMENT_MODE,
            RendererCommand::SetDisplayParameters { .. } => OPCODE_SET_DISPLAY_PARAMETERS,
            RendererCommand::TrackingAngles(_) => OPCODE_TRACKING_ANGLES,
            RendererCommand::Shutdown => OPCODE_SHUTDOWN,
            RendererCommand::LoadObject { .. } => OPCODE_LOAD_OBJECT,
        }
    }

    /// Short label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RendererCommand::EnterMeasurementMode => "enter_measurement",
            RendererCommand::ExitMeasurementMode => "exit_measurement",
            RendererCommand::SetDisplayParameters { .. } => "display_parameters",
            RendererCommand::TrackingAngles(_) => "tracking",
            RendererCommand::Shutdown => "shutdown",
            RendererCommand::LoadObject { .. } => "load_object",
        }
    }

    pub fn encoded_len(&self) -> usize {
        OPCODE_LEN
            + match self {
                RendererCommand::EnterMeasurementMode
                | RendererCommand::ExitMeasurementMode
                | RendererCommand::Shutdown => 0,
                RendererCommand::SetDisplayParameters { .. } => 8,
                RendererCommand::TrackingAngles(_) => 32,
                RendererCommand::LoadObject { path } => 8 + path.len(),
            }
    }

    /// Append the command's wire form to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_i64_le(self.opcode());
        match self {
            RendererCommand::EnterMeasurementMode
            | RendererCommand::ExitMeasurementMode
            | RendererCommand::Shutdown => {}
            RendererCommand::SetDisplayParameters {
                pixels_per_lens,
                index_of_refraction,
            } => {
                buf.put_f32_le(*pixels_per_lens);
                buf.put_f32_le(*index_of_refraction);
            }
            RendererCommand::TrackingAngles(angles) => {
                buf.put_f64_le(angles.left_horizontal);
                buf.put_f64_le(angles.left_vertical);
                buf.put_f64_le(angles.right_horizontal);
                buf.put_f64_le(angles.right_vertical);
            }
            RendererCommand::LoadObject { path } => {
                buf.put_i64_le(path.len() as i64);
                buf.put_slice(path.as_bytes());
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode one command from the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` does not yet hold a complete command, and
    /// otherwise the command together with the number of bytes it occupied.
    pub fn decode(src: &[u8]) -> Result<Option<(RendererCommand, usize)>, DecodeError> {
        let mut cur = src;
        if cur.remaining() < OPCODE_LEN {
            return Ok(None);
        }
        let opcode = cur.get_i64_le();
        let command = match opcode {
            OPCODE_ENTER_MEASUREMENT_MODE => RendererCommand::EnterMeasurementMode,
            OPCODE_EXIT_MEASUREMENT_MODE => RendererCommand::ExitMeasurementMode,
            OPCODE_SHUTDOWN => RendererCommand::Shutdown,
            OPCODE_SET_DISPLAY_PARAMETERS => {
                if cur.remaining() < 8 {
                    return Ok(None);
                }
                RendererCommand::SetDisplayParameters {
                    pixels_per_lens: cur.get_f32_le(),
                    index_of_refraction: cur.get_f32_le(),
                }
            }
            OPCODE_TRACKING_ANGLES => {
                if cur.remaining() < 32 {
                    return Ok(None);
                }
                RendererCommand::TrackingAngles(TrackingAngles {
                    left_horizontal: cur.get_f64_le(),
                    left_vertical: cur.get_f64_le(),
                    right_horizontal: cur.get_f64_le(),
                    right_vertical: cur.get_f64_le(),
                })
            }
            OPCODE_LOAD_OBJECT => {
                if cur.remaining() < 8 {
                    return Ok(None);
                }
                let len = cur.get_i64_le();
                if len < 0 || len as usize > MAX_PATH_LEN {
                    return Err(DecodeError::InvalidLength(len));
                }
                let len = len as usize;
                if cur.remaining() < len {
                    return Ok(None);
                }
                let path = std::str::from_utf8(&cur[..len])
                    .map_err(|_| DecodeError::InvalidUtf8)?
                    .to_string();
                cur.advance(len);
                RendererCommand::LoadObject { path }
            }
            other => return Err(DecodeError::UnknownOpcode(other)),
        };
        Ok(Some((command, src.len() - cur.remaining())))
    }

    /// Decode a complete byte stream, failing on trailing partial commands.
    pub fn decode_all(mut src: &[u8]) -> Result<Vec<RendererCommand>, DecodeError> {
        let mut commands = Vec::new();
        while !src.is_empty() {
            match Self::decode(src)? {
                Some((command, used)) => {
                    commands.push(command);
                    src = &src[used..];
                }
                None => {
                    return Err(DecodeError::Truncated {
                        remaining: src.len(),
                    });
                }
            }
        }
        Ok(commands)
    }
}
