use std::path::PathBuf;

use thiserror::Error;

use crate::asciicast::CastError;
use crate::terminal::TerminalError;
use crate::theme::ThemeError;

/// Every failure an export can surface.
///
/// Nothing here is retried: the same input reproduces the same error.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("recording has no frames")]
    EmptyRecording,
    #[error("invalid export configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Cast(#[from] CastError),
    #[error(transparent)]
    Theme(#[from] ThemeError),
    #[error("terminal emulation failed at event {event}: {source}")]
    Terminal {
        event: usize,
        #[source]
        source: TerminalError,
    },
    #[error("failed to load font {path}: {reason}")]
    Font { path: PathBuf, reason: String },
    #[error("{program} exited with {status} (stderr_tail='{stderr}')")]
    Encoder {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} executable not found. Install ffmpeg (system mode) or use sidecar mode with `--features sidecar_ffmpeg`.")]
    EncoderMissing { program: String },
    #[error("gif encoding failed: {0}")]
    Gif(#[from] gif::EncodingError),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("frame size {width}x{height} exceeds the GIF limit of 65535x65535")]
    FrameTooLarge { width: u32, height: u32 },
    #[error("frame index {index} is out of range (recording has {total} frames)")]
    FrameIndex { index: usize, total: usize },
    #[error("raster worker produced no image for frame {0}")]
    MissingFrame(usize),
    #[error("{0} thread panicked")]
    WorkerPanic(&'static str),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export cancelled")]
    Cancelled,
}

impl ExportError {
    /// User-initiated aborts are not failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExportError::Cancelled)
    }
}
