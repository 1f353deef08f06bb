//! Replays recorded terminal sessions (asciicast v2) as animated GIF, SVG or
//! video.
//!
//! The pipeline is [`asciicast`] → [`events`] preprocessing → [`ir`] capture
//! through a [`terminal`] oracle → [`raster`] → [`render`]. [`export`] wires
//! the stages together.

pub mod asciicast;
pub mod catalog;
pub mod color;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod ir;
pub mod play;
pub mod progress;
pub mod raster;
pub mod record;
pub mod render;
pub mod terminal;
pub mod theme;

pub use crate::error::ExportError;
pub use crate::export::{CancellationToken, ExportSummary, Exporter, OutputFormat};
pub use crate::progress::{Phase, Progress, ProgressUpdate};
