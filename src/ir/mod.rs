//! Renderer-agnostic model of a recording: frames of row-grouped text runs.

use std::time::Duration;

use crate::catalog::{ColorCatalog, ColorId};

pub mod capture;
pub mod dedup;

pub use capture::Processor;
pub use dedup::deduplicate_frames;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CellAttrs {
    pub fg: ColorId,
    pub bg: ColorId,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub dim: bool,
}

/// Maximal horizontal span of cells sharing the same attributes. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRun {
    pub text: String,
    pub start_col: usize,
    pub attrs: CellAttrs,
}

impl TextRun {
    /// Width in cells.
    pub fn width(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_blank(&self) -> bool {
        self.text.chars().all(|ch| ch == ' ')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub y: usize,
    pub runs: Vec<TextRun>,
}

impl Row {
    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub col: usize,
    pub row: usize,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Absolute time from the start of the recording.
    pub time: Duration,
    /// Time since the previous retained frame.
    pub delay: Duration,
    pub index: usize,
    pub rows: Vec<Row>,
    pub cursor: Cursor,
}

impl Frame {
    /// Visual equality: cursor plus every row and run.
    pub fn same_content(&self, other: &Frame) -> bool {
        self.cursor == other.cursor && self.rows == other.rows
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub total_frames: usize,
    pub unique_colors: usize,
    pub max_runs_per_row: usize,
    pub has_bold: bool,
    pub has_italic: bool,
    pub has_underline: bool,
    pub has_dim: bool,
    pub has_true_color: bool,
}

#[derive(Debug, Clone)]
pub struct Recording {
    pub width: usize,
    pub height: usize,
    pub duration: Duration,
    pub title: String,
    pub frames: Vec<Frame>,
    pub colors: ColorCatalog,
    pub stats: Stats,
}

impl Recording {
    pub fn total_delay(&self) -> Duration {
        self.frames.iter().map(|frame| frame.delay).sum()
    }
}
