//! Per-phase progress reporting for exports.
//!
//! Stages report `(phase, current, total)` through a [`Progress`] handle.
//! The handle is cheap to clone and safe to call from raster workers.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Processing,
    Rasterizing,
    Encoding,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Processing => "IR Processing",
            Self::Rasterizing => "Rasterizing",
            Self::Encoding => "Encoding",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `current` is 1-based; `0` announces the phase before any work is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub phase: Phase,
    pub current: usize,
    pub total: usize,
}

impl ProgressUpdate {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.current.min(self.total) as f64) / (self.total as f64)
        }
    }

    pub fn is_last(&self) -> bool {
        self.current >= self.total
    }
}

type Callback = dyn Fn(ProgressUpdate) + Send + Sync;

/// Optional progress sink. The default handle discards every update.
#[derive(Clone, Default)]
pub struct Progress {
    callback: Option<Arc<Callback>>,
}

impl Progress {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    pub fn report(&self, phase: Phase, current: usize, total: usize) {
        if let Some(callback) = &self.callback {
            callback(ProgressUpdate {
                phase,
                current,
                total,
            });
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

const BAR_WIDTH: usize = 40;

/// Draws one bar per phase on a terminal stream, redrawing in place.
pub struct ProgressBar<W: Write> {
    out: W,
    phase: Option<Phase>,
}

impl<W: Write> ProgressBar<W> {
    pub fn new(out: W) -> Self {
        Self { out, phase: None }
    }

    pub fn update(&mut self, update: ProgressUpdate) -> io::Result<()> {
        if self.phase.is_some_and(|phase| phase != update.phase) {
            self.out.write_all(b"\n")?;
        }
        self.phase = Some(update.phase);
        write!(self.out, "\r{}", render_line(&update))?;
        self.out.flush()
    }

    /// Ends the current line so later output starts clean.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.phase.take().is_some() {
            self.out.write_all(b"\n")?;
            self.out.flush()?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// `Rasterizing... 3/10 [############                            ]`
pub fn render_line(update: &ProgressUpdate) -> String {
    let filled = (update.fraction() * BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    format!(
        "{}... {}/{} [{}{}]",
        update.phase,
        update.current.min(update.total),
        update.total,
        "#".repeat(filled),
        " ".repeat(BAR_WIDTH - filled)
    )
}
