//! Turns IR frames into pixels.
//!
//! The static chrome is drawn once into a base image. Each frame starts from a
//! copy of it and only draws text runs and the cursor. Frames are spread over
//! a pool of scoped worker threads; results land in a frame-indexed slot
//! vector.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbaImage;
use tracing::{debug, warn};

use crate::catalog::ColorCatalog;
use crate::color::Rgba;
use crate::error::ExportError;
use crate::export::CancellationToken;
use crate::ir::{Frame, Recording, TextRun};
use crate::progress::{Phase, Progress};
use crate::theme::Theme;

pub mod atlas;
pub mod canvas;
pub mod chrome;
pub mod glyphs;
pub mod palette;

use canvas::{Canvas, PalettedCanvas};
use glyphs::{FontSource, GlyphContext, GlyphSource};
use palette::{BlendCache, IndexedPalette};

pub const ROW_HEIGHT: u32 = 25;
pub const COL_WIDTH: u32 = 12;
pub const PADDING: u32 = 20;
pub const HEADER_SIZE: u32 = 2;
pub const BASELINE_OFFSET: i32 = 5;
pub const UNDERLINE_OFFSET: i32 = 2;
pub const DEFAULT_FONT_SIZE: f32 = 20.0;

/// Pixel geometry of the terminal grid inside the output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub row_height: u32,
    pub col_width: u32,
    pub padding: u32,
    pub header_size: u32,
    pub show_window: bool,
}

impl Layout {
    pub fn new(show_window: bool) -> Self {
        Self {
            row_height: ROW_HEIGHT,
            col_width: COL_WIDTH,
            padding: PADDING,
            header_size: HEADER_SIZE,
            show_window,
        }
    }

    pub fn content_origin(&self) -> (i32, i32) {
        let y = if self.show_window {
            self.padding * self.header_size
        } else {
            self.padding
        };
        (self.padding as i32, y as i32)
    }

    pub fn content_width(&self, cols: usize) -> u32 {
        cells(cols).saturating_mul(self.col_width)
    }

    pub fn content_height(&self, rows: usize) -> u32 {
        cells(rows).saturating_mul(self.row_height)
    }

    pub fn image_width(&self, cols: usize) -> u32 {
        self.content_width(cols).saturating_add(2 * self.padding)
    }

    pub fn image_height(&self, rows: usize) -> u32 {
        let chrome = if self.show_window {
            self.padding * self.header_size + self.padding
        } else {
            2 * self.padding
        };
        self.content_height(rows).saturating_add(chrome)
    }

    /// Top-left pixel of a cell.
    pub fn cell_origin(&self, col: usize, row: usize) -> (i32, i32) {
        let (x, y) = self.content_origin();
        (
            x + self.content_width(col) as i32,
            y + self.content_height(row) as i32,
        )
    }
}

fn cells(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone)]
pub struct RasterConfig {
    pub theme: Theme,
    pub show_window: bool,
    pub show_cursor: bool,
    pub font: FontSource,
    pub font_size: f32,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            show_window: true,
            show_cursor: true,
            font: FontSource::System,
            font_size: DEFAULT_FONT_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RgbaFrame {
    pub index: usize,
    pub delay: Duration,
    pub image: RgbaImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PalettedFrame {
    pub index: usize,
    pub delay: Duration,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub struct Rasterizer {
    theme: Theme,
    layout: Layout,
    show_cursor: bool,
    glyphs: GlyphSource,
    shared_glyphs: Mutex<GlyphContext>,
    max_workers: Option<usize>,
    progress: Progress,
}

impl Rasterizer {
    pub fn new(config: RasterConfig) -> Result<Self, ExportError> {
        let glyphs = GlyphSource::resolve(&config.font, config.font_size)?;
        Ok(Self::with_glyph_source(config, glyphs))
    }

    pub fn with_glyph_source(config: RasterConfig, glyphs: GlyphSource) -> Self {
        let shared = glyphs.open().unwrap_or_else(|error| {
            warn!(%error, "shared glyph context unavailable; using builtin bitmap glyphs");
            GlyphContext::builtin(config.font_size)
        });
        debug!(font = glyphs.label(), size = config.font_size, "glyph source ready");
        Self {
            theme: config.theme,
            layout: Layout::new(config.show_window),
            show_cursor: config.show_cursor,
            glyphs,
            shared_glyphs: Mutex::new(shared),
            max_workers: None,
            progress: Progress::default(),
        }
    }

    /// Caps the worker pool; defaults to available parallelism.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers.max(1));
        self
    }

    /// Reports [`Phase::Rasterizing`] as frames complete, in completion order.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn frame_size(&self, recording: &Recording) -> (u32, u32) {
        (
            self.layout.image_width(recording.width),
            self.layout.image_height(recording.height),
        )
    }

    pub fn base_image(&self, recording: &Recording) -> Result<RgbaImage, ExportError> {
        chrome::draw_base(&self.layout, &self.theme, recording.width, recording.height)
    }

    pub fn rasterize(
        &self,
        recording: &Recording,
        cancel: &CancellationToken,
    ) -> Result<Vec<RgbaFrame>, ExportError> {
        if recording.frames.is_empty() {
            return Err(ExportError::EmptyRecording);
        }
        let started = Instant::now();
        let base = self.base_image(recording)?;

        let frames = self.run_pool(recording.frames.len(), cancel, |index, glyphs, _| {
            let frame = &recording.frames[index];
            let mut image = base.clone();
            self.draw_frame(&mut image, frame, &recording.colors, glyphs);
            RgbaFrame {
                index: frame.index,
                delay: frame.delay,
                image,
            }
        })?;

        debug!(
            frames = frames.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rasterized rgba frames"
        );
        Ok(frames)
    }

    /// Draws every frame directly into indices of `palette`.
    pub fn rasterize_paletted(
        &self,
        recording: &Recording,
        palette: &IndexedPalette,
        cancel: &CancellationToken,
    ) -> Result<Vec<PalettedFrame>, ExportError> {
        if recording.frames.is_empty() {
            return Err(ExportError::EmptyRecording);
        }
        let started = Instant::now();
        let base = self.base_image(recording)?;
        let (width, height) = base.dimensions();
        let base_pixels = base
            .pixels()
            .map(|pixel| palette.index_for_base(Rgba::from_array(pixel.0)))
            .collect::<Vec<_>>();

        let frames = self.run_pool(recording.frames.len(), cancel, |index, glyphs, blends| {
            let frame = &recording.frames[index];
            let mut canvas = PalettedCanvas::new(width, height, base_pixels.clone(), palette, blends);
            self.draw_frame(&mut canvas, frame, &recording.colors, glyphs);
            PalettedFrame {
                index: frame.index,
                delay: frame.delay,
                width,
                height,
                pixels: canvas.into_pixels(),
            }
        })?;

        debug!(
            frames = frames.len(),
            palette = palette.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rasterized paletted frames"
        );
        Ok(frames)
    }

    /// Single frame on the calling thread.
    pub fn render_frame(&self, recording: &Recording, index: usize) -> Result<RgbaImage, ExportError> {
        let frame = recording.frames.get(index).ok_or(ExportError::FrameIndex {
            index,
            total: recording.frames.len(),
        })?;
        let mut image = self.base_image(recording)?;
        let mut glyphs = self
            .shared_glyphs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.draw_frame(&mut image, frame, &recording.colors, &mut glyphs);
        Ok(image)
    }

    fn draw_frame<C: Canvas>(
        &self,
        canvas: &mut C,
        frame: &Frame,
        colors: &ColorCatalog,
        glyphs: &mut GlyphContext,
    ) {
        for row in &frame.rows {
            for run in &row.runs {
                self.draw_run(canvas, run, row.y, colors, glyphs);
            }
        }

        if self.show_cursor && frame.cursor.visible {
            let (x, y) = self.layout.cell_origin(frame.cursor.col, frame.cursor.row);
            canvas.fill_rect(
                x,
                y,
                self.layout.col_width,
                self.layout.row_height,
                colors.default_foreground(),
            );
        }
    }

    fn draw_run<C: Canvas>(
        &self,
        canvas: &mut C,
        run: &TextRun,
        row: usize,
        colors: &ColorCatalog,
        glyphs: &mut GlyphContext,
    ) {
        let layout = &self.layout;
        let (x, y) = layout.cell_origin(run.start_col, row);
        let width = layout.content_width(run.width());

        canvas.fill_rect(x, y, width, layout.row_height, colors.background(run.attrs.bg));

        let mut fg = colors.foreground(run.attrs.fg);
        if run.attrs.dim {
            fg = fg.dimmed();
        }

        let baseline = y + layout.row_height as i32 - BASELINE_OFFSET;
        for (offset, ch) in run.text.chars().enumerate() {
            if ch == ' ' {
                continue;
            }
            let pen_x = x + layout.content_width(offset) as i32;
            let glyph = glyphs.glyph(ch);
            canvas.draw_glyph(glyph, pen_x, baseline, fg);
            if run.attrs.bold {
                canvas.draw_glyph(glyph, pen_x + 1, baseline, fg);
            }
        }

        if run.attrs.underline {
            canvas.fill_rect(x, y + layout.row_height as i32 - UNDERLINE_OFFSET, width, 1, fg);
        }
    }

    /// Fans `total` tasks out over scoped workers. Each worker opens its own
    /// glyph context and falls back to the shared one if that fails. Workers
    /// stop taking tasks once `cancel` fires.
    fn run_pool<T, F>(
        &self,
        total: usize,
        cancel: &CancellationToken,
        render: F,
    ) -> Result<Vec<T>, ExportError>
    where
        T: Send + Sync,
        F: Fn(usize, &mut GlyphContext, &mut BlendCache) -> T + Sync,
    {
        let slots = (0..total).map(|_| OnceLock::new()).collect::<Vec<OnceLock<T>>>();
        let next = AtomicUsize::new(0);
        let completed = AtomicUsize::new(0);
        let workers = self.worker_count(total);
        self.progress.report(Phase::Rasterizing, 0, total);

        thread::scope(|scope| -> Result<(), ExportError> {
            let mut handles = Vec::with_capacity(workers);
            for worker in 0..workers {
                let (slots, next, completed, render) = (&slots, &next, &completed, &render);
                let handle = thread::Builder::new()
                    .name(format!("termreel-raster-{worker}"))
                    .spawn_scoped(scope, move || {
                        let mut own = match self.glyphs.open() {
                            Ok(glyphs) => Some(glyphs),
                            Err(error) => {
                                warn!(worker, %error, "worker glyph context failed; using shared context");
                                None
                            }
                        };
                        let mut blends = BlendCache::new();
                        loop {
                            if cancel.is_cancelled() {
                                break;
                            }
                            let index = next.fetch_add(1, Ordering::Relaxed);
                            if index >= total {
                                break;
                            }
                            let value = match own.as_mut() {
                                Some(glyphs) => render(index, glyphs, &mut blends),
                                None => {
                                    let mut shared = self
                                        .shared_glyphs
                                        .lock()
                                        .unwrap_or_else(PoisonError::into_inner);
                                    render(index, &mut shared, &mut blends)
                                }
                            };
                            let _ = slots[index].set(value);
                            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                            self.progress.report(Phase::Rasterizing, done, total);
                        }
                    })?;
                handles.push(handle);
            }
            for handle in handles {
                handle
                    .join()
                    .map_err(|_| ExportError::WorkerPanic("raster worker"))?;
            }
            Ok(())
        })?;

        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.into_inner().ok_or(ExportError::MissingFrame(index)))
            .collect()
    }

    fn worker_count(&self, total: usize) -> usize {
        let available = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        self.max_workers
            .unwrap_or(available)
            .min(total)
            .max(1)
    }
}
