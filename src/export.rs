//! End-to-end export: cast → IR → pixels or markup → output bytes.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use tracing::{debug, info};

use crate::asciicast::Cast;
use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::ir::{Processor, Recording};
use crate::progress::{Phase, Progress};
use crate::raster::glyphs::FontSource;
use crate::raster::{RasterConfig, Rasterizer};
use crate::render::svg::DEFAULT_FONT_FAMILY;
use crate::render::{
    GifRenderer, SvgOptions, SvgRenderer, VideoContainer, VideoEncoder, VideoOptions,
};
use crate::terminal::EmulatedTerminal;
use crate::theme::Theme;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Gif,
    Svg,
    Webm,
    Mp4,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [Self::Gif, Self::Svg, Self::Webm, Self::Mp4];

    /// Format implied by a file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        ext.parse().ok()
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Gif => "gif",
            Self::Svg => "svg",
            Self::Webm => "webm",
            Self::Mp4 => "mp4",
        }
    }

    fn video_container(self) -> Option<VideoContainer> {
        match self {
            Self::Webm => Some(VideoContainer::Webm),
            Self::Mp4 => Some(VideoContainer::Mp4),
            Self::Gif | Self::Svg => None,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.extension() == normalized)
            .ok_or_else(|| format!("unsupported output format '{raw}' (expected gif, svg, webm or mp4)"))
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Shared abort flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn checkpoint(&self) -> Result<(), ExportError> {
        if self.is_cancelled() {
            Err(ExportError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub format: OutputFormat,
    /// Frames in the IR after deduplication.
    pub frames: usize,
    /// Frames in the encoded output (GIF frames, video frames, or SVG slides).
    pub written: usize,
    pub width: u32,
    pub height: u32,
    pub colors: usize,
    pub duration: Duration,
}

pub struct Exporter {
    config: ExportConfig,
    theme: Theme,
    rasterizer: Rasterizer,
    progress: Progress,
}

impl Exporter {
    /// Validates `config`, loads its theme and resolves the font.
    pub fn new(config: ExportConfig) -> Result<Self, ExportError> {
        config.validate()?;
        let theme = Theme::load(&config.theme)?;
        Self::assemble(config, theme)
    }

    /// Like [`Exporter::new`] with an already loaded theme.
    pub fn with_theme(config: ExportConfig, theme: Theme) -> Result<Self, ExportError> {
        config.validate()?;
        Self::assemble(config, theme)
    }

    fn assemble(config: ExportConfig, theme: Theme) -> Result<Self, ExportError> {
        let font = match &config.font {
            Some(path) => FontSource::File(path.clone()),
            None => FontSource::System,
        };
        let rasterizer = Rasterizer::new(RasterConfig {
            theme: theme.clone(),
            show_window: config.window,
            show_cursor: config.cursor,
            font,
            font_size: config.font_size,
        })?;
        debug!(theme = %theme.name, "exporter ready");
        Ok(Self {
            config,
            theme,
            rasterizer,
            progress: Progress::default(),
        })
    }

    /// Routes per-phase progress from every stage of [`Exporter::export`].
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.rasterizer = self.rasterizer.with_progress(progress.clone());
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn rasterizer(&self) -> &Rasterizer {
        &self.rasterizer
    }

    /// Preprocesses the events and replays them into the IR.
    pub fn build_recording(
        &self,
        cast: &Cast,
        cancel: &CancellationToken,
    ) -> Result<Recording, ExportError> {
        let options = self.config.preprocess_options(cast.header.idle_time_limit);
        let processor = Processor::new(&self.theme, options).with_progress(self.progress.clone());
        let events = processor.preprocess(&cast.events);
        cancel.checkpoint()?;

        let mut term = EmulatedTerminal::new(cast.header.width, cast.header.height)
            .map_err(|source| ExportError::Terminal { event: 0, source })?;
        let title = cast.header.title.as_deref().unwrap_or_default();
        let recording = processor.build_recording(&mut term, &events, title)?;
        cancel.checkpoint()?;
        Ok(recording)
    }

    pub fn export<W: Write + ?Sized>(
        &self,
        cast: &Cast,
        format: OutputFormat,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> Result<ExportSummary, ExportError> {
        let started = Instant::now();
        let recording = self.build_recording(cast, cancel)?;
        if recording.frames.is_empty() {
            return Err(ExportError::EmptyRecording);
        }
        let (width, height) = self.rasterizer.frame_size(&recording);

        let written = match format {
            OutputFormat::Gif => {
                GifRenderer::new(&self.rasterizer, self.config.loop_count)
                    .with_progress(self.progress.clone())
                    .render(&recording, &mut *writer, cancel)?
            }
            OutputFormat::Svg => {
                let options = SvgOptions {
                    show_window: self.config.window,
                    loop_count: self.config.loop_count,
                    font_family: DEFAULT_FONT_FAMILY.to_owned(),
                    font_size: self.config.font_size.round() as u32,
                };
                self.progress.report(Phase::Encoding, 0, 1);
                SvgRenderer::new(&self.theme, options).render(&recording, &mut *writer)?;
                self.progress.report(Phase::Encoding, 1, 1);
                recording.frames.len()
            }
            OutputFormat::Webm | OutputFormat::Mp4 => {
                let container = format
                    .video_container()
                    .ok_or_else(|| ExportError::InvalidConfig(format!("{format} is not a video format")))?;
                let frames = self.rasterizer.rasterize(&recording, cancel)?;
                cancel.checkpoint()?;
                VideoEncoder::new(VideoOptions {
                    container,
                    frame_rate: self.config.frame_rate,
                    bitrate: self.config.video_bitrate,
                    ffmpeg: self.config.ffmpeg,
                })
                .with_progress(self.progress.clone())
                .encode(frames, writer)?
            }
        };

        let summary = ExportSummary {
            format,
            frames: recording.frames.len(),
            written,
            width,
            height,
            colors: recording.colors.len(),
            duration: recording.duration,
        };
        info!(
            format = %format,
            frames = summary.frames,
            written = summary.written,
            width,
            height,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "export finished"
        );
        Ok(summary)
    }

    /// Rasterizes a single IR frame, e.g. for a poster image.
    pub fn render_still(&self, cast: &Cast, index: usize) -> Result<RgbaImage, ExportError> {
        let recording = self.build_recording(cast, &CancellationToken::new())?;
        if recording.frames.is_empty() {
            return Err(ExportError::EmptyRecording);
        }
        self.rasterizer.render_frame(&recording, index)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use super::{CancellationToken, ExportConfig, Exporter, OutputFormat};
    use crate::asciicast::{Cast, Event, Header};
    use crate::error::ExportError;
    use crate::progress::{Phase, Progress, ProgressUpdate};
    use crate::theme::Theme;

    fn exporter() -> Exporter {
        let config = ExportConfig {
            font: None,
            ..ExportConfig::default()
        };
        Exporter::with_theme(config, Theme::default()).expect("exporter should build")
    }

    fn cast() -> Cast {
        Cast::new(
            Header::new(10, 2),
            vec![
                Event::output(0.0, "hello"),
                Event::output(0.5, "\r\n\x1b[31mred\x1b[0m"),
                Event::output(1.0, ""),
            ],
        )
    }

    #[test]
    fn formats_parse_from_names_and_paths() {
        assert_eq!("GIF".parse::<OutputFormat>(), Ok(OutputFormat::Gif));
        assert_eq!(".webm".parse::<OutputFormat>(), Ok(OutputFormat::Webm));
        assert!("png".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::from_path(Path::new("demo.MP4")), Some(OutputFormat::Mp4));
        assert_eq!(OutputFormat::from_path(Path::new("demo")), None);
    }

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.checkpoint().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.checkpoint(), Err(ExportError::Cancelled)));
    }

    #[test]
    fn cancelled_export_stops_before_encoding() {
        let token = CancellationToken::new();
        token.cancel();
        let mut out = Vec::new();
        let err = exporter()
            .export(&cast(), OutputFormat::Gif, &mut out, &token)
            .expect_err("cancelled export must fail");
        assert!(err.is_cancelled());
        assert!(out.is_empty());
    }

    #[test]
    fn svg_export_reports_summary() {
        let mut out = Vec::new();
        let summary = exporter()
            .export(&cast(), OutputFormat::Svg, &mut out, &CancellationToken::new())
            .expect("svg export should succeed");
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.written, 2);
        assert!(String::from_utf8(out).expect("svg is utf-8").contains("red</text>"));
    }

    #[test]
    fn gif_export_writes_a_gif() {
        let mut out = Vec::new();
        let summary = exporter()
            .export(&cast(), OutputFormat::Gif, &mut out, &CancellationToken::new())
            .expect("gif export should succeed");
        assert!(out.starts_with(b"GIF89a"));
        assert_eq!(summary.frames, 2);
        assert_eq!((summary.width, summary.height), (10 * 12 + 40, 2 * 25 + 60));
    }

    #[test]
    fn still_frame_index_is_checked() {
        let exporter = exporter();
        assert!(exporter.render_still(&cast(), 0).is_ok());
        assert!(matches!(
            exporter.render_still(&cast(), 9),
            Err(ExportError::FrameIndex { index: 9, total: 2 })
        ));
    }

    #[test]
    fn invalid_config_is_rejected_before_the_theme_loads() {
        let config = ExportConfig {
            speed: 0.0,
            theme: "nosuchtheme".to_owned(),
            ..ExportConfig::default()
        };
        let err = Exporter::new(config).err().expect("zero speed must be rejected");
        assert!(matches!(err, ExportError::InvalidConfig(message) if message.contains("speed")));

        let config = ExportConfig {
            frame_rate: 0,
            ..ExportConfig::default()
        };
        assert!(matches!(
            Exporter::with_theme(config, Theme::default()),
            Err(ExportError::InvalidConfig(_))
        ));
    }

    #[test]
    fn gif_export_reports_phases_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let exporter = exporter().with_progress(Progress::new(move |update: ProgressUpdate| {
            sink.lock().expect("lock").push(update)
        }));
        let mut out = Vec::new();
        exporter
            .export(&cast(), OutputFormat::Gif, &mut out, &CancellationToken::new())
            .expect("gif export should succeed");

        let seen = seen.lock().expect("lock");
        let mut phases = seen.iter().map(|update| update.phase).collect::<Vec<_>>();
        phases.dedup();
        assert_eq!(phases, vec![Phase::Processing, Phase::Rasterizing, Phase::Encoding]);
        let last = seen.last().expect("updates were sent");
        assert!(last.is_last());
    }

    #[test]
    fn input_only_cast_is_empty() {
        let cast = Cast::new(Header::new(4, 1), vec![Event::input(0.0, "ls")]);
        let mut out = Vec::new();
        let err = exporter()
            .export(&cast, OutputFormat::Svg, &mut out, &CancellationToken::new())
            .expect_err("no output events means no frames");
        assert!(matches!(err, ExportError::EmptyRecording));
    }
}
