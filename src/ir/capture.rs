use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::asciicast::{Cast, Event};
use crate::catalog::ColorCatalog;
use crate::catalog::ColorId;
use crate::color::{Color, Palette, Rgba};
use crate::error::ExportError;
use crate::events::{preprocess_events, seconds, PreprocessOptions};
use crate::ir::{deduplicate_frames, CellAttrs, Cursor, Frame, Recording, Row, Stats, TextRun};
use crate::progress::{Phase, Progress};
use crate::terminal::{CellSnapshot, EmulatedTerminal, TerminalOracle};
use crate::theme::Theme;

/// Turns an event stream into a [`Recording`] by replaying it through a
/// terminal oracle and snapshotting the grid after every output event.
#[derive(Debug, Clone)]
pub struct Processor {
    palette: Palette,
    default_fg: Rgba,
    default_bg: Rgba,
    options: PreprocessOptions,
    progress: Progress,
}

/// Frames as captured, before deduplication.
#[derive(Debug, Clone)]
pub struct Capture {
    pub frames: Vec<Frame>,
    pub colors: ColorCatalog,
    pub stats: Stats,
}

impl Processor {
    pub fn new(theme: &Theme, options: PreprocessOptions) -> Self {
        Self {
            palette: theme.palette.clone(),
            default_fg: theme.foreground,
            default_bg: theme.background,
            options,
            progress: Progress::default(),
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn options(&self) -> &PreprocessOptions {
        &self.options
    }

    pub fn preprocess(&self, events: &[Event]) -> Vec<Event> {
        preprocess_events(events, &self.options)
    }

    /// Preprocess, replay through a fresh emulated terminal, deduplicate.
    pub fn process(&self, cast: &Cast) -> Result<Recording, ExportError> {
        let events = self.preprocess(&cast.events);
        let mut term = EmulatedTerminal::new(cast.header.width, cast.header.height)
            .map_err(|source| ExportError::Terminal { event: 0, source })?;
        let title = cast.header.title.as_deref().unwrap_or_default();
        self.build_recording(&mut term, &events, title)
    }

    /// Replays already-preprocessed events and deduplicates the frames.
    pub fn build_recording<T: TerminalOracle>(
        &self,
        term: &mut T,
        events: &[Event],
        title: &str,
    ) -> Result<Recording, ExportError> {
        let started = Instant::now();
        let capture = self.capture(term, events)?;
        let captured = capture.frames.len();

        let frames = deduplicate_frames(capture.frames);
        let mut stats = capture.stats;
        stats.total_frames = frames.len();
        stats.unique_colors = capture.colors.len();

        let duration = frames.last().map(|frame| frame.time).unwrap_or_default();
        let (width, height) = term.size();

        debug!(
            captured,
            retained = frames.len(),
            colors = stats.unique_colors,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built recording"
        );

        Ok(Recording {
            width,
            height,
            duration,
            title: title.to_owned(),
            frames,
            colors: capture.colors,
            stats,
        })
    }

    /// One frame per output event, no deduplication. Oracle write failures
    /// abort the whole capture.
    pub fn capture<T: TerminalOracle>(
        &self,
        term: &mut T,
        events: &[Event],
    ) -> Result<Capture, ExportError> {
        let mut colors = ColorCatalog::new(self.default_fg, self.default_bg);
        let mut stats = Stats::default();
        let mut frames = Vec::with_capacity(events.len());
        let mut previous = Duration::ZERO;
        let total = events.len();
        self.progress.report(Phase::Processing, 0, total);

        for (event_index, event) in events.iter().enumerate() {
            if !event.is_output() {
                continue;
            }

            term.write(event.data.as_bytes())
                .map_err(|source| ExportError::Terminal {
                    event: event_index,
                    source,
                })?;

            let time = seconds(event.time);
            let index = frames.len();
            let mut builder = FrameBuilder {
                palette: &self.palette,
                colors: &mut colors,
                stats: &mut stats,
            };
            let delay = time.saturating_sub(previous);
            frames.push(builder.capture_frame(&*term, index, time, delay));
            previous = time;

            if event_index % 10 == 0 || event_index + 1 == total {
                trace!(event = event_index, total, "captured frame");
                self.progress.report(Phase::Processing, event_index + 1, total);
            }
        }

        Ok(Capture {
            frames,
            colors,
            stats,
        })
    }
}

struct FrameBuilder<'a> {
    palette: &'a Palette,
    colors: &'a mut ColorCatalog,
    stats: &'a mut Stats,
}

struct PendingRun {
    text: String,
    start_col: usize,
    attrs: CellAttrs,
}

impl PendingRun {
    fn finish(self) -> TextRun {
        TextRun {
            text: self.text,
            start_col: self.start_col,
            attrs: self.attrs,
        }
    }
}

impl FrameBuilder<'_> {
    fn capture_frame<T: TerminalOracle>(
        &mut self,
        term: &T,
        index: usize,
        time: Duration,
        delay: Duration,
    ) -> Frame {
        let (width, height) = term.size();
        let rows = (0..height)
            .map(|y| self.capture_row(term, y, width))
            .collect();
        let (col, row) = term.cursor();

        Frame {
            time,
            delay,
            index,
            rows,
            cursor: Cursor {
                col,
                row,
                visible: term.cursor_visible(),
            },
        }
    }

    fn capture_row<T: TerminalOracle>(&mut self, term: &T, y: usize, width: usize) -> Row {
        let mut runs = Vec::new();
        let mut current: Option<PendingRun> = None;

        for x in 0..width {
            let cell = term.cell(x, y);
            let attrs = self.attrs_for(&cell);

            match current.as_mut() {
                Some(run) if run.attrs == attrs => run.text.push(cell.ch),
                _ => {
                    if let Some(done) = current.take() {
                        runs.push(done.finish());
                    }
                    current = Some(PendingRun {
                        text: String::from(cell.ch),
                        start_col: x,
                        attrs,
                    });
                }
            }
        }
        if let Some(done) = current {
            runs.push(done.finish());
        }

        self.stats.max_runs_per_row = self.stats.max_runs_per_row.max(runs.len());
        Row { y, runs }
    }

    /// Inverse cells swap their colors. A swapped default becomes the
    /// concrete theme color so the run renders and compares as inverted.
    fn attrs_for(&mut self, cell: &CellSnapshot) -> CellAttrs {
        let (fg, bg) = if cell.inverse {
            let default_fg = self.colors.default_foreground();
            let default_bg = self.colors.default_background();
            (
                self.register_or(cell.bg, default_bg),
                self.register_or(cell.fg, default_fg),
            )
        } else {
            (
                self.colors.register(cell.fg, self.palette),
                self.colors.register(cell.bg, self.palette),
            )
        };

        self.stats.has_bold |= cell.bold;
        self.stats.has_italic |= cell.italic;
        self.stats.has_underline |= cell.underline;
        self.stats.has_dim |= cell.dim;
        self.stats.has_true_color |= cell.fg.is_true_color() || cell.bg.is_true_color();

        CellAttrs {
            fg,
            bg,
            bold: cell.bold,
            italic: cell.italic,
            underline: cell.underline,
            dim: cell.dim,
        }
    }

    fn register_or(&mut self, color: Color, fallback: Rgba) -> ColorId {
        let rgba = color.resolve(self.palette).unwrap_or(fallback);
        self.colors.register_rgba(rgba)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::Processor;
    use crate::asciicast::{Cast, Event, Header};
    use crate::catalog::ColorId;
    use crate::color::{Color, Rgba};
    use crate::error::ExportError;
    use crate::events::PreprocessOptions;
    use crate::progress::{Phase, Progress};
    use crate::terminal::{CellSnapshot, TerminalError, TerminalOracle};
    use crate::theme::Theme;

    /// Scripted oracle: every write applies the next queued grid.
    struct ScriptedTerminal {
        width: usize,
        height: usize,
        screens: Vec<HashMap<(usize, usize), CellSnapshot>>,
        current: HashMap<(usize, usize), CellSnapshot>,
        fail_on: Option<usize>,
        writes: usize,
    }

    impl ScriptedTerminal {
        fn new(width: usize, height: usize) -> Self {
            Self {
                width,
                height,
                screens: Vec::new(),
                current: HashMap::new(),
                fail_on: None,
                writes: 0,
            }
        }

        fn push_screen(&mut self, cells: &[((usize, usize), CellSnapshot)]) {
            self.screens.push(cells.iter().cloned().collect());
        }
    }

    impl TerminalOracle for ScriptedTerminal {
        fn write(&mut self, _bytes: &[u8]) -> Result<(), TerminalError> {
            if self.fail_on == Some(self.writes) {
                return Err(TerminalError::new("scripted failure"));
            }
            if !self.screens.is_empty() {
                self.current = self.screens.remove(0);
            }
            self.writes += 1;
            Ok(())
        }

        fn cell(&self, col: usize, row: usize) -> CellSnapshot {
            self.current.get(&(col, row)).copied().unwrap_or_default()
        }

        fn cursor(&self) -> (usize, usize) {
            (0, 0)
        }

        fn cursor_visible(&self) -> bool {
            true
        }

        fn size(&self) -> (usize, usize) {
            (self.width, self.height)
        }
    }

    fn cell(ch: char) -> CellSnapshot {
        CellSnapshot {
            ch,
            ..CellSnapshot::default()
        }
    }

    fn processor() -> Processor {
        Processor::new(&Theme::default(), PreprocessOptions::default())
    }

    #[test]
    fn groups_cells_into_runs_by_attributes() {
        let red = CellSnapshot {
            fg: Color::Indexed(1),
            bold: true,
            ..cell('b')
        };
        let mut term = ScriptedTerminal::new(4, 1);
        term.push_screen(&[
            ((0, 0), cell('a')),
            ((1, 0), red),
            ((2, 0), CellSnapshot { ch: 'c', ..red }),
        ]);

        let capture = processor()
            .capture(&mut term, &[Event::output(0.0, "x")])
            .expect("capture should succeed");
        let row = &capture.frames[0].rows[0];

        assert_eq!(row.runs.len(), 3);
        assert_eq!(row.runs[0].text, "a");
        assert_eq!(row.runs[1].text, "bc");
        assert_eq!(row.runs[1].start_col, 1);
        assert_eq!(row.runs[1].attrs.fg, ColorId(1));
        assert_eq!(row.runs[2].text, " ");
        assert_eq!(row.text(), "abc ");
        assert!(capture.stats.has_bold);
        assert_eq!(capture.stats.max_runs_per_row, 3);
    }

    #[test]
    fn every_row_is_present_even_when_blank() {
        let mut term = ScriptedTerminal::new(3, 4);
        let capture = processor()
            .capture(&mut term, &[Event::output(0.0, "x")])
            .expect("capture should succeed");
        let rows = &capture.frames[0].rows;
        assert_eq!(rows.len(), 4);
        assert_eq!(rows.iter().map(|row| row.y).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(rows.iter().all(|row| row.runs.len() == 1 && row.text() == "   "));
    }

    #[test]
    fn delays_are_relative_and_input_is_skipped() {
        let mut term = ScriptedTerminal::new(2, 1);
        let events = [
            Event::output(0.5, "a"),
            Event::input(0.7, "k"),
            Event::output(2.0, "b"),
        ];
        let capture = processor()
            .capture(&mut term, &events)
            .expect("capture should succeed");
        assert_eq!(capture.frames.len(), 2);
        assert_eq!(capture.frames[0].delay, Duration::from_millis(500));
        assert_eq!(capture.frames[1].delay, Duration::from_millis(1500));
        assert_eq!(capture.frames[1].index, 1);
    }

    #[test]
    fn identical_frame_is_folded_into_its_predecessor() {
        let mut term = ScriptedTerminal::new(2, 1);
        term.push_screen(&[((0, 0), cell('a'))]);
        term.push_screen(&[((0, 0), cell('a'))]);
        term.push_screen(&[((0, 0), cell('b'))]);
        let events = [
            Event::output(0.0, "a"),
            Event::output(0.25, ""),
            Event::output(1.0, "b"),
        ];

        let raw = processor()
            .capture(&mut clone_script(&term), &events)
            .expect("capture should succeed");
        let recording = processor()
            .build_recording(&mut term, &events, "demo")
            .expect("recording should build");

        assert_eq!(recording.frames.len(), raw.frames.len() - 1);
        assert_eq!(
            recording.frames[0].delay,
            raw.frames[0].delay + raw.frames[1].delay
        );
        assert_eq!(recording.frames[0].time, Duration::from_millis(250));
        assert_eq!(recording.duration, Duration::from_secs(1));
        assert_eq!(recording.stats.total_frames, 2);
    }

    fn clone_script(term: &ScriptedTerminal) -> ScriptedTerminal {
        ScriptedTerminal {
            width: term.width,
            height: term.height,
            screens: term.screens.clone(),
            current: term.current.clone(),
            fail_on: term.fail_on,
            writes: term.writes,
        }
    }

    #[test]
    fn oracle_failure_aborts_the_capture() {
        let mut term = ScriptedTerminal::new(2, 1);
        term.fail_on = Some(1);
        let events = [Event::output(0.0, "a"), Event::output(1.0, "b")];
        let err = processor()
            .build_recording(&mut term, &events, "")
            .expect_err("write failure must abort");
        assert!(matches!(err, ExportError::Terminal { event: 1, .. }));
    }

    #[test]
    fn inverse_default_cell_gets_concrete_theme_colors() {
        let theme = Theme::default();
        let inverted = CellSnapshot {
            inverse: true,
            ..cell('x')
        };
        let mut term = ScriptedTerminal::new(3, 1);
        term.push_screen(&[((0, 0), cell('a')), ((1, 0), inverted)]);

        let capture = processor()
            .capture(&mut term, &[Event::output(0.0, "x")])
            .expect("capture should succeed");
        let row = &capture.frames[0].rows[0];

        assert_eq!(row.runs.len(), 3);
        let attrs = row.runs[1].attrs;
        assert_ne!(attrs.bg, ColorId::DEFAULT);
        assert_ne!(attrs.fg, ColorId::DEFAULT);
        assert_eq!(capture.colors.background(attrs.bg), theme.foreground);
        assert_eq!(capture.colors.foreground(attrs.fg), theme.background);
        assert_eq!(row.runs[2].attrs, row.runs[0].attrs);
    }

    #[test]
    fn inverse_swaps_explicit_colors() {
        let inverted = CellSnapshot {
            fg: Color::TrueColor(10, 20, 30),
            inverse: true,
            ..cell('x')
        };
        let mut term = ScriptedTerminal::new(1, 1);
        term.push_screen(&[((0, 0), inverted)]);

        let capture = processor()
            .capture(&mut term, &[Event::output(0.0, "x")])
            .expect("capture should succeed");
        let attrs = capture.frames[0].rows[0].runs[0].attrs;
        assert_eq!(capture.colors.background(attrs.bg), Rgba::rgb(10, 20, 30));
        assert_eq!(
            capture.colors.foreground(attrs.fg),
            Theme::default().background
        );
    }

    #[test]
    fn faint_output_reaches_the_recording() {
        let cast = Cast::new(
            Header::new(10, 1),
            vec![Event::output(0.0, "\x1b[2mfaint\x1b[0m")],
        );
        let recording = processor().process(&cast).expect("cast should process");
        let runs = &recording.frames[0].rows[0].runs;
        assert_eq!(runs[0].text, "faint");
        assert!(runs[0].attrs.dim);
        assert!(!runs[1].attrs.dim);
        assert!(recording.stats.has_dim);
    }

    #[test]
    fn capture_reports_processing_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress = Progress::new(move |update| sink.lock().expect("lock").push(update));
        let events = (0..12)
            .map(|i| Event::output(f64::from(i), "x"))
            .collect::<Vec<_>>();

        let mut term = ScriptedTerminal::new(2, 1);
        processor()
            .with_progress(progress)
            .capture(&mut term, &events)
            .expect("capture should succeed");

        let seen = seen.lock().expect("lock");
        let counts = seen.iter().map(|update| update.current).collect::<Vec<_>>();
        assert_eq!(counts, vec![0, 1, 11, 12]);
        assert!(seen.iter().all(|update| update.phase == Phase::Processing && update.total == 12));
    }

    #[test]
    fn processes_a_real_cast() {
        let cast = Cast::new(
            Header::new(8, 2),
            vec![
                Event::output(0.0, "\x1b[32mok\x1b[0m"),
                Event::output(0.0, "!"),
                Event::output(0.5, "\r\n$"),
            ],
        );
        let recording = processor().process(&cast).expect("cast should process");
        assert_eq!(recording.width, 8);
        assert_eq!(recording.height, 2);
        assert_eq!(recording.frames.len(), 2);
        assert_eq!(recording.frames[0].rows[0].runs[0].text, "ok");
        assert_eq!(recording.colors.len(), 1);
        assert_eq!(recording.frames[1].cursor.row, 1);
        assert_eq!(recording.frames[1].cursor.col, 1);
    }
}
