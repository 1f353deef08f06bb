//! Animated SVG output.
//!
//! Every frame is laid out side by side inside one group and a stepped CSS
//! animation slides the group left by one frame width at each frame's time.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::io::Write;

use tracing::debug;

use crate::catalog::ColorId;
use crate::error::ExportError;
use crate::ir::{Frame, Recording, TextRun};
use crate::theme::Theme;

pub const ROW_HEIGHT: usize = 25;
pub const COL_WIDTH: usize = 12;
pub const PADDING: usize = 20;
pub const HEADER_SIZE: usize = 3;

pub const DEFAULT_FONT_FAMILY: &str = "Monaco,Consolas,'Courier New',monospace";

#[derive(Debug, Clone, PartialEq)]
pub struct SvgOptions {
    pub show_window: bool,
    pub loop_count: i32,
    pub font_family: String,
    pub font_size: u32,
}

impl Default for SvgOptions {
    fn default() -> Self {
        Self {
            show_window: true,
            loop_count: 0,
            font_family: DEFAULT_FONT_FAMILY.to_owned(),
            font_size: 20,
        }
    }
}

pub struct SvgRenderer<'a> {
    theme: &'a Theme,
    options: SvgOptions,
}

impl<'a> SvgRenderer<'a> {
    pub fn new(theme: &'a Theme, options: SvgOptions) -> Self {
        Self { theme, options }
    }

    pub fn render<W: Write>(&self, recording: &Recording, mut writer: W) -> Result<(), ExportError> {
        let document = self.document(recording)?;
        writer.write_all(document.as_bytes())?;
        writer.flush()?;
        debug!(bytes = document.len(), frames = recording.frames.len(), "wrote svg");
        Ok(())
    }

    /// The whole document as a string.
    pub fn document(&self, recording: &Recording) -> Result<String, ExportError> {
        if recording.frames.is_empty() {
            return Err(ExportError::EmptyRecording);
        }
        let doc = SvgDocument {
            theme: self.theme,
            options: &self.options,
            recording,
            classes: recording.colors.generate_class_names(),
        };
        Ok(doc.build())
    }
}

struct SvgDocument<'a> {
    theme: &'a Theme,
    options: &'a SvgOptions,
    recording: &'a Recording,
    classes: BTreeMap<ColorId, String>,
}

impl SvgDocument<'_> {
    fn content_width(&self) -> usize {
        self.recording.width * COL_WIDTH
    }

    fn content_height(&self) -> usize {
        self.recording.height * ROW_HEIGHT
    }

    fn padded_width(&self) -> usize {
        self.content_width() + 2 * PADDING
    }

    fn padded_height(&self) -> usize {
        if self.options.show_window {
            self.content_height() + PADDING * HEADER_SIZE
        } else {
            self.content_height() + 2 * PADDING
        }
    }

    fn content_y(&self) -> usize {
        if self.options.show_window {
            PADDING * HEADER_SIZE
        } else {
            PADDING
        }
    }

    fn build(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}">"#,
            self.padded_width(),
            self.padded_height()
        );

        if self.options.show_window {
            self.write_window(&mut out);
        } else {
            self.write_background(&mut out);
        }

        let _ = write!(
            out,
            r#"<defs><clipPath id="clip"><rect width="{}" height="{}"/></clipPath></defs>"#,
            self.content_width(),
            self.content_height()
        );
        let _ = write!(
            out,
            r#"<g transform="translate({},{})" clip-path="url(#clip)">"#,
            PADDING,
            self.content_y()
        );

        self.write_styles(&mut out);
        self.write_background_filters(&mut out);

        let _ = write!(
            out,
            r#"<g style="animation:k {:.3}s {} steps(1,end)">"#,
            self.recording.duration.as_secs_f64(),
            iteration_count(self.options.loop_count)
        );
        let width = self.padded_width();
        for (index, frame) in self.recording.frames.iter().enumerate() {
            let _ = write!(out, r#"<g transform="translate({},0)">"#, width * index);
            self.write_frame(&mut out, frame);
            out.push_str("</g>");
        }
        out.push_str("</g></g></svg>");
        out
    }

    fn write_background(&self, out: &mut String) {
        let _ = write!(
            out,
            r#"<rect width="100%" height="100%" fill="{}"/>"#,
            self.recording.colors.default_background().to_hex()
        );
    }

    fn write_window(&self, out: &mut String) {
        let _ = write!(
            out,
            r#"<rect rx="5" width="100%" height="100%" fill="{}"/>"#,
            self.theme.window_background.to_hex()
        );
        let _ = write!(
            out,
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}"/>"#,
            PADDING,
            PADDING * HEADER_SIZE,
            self.content_width(),
            self.content_height(),
            self.recording.colors.default_background().to_hex()
        );
        for (index, color) in self.theme.window_buttons.iter().enumerate() {
            let _ = write!(
                out,
                r#"<circle cx="{}" cy="{}" r="6" fill="{}"/>"#,
                PADDING + index * 20,
                PADDING,
                color.to_hex()
            );
        }
    }

    fn write_styles(&self, out: &mut String) {
        out.push_str("<style>");
        out.push_str(&self.keyframes());

        let colors = &self.recording.colors;
        let _ = write!(
            out,
            "text{{font-family:{};font-size:{}px;fill:{}}}",
            self.options.font_family,
            self.options.font_size,
            colors.default_foreground().to_hex()
        );
        for (id, color) in colors.iter() {
            if let Some(class) = self.classes.get(&id) {
                let _ = write!(out, ".{}{{fill:{}}}", class, color.to_hex());
            }
        }

        let stats = &self.recording.stats;
        if stats.has_bold {
            out.push_str(".bold{font-weight:bold}");
        }
        if stats.has_italic {
            out.push_str(".italic{font-style:italic}");
        }
        if stats.has_underline {
            out.push_str(".underline{text-decoration:underline}");
        }
        if stats.has_dim {
            out.push_str(".dim{opacity:0.5}");
        }
        out.push_str("</style>");
    }

    fn keyframes(&self) -> String {
        let frames = &self.recording.frames;
        if frames.len() <= 1 {
            return "@keyframes k{0%{transform:translateX(0)}}".to_owned();
        }

        let duration = self.recording.duration.as_secs_f64();
        let width = self.padded_width();
        let mut out = String::from("@keyframes k{");
        for (index, frame) in frames.iter().enumerate() {
            let pct = if duration > 0.0 {
                frame.time.as_secs_f64() / duration * 100.0
            } else {
                0.0
            };
            let _ = write!(
                out,
                "{:.3}%{{transform:translateX(-{}px)}}",
                pct,
                width * index
            );
        }
        out.push('}');
        out
    }

    fn write_background_filters(&self, out: &mut String) {
        let colors = &self.recording.colors;
        let used = self
            .recording
            .frames
            .iter()
            .flat_map(|frame| &frame.rows)
            .flat_map(|row| &row.runs)
            .map(|run| run.attrs.bg)
            .filter(|id| !colors.is_default(*id))
            .collect::<BTreeSet<_>>();
        if used.is_empty() {
            return;
        }

        out.push_str("<defs>");
        for id in used {
            let _ = write!(
                out,
                r#"<filter id="bg_{}" x="0" y="0" width="1" height="1"><feFlood flood-color="{}"/><feComposite in="SourceGraphic" operator="over"/></filter>"#,
                id.0,
                colors.resolved(id).to_hex()
            );
        }
        out.push_str("</defs>");
    }

    fn write_frame(&self, out: &mut String, frame: &Frame) {
        for row in &frame.rows {
            for run in &row.runs {
                self.write_run(out, run, row.y);
            }
        }
    }

    fn write_run(&self, out: &mut String, run: &TextRun, row: usize) {
        let colors = &self.recording.colors;
        // Blank text on the default background draws nothing.
        if run.text.is_empty() || (run.is_blank() && colors.is_default(run.attrs.bg)) {
            return;
        }

        let mut classes = Vec::new();
        if !colors.is_default(run.attrs.fg) {
            if let Some(class) = self.classes.get(&run.attrs.fg) {
                classes.push(class.as_str());
            }
        }
        if run.attrs.bold {
            classes.push("bold");
        }
        if run.attrs.italic {
            classes.push("italic");
        }
        if run.attrs.underline {
            classes.push("underline");
        }
        if run.attrs.dim {
            classes.push("dim");
        }

        let _ = write!(
            out,
            r#"<text x="{}" y="{}""#,
            run.start_col * COL_WIDTH,
            row * ROW_HEIGHT + ROW_HEIGHT
        );
        if !classes.is_empty() {
            let _ = write!(out, r#" class="{}""#, classes.join(" "));
        }
        if !colors.is_default(run.attrs.bg) {
            let _ = write!(out, r#" filter="url(#bg_{})""#, run.attrs.bg.0);
        }
        let _ = write!(out, ">{}</text>", escape_xml(&run.text));
    }
}

fn iteration_count(loop_count: i32) -> String {
    match loop_count {
        0 => "infinite".to_owned(),
        n if n < 0 => "1".to_owned(),
        n => n.to_string(),
    }
}

pub fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{escape_xml, iteration_count, SvgOptions, SvgRenderer};
    use crate::catalog::{ColorCatalog, ColorId};
    use crate::color::Rgba;
    use crate::error::ExportError;
    use crate::ir::{CellAttrs, Cursor, Frame, Recording, Row, Stats, TextRun};
    use crate::theme::Theme;

    fn frame(index: usize, time_ms: u64, runs: Vec<TextRun>) -> Frame {
        Frame {
            time: Duration::from_millis(time_ms),
            delay: Duration::from_millis(500),
            index,
            rows: vec![Row { y: 0, runs }],
            cursor: Cursor::default(),
        }
    }

    fn run(text: &str, attrs: CellAttrs) -> TextRun {
        TextRun {
            text: text.to_owned(),
            start_col: 0,
            attrs,
        }
    }

    fn recording(frames: Vec<Frame>, colors: ColorCatalog, stats: Stats) -> Recording {
        Recording {
            width: 10,
            height: 1,
            duration: Duration::from_secs(1),
            title: String::new(),
            frames,
            colors,
            stats,
        }
    }

    #[test]
    fn document_has_keyframes_classes_and_filters() {
        let theme = Theme::default();
        let mut colors = ColorCatalog::new(theme.foreground, theme.background);
        let red = colors.register_rgba(Rgba::rgb(255, 0, 0));
        let blue = colors.register_rgba(Rgba::rgb(0, 0, 255));
        let attrs = CellAttrs {
            fg: red,
            bg: blue,
            bold: true,
            ..CellAttrs::default()
        };
        let stats = Stats {
            has_bold: true,
            ..Stats::default()
        };
        let rec = recording(
            vec![
                frame(0, 0, vec![run("a<b", CellAttrs::default())]),
                frame(1, 500, vec![run("hi", attrs)]),
            ],
            colors,
            stats,
        );

        let svg = SvgRenderer::new(&theme, SvgOptions::default())
            .document(&rec)
            .expect("svg should render");
        assert!(svg.starts_with(r#"<svg xmlns="http://www.w3.org/2000/svg" width="160" height="85">"#));
        assert!(svg.contains("0.000%{transform:translateX(-0px)}"));
        assert!(svg.contains("50.000%{transform:translateX(-160px)}"));
        assert!(svg.contains(".a{fill:#ff0000}"));
        assert!(svg.contains(".bold{font-weight:bold}"));
        assert!(!svg.contains(".italic"));
        assert!(svg.contains(r#"<filter id="bg_2""#));
        assert!(svg.contains(r#"<text x="0" y="25" class="a bold" filter="url(#bg_2)">hi</text>"#));
        assert!(svg.contains(">a&lt;b</text>"));
        assert!(svg.contains("animation:k 1.000s infinite steps(1,end)"));
        assert!(svg.ends_with("</g></g></svg>"));
        assert_eq!(blue, ColorId(2));
    }

    #[test]
    fn plain_background_without_window() {
        let theme = Theme::default();
        let colors = ColorCatalog::new(theme.foreground, theme.background);
        let rec = recording(
            vec![frame(0, 0, vec![run("x", CellAttrs::default())])],
            colors,
            Stats::default(),
        );
        let options = SvgOptions {
            show_window: false,
            loop_count: -1,
            ..SvgOptions::default()
        };
        let svg = SvgRenderer::new(&theme, options)
            .document(&rec)
            .expect("svg should render");
        assert!(svg.contains(r##"<rect width="100%" height="100%" fill="#000000"/>"##));
        assert!(!svg.contains("<circle"));
        assert!(svg.contains("@keyframes k{0%{transform:translateX(0)}}"));
        assert!(svg.contains(r#"translate(20,20)"#));
        assert!(svg.contains(" 1 steps(1,end)"));
    }

    #[test]
    fn empty_recording_is_rejected() {
        let theme = Theme::default();
        let colors = ColorCatalog::new(theme.foreground, theme.background);
        let rec = recording(Vec::new(), colors, Stats::default());
        let err = SvgRenderer::new(&theme, SvgOptions::default())
            .document(&rec)
            .expect_err("empty recording must fail");
        assert!(matches!(err, ExportError::EmptyRecording));
    }

    #[test]
    fn helpers() {
        assert_eq!(escape_xml(r#"<&"'>"#), "&lt;&amp;&#34;&#39;&gt;");
        assert_eq!(iteration_count(0), "infinite");
        assert_eq!(iteration_count(-1), "1");
        assert_eq!(iteration_count(4), "4");
    }
}
