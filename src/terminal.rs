use alacritty_terminal::event::{Event as TermEvent, EventListener};
use alacritty_terminal::index::{Column, Line, Point};
use alacritty_terminal::term::cell::Flags;
use alacritty_terminal::term::{Config as TermConfig, Term, TermMode};
use alacritty_terminal::vte::ansi::{Color as AnsiColor, NamedColor, Processor};
use thiserror::Error;

use crate::color::Color;

/// What the frame builder needs to know about one terminal cell.
///
/// Colors are reported as written by the application; `inverse` says the
/// cell asked for them to be swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSnapshot {
    pub ch: char,
    pub fg: Color,
    pub bg: Color,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub dim: bool,
    pub inverse: bool,
}

impl Default for CellSnapshot {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: Color::Default,
            bg: Color::Default,
            bold: false,
            italic: false,
            underline: false,
            dim: false,
            inverse: false,
        }
    }
}

#[derive(Debug, Error)]
#[error("terminal emulator rejected input: {message}")]
pub struct TerminalError {
    pub message: String,
}

impl TerminalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Stateful terminal emulator consulted after every written event.
///
/// Coordinates are `(col, row)`, zero-based. Reads outside the grid return a
/// blank default cell.
pub trait TerminalOracle {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TerminalError>;
    fn cell(&self, col: usize, row: usize) -> CellSnapshot;
    fn cursor(&self) -> (usize, usize);
    fn cursor_visible(&self) -> bool;
    /// `(width, height)` in cells.
    fn size(&self) -> (usize, usize);
}

/// Fixed grid size handed to the emulator. No scrollback is kept.
struct GridSize {
    cols: usize,
    rows: usize,
}

impl alacritty_terminal::grid::Dimensions for GridSize {
    fn total_lines(&self) -> usize {
        self.rows
    }

    fn screen_lines(&self) -> usize {
        self.rows
    }

    fn columns(&self) -> usize {
        self.cols
    }
}

/// Title changes, bells and clipboard requests have nowhere to go.
#[derive(Debug, Clone, Copy)]
struct Discard;

impl EventListener for Discard {
    fn send_event(&self, _event: TermEvent) {}
}

/// [`TerminalOracle`] backed by `alacritty_terminal`.
pub struct EmulatedTerminal {
    term: Term<Discard>,
    parser: Processor,
    width: usize,
    height: usize,
}

impl EmulatedTerminal {
    pub fn new(width: usize, height: usize) -> Result<Self, TerminalError> {
        if width == 0 || width > usize::from(u16::MAX) {
            return Err(TerminalError::new(format!("unsupported terminal width {width}")));
        }
        if height == 0 || height > usize::from(u16::MAX) {
            return Err(TerminalError::new(format!("unsupported terminal height {height}")));
        }
        let size = GridSize {
            cols: width,
            rows: height,
        };
        Ok(Self {
            term: Term::new(TermConfig::default(), &size, Discard),
            parser: Processor::new(),
            width,
            height,
        })
    }
}

impl TerminalOracle for EmulatedTerminal {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TerminalError> {
        self.parser.advance(&mut self.term, bytes);
        Ok(())
    }

    fn cell(&self, col: usize, row: usize) -> CellSnapshot {
        if col >= self.width || row >= self.height {
            return CellSnapshot::default();
        }
        let Ok(line) = i32::try_from(row) else {
            return CellSnapshot::default();
        };
        let cell = &self.term.grid()[Point::new(Line(line), Column(col))];
        let flags = cell.flags;

        let ch = if flags.intersects(
            Flags::HIDDEN | Flags::WIDE_CHAR_SPACER | Flags::LEADING_WIDE_CHAR_SPACER,
        ) || cell.c == '\0'
        {
            ' '
        } else {
            cell.c
        };

        CellSnapshot {
            ch,
            fg: map_color(cell.fg),
            bg: map_color(cell.bg),
            bold: flags.contains(Flags::BOLD),
            italic: flags.contains(Flags::ITALIC),
            underline: flags.intersects(Flags::ALL_UNDERLINES),
            dim: flags.contains(Flags::DIM),
            inverse: flags.contains(Flags::INVERSE),
        }
    }

    fn cursor(&self) -> (usize, usize) {
        let point = self.term.grid().cursor.point;
        let row = usize::try_from(point.line.0).unwrap_or(0);
        (point.column.0.min(self.width - 1), row.min(self.height - 1))
    }

    fn cursor_visible(&self) -> bool {
        self.term.mode().contains(TermMode::SHOW_CURSOR)
    }

    fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

fn map_color(color: AnsiColor) -> Color {
    match color {
        AnsiColor::Spec(rgb) => Color::TrueColor(rgb.r, rgb.g, rgb.b),
        AnsiColor::Indexed(index) => Color::Indexed(index),
        AnsiColor::Named(named) => named_color(named),
    }
}

/// The 16 ANSI names and their dim variants map onto palette slots; the
/// foreground/background/cursor names mean "theme default".
fn named_color(named: NamedColor) -> Color {
    let index = named as usize;
    let dim_start = NamedColor::DimBlack as usize;
    let dim_end = NamedColor::DimWhite as usize;
    if index < 16 {
        Color::Indexed(index as u8)
    } else if (dim_start..=dim_end).contains(&index) {
        Color::Indexed((index - dim_start) as u8)
    } else {
        Color::Default
    }
}

#[cfg(test)]
mod tests {
    use super::{EmulatedTerminal, TerminalOracle};
    use crate::color::Color;

    #[test]
    fn reports_text_and_cursor() {
        let mut term = EmulatedTerminal::new(10, 3).expect("terminal should be created");
        term.write(b"hi").expect("write should succeed");
        assert_eq!(term.cell(0, 0).ch, 'h');
        assert_eq!(term.cell(1, 0).ch, 'i');
        assert_eq!(term.cell(2, 0).ch, ' ');
        assert_eq!(term.cursor(), (2, 0));
        assert!(term.cursor_visible());
        assert_eq!(term.size(), (10, 3));
    }

    #[test]
    fn maps_sgr_attributes() {
        let mut term = EmulatedTerminal::new(10, 2).expect("terminal should be created");
        term.write(b"\x1b[1;4;31mA\x1b[0m\x1b[38;2;1;2;3mB\x1b[7mC")
            .expect("write should succeed");

        let a = term.cell(0, 0);
        assert!(a.bold && a.underline);
        assert_eq!(a.fg, Color::Indexed(1));

        assert_eq!(term.cell(1, 0).fg, Color::TrueColor(1, 2, 3));

        let c = term.cell(2, 0);
        assert!(c.inverse);
        assert_eq!(c.fg, Color::TrueColor(1, 2, 3));
        assert_eq!(c.bg, Color::Default);
    }

    #[test]
    fn faint_text_is_reported_as_dim() {
        let mut term = EmulatedTerminal::new(10, 1).expect("terminal should be created");
        term.write(b"\x1b[2mab\x1b[22mc").expect("write should succeed");
        assert!(term.cell(0, 0).dim);
        assert!(term.cell(1, 0).dim);
        assert!(!term.cell(2, 0).dim);
    }

    #[test]
    fn dim_and_bright_names_map_to_palette_slots() {
        let mut term = EmulatedTerminal::new(4, 1).expect("terminal should be created");
        term.write(b"\x1b[94mx\x1b[38;5;200my").expect("write should succeed");
        assert_eq!(term.cell(0, 0).fg, Color::Indexed(12));
        assert_eq!(term.cell(1, 0).fg, Color::Indexed(200));
    }

    #[test]
    fn hidden_cursor_and_out_of_range_cells() {
        let mut term = EmulatedTerminal::new(4, 2).expect("terminal should be created");
        term.write(b"\x1b[?25l").expect("write should succeed");
        assert!(!term.cursor_visible());
        assert_eq!(term.cell(40, 40).ch, ' ');
    }

    #[test]
    fn rejects_zero_size() {
        assert!(EmulatedTerminal::new(0, 4).is_err());
        assert!(EmulatedTerminal::new(4, 70_000).is_err());
    }
}
