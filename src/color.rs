use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Straight (non-premultiplied) 8-bit RGBA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_array(raw: [u8; 4]) -> Self {
        Self::new(raw[0], raw[1], raw[2], raw[3])
    }

    /// Half-intensity variant used for dim text.
    pub fn dimmed(self) -> Self {
        Self::new(self.r / 2, self.g / 2, self.b / 2, self.a)
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Accepts `#rgb`, `rgb`, `#rrggbb` and `rrggbb`.
    pub fn parse_hex(raw: &str) -> Result<Self, ColorParseError> {
        let hex = raw.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return Err(ColorParseError::Digit(raw.to_owned()));
        }
        let digit = |slice: &str| {
            u8::from_str_radix(slice, 16).map_err(|_| ColorParseError::Digit(raw.to_owned()))
        };

        match hex.len() {
            3 => {
                let r = digit(&hex[0..1])?;
                let g = digit(&hex[1..2])?;
                let b = digit(&hex[2..3])?;
                Ok(Self::rgb(r * 17, g * 17, b * 17))
            }
            6 => Ok(Self::rgb(
                digit(&hex[0..2])?,
                digit(&hex[2..4])?,
                digit(&hex[4..6])?,
            )),
            other => Err(ColorParseError::Length(other)),
        }
    }

    /// Source-over blend of `self` onto an opaque destination with extra coverage.
    pub fn blend_over(self, dst: Rgba, coverage: u8) -> Rgba {
        let alpha = u16::from(self.a) * u16::from(coverage) / 255;
        if alpha == 0 {
            return dst;
        }
        let inv_alpha = 255_u16.saturating_sub(alpha);
        let mix = |src: u8, dst: u8| {
            ((u16::from(src) * alpha + u16::from(dst) * inv_alpha + 127) / 255) as u8
        };
        Rgba::rgb(mix(self.r, dst.r), mix(self.g, dst.g), mix(self.b, dst.b))
    }

    pub(crate) fn distance_sq(self, other: Rgba) -> u32 {
        let dr = i32::from(self.r) - i32::from(other.r);
        let dg = i32::from(self.g) - i32::from(other.g);
        let db = i32::from(self.b) - i32::from(other.b);
        (dr * dr + dg * dg + db * db) as u32
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Rgba {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s)
    }
}

impl Serialize for Rgba {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rgba {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Rgba::parse_hex(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorParseError {
    #[error("hex color must have 3 or 6 digits, got {0}")]
    Length(usize),
    #[error("invalid hex color {0:?}")]
    Digit(String),
}

/// A color as reported by the terminal emulator for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    TrueColor(u8, u8, u8),
}

impl Color {
    pub fn is_default(self) -> bool {
        matches!(self, Color::Default)
    }

    pub fn is_true_color(self) -> bool {
        matches!(self, Color::TrueColor(..))
    }

    /// Resolves against the palette; `None` for the terminal default.
    pub fn resolve(self, palette: &Palette) -> Option<Rgba> {
        match self {
            Color::Default => None,
            Color::Indexed(index) => Some(palette.get(index)),
            Color::TrueColor(r, g, b) => Some(Rgba::rgb(r, g, b)),
        }
    }
}

const ANSI_16: [Rgba; 16] = [
    Rgba::rgb(0, 0, 0),
    Rgba::rgb(128, 0, 0),
    Rgba::rgb(0, 128, 0),
    Rgba::rgb(128, 128, 0),
    Rgba::rgb(0, 0, 128),
    Rgba::rgb(128, 0, 128),
    Rgba::rgb(0, 128, 128),
    Rgba::rgb(192, 192, 192),
    Rgba::rgb(128, 128, 128),
    Rgba::rgb(255, 0, 0),
    Rgba::rgb(0, 255, 0),
    Rgba::rgb(255, 255, 0),
    Rgba::rgb(0, 0, 255),
    Rgba::rgb(255, 0, 255),
    Rgba::rgb(0, 255, 255),
    Rgba::rgb(255, 255, 255),
];

/// The 256-entry indexed palette: 16 base colors, a 6x6x6 cube, 24 grays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    entries: [Rgba; 256],
}

impl Palette {
    pub fn standard() -> Self {
        let mut entries = [Rgba::BLACK; 256];
        entries[..16].copy_from_slice(&ANSI_16);

        let level = |step: usize| if step == 0 { 0 } else { (55 + step * 40) as u8 };
        for r in 0..6 {
            for g in 0..6 {
                for b in 0..6 {
                    entries[16 + r * 36 + g * 6 + b] = Rgba::rgb(level(r), level(g), level(b));
                }
            }
        }

        for step in 0..24 {
            let value = (8 + step * 10) as u8;
            entries[232 + step] = Rgba::rgb(value, value, value);
        }

        Self { entries }
    }

    pub fn get(&self, index: u8) -> Rgba {
        self.entries[usize::from(index)]
    }

    pub fn set(&mut self, index: u8, color: Rgba) {
        self.entries[usize::from(index)] = color;
    }

    pub fn base16(&self) -> &[Rgba] {
        &self.entries[..16]
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::standard()
    }
}
