use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::color::{ColorParseError, Palette, Rgba};

pub const THEME_PATH_ENV: &str = "TERMREEL_THEME_PATH";

const WINDOW_BACKGROUND: Rgba = hex(0x282d35);
const WINDOW_BUTTONS: [Rgba; 3] = [hex(0xff5f56), hex(0xffbd2e), hex(0x18c132)];

/// Everything the renderers need to know about colors. Passed explicitly into
/// the processor and the rasterizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    pub name: String,
    pub palette: Palette,
    pub foreground: Rgba,
    pub background: Rgba,
    pub window_background: Rgba,
    pub window_buttons: [Rgba; 3],
}

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("built-in theme not found: {0}")]
    UnknownBuiltin(String),
    #[error("theme file not found: {0}")]
    NotFound(String),
    #[error("failed to read theme file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse theme file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("theme palette must have exactly 16 colors, got {0}")]
    PaletteLength(usize),
    #[error("invalid theme color: {0}")]
    Color(#[from] ColorParseError),
}

struct BuiltinTheme {
    name: &'static str,
    foreground: Rgba,
    background: Rgba,
    base16: [Rgba; 16],
}

const fn hex(value: u32) -> Rgba {
    Rgba::rgb((value >> 16) as u8, (value >> 8) as u8, value as u8)
}

const BUILTINS: [BuiltinTheme; 4] = [
    BuiltinTheme {
        name: "asciinema",
        foreground: hex(0xcccccc),
        background: hex(0x121314),
        base16: [
            hex(0x000000),
            hex(0xdd3c69),
            hex(0x4ebf22),
            hex(0xddaf3c),
            hex(0x26b0d7),
            hex(0xb954e1),
            hex(0x54e1b9),
            hex(0xd9d9d9),
            hex(0x4d4d4d),
            hex(0xdd3c69),
            hex(0x4ebf22),
            hex(0xddaf3c),
            hex(0x26b0d7),
            hex(0xb954e1),
            hex(0x54e1b9),
            hex(0xffffff),
        ],
    },
    BuiltinTheme {
        name: "dracula",
        foreground: hex(0xf8f8f2),
        background: hex(0x282a36),
        base16: [
            hex(0x21222c),
            hex(0xff5555),
            hex(0x50fa7b),
            hex(0xf1fa8c),
            hex(0xbd93f9),
            hex(0xff79c6),
            hex(0x8be9fd),
            hex(0xf8f8f2),
            hex(0x6272a4),
            hex(0xff6e6e),
            hex(0x69ff94),
            hex(0xffffa5),
            hex(0xd6acff),
            hex(0xff92df),
            hex(0xa4ffff),
            hex(0xffffff),
        ],
    },
    BuiltinTheme {
        name: "monokai",
        foreground: hex(0xf8f8f2),
        background: hex(0x272822),
        base16: [
            hex(0x272822),
            hex(0xf92672),
            hex(0xa6e22e),
            hex(0xf4bf75),
            hex(0x66d9ef),
            hex(0xae81ff),
            hex(0xa1efe4),
            hex(0xf8f8f2),
            hex(0x75715e),
            hex(0xf92672),
            hex(0xa6e22e),
            hex(0xf4bf75),
            hex(0x66d9ef),
            hex(0xae81ff),
            hex(0xa1efe4),
            hex(0xf9f8f5),
        ],
    },
    BuiltinTheme {
        name: "solarized-dark",
        foreground: hex(0x839496),
        background: hex(0x002b36),
        base16: [
            hex(0x073642),
            hex(0xdc322f),
            hex(0x859900),
            hex(0xb58900),
            hex(0x268bd2),
            hex(0xd33682),
            hex(0x2aa198),
            hex(0xeee8d5),
            hex(0x002b36),
            hex(0xcb4b16),
            hex(0x586e75),
            hex(0x657b83),
            hex(0x839496),
            hex(0x6c71c4),
            hex(0x93a1a1),
            hex(0xfdf6e3),
        ],
    },
];

impl Default for Theme {
    fn default() -> Self {
        let palette = Palette::standard();
        Self {
            name: "default".to_owned(),
            foreground: palette.get(7),
            background: Rgba::BLACK,
            window_background: WINDOW_BACKGROUND,
            window_buttons: WINDOW_BUTTONS,
            palette,
        }
    }
}

impl Theme {
    /// Builds a theme from asciinema-player style values: two hex colors and a
    /// colon-separated list of exactly 16 palette entries.
    pub fn from_asciinema(name: &str, fg: &str, bg: &str, palette: &str) -> Result<Self, ThemeError> {
        let entries = palette.split(':').collect::<Vec<_>>();
        if entries.len() != 16 {
            return Err(ThemeError::PaletteLength(entries.len()));
        }
        let mut base16 = [Rgba::BLACK; 16];
        for (slot, raw) in base16.iter_mut().zip(entries) {
            *slot = Rgba::parse_hex(raw)?;
        }
        Ok(Self::with_base16(
            name,
            Rgba::parse_hex(fg)?,
            Rgba::parse_hex(bg)?,
            base16,
        ))
    }

    fn with_base16(name: &str, foreground: Rgba, background: Rgba, base16: [Rgba; 16]) -> Self {
        let mut palette = Palette::standard();
        for (index, color) in base16.into_iter().enumerate() {
            palette.set(index as u8, color);
        }
        Self {
            name: name.to_owned(),
            palette,
            foreground,
            background,
            window_background: background,
            window_buttons: WINDOW_BUTTONS,
        }
    }

    pub fn builtin(name: &str) -> Result<Self, ThemeError> {
        let normalized = normalize_name(name);
        if normalized == "default" {
            return Ok(Self::default());
        }
        BUILTINS
            .iter()
            .find(|theme| theme.name == normalized)
            .map(|theme| {
                Self::with_base16(theme.name, theme.foreground, theme.background, theme.base16)
            })
            .ok_or(ThemeError::UnknownBuiltin(normalized))
    }

    /// A value containing `/` or ending in `.json` is a theme file; anything
    /// else names a builtin.
    pub fn load(name_or_path: &str) -> Result<Self, ThemeError> {
        if name_or_path.contains('/') || name_or_path.ends_with(".json") {
            Self::load_file(name_or_path)
        } else {
            Self::builtin(name_or_path)
        }
    }

    pub fn load_file(raw: &str) -> Result<Self, ThemeError> {
        let search_path = env::var_os(THEME_PATH_ENV)
            .map(|value| env::split_paths(&value).collect::<Vec<_>>())
            .unwrap_or_default();
        let path = locate_theme_file(raw, &search_path)
            .ok_or_else(|| ThemeError::NotFound(raw.to_owned()))?;
        parse_theme_file(&path)
    }
}

pub fn builtin_names() -> Vec<&'static str> {
    let mut names = vec!["default"];
    names.extend(BUILTINS.iter().map(|theme| theme.name));
    names
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace(' ', "-")
}

fn locate_theme_file(raw: &str, search_path: &[PathBuf]) -> Option<PathBuf> {
    let direct = Path::new(raw);
    if direct.is_file() {
        return Some(direct.to_path_buf());
    }
    for dir in search_path {
        let candidate = dir.join(raw);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !raw.ends_with(".json") {
            let candidate = dir.join(format!("{raw}.json"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct ThemeFile {
    fg: String,
    bg: String,
    palette: String,
}

fn parse_theme_file(path: &Path) -> Result<Theme, ThemeError> {
    let raw = fs::read_to_string(path).map_err(|source| ThemeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: ThemeFile = serde_json::from_str(&raw).map_err(|source| ThemeError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "custom".to_owned());
    Theme::from_asciinema(&name, &file.fg, &file.bg, &file.palette)
}
