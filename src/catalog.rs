use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::warn;

use crate::color::{Color, Palette, Rgba};

/// Compact handle for a distinct resolved color. `0` is the theme default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ColorId(pub u16);

impl ColorId {
    pub const DEFAULT: ColorId = ColorId(0);

    pub fn is_default(self) -> bool {
        self == Self::DEFAULT
    }
}

impl fmt::Display for ColorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deduplicating registry of every non-default color a recording uses.
#[derive(Debug, Clone)]
pub struct ColorCatalog {
    colors: Vec<Rgba>,
    lookup: HashMap<(u8, u8, u8), ColorId>,
    default_fg: Rgba,
    default_bg: Rgba,
    overflowed: bool,
}

impl ColorCatalog {
    pub fn new(default_fg: Rgba, default_bg: Rgba) -> Self {
        Self {
            colors: Vec::new(),
            lookup: HashMap::new(),
            default_fg,
            default_bg,
            overflowed: false,
        }
    }

    /// Same RGB always yields the same id. Default colors yield [`ColorId::DEFAULT`].
    pub fn register(&mut self, color: Color, palette: &Palette) -> ColorId {
        let Some(rgba) = color.resolve(palette) else {
            return ColorId::DEFAULT;
        };
        self.register_rgba(rgba)
    }

    /// Registers an already resolved color.
    ///
    /// Ids are `u16`, so at most 65535 distinct colors fit. Once the catalog
    /// is full, unseen colors return [`ColorId::DEFAULT`] and render in the
    /// theme default; colors registered earlier keep their ids. A single
    /// warning is logged and [`ColorCatalog::is_full`] turns true.
    pub fn register_rgba(&mut self, rgba: Rgba) -> ColorId {
        let key = (rgba.r, rgba.g, rgba.b);
        if let Some(id) = self.lookup.get(&key) {
            return *id;
        }

        if self.colors.len() >= usize::from(u16::MAX) {
            if !self.overflowed {
                warn!(
                    color = %rgba,
                    "color catalog is full; further colors fall back to the theme default"
                );
                self.overflowed = true;
            }
            return ColorId::DEFAULT;
        }

        self.colors.push(Rgba::rgb(rgba.r, rgba.g, rgba.b));
        let id = ColorId(self.colors.len() as u16);
        self.lookup.insert(key, id);
        id
    }

    /// The stored color; fully transparent for the default id or an unknown id.
    pub fn resolved(&self, id: ColorId) -> Rgba {
        if id.is_default() {
            return Rgba::TRANSPARENT;
        }
        self.colors
            .get(usize::from(id.0) - 1)
            .copied()
            .unwrap_or(Rgba::TRANSPARENT)
    }

    pub fn foreground(&self, id: ColorId) -> Rgba {
        if id.is_default() {
            self.default_fg
        } else {
            self.resolved(id)
        }
    }

    pub fn background(&self, id: ColorId) -> Rgba {
        if id.is_default() {
            self.default_bg
        } else {
            self.resolved(id)
        }
    }

    /// Whether a color has been dropped because every id was taken.
    pub fn is_full(&self) -> bool {
        self.overflowed
    }

    pub fn is_default(&self, id: ColorId) -> bool {
        id.is_default()
    }

    pub fn default_foreground(&self) -> Rgba {
        self.default_fg
    }

    pub fn default_background(&self) -> Rgba {
        self.default_bg
    }

    /// Number of registered colors, excluding the default.
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Registered colors in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ColorId, Rgba)> + '_ {
        self.colors
            .iter()
            .enumerate()
            .map(|(index, color)| (ColorId(index as u16 + 1), *color))
    }

    /// `a`, `b`, ..., `z`, `aa`, `ab`, ... in id order.
    pub fn generate_class_names(&self) -> BTreeMap<ColorId, String> {
        self.iter()
            .enumerate()
            .map(|(ordinal, (id, _))| (id, class_name(ordinal)))
            .collect()
    }
}

/// Spreadsheet-column style name for a zero-based ordinal.
pub fn class_name(mut ordinal: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(char::from(b'a' + (ordinal % 26) as u8));
        if ordinal < 26 {
            break;
        }
        ordinal = ordinal / 26 - 1;
    }
    letters.into_iter().rev().collect()
}
