use std::collections::HashMap;

use crate::color::Rgba;

pub const TRANSPARENT_INDEX: u8 = 0;
pub const MAX_COLORS: usize = 256;

/// Blend results memoized per worker: `(destination index, color, coverage)`.
pub type BlendCache = HashMap<(u8, Rgba, u8), u8>;

/// A GIF-style color table with the transparent entry at index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedPalette {
    colors: Vec<Rgba>,
    lookup: HashMap<Rgba, u8>,
}

impl IndexedPalette {
    /// Deduplicates `colors` in order, prepends transparency, truncates to 256
    /// and pads to the two entries a GIF color table needs at minimum.
    pub fn with_transparent<I: IntoIterator<Item = Rgba>>(colors: I) -> Self {
        let mut palette = Self {
            colors: vec![Rgba::TRANSPARENT],
            lookup: HashMap::new(),
        };
        for color in colors {
            let opaque = Rgba::rgb(color.r, color.g, color.b);
            if palette.colors.len() >= MAX_COLORS {
                break;
            }
            if palette.lookup.contains_key(&opaque) {
                continue;
            }
            palette.lookup.insert(opaque, palette.colors.len() as u8);
            palette.colors.push(opaque);
        }
        if palette.colors.len() < 2 {
            palette.colors.push(Rgba::BLACK);
            palette.lookup.entry(Rgba::BLACK).or_insert(1);
        }
        palette
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[Rgba] {
        &self.colors
    }

    pub fn color(&self, index: u8) -> Rgba {
        self.colors
            .get(usize::from(index))
            .copied()
            .unwrap_or(Rgba::TRANSPARENT)
    }

    /// Exact match when present, otherwise the nearest opaque entry.
    pub fn index_of(&self, color: Rgba) -> u8 {
        if color.a == 0 {
            return TRANSPARENT_INDEX;
        }
        let opaque = Rgba::rgb(color.r, color.g, color.b);
        if let Some(index) = self.lookup.get(&opaque) {
            return *index;
        }
        self.nearest(opaque)
    }

    fn nearest(&self, color: Rgba) -> u8 {
        self.colors
            .iter()
            .enumerate()
            .skip(1)
            .min_by_key(|(_, candidate)| candidate.distance_sq(color))
            .map(|(index, _)| index as u8)
            .unwrap_or(TRANSPARENT_INDEX)
    }

    /// Pixels of a base image: mostly-transparent pixels stay transparent.
    pub fn index_for_base(&self, pixel: Rgba) -> u8 {
        if pixel.a < 128 {
            TRANSPARENT_INDEX
        } else {
            self.index_of(pixel)
        }
    }

    /// Flat `r,g,b` triples for a GIF global color table.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        self.colors
            .iter()
            .flat_map(|color| [color.r, color.g, color.b])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{IndexedPalette, TRANSPARENT_INDEX};
    use crate::color::Rgba;

    #[test]
    fn transparent_entry_comes_first_and_duplicates_collapse() {
        let red = Rgba::rgb(255, 0, 0);
        let palette = IndexedPalette::with_transparent([red, red, Rgba::BLACK]);
        assert_eq!(palette.len(), 3);
        assert_eq!(palette.color(0), Rgba::TRANSPARENT);
        assert_eq!(palette.index_of(red), 1);
        assert_eq!(palette.index_of(Rgba::TRANSPARENT), TRANSPARENT_INDEX);
    }

    #[test]
    fn pads_to_two_entries_and_truncates_to_256() {
        assert_eq!(IndexedPalette::with_transparent(std::iter::empty()).len(), 2);

        let many = (0..300u32).map(|value| Rgba::rgb((value % 256) as u8, (value / 256) as u8, 7));
        assert_eq!(IndexedPalette::with_transparent(many).len(), 256);
    }

    #[test]
    fn unknown_colors_map_to_nearest_opaque_entry() {
        let palette =
            IndexedPalette::with_transparent([Rgba::rgb(250, 250, 250), Rgba::rgb(10, 10, 10)]);
        assert_eq!(palette.index_of(Rgba::rgb(240, 240, 240)), 1);
        assert_eq!(palette.index_of(Rgba::BLACK), 2);
        assert_eq!(palette.index_for_base(Rgba::new(255, 255, 255, 10)), TRANSPARENT_INDEX);
    }
}
