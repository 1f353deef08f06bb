use image::RgbaImage;

use crate::color::Rgba;
use crate::raster::glyphs::GlyphBitmap;
use crate::raster::palette::{BlendCache, IndexedPalette};

/// Drawing surface shared by the RGBA and paletted frame paths.
pub trait Canvas {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Overwrites the clipped rectangle with `color`.
    fn fill_rect(&mut self, x: i32, y: i32, w: u32, h: u32, color: Rgba);
    /// Source-over blend of `color` at `coverage` onto one pixel.
    fn blend(&mut self, x: i32, y: i32, color: Rgba, coverage: u8);

    fn draw_glyph(&mut self, glyph: &GlyphBitmap, pen_x: i32, baseline: i32, color: Rgba) {
        let left = pen_x + glyph.left;
        let top = baseline - glyph.top;
        for row in 0..glyph.height {
            for col in 0..glyph.width {
                let coverage = glyph.coverage[row * glyph.width + col];
                if coverage == 0 {
                    continue;
                }
                self.blend(left + col as i32, top + row as i32, color, coverage);
            }
        }
    }
}

fn clip(x: i32, y: i32, w: u32, h: u32, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = i64::from(x).clamp(0, i64::from(width));
    let y0 = i64::from(y).clamp(0, i64::from(height));
    let x1 = (i64::from(x) + i64::from(w)).clamp(0, i64::from(width));
    let y1 = (i64::from(y) + i64::from(h)).clamp(0, i64::from(height));
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
}

fn in_bounds(x: i32, y: i32, width: u32, height: u32) -> Option<(u32, u32)> {
    let x = u32::try_from(x).ok().filter(|x| *x < width)?;
    let y = u32::try_from(y).ok().filter(|y| *y < height)?;
    Some((x, y))
}

impl Canvas for RgbaImage {
    fn width(&self) -> u32 {
        self.dimensions().0
    }

    fn height(&self) -> u32 {
        self.dimensions().1
    }

    fn fill_rect(&mut self, x: i32, y: i32, w: u32, h: u32, color: Rgba) {
        let (width, height) = self.dimensions();
        let Some((x0, y0, x1, y1)) = clip(x, y, w, h, width, height) else {
            return;
        };
        let pixel = image::Rgba(color.to_array());
        for yy in y0..y1 {
            for xx in x0..x1 {
                self.put_pixel(xx, yy, pixel);
            }
        }
    }

    fn blend(&mut self, x: i32, y: i32, color: Rgba, coverage: u8) {
        let (width, height) = self.dimensions();
        let Some((x, y)) = in_bounds(x, y, width, height) else {
            return;
        };
        let dst = self.get_pixel_mut(x, y);
        let blended = color.blend_over(Rgba::from_array(dst.0), coverage);
        dst.0 = blended.to_array();
    }
}

/// Draws straight into palette indices, so GIF frames never round-trip
/// through RGBA.
pub struct PalettedCanvas<'a> {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    palette: &'a IndexedPalette,
    blends: &'a mut BlendCache,
}

impl<'a> PalettedCanvas<'a> {
    pub fn new(
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        palette: &'a IndexedPalette,
        blends: &'a mut BlendCache,
    ) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize);
        Self {
            width,
            height,
            pixels,
            palette,
            blends,
        }
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

impl Canvas for PalettedCanvas<'_> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn fill_rect(&mut self, x: i32, y: i32, w: u32, h: u32, color: Rgba) {
        let Some((x0, y0, x1, y1)) = clip(x, y, w, h, self.width, self.height) else {
            return;
        };
        let index = self.palette.index_of(color);
        for yy in y0..y1 {
            let start = (yy * self.width + x0) as usize;
            let end = (yy * self.width + x1) as usize;
            self.pixels[start..end].fill(index);
        }
    }

    fn blend(&mut self, x: i32, y: i32, color: Rgba, coverage: u8) {
        let Some((x, y)) = in_bounds(x, y, self.width, self.height) else {
            return;
        };
        let offset = (y * self.width + x) as usize;
        let dst = self.pixels[offset];
        let palette = self.palette;
        let index = *self
            .blends
            .entry((dst, color, coverage))
            .or_insert_with(|| palette.index_of(color.blend_over(palette.color(dst), coverage)));
        self.pixels[offset] = index;
    }
}
