use image::RgbaImage;
use tiny_skia::{FillRule, Paint, PathBuilder, Pixmap, Rect, Transform};

use crate::color::Rgba;
use crate::error::ExportError;
use crate::raster::Layout;
use crate::theme::Theme;

pub const WINDOW_RADIUS: f32 = 5.0;
pub const BUTTON_RADIUS: f32 = 6.0;
pub const BUTTON_SPACING: f32 = 20.0;

/// The static part of every frame: window chrome or a plain background, plus
/// the terminal content area. Both variants paint the margin in the window
/// background and the content area in the terminal background.
pub fn draw_base(layout: &Layout, theme: &Theme, cols: usize, rows: usize) -> Result<RgbaImage, ExportError> {
    let width = layout.image_width(cols);
    let height = layout.image_height(rows);
    let mut pixmap = Pixmap::new(width, height).ok_or(ExportError::FrameTooLarge { width, height })?;

    if layout.show_window {
        if let Some(path) = rounded_rect(width as f32, height as f32, WINDOW_RADIUS) {
            pixmap.fill_path(
                &path,
                &paint(theme.window_background),
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        }
        let padding = layout.padding as f32;
        for (index, color) in theme.window_buttons.iter().enumerate() {
            let cx = padding + index as f32 * BUTTON_SPACING;
            if let Some(circle) = PathBuilder::from_circle(cx, padding, BUTTON_RADIUS) {
                pixmap.fill_path(&circle, &paint(*color), FillRule::Winding, Transform::identity(), None);
            }
        }
    } else {
        pixmap.fill(skia_color(theme.window_background));
    }

    let (x, y) = layout.content_origin();
    if let Some(content) = Rect::from_xywh(
        x as f32,
        y as f32,
        layout.content_width(cols) as f32,
        layout.content_height(rows) as f32,
    ) {
        let mut fill = paint(theme.background);
        fill.anti_alias = false;
        pixmap.fill_rect(content, &fill, Transform::identity(), None);
    }

    Ok(pixmap_to_image(&pixmap))
}

fn paint(color: Rgba) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, color.a);
    paint.anti_alias = true;
    paint
}

fn skia_color(color: Rgba) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba8(color.r, color.g, color.b, color.a)
}

fn rounded_rect(width: f32, height: f32, radius: f32) -> Option<tiny_skia::Path> {
    let r = radius.min(width / 2.0).min(height / 2.0);
    let mut pb = PathBuilder::new();
    pb.move_to(r, 0.0);
    pb.line_to(width - r, 0.0);
    pb.quad_to(width, 0.0, width, r);
    pb.line_to(width, height - r);
    pb.quad_to(width, height, width - r, height);
    pb.line_to(r, height);
    pb.quad_to(0.0, height, 0.0, height - r);
    pb.line_to(0.0, r);
    pb.quad_to(0.0, 0.0, r, 0.0);
    pb.close();
    pb.finish()
}

fn pixmap_to_image(pixmap: &Pixmap) -> RgbaImage {
    let mut image = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in image.pixels_mut().zip(pixmap.pixels()) {
        let color = src.demultiply();
        dst.0 = [color.red(), color.green(), color.blue(), color.alpha()];
    }
    image
}
