use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fontdue::{Font, FontSettings};
use tracing::debug;

use crate::error::ExportError;
use crate::raster::atlas::BitmapAtlas;

const SYSTEM_MONOSPACE_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu-sans-mono-fonts/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/liberation-mono/LiberationMono-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSansMono-Regular.ttf",
    "/System/Library/Fonts/Menlo.ttc",
    "/System/Library/Fonts/Monaco.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
];

/// Where glyph shapes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontSource {
    File(PathBuf),
    /// First readable well-known monospace font, else the builtin atlas.
    System,
    Builtin,
}

/// Coverage mask for one character, positioned relative to the pen and the
/// baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphBitmap {
    pub width: usize,
    pub height: usize,
    /// Horizontal offset from the pen position.
    pub left: i32,
    /// Distance from the baseline up to the top row.
    pub top: i32,
    pub coverage: Vec<u8>,
}

/// Font bytes resolved once per export. Each worker opens its own
/// [`GlyphContext`] from it.
#[derive(Debug, Clone)]
pub struct GlyphSource {
    data: FontData,
    size: f32,
}

#[derive(Debug, Clone)]
enum FontData {
    Bytes { bytes: Arc<Vec<u8>>, label: String },
    Builtin,
}

impl GlyphSource {
    pub fn resolve(source: &FontSource, size: f32) -> Result<Self, ExportError> {
        match source {
            FontSource::File(path) => {
                let bytes = fs::read(path).map_err(|error| ExportError::Font {
                    path: path.clone(),
                    reason: error.to_string(),
                })?;
                Font::from_bytes(bytes.as_slice(), FontSettings::default()).map_err(|reason| {
                    ExportError::Font {
                        path: path.clone(),
                        reason: reason.to_owned(),
                    }
                })?;
                Ok(Self::from_bytes(bytes, path, size))
            }
            FontSource::System => Ok(Self::system(size)),
            FontSource::Builtin => Ok(Self::builtin(size)),
        }
    }

    pub fn builtin(size: f32) -> Self {
        Self {
            data: FontData::Builtin,
            size,
        }
    }

    fn system(size: f32) -> Self {
        for candidate in SYSTEM_MONOSPACE_FONTS {
            let path = Path::new(candidate);
            let Ok(bytes) = fs::read(path) else {
                continue;
            };
            if Font::from_bytes(bytes.as_slice(), FontSettings::default()).is_ok() {
                debug!(font = %path.display(), "using system monospace font");
                return Self::from_bytes(bytes, path, size);
            }
        }
        debug!("no system monospace font found; using builtin bitmap glyphs");
        Self::builtin(size)
    }

    fn from_bytes(bytes: Vec<u8>, path: &Path, size: f32) -> Self {
        Self {
            data: FontData::Bytes {
                bytes: Arc::new(bytes),
                label: path.display().to_string(),
            },
            size,
        }
    }

    /// Test hook for exercising the per-worker fallback path.
    #[cfg(test)]
    pub(crate) fn from_raw(bytes: Vec<u8>, label: &str, size: f32) -> Self {
        Self {
            data: FontData::Bytes {
                bytes: Arc::new(bytes),
                label: label.to_owned(),
            },
            size,
        }
    }

    pub fn label(&self) -> &str {
        match &self.data {
            FontData::Bytes { label, .. } => label,
            FontData::Builtin => "builtin 5x7",
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.data, FontData::Builtin)
    }

    /// Parses a fresh rasterizer. Font parsing is the step that can fail.
    pub fn open(&self) -> Result<GlyphContext, String> {
        match &self.data {
            FontData::Bytes { bytes, label } => {
                let font = Font::from_bytes(bytes.as_slice(), FontSettings::default())
                    .map_err(|error| format!("failed to parse font {label}: {error}"))?;
                Ok(GlyphContext::new(GlyphRenderer::Font {
                    font,
                    size: self.size,
                }))
            }
            FontData::Builtin => Ok(GlyphContext::builtin(self.size)),
        }
    }
}

enum GlyphRenderer {
    Font { font: Font, size: f32 },
    Atlas { atlas: BitmapAtlas, scale: u32 },
}

impl GlyphRenderer {
    fn rasterize(&self, ch: char) -> GlyphBitmap {
        match self {
            GlyphRenderer::Font { font, size } => {
                let (metrics, coverage) = font.rasterize(ch, *size);
                GlyphBitmap {
                    width: metrics.width,
                    height: metrics.height,
                    left: metrics.xmin,
                    top: metrics.ymin + metrics.height as i32,
                    coverage,
                }
            }
            GlyphRenderer::Atlas { atlas, scale } => {
                let (width, height, coverage) = atlas.rasterize(ch, *scale);
                GlyphBitmap {
                    width: width as usize,
                    height: height as usize,
                    left: 1,
                    top: height as i32,
                    coverage,
                }
            }
        }
    }
}

/// A glyph rasterizer plus its coverage cache. Not shared between threads.
pub struct GlyphContext {
    renderer: GlyphRenderer,
    cache: HashMap<char, GlyphBitmap>,
}

impl GlyphContext {
    fn new(renderer: GlyphRenderer) -> Self {
        Self {
            renderer,
            cache: HashMap::new(),
        }
    }

    pub fn builtin(size: f32) -> Self {
        let scale = (size / 10.0).round().max(1.0) as u32;
        Self::new(GlyphRenderer::Atlas {
            atlas: BitmapAtlas,
            scale,
        })
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.renderer, GlyphRenderer::Atlas { .. })
    }

    pub fn glyph(&mut self, ch: char) -> &GlyphBitmap {
        let renderer = &self.renderer;
        self.cache.entry(ch).or_insert_with(|| renderer.rasterize(ch))
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{FontSource, GlyphContext, GlyphSource};
    use crate::error::ExportError;

    #[test]
    fn builtin_glyphs_sit_on_the_baseline() {
        let mut glyphs = GlyphContext::builtin(20.0);
        let glyph = glyphs.glyph('A').clone();
        assert_eq!((glyph.width, glyph.height), (10, 14));
        assert_eq!(glyph.top, 14);
        glyphs.glyph('A');
        assert_eq!(glyphs.cached(), 1);
    }

    #[test]
    fn missing_font_file_is_an_input_error() {
        let err = GlyphSource::resolve(&FontSource::File(PathBuf::from("/nonexistent/font.ttf")), 20.0)
            .expect_err("missing font must fail");
        assert!(matches!(err, ExportError::Font { .. }));
    }

    #[test]
    fn garbage_font_bytes_fail_to_open() {
        let source = GlyphSource::from_raw(vec![0, 1, 2, 3], "garbage", 20.0);
        assert!(source.open().is_err());
        assert!(GlyphSource::builtin(20.0).open().expect("builtin opens").is_builtin());
    }

    #[test]
    fn system_source_always_resolves() {
        let source = GlyphSource::resolve(&FontSource::System, 20.0).expect("system never fails");
        assert!(source.open().is_ok());
    }
}
