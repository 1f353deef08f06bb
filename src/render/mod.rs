//! Output encoders: GIF from paletted frames, SVG straight from the IR and
//! video through ffmpeg.

pub mod gif;
pub mod svg;
pub mod video;

pub use self::gif::GifRenderer;
pub use self::svg::{SvgOptions, SvgRenderer};
pub use self::video::{FfmpegMode, VideoContainer, VideoEncoder, VideoOptions};
