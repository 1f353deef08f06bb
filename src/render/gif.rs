//! Animated GIF output with transparent delta frames.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::io::Write;
use std::time::{Duration, Instant};

use ::gif::{DisposalMethod, Encoder, Frame as GifFrame, Repeat};
use tracing::{debug, info, warn};

use crate::catalog::ColorCatalog;
use crate::error::ExportError;
use crate::export::CancellationToken;
use crate::ir::Recording;
use crate::progress::{Phase, Progress};
use crate::raster::palette::{IndexedPalette, MAX_COLORS, TRANSPARENT_INDEX};
use crate::raster::{PalettedFrame, Rasterizer};
use crate::theme::Theme;

/// GIF delays are in hundredths of a second. Players clamp anything shorter
/// than this to 100ms.
pub const MIN_DELAY_CS: u16 = 2;

/// Every color a frame can contain, in a fixed order: chrome first, then the
/// catalog in id order.
pub fn build_palette(theme: &Theme, colors: &ColorCatalog) -> IndexedPalette {
    let mut wanted = vec![
        theme.background,
        theme.window_background,
        theme.foreground,
    ];
    wanted.extend(theme.window_buttons);
    wanted.push(colors.default_foreground());
    wanted.push(colors.default_background());
    wanted.extend(colors.iter().map(|(_, color)| color));

    let palette = IndexedPalette::with_transparent(wanted.iter().copied());
    let distinct = wanted
        .iter()
        .map(|color| (color.r, color.g, color.b))
        .collect::<BTreeSet<_>>()
        .len();
    if distinct + 1 > MAX_COLORS {
        warn!(
            requested = distinct + 1,
            kept = palette.len(),
            "gif palette truncated; extra colors snap to their nearest entry"
        );
    }
    palette
}

/// Frame delays in centiseconds. Every frame but the last gets at least
/// [`MIN_DELAY_CS`].
pub fn quantize_delays(delays: &[Duration]) -> Vec<u16> {
    let last = delays.len().saturating_sub(1);
    delays
        .iter()
        .enumerate()
        .map(|(index, delay)| {
            let mut centis = delay.as_millis() / 10;
            if index != last {
                centis = centis.max(u128::from(MIN_DELAY_CS));
            }
            u16::try_from(centis).unwrap_or(u16::MAX)
        })
        .collect()
}

/// Pixels of `next` that differ from `previous`; everything else is the
/// transparent index. `None` when the frames are identical.
pub fn compute_delta(previous: &[u8], next: &[u8]) -> Option<Vec<u8>> {
    if previous == next {
        return None;
    }
    let mut delta = vec![TRANSPARENT_INDEX; next.len()];
    for ((out, before), after) in delta.iter_mut().zip(previous).zip(next) {
        if before != after {
            *out = *after;
        }
    }
    Some(delta)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaFrame {
    pub pixels: Vec<u8>,
    /// Centiseconds.
    pub delay: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaSequence {
    pub width: u16,
    pub height: u16,
    pub frames: Vec<DeltaFrame>,
}

/// First frame in full, then deltas against the previously emitted frame.
/// Identical frames fold their delay into the frame before them.
pub fn build_delta_sequence(frames: &[PalettedFrame]) -> Result<DeltaSequence, ExportError> {
    let first = frames.first().ok_or(ExportError::EmptyRecording)?;
    let (width, height) = gif_dimensions(first.width, first.height)?;
    let delays = quantize_delays(&frames.iter().map(|frame| frame.delay).collect::<Vec<_>>());

    let mut out = vec![DeltaFrame {
        pixels: first.pixels.clone(),
        delay: delays[0],
    }];
    let mut previous = first.pixels.as_slice();

    for (frame, delay) in frames.iter().zip(&delays).skip(1) {
        match compute_delta(previous, &frame.pixels) {
            Some(pixels) => {
                out.push(DeltaFrame {
                    pixels,
                    delay: *delay,
                });
                previous = frame.pixels.as_slice();
            }
            None => {
                if let Some(last) = out.last_mut() {
                    last.delay = last.delay.saturating_add(*delay);
                }
            }
        }
    }

    debug!(
        input = frames.len(),
        emitted = out.len(),
        "built gif delta sequence"
    );
    Ok(DeltaSequence {
        width,
        height,
        frames: out,
    })
}

fn gif_dimensions(width: u32, height: u32) -> Result<(u16, u16), ExportError> {
    match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(ExportError::FrameTooLarge { width, height }),
    }
}

/// `0` loops forever, `-1` plays once with no loop extension, `n` repeats.
fn repeat_for(loop_count: i32) -> Option<Repeat> {
    match loop_count {
        0 => Some(Repeat::Infinite),
        n if n > 0 => Some(Repeat::Finite(u16::try_from(n).unwrap_or(u16::MAX))),
        _ => None,
    }
}

pub fn write_gif<W: Write>(
    writer: W,
    palette: &IndexedPalette,
    sequence: &DeltaSequence,
    loop_count: i32,
) -> Result<(), ExportError> {
    encode_sequence(writer, palette, sequence, loop_count, &Progress::default())
}

fn encode_sequence<W: Write>(
    writer: W,
    palette: &IndexedPalette,
    sequence: &DeltaSequence,
    loop_count: i32,
    progress: &Progress,
) -> Result<(), ExportError> {
    let total = sequence.frames.len();
    progress.report(Phase::Encoding, 0, total);
    let mut encoder = Encoder::new(
        writer,
        sequence.width,
        sequence.height,
        &palette.to_rgb_bytes(),
    )?;
    if let Some(repeat) = repeat_for(loop_count) {
        encoder.set_repeat(repeat)?;
    }

    for (position, frame) in sequence.frames.iter().enumerate() {
        let mut gif_frame = GifFrame::default();
        gif_frame.width = sequence.width;
        gif_frame.height = sequence.height;
        gif_frame.delay = frame.delay;
        gif_frame.dispose = DisposalMethod::Keep;
        gif_frame.transparent = Some(TRANSPARENT_INDEX);
        gif_frame.buffer = Cow::Borrowed(frame.pixels.as_slice());
        encoder.write_frame(&gif_frame)?;
        progress.report(Phase::Encoding, position + 1, total);
    }
    Ok(())
}

/// Rasterizes straight into the GIF palette and encodes the deltas.
pub struct GifRenderer<'a> {
    rasterizer: &'a Rasterizer,
    loop_count: i32,
    progress: Progress,
}

impl<'a> GifRenderer<'a> {
    pub fn new(rasterizer: &'a Rasterizer, loop_count: i32) -> Self {
        Self {
            rasterizer,
            loop_count,
            progress: Progress::default(),
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Returns the number of GIF frames written.
    pub fn render<W: Write>(
        &self,
        recording: &Recording,
        writer: W,
        cancel: &CancellationToken,
    ) -> Result<usize, ExportError> {
        let palette = build_palette(self.rasterizer.theme(), &recording.colors);
        let frames = self.rasterizer.rasterize_paletted(recording, &palette, cancel)?;
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let started = Instant::now();
        let sequence = build_delta_sequence(&frames)?;
        encode_sequence(writer, &palette, &sequence, self.loop_count, &self.progress)?;
        info!(
            frames = sequence.frames.len(),
            colors = palette.len(),
            width = sequence.width,
            height = sequence.height,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "encoded gif"
        );
        Ok(sequence.frames.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{
        build_delta_sequence, build_palette, compute_delta, encode_sequence, quantize_delays,
        repeat_for, write_gif, MIN_DELAY_CS,
    };
    use crate::catalog::ColorCatalog;
    use crate::color::Rgba;
    use crate::error::ExportError;
    use crate::raster::palette::IndexedPalette;
    use crate::progress::{Phase, Progress};
    use crate::raster::PalettedFrame;
    use crate::theme::Theme;

    fn paletted(index: usize, delay_ms: u64, pixels: Vec<u8>) -> PalettedFrame {
        PalettedFrame {
            index,
            delay: Duration::from_millis(delay_ms),
            width: 2,
            height: 2,
            pixels,
        }
    }

    #[test]
    fn short_delays_are_raised_except_for_the_last_frame() {
        let delays = [
            Duration::from_millis(5),
            Duration::from_millis(1234),
            Duration::from_millis(5),
        ];
        assert_eq!(quantize_delays(&delays), vec![MIN_DELAY_CS, 123, 0]);
        assert_eq!(quantize_delays(&[Duration::from_secs(1_000)]), vec![u16::MAX]);
    }

    #[test]
    fn delta_keeps_only_changed_pixels() {
        assert_eq!(compute_delta(&[1, 2, 3], &[1, 5, 3]), Some(vec![0, 5, 0]));
        assert_eq!(compute_delta(&[1, 2, 3], &[1, 2, 3]), None);
    }

    #[test]
    fn identical_frames_merge_their_delay() {
        let frames = vec![
            paletted(0, 100, vec![1, 1, 1, 1]),
            paletted(1, 300, vec![1, 1, 1, 1]),
            paletted(2, 50, vec![1, 2, 1, 1]),
        ];
        let sequence = build_delta_sequence(&frames).expect("sequence should build");
        assert_eq!(sequence.frames.len(), 2);
        assert_eq!(sequence.frames[0].delay, 40);
        assert_eq!(sequence.frames[1].pixels, vec![0, 2, 0, 0]);
        assert_eq!(sequence.frames[1].delay, 5);
    }

    #[test]
    fn empty_and_oversized_inputs_are_rejected() {
        assert!(matches!(
            build_delta_sequence(&[]),
            Err(ExportError::EmptyRecording)
        ));
        let huge = PalettedFrame {
            index: 0,
            delay: Duration::ZERO,
            width: 70_000,
            height: 1,
            pixels: Vec::new(),
        };
        assert!(matches!(
            build_delta_sequence(&[huge]),
            Err(ExportError::FrameTooLarge { width: 70_000, .. })
        ));
    }

    #[test]
    fn palette_starts_with_transparency_and_theme_colors() {
        let theme = Theme::default();
        let mut colors = ColorCatalog::new(theme.foreground, theme.background);
        colors.register_rgba(Rgba::rgb(1, 2, 3));
        let palette = build_palette(&theme, &colors);
        assert_eq!(palette.color(0), Rgba::TRANSPARENT);
        assert_eq!(palette.color(1), theme.background);
        assert_eq!(palette.color(2), theme.window_background);
        assert_eq!(palette.index_of(Rgba::rgb(1, 2, 3)) as usize, palette.len() - 1);
    }

    #[test]
    fn loop_count_maps_to_repeat_extension() {
        assert_eq!(repeat_for(0), Some(gif::Repeat::Infinite));
        assert_eq!(repeat_for(3), Some(gif::Repeat::Finite(3)));
        assert_eq!(repeat_for(-1), None);
    }

    #[test]
    fn written_gif_decodes_with_expected_frames() {
        let palette = IndexedPalette::with_transparent([Rgba::BLACK, Rgba::rgb(255, 255, 255)]);
        let frames = vec![
            paletted(0, 100, vec![1, 1, 1, 1]),
            paletted(1, 100, vec![1, 2, 1, 1]),
        ];
        let sequence = build_delta_sequence(&frames).expect("sequence should build");
        let mut bytes = Vec::new();
        write_gif(&mut bytes, &palette, &sequence, 0).expect("gif should encode");

        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::Indexed);
        let mut decoder = options.read_info(bytes.as_slice()).expect("gif should decode");
        let mut decoded = Vec::new();
        while let Some(frame) = decoder.read_next_frame().expect("frame should decode") {
            decoded.push((frame.buffer.to_vec(), frame.delay, frame.transparent));
        }
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].0, vec![1, 1, 1, 1]);
        assert_eq!(decoded[1].0, vec![0, 2, 0, 0]);
        assert_eq!(decoded[1].2, Some(0));
    }

    #[test]
    fn encoding_reports_each_written_frame() {
        let palette = IndexedPalette::with_transparent([Rgba::BLACK, Rgba::rgb(255, 255, 255)]);
        let frames = vec![
            paletted(0, 100, vec![1, 1, 1, 1]),
            paletted(1, 100, vec![1, 2, 1, 1]),
            paletted(2, 100, vec![2, 2, 1, 1]),
        ];
        let sequence = build_delta_sequence(&frames).expect("sequence should build");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress = Progress::new(move |update| sink.lock().expect("lock").push(update));

        encode_sequence(Vec::new(), &palette, &sequence, 0, &progress).expect("gif should encode");

        let seen = seen.lock().expect("lock");
        assert!(seen.iter().all(|update| update.phase == Phase::Encoding && update.total == 3));
        assert_eq!(
            seen.iter().map(|update| update.current).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }
}
