use termreel::asciicast::{Cast, Event, Header};
use termreel::config::ExportConfig;
use termreel::export::{CancellationToken, Exporter, OutputFormat};
use termreel::raster::PalettedFrame;
use termreel::render::gif::{build_delta_sequence, build_palette, write_gif};
use termreel::theme::Theme;
use termreel::ExportError;

fn exporter() -> Exporter {
    Exporter::with_theme(ExportConfig::default(), Theme::default()).expect("exporter should build")
}

fn typing_cast() -> Cast {
    Cast::new(
        Header::new(12, 3),
        vec![
            Event::output(0.0, "$ "),
            Event::output(0.2, "e"),
            Event::output(0.3, "c"),
            Event::output(0.4, "h"),
            Event::output(0.5, "o"),
            Event::output(0.9, "\r\n\x1b[32mok\x1b[0m\r\n$ "),
            Event::output(1.4, "\x1b[?25l"),
            Event::output(2.0, "\x1b[?25h"),
        ],
    )
}

struct DecodedFrame {
    pixels: Vec<u8>,
    delay: u16,
}

fn decode(bytes: &[u8]) -> (u16, u16, Vec<DecodedFrame>) {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);
    let mut decoder = options.read_info(bytes).expect("gif header should decode");
    let (width, height) = (decoder.width(), decoder.height());
    let mut frames = Vec::new();
    while let Some(frame) = decoder.read_next_frame().expect("frame should decode") {
        assert_eq!(frame.dispose, gif::DisposalMethod::Keep);
        assert_eq!(frame.transparent, Some(0));
        assert_eq!((frame.left, frame.top), (0, 0));
        frames.push(DecodedFrame {
            pixels: frame.buffer.to_vec(),
            delay: frame.delay,
        });
    }
    (width, height, frames)
}

/// Applies each decoded delta over the previous canvas, keeping pixels the
/// delta marks transparent.
fn composite(frames: &[DecodedFrame]) -> Vec<Vec<u8>> {
    let mut canvas: Option<Vec<u8>> = None;
    let mut out = Vec::new();
    for frame in frames {
        let next = match &canvas {
            None => frame.pixels.clone(),
            Some(previous) => previous
                .iter()
                .zip(&frame.pixels)
                .map(|(before, delta)| if *delta == 0 { *before } else { *delta })
                .collect(),
        };
        out.push(next.clone());
        canvas = Some(next);
    }
    out
}

/// Paletted frames minus the ones identical to their predecessor.
fn distinct(frames: &[PalettedFrame]) -> Vec<Vec<u8>> {
    let mut out: Vec<Vec<u8>> = Vec::new();
    for frame in frames {
        if out.last() != Some(&frame.pixels) {
            out.push(frame.pixels.clone());
        }
    }
    out
}

#[test]
fn decoded_deltas_composite_back_to_the_rendered_frames() {
    let exporter = exporter();
    let cancel = CancellationToken::new();
    let recording = exporter
        .build_recording(&typing_cast(), &cancel)
        .expect("recording should build");
    let palette = build_palette(exporter.theme(), &recording.colors);
    let frames = exporter
        .rasterizer()
        .rasterize_paletted(&recording, &palette, &cancel)
        .expect("frames should rasterize");

    let sequence = build_delta_sequence(&frames).expect("sequence should build");
    let mut bytes = Vec::new();
    write_gif(&mut bytes, &palette, &sequence, 0).expect("gif should encode");

    let (width, height, decoded) = decode(&bytes);
    assert_eq!(u32::from(width), frames[0].width);
    assert_eq!(u32::from(height), frames[0].height);
    assert_eq!(composite(&decoded), distinct(&frames));
}

#[test]
fn five_millisecond_gap_encodes_as_minimum_delay() {
    let cast = Cast::new(
        Header::new(6, 1),
        vec![
            Event::output(0.0, "a"),
            Event::output(0.005, "b"),
            Event::output(1.0, "c"),
        ],
    );
    let mut bytes = Vec::new();
    exporter()
        .export(&cast, OutputFormat::Gif, &mut bytes, &CancellationToken::new())
        .expect("gif export should succeed");

    let (_, _, decoded) = decode(&bytes);
    let delays = decoded.iter().map(|frame| frame.delay).collect::<Vec<_>>();
    assert_eq!(delays, vec![2, 2, 99]);
}

#[test]
fn loop_count_is_written() {
    let config = ExportConfig {
        loop_count: 3,
        ..ExportConfig::default()
    };
    let exporter = Exporter::with_theme(config, Theme::default()).expect("exporter should build");
    let mut bytes = Vec::new();
    exporter
        .export(&typing_cast(), OutputFormat::Gif, &mut bytes, &CancellationToken::new())
        .expect("gif export should succeed");

    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);
    let mut decoder = options.read_info(bytes.as_slice()).expect("gif should decode");
    while decoder.read_next_frame().expect("frame should decode").is_some() {}
    assert_eq!(decoder.repeat(), gif::Repeat::Finite(3));
}

#[test]
fn empty_recording_is_rejected() {
    let cast = Cast::new(Header::new(4, 1), Vec::new());
    let mut bytes = Vec::new();
    let err = exporter()
        .export(&cast, OutputFormat::Gif, &mut bytes, &CancellationToken::new())
        .expect_err("no frames must fail");
    assert!(matches!(err, ExportError::EmptyRecording));
    assert_eq!(err.to_string(), "recording has no frames");
}
