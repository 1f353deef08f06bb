//! Frame render benchmarks: paletted rasterization and GIF delta encoding.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use termreel::asciicast::{Cast, Event, Header};
use termreel::config::ExportConfig;
use termreel::export::{CancellationToken, Exporter};
use termreel::render::gif::{build_delta_sequence, build_palette, write_gif};
use termreel::theme::Theme;

fn busy_cast() -> Cast {
    let mut events = Vec::new();
    for line in 0..60 {
        let color = 31 + (line % 7);
        events.push(Event::output(
            f64::from(line) * 0.05,
            format!("\x1b[{color}mline {line:03}\x1b[0m the quick brown fox jumps\r\n"),
        ));
    }
    Cast::new(Header::new(80, 24), events)
}

fn bench_render(c: &mut Criterion) {
    let exporter = Exporter::with_theme(ExportConfig::default(), Theme::default())
        .expect("create exporter");
    let cancel = CancellationToken::new();
    let recording = exporter
        .build_recording(&busy_cast(), &cancel)
        .expect("build recording");
    let palette = build_palette(exporter.theme(), &recording.colors);

    let mut group = c.benchmark_group("render_frame");
    group.sample_size(20);

    group.bench_function("single_rgba_80x24", |b| {
        b.iter(|| black_box(exporter.rasterizer().render_frame(&recording, 30).expect("render")));
    });

    group.bench_function("paletted_pool_80x24", |b| {
        b.iter(|| {
            black_box(
                exporter
                    .rasterizer()
                    .rasterize_paletted(&recording, &palette, &cancel)
                    .expect("rasterize"),
            )
        });
    });

    let frames = exporter
        .rasterizer()
        .rasterize_paletted(&recording, &palette, &cancel)
        .expect("rasterize");
    group.bench_function("gif_delta_encode_80x24", |b| {
        b.iter(|| {
            let sequence = build_delta_sequence(&frames).expect("delta");
            let mut out = Vec::new();
            write_gif(&mut out, &palette, &sequence, 0).expect("encode");
            black_box(out)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_render);
criterion_main!(benches);
