use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use termreel::asciicast::{Cast, EventKind};
use termreel::config::{load_and_validate_config, ExportConfig};
use termreel::play::{play, PlayOptions, RealtimePacer};
use termreel::progress::ProgressBar;
use termreel::record::{record, RecordOptions, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use termreel::render::FfmpegMode;
use termreel::theme::{builtin_names, Theme};
use termreel::{CancellationToken, ExportError, Exporter, OutputFormat, Progress};

#[derive(Debug, Parser)]
#[command(name = "termreel")]
#[command(about = "Replay recorded terminal sessions as animated GIF, SVG or video")]
#[command(version = env!("TERMREEL_VERSION"))]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render a recording to gif, svg, webm or mp4.
    Export(ExportArgs),
    /// Write a single frame as PNG.
    Frame(FrameArgs),
    /// Summarize a recording.
    Info {
        cast: PathBuf,
        #[arg(long = "json")]
        json: bool,
    },
    /// List built-in themes.
    Themes,
    /// Replay a recording in this terminal.
    Play(PlayArgs),
    /// Record a command (or your shell) to a cast file.
    Rec(RecArgs),
}

#[derive(Debug, Args)]
struct PlayArgs {
    cast: PathBuf,
    #[arg(short = 's', long = "speed", default_value_t = 1.0)]
    speed: f64,
    /// Longest pause in seconds; 0 keeps every pause.
    #[arg(short = 'i', long = "max-idle", default_value_t = 0.0, allow_hyphen_values = true)]
    max_idle: f64,
}

#[derive(Debug, Args)]
struct RecArgs {
    /// Where to write the cast.
    file: PathBuf,
    /// Command to record; defaults to $SHELL.
    #[arg(short = 'c', long = "command")]
    command: Option<String>,
    #[arg(long = "title")]
    title: Option<String>,
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// YAML export config; flags override its values.
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Built-in theme name or theme JSON path.
    #[arg(long = "theme")]
    theme: Option<String>,
    #[arg(long = "speed")]
    speed: Option<f64>,
    /// Longest pause in seconds; 0 disables the cap.
    #[arg(long = "max-idle")]
    max_idle: Option<f64>,
    #[arg(long = "no-compress")]
    no_compress: bool,
    #[arg(long = "no-window")]
    no_window: bool,
    #[arg(long = "no-cursor")]
    no_cursor: bool,
    /// TTF/OTF font used for raster output.
    #[arg(long = "font")]
    font: Option<PathBuf>,
    #[arg(long = "font-size")]
    font_size: Option<f32>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    cast: PathBuf,
    /// Output file, or `-` for stdout.
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
    /// Defaults to the output file extension.
    #[arg(long = "format")]
    format: Option<OutputFormat>,
    /// 0 loops forever, -1 plays once, n repeats n times.
    #[arg(long = "loop", allow_hyphen_values = true)]
    loop_count: Option<i32>,
    #[arg(long = "fps")]
    fps: Option<u32>,
    /// Video bitrate in kbps.
    #[arg(long = "bitrate")]
    bitrate: Option<u32>,
    #[arg(long = "ffmpeg")]
    ffmpeg: Option<FfmpegMode>,
    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Debug, Args)]
struct FrameArgs {
    cast: PathBuf,
    /// Frame index after deduplication; defaults to the last frame.
    #[arg(long = "index")]
    index: Option<usize>,
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Debug, Serialize)]
struct CastInfo {
    path: String,
    width: usize,
    height: usize,
    title: Option<String>,
    duration_secs: f64,
    output_events: usize,
    input_events: usize,
    marker_events: usize,
    frames: usize,
    unique_colors: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = CancellationToken::new();
    install_signal_handler(&cancel);

    let result = match cli.command {
        Commands::Export(args) => run_export(&args, &cancel),
        Commands::Frame(args) => run_frame(&args),
        Commands::Info { cast, json } => run_info(&cast, json),
        Commands::Themes => run_themes(),
        Commands::Play(args) => run_play(&args, &cancel),
        Commands::Rec(args) => run_rec(&args, &cancel),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) if is_cancelled(&error) => {
            eprintln!("termreel: cancelled");
            ExitCode::from(130)
        }
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "termreel=info",
        1 => "termreel=debug",
        _ => "termreel=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false),
        )
        .init();
}

/// First SIGINT/SIGTERM cancels the export; a second one exits immediately.
#[cfg(unix)]
fn install_signal_handler(cancel: &CancellationToken) {
    use signal_hook::consts::signal::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(error) => {
            warn!(%error, "failed to install signal handler");
            return;
        }
    };
    let cancel = cancel.clone();
    let spawned = std::thread::Builder::new()
        .name("termreel-signals".to_owned())
        .spawn(move || {
            for signal in signals.forever() {
                if cancel.is_cancelled() {
                    std::process::exit(128 + signal);
                }
                warn!(signal, "termination signal received, cancelling export");
                cancel.cancel();
            }
        });
    if let Err(error) = spawned {
        warn!(%error, "failed to spawn signal thread");
    }
}

#[cfg(not(unix))]
fn install_signal_handler(_cancel: &CancellationToken) {}

fn is_cancelled(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<ExportError>())
        .any(ExportError::is_cancelled)
}

fn load_cast(path: &Path) -> Result<Cast> {
    if path == Path::new("-") {
        let stdin = io::stdin();
        return Cast::from_reader(stdin.lock()).context("failed to read cast from stdin");
    }
    let file = File::open(path).with_context(|| format!("failed to open cast {}", path.display()))?;
    Cast::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse cast {}", path.display()))
}

fn resolve_config(render: &RenderArgs) -> Result<ExportConfig> {
    let mut config = match &render.config {
        Some(path) => load_and_validate_config(path)?,
        None => ExportConfig::default(),
    };
    if let Some(theme) = &render.theme {
        config.theme = theme.clone();
    }
    if let Some(speed) = render.speed {
        config.speed = speed;
    }
    if let Some(max_idle) = render.max_idle {
        config.max_idle = Some(max_idle);
    }
    if render.no_compress {
        config.compress = false;
    }
    if render.no_window {
        config.window = false;
    }
    if render.no_cursor {
        config.cursor = false;
    }
    if let Some(font) = &render.font {
        config.font = Some(font.clone());
    }
    if let Some(font_size) = render.font_size {
        config.font_size = font_size;
    }
    Ok(config)
}

fn run_export(args: &ExportArgs, cancel: &CancellationToken) -> Result<()> {
    let to_stdout = args.output == Path::new("-");
    let format = match args.format {
        Some(format) => format,
        None if to_stdout => bail!("--format is required when writing to stdout"),
        None => OutputFormat::from_path(&args.output).ok_or_else(|| {
            anyhow!(
                "cannot infer output format from {}; pass --format gif|svg|webm|mp4",
                args.output.display()
            )
        })?,
    };

    let mut config = resolve_config(&args.render)?;
    if let Some(loop_count) = args.loop_count {
        config.loop_count = loop_count;
    }
    if let Some(fps) = args.fps {
        config.frame_rate = fps;
    }
    if let Some(bitrate) = args.bitrate {
        config.video_bitrate = Some(bitrate);
    }
    if let Some(ffmpeg) = args.ffmpeg {
        config.ffmpeg = ffmpeg;
    }

    let cast = load_cast(&args.cast)?;
    let mut exporter = Exporter::new(config).context("failed to prepare export")?;
    let bar = if io::stderr().is_terminal() {
        let bar = Arc::new(Mutex::new(ProgressBar::new(io::stderr())));
        let sink = Arc::clone(&bar);
        exporter = exporter.with_progress(Progress::new(move |update| {
            let mut bar = sink.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = bar.update(update);
        }));
        Some(bar)
    } else {
        None
    };

    let result = write_export(&exporter, &cast, format, args, cancel);
    if let Some(bar) = bar {
        let _ = bar.lock().unwrap_or_else(PoisonError::into_inner).finish();
    }
    let summary = result?;

    info!(
        frames = summary.frames,
        written = summary.written,
        "{}x{} {}",
        summary.width,
        summary.height,
        summary.format
    );
    if !to_stdout {
        println!("Wrote {}", args.output.display());
    }
    Ok(())
}

fn write_export(
    exporter: &Exporter,
    cast: &Cast,
    format: OutputFormat,
    args: &ExportArgs,
    cancel: &CancellationToken,
) -> Result<termreel::ExportSummary> {
    let to_stdout = args.output == Path::new("-");
    let summary = if to_stdout {
        let stdout = io::stdout();
        let mut writer = BufWriter::new(stdout.lock());
        let summary = exporter.export(cast, format, &mut writer, cancel)?;
        writer.flush().context("failed to flush stdout")?;
        summary
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = BufWriter::new(file);
        let exported = exporter
            .export(cast, format, &mut writer, cancel)
            .and_then(|summary| writer.flush().map(|_| summary).map_err(ExportError::from));
        match exported {
            Ok(summary) => summary,
            Err(error) => {
                drop(writer);
                let _ = fs::remove_file(&args.output);
                return Err(error)
                    .with_context(|| format!("failed to export {}", args.output.display()));
            }
        }
    };
    Ok(summary)
}

fn run_frame(args: &FrameArgs) -> Result<()> {
    let config = resolve_config(&args.render)?;
    let cast = load_cast(&args.cast)?;
    let exporter = Exporter::new(config).context("failed to prepare export")?;

    let index = match args.index {
        Some(index) => index,
        None => {
            let recording = exporter.build_recording(&cast, &CancellationToken::new())?;
            recording.frames.len().saturating_sub(1)
        }
    };
    let image = exporter.render_still(&cast, index)?;
    image
        .save_with_format(&args.output, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!("Wrote {}", args.output.display());
    Ok(())
}

fn run_info(path: &Path, json: bool) -> Result<()> {
    let cast = load_cast(path)?;
    let exporter = Exporter::with_theme(ExportConfig::default(), Theme::default())?;
    let recording = exporter.build_recording(&cast, &CancellationToken::new())?;

    let info = CastInfo {
        path: path.display().to_string(),
        width: cast.header.width,
        height: cast.header.height,
        title: cast.header.title.clone(),
        duration_secs: cast.duration(),
        output_events: cast.count(EventKind::Output),
        input_events: cast.count(EventKind::Input),
        marker_events: cast.count(EventKind::Marker),
        frames: recording.frames.len(),
        unique_colors: recording.stats.unique_colors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("{}", info.path);
    if let Some(title) = &info.title {
        println!("  title:    {title}");
    }
    println!("  size:     {}x{}", info.width, info.height);
    println!("  duration: {:.3}s", info.duration_secs);
    println!(
        "  events:   {} output, {} input, {} marker",
        info.output_events, info.input_events, info.marker_events
    );
    println!("  frames:   {}", info.frames);
    println!("  colors:   {}", info.unique_colors);
    Ok(())
}

fn run_play(args: &PlayArgs, cancel: &CancellationToken) -> Result<()> {
    if !args.max_idle.is_finite() || args.max_idle < 0.0 {
        bail!("--max-idle must be >= 0 seconds, got {}", args.max_idle);
    }
    let cast = load_cast(&args.cast)?;
    let options = PlayOptions {
        speed: args.speed,
        max_idle: Duration::from_secs_f64(args.max_idle),
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    play(&cast.events, &options, &mut out, &mut RealtimePacer::new(), cancel)
        .with_context(|| format!("failed to play {}", args.cast.display()))?;
    Ok(())
}

/// Restores cooked mode even when recording fails.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(error) = crossterm::terminal::disable_raw_mode() {
            warn!(%error, "failed to restore terminal mode");
        }
    }
}

fn run_rec(args: &RecArgs, cancel: &CancellationToken) -> Result<()> {
    let interactive = io::stdin().is_terminal();
    let (width, height) = if interactive {
        crossterm::terminal::size().unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT))
    } else {
        (DEFAULT_WIDTH, DEFAULT_HEIGHT)
    };
    let options = RecordOptions {
        command: args.command.clone(),
        width,
        height,
        title: args.title.clone(),
    };

    eprintln!("recording asciicast to {}", args.file.display());
    eprintln!("exit the opened program when you're done");

    let cast = {
        let _raw = if interactive {
            Some(RawModeGuard::enable().context("failed to switch the terminal to raw mode")?)
        } else {
            None
        };
        let input: Option<Box<dyn io::Read + Send>> = if interactive {
            Some(Box::new(io::stdin()))
        } else {
            None
        };
        let stdout = io::stdout();
        let mut echo = stdout.lock();
        record(&options, input, &mut echo, cancel).context("recording failed")?
    };

    let file = File::create(&args.file)
        .with_context(|| format!("failed to create {}", args.file.display()))?;
    cast.to_writer(BufWriter::new(file))
        .with_context(|| format!("failed to write {}", args.file.display()))?;
    eprintln!("asciicast saved to {}", args.file.display());
    Ok(())
}

fn run_themes() -> Result<()> {
    for name in builtin_names() {
        println!("{name}");
    }
    Ok(())
}
