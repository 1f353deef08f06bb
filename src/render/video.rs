//! Video output through an ffmpeg subprocess.
//!
//! Raw RGBA frames go to ffmpeg's stdin while its stdout (the finished
//! container) is copied to the caller's writer, so neither pipe can fill up
//! and stall the other.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ExportError;
use crate::progress::{Phase, Progress};
use crate::raster::RgbaFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FfmpegMode {
    #[default]
    Auto,
    System,
    Sidecar,
}

impl FromStr for FfmpegMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "system" => Ok(Self::System),
            "sidecar" => Ok(Self::Sidecar),
            other => Err(format!(
                "unknown ffmpeg mode '{other}' (expected auto, system or sidecar)"
            )),
        }
    }
}

impl fmt::Display for FfmpegMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::System => "system",
            Self::Sidecar => "sidecar",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoContainer {
    Webm,
    Mp4,
}

impl VideoContainer {
    fn codec_args(self) -> Vec<String> {
        let args: &[&str] = match self {
            Self::Webm => &[
                "-c:v",
                "libvpx-vp9",
                "-pix_fmt",
                "yuv420p",
                "-deadline",
                "good",
                "-cpu-used",
                "5",
                "-row-mt",
                "1",
            ],
            Self::Mp4 => &[
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "frag_keyframe+empty_moov",
            ],
        };
        args.iter().map(|arg| (*arg).to_owned()).collect()
    }

    fn muxer(self) -> &'static str {
        match self {
            Self::Webm => "webm",
            Self::Mp4 => "mp4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOptions {
    pub container: VideoContainer,
    pub frame_rate: u32,
    /// kbps
    pub bitrate: Option<u32>,
    pub ffmpeg: FfmpegMode,
}

/// Merges frames shorter than one output frame into the next one. The last
/// frame is always kept.
pub fn filter_frames(frames: Vec<RgbaFrame>, frame_rate: u32) -> Vec<RgbaFrame> {
    let frame_duration = frame_duration(frame_rate);
    let total = frames.len();
    let mut kept = Vec::with_capacity(total);
    let mut carried = Duration::ZERO;

    for (position, mut frame) in frames.into_iter().enumerate() {
        let delay = carried + frame.delay;
        if delay < frame_duration && position + 1 < total {
            carried = delay;
            continue;
        }
        frame.delay = delay;
        carried = Duration::ZERO;
        kept.push(frame);
    }
    kept
}

/// How many output frames a filtered frame occupies.
pub fn repeat_count(delay: Duration, frame_rate: u32) -> usize {
    let frame_duration = frame_duration(frame_rate);
    let repeats = delay.as_nanos() / frame_duration.as_nanos().max(1);
    usize::try_from(repeats).unwrap_or(usize::MAX).max(1)
}

fn frame_duration(frame_rate: u32) -> Duration {
    Duration::from_secs(1) / frame_rate.max(1)
}

pub fn ffmpeg_rawvideo_input_args(width: u32, height: u32, frame_rate: u32) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-vcodec".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgba".to_owned(),
        "-s".to_owned(),
        format!("{width}x{height}"),
        "-r".to_owned(),
        frame_rate.to_string(),
        "-i".to_owned(),
        "-".to_owned(),
        "-an".to_owned(),
    ]
}

/// yuv420p subsamples chroma 2x2, so both encoders reject odd frame sizes.
pub const EVEN_SIZE_FILTER: &str = "pad=ceil(iw/2)*2:ceil(ih/2)*2";

pub fn ffmpeg_args(options: &VideoOptions, width: u32, height: u32) -> Vec<String> {
    let mut args = ffmpeg_rawvideo_input_args(width, height, options.frame_rate);
    if width % 2 == 1 || height % 2 == 1 {
        args.push("-vf".to_owned());
        args.push(EVEN_SIZE_FILTER.to_owned());
    }
    args.extend(options.container.codec_args());
    if let Some(bitrate) = options.bitrate {
        args.push("-b:v".to_owned());
        args.push(format!("{bitrate}k"));
    }
    args.push("-f".to_owned());
    args.push(options.container.muxer().to_owned());
    args.push("pipe:1".to_owned());
    args
}

pub struct VideoEncoder {
    options: VideoOptions,
    progress: Progress,
}

impl VideoEncoder {
    pub fn new(options: VideoOptions) -> Self {
        Self {
            options,
            progress: Progress::default(),
        }
    }

    /// Reports [`Phase::Encoding`] per video frame piped to ffmpeg.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Filters `frames` to the output rate and streams them through ffmpeg
    /// into `output`. Returns the number of video frames written.
    pub fn encode<W: Write + ?Sized>(
        &self,
        frames: Vec<RgbaFrame>,
        output: &mut W,
    ) -> Result<usize, ExportError> {
        let first = frames.first().ok_or(ExportError::EmptyRecording)?;
        let (width, height) = first.image.dimensions();
        let frame_rate = self.options.frame_rate;
        let frames = filter_frames(frames, frame_rate);

        let ffmpeg_path = resolve_ffmpeg(self.options.ffmpeg)?;
        let args = ffmpeg_args(&self.options, width, height);
        debug!(
            program = %ffmpeg_path.display(),
            args = %args.join(" "),
            frames = frames.len(),
            "spawning ffmpeg"
        );

        let started = Instant::now();
        let written = run_ffmpeg_process(
            &ffmpeg_path,
            &args,
            &frames,
            frame_rate,
            &self.progress,
            output,
        )?;
        info!(
            frames = written,
            container = self.options.container.muxer(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "encoded video"
        );
        Ok(written)
    }
}

fn resolve_ffmpeg(mode: FfmpegMode) -> Result<PathBuf, ExportError> {
    match mode {
        FfmpegMode::Auto | FfmpegMode::System => Ok(PathBuf::from("ffmpeg")),
        FfmpegMode::Sidecar => sidecar_ffmpeg(),
    }
}

#[cfg(feature = "sidecar_ffmpeg")]
fn sidecar_ffmpeg() -> Result<PathBuf, ExportError> {
    let path = ffmpeg_sidecar::paths::ffmpeg_path();
    if !path.exists() {
        ffmpeg_sidecar::download::auto_download().map_err(|error| {
            ExportError::InvalidConfig(format!(
                "failed to auto-download ffmpeg sidecar binary: {error}"
            ))
        })?;
    }
    Ok(path)
}

#[cfg(not(feature = "sidecar_ffmpeg"))]
fn sidecar_ffmpeg() -> Result<PathBuf, ExportError> {
    Err(ExportError::InvalidConfig(
        "ffmpeg sidecar mode requested but termreel was built without `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`."
            .to_owned(),
    ))
}

fn run_ffmpeg_process<W: Write + ?Sized>(
    ffmpeg_path: &Path,
    args: &[String],
    frames: &[RgbaFrame],
    frame_rate: u32,
    progress: &Progress,
    output: &mut W,
) -> Result<usize, ExportError> {
    let program = ffmpeg_path.display().to_string();
    let mut child = Command::new(ffmpeg_path)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ExportError::EncoderMissing {
                    program: program.clone(),
                }
            } else {
                ExportError::Io(error)
            }
        })?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (written, stderr_tail, copied) = thread::scope(|scope| -> Result<_, ExportError> {
        let writer = thread::Builder::new()
            .name("termreel-ffmpeg-writer".to_owned())
            .spawn_scoped(scope, move || write_frames(stdin, frames, frame_rate, progress))?;
        let drain = thread::Builder::new()
            .name("termreel-ffmpeg-stderr".to_owned())
            .spawn_scoped(scope, move || read_stderr_tail(stderr))?;

        let copied = match stdout {
            Some(mut pipe) => io::copy(&mut pipe, output),
            None => Ok(0),
        };

        let written = writer
            .join()
            .map_err(|_| ExportError::WorkerPanic("ffmpeg writer"))?;
        let stderr_tail = drain
            .join()
            .map_err(|_| ExportError::WorkerPanic("ffmpeg stderr"))?;
        Ok((written, stderr_tail, copied))
    })?;

    let status = child.wait()?;
    if !status.success() {
        return Err(encoder_failure(&program, status, stderr_tail));
    }
    let written = written?;
    let copied = copied?;
    debug!(bytes = copied, "copied ffmpeg output");
    output.flush()?;
    Ok(written)
}

fn encoder_failure(program: &str, status: ExitStatus, stderr_tail: String) -> ExportError {
    ExportError::Encoder {
        program: program.to_owned(),
        status: status.to_string(),
        stderr: stderr_tail,
    }
}

fn write_frames<W: Write>(
    stdin: Option<W>,
    frames: &[RgbaFrame],
    frame_rate: u32,
    progress: &Progress,
) -> Result<usize, ExportError> {
    let Some(mut stdin) = stdin else {
        return Ok(0);
    };
    let total = frames
        .iter()
        .map(|frame| repeat_count(frame.delay, frame_rate))
        .sum();
    progress.report(Phase::Encoding, 0, total);

    let mut written = 0;
    for frame in frames {
        let repeats = repeat_count(frame.delay, frame_rate);
        for _ in 0..repeats {
            stdin.write_all(frame.image.as_raw())?;
            written += 1;
        }
        progress.report(Phase::Encoding, written, total);
    }
    stdin.flush()?;
    Ok(written)
}

fn read_stderr_tail(stderr: Option<std::process::ChildStderr>) -> String {
    let Some(mut pipe) = stderr else {
        return String::new();
    };
    let mut buf = Vec::new();
    if pipe.read_to_end(&mut buf).is_err() {
        return String::new();
    }
    last_n_chars(&String::from_utf8_lossy(&buf), 500)
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars().collect::<Vec<_>>();
    if chars.len() > max_chars {
        chars = chars[chars.len().saturating_sub(max_chars)..].to_vec();
    }
    chars.into_iter().collect::<String>().trim().to_owned()
}
