//! Records a command running in a pseudo-terminal as an asciicast.
//!
//! The child's output is echoed to the caller and captured as timestamped
//! output events. Keystrokes from the optional input stream are forwarded to
//! the child but not recorded.

use std::collections::BTreeMap;
use std::io::{self, ErrorKind, Read, Write};
use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::asciicast::{Cast, Event, Header};
use crate::export::CancellationToken;

const READ_SIZE: usize = 1024;
pub const DEFAULT_WIDTH: u16 = 80;
pub const DEFAULT_HEIGHT: u16 = 24;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to open a pseudo-terminal: {0}")]
    Pty(String),
    #[error("failed to start '{command}': {reason}")]
    Spawn { command: String, reason: String },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOptions {
    /// Run through `sh -c`. `None` starts the user's shell.
    pub command: Option<String>,
    pub width: u16,
    pub height: u16,
    pub title: Option<String>,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            command: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            title: None,
        }
    }
}

impl RecordOptions {
    fn shell() -> String {
        std::env::var("SHELL")
            .ok()
            .filter(|shell| !shell.trim().is_empty())
            .unwrap_or_else(|| "/bin/sh".to_owned())
    }

    fn command_line(&self) -> String {
        self.command.clone().unwrap_or_else(Self::shell)
    }

    fn builder(&self) -> Result<CommandBuilder, RecordError> {
        let mut cmd = match &self.command {
            Some(command) => {
                let mut cmd = CommandBuilder::new("sh");
                cmd.arg("-c");
                cmd.arg(command);
                cmd
            }
            None => CommandBuilder::new(Self::shell()),
        };
        cmd.cwd(std::env::current_dir()?);
        cmd.env("TERM", "xterm-256color");
        Ok(cmd)
    }
}

/// Runs the command to completion and returns what it printed.
///
/// `input` is copied to the child on a detached thread; it may stay blocked
/// on a read until the next keystroke after the child exits.
pub fn record<W>(
    options: &RecordOptions,
    input: Option<Box<dyn Read + Send>>,
    echo: &mut W,
    cancel: &CancellationToken,
) -> Result<Cast, RecordError>
where
    W: Write + ?Sized,
{
    let size = PtySize {
        rows: options.height.max(1),
        cols: options.width.max(1),
        pixel_width: 0,
        pixel_height: 0,
    };
    let pair = native_pty_system()
        .openpty(size)
        .map_err(|error| RecordError::Pty(format!("{error:#}")))?;

    let command_line = options.command_line();
    let mut child = pair
        .slave
        .spawn_command(options.builder()?)
        .map_err(|error| RecordError::Spawn {
            command: command_line.clone(),
            reason: format!("{error:#}"),
        })?;
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|error| RecordError::Pty(format!("{error:#}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|error| RecordError::Pty(format!("{error:#}")))?;

    if let Some(input) = input {
        forward_input(input, writer)?;
    } else {
        drop(writer);
    }

    let started = Instant::now();
    let mut decoder = Utf8Decoder::default();
    let mut events = Vec::new();
    let mut buf = [0u8; READ_SIZE];
    let mut killed = false;

    loop {
        if cancel.is_cancelled() && !killed {
            killed = true;
            if let Err(error) = child.kill() {
                warn!(%error, "failed to stop recorded command");
            }
        }
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            // Linux reports EIO once the last slave handle is gone.
            Err(error) => {
                debug!(%error, "pty closed");
                break;
            }
        };
        let time = started.elapsed().as_secs_f64();
        echo.write_all(&buf[..read])?;
        echo.flush()?;

        let text = decoder.push(&buf[..read]);
        if !text.is_empty() {
            events.push(Event::output(time, text));
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        events.push(Event::output(started.elapsed().as_secs_f64(), tail));
    }

    match child.wait() {
        Ok(status) => debug!(success = status.success(), "recorded command exited"),
        Err(error) => warn!(%error, "failed to reap recorded command"),
    }

    let mut header = Header::new(usize::from(size.cols), usize::from(size.rows));
    header.timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|now| i64::try_from(now.as_secs()).ok());
    header.duration = events.last().map(|event| event.time);
    header.command = options.command.clone();
    header.title = options.title.clone();
    header.env = Some(recorded_env());

    info!(
        events = events.len(),
        command = %command_line,
        duration_secs = header.duration.unwrap_or_default(),
        "recording finished"
    );
    Ok(Cast::new(header, events))
}

fn forward_input(
    mut input: Box<dyn Read + Send>,
    mut writer: Box<dyn Write + Send>,
) -> Result<(), RecordError> {
    thread::Builder::new()
        .name("termreel-rec-input".to_owned())
        .spawn(move || {
            let mut buf = [0u8; READ_SIZE];
            loop {
                let read = match input.read(&mut buf) {
                    Ok(0) => break,
                    Ok(read) => read,
                    Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                };
                if writer.write_all(&buf[..read]).and_then(|()| writer.flush()).is_err() {
                    break;
                }
            }
        })?;
    Ok(())
}

fn recorded_env() -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("TERM".to_owned(), "xterm-256color".to_owned());
    env.insert("SHELL".to_owned(), RecordOptions::shell());
    env
}

/// Reassembles UTF-8 sequences split across reads. Invalid bytes become
/// U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    return out;
                }
                Err(error) => {
                    let valid = error.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match error.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flushes an incomplete trailing sequence.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}
