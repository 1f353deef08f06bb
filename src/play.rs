//! Replays a cast's output to a terminal in real time.

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::asciicast::Event;
use crate::error::ExportError;
use crate::events::{preprocess_events, seconds, PreprocessOptions};
use crate::export::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayOptions {
    /// Playback multiplier.
    pub speed: f64,
    /// Longest pause kept between two events. Zero keeps every pause.
    pub max_idle: Duration,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            max_idle: Duration::ZERO,
        }
    }
}

impl PlayOptions {
    pub fn validate(&self) -> Result<(), ExportError> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(ExportError::InvalidConfig(format!(
                "speed must be a positive number, got {}",
                self.speed
            )));
        }
        Ok(())
    }

    fn preprocess(&self) -> PreprocessOptions {
        PreprocessOptions {
            speed: self.speed,
            idle_time_limit: self.max_idle,
            compress: false,
        }
    }
}

/// Blocks until an offset from the start of playback is reached.
pub trait Pacer {
    fn wait_until(&mut self, offset: Duration);
}

/// Sleeps on the wall clock, measured from construction.
#[derive(Debug)]
pub struct RealtimePacer {
    started: Instant,
}

impl RealtimePacer {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Pacer for RealtimePacer {
    fn wait_until(&mut self, offset: Duration) {
        let elapsed = self.started.elapsed();
        if let Some(remaining) = offset.checked_sub(elapsed) {
            thread::sleep(remaining);
        }
    }
}

/// Writes every output event at its (rescaled) timestamp and returns how many
/// were written. Input and marker events are skipped.
pub fn play<W, P>(
    events: &[Event],
    options: &PlayOptions,
    out: &mut W,
    pacer: &mut P,
    cancel: &CancellationToken,
) -> Result<usize, ExportError>
where
    W: Write + ?Sized,
    P: Pacer,
{
    options.validate()?;
    let events = preprocess_events(events, &options.preprocess());
    let mut written = 0;

    for event in events.iter().filter(|event| event.is_output()) {
        cancel.checkpoint()?;
        pacer.wait_until(seconds(event.time));
        cancel.checkpoint()?;
        out.write_all(event.data.as_bytes())?;
        out.flush()?;
        written += 1;
    }

    debug!(events = written, speed = options.speed, "playback finished");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{play, Pacer, PlayOptions};
    use crate::asciicast::Event;
    use crate::error::ExportError;
    use crate::export::CancellationToken;

    #[derive(Default)]
    struct RecordingPacer {
        offsets: Vec<Duration>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl Pacer for RecordingPacer {
        fn wait_until(&mut self, offset: Duration) {
            self.offsets.push(offset);
            if let Some((count, token)) = &self.cancel_after {
                if self.offsets.len() == *count {
                    token.cancel();
                }
            }
        }
    }

    fn events() -> Vec<Event> {
        vec![
            Event::output(0.0, "$ "),
            Event::input(0.5, "l"),
            Event::output(1.0, "ls\r\n"),
            Event::output(9.0, "done"),
        ]
    }

    #[test]
    fn writes_output_in_order_and_skips_input() {
        let mut out = Vec::new();
        let mut pacer = RecordingPacer::default();
        let written = play(
            &events(),
            &PlayOptions::default(),
            &mut out,
            &mut pacer,
            &CancellationToken::new(),
        )
        .expect("playback should succeed");

        assert_eq!(written, 3);
        assert_eq!(out, b"$ ls\r\ndone");
        assert_eq!(
            pacer.offsets,
            vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(9)]
        );
    }

    #[test]
    fn speed_and_idle_cap_rescale_the_schedule() {
        let options = PlayOptions {
            speed: 2.0,
            max_idle: Duration::from_secs(1),
        };
        let mut pacer = RecordingPacer::default();
        play(
            &events(),
            &options,
            &mut Vec::new(),
            &mut pacer,
            &CancellationToken::new(),
        )
        .expect("playback should succeed");

        assert_eq!(pacer.offsets[1], Duration::from_millis(500));
        let last_gap = pacer.offsets[2] - pacer.offsets[1];
        assert!(last_gap <= Duration::from_secs(1));
    }

    #[test]
    fn cancellation_stops_before_the_next_write() {
        let cancel = CancellationToken::new();
        let mut pacer = RecordingPacer {
            cancel_after: Some((2, cancel.clone())),
            ..RecordingPacer::default()
        };
        let mut out = Vec::new();
        let err = play(&events(), &PlayOptions::default(), &mut out, &mut pacer, &cancel)
            .expect_err("cancelled playback must stop");
        assert!(err.is_cancelled());
        assert_eq!(out, b"$ ");
    }

    #[test]
    fn non_positive_speed_is_rejected() {
        let options = PlayOptions {
            speed: 0.0,
            ..PlayOptions::default()
        };
        let err = play(
            &events(),
            &options,
            &mut Vec::new(),
            &mut RecordingPacer::default(),
            &CancellationToken::new(),
        )
        .expect_err("zero speed must fail");
        assert!(matches!(err, ExportError::InvalidConfig(_)));
    }
}
