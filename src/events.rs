use std::time::Duration;

use tracing::debug;

use crate::asciicast::{Event, EventKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessOptions {
    /// Playback multiplier; every timestamp is divided by it.
    pub speed: f64,
    /// Longest pause kept between two events. Zero disables the cap.
    pub idle_time_limit: Duration,
    pub compress: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            idle_time_limit: Duration::ZERO,
            compress: true,
        }
    }
}

/// Normalizes timing and merges same-timestamp output. The input slice is left
/// untouched.
pub fn preprocess_events(events: &[Event], options: &PreprocessOptions) -> Vec<Event> {
    let mut out = events.to_vec();

    if options.speed != 1.0 && options.speed > 0.0 {
        for event in &mut out {
            event.time /= options.speed;
        }
    }

    cap_idle_time(&mut out, options.idle_time_limit);

    if options.compress {
        out = compress_events(out);
    }

    debug!(
        input = events.len(),
        output = out.len(),
        speed = options.speed,
        idle_cap_secs = options.idle_time_limit.as_secs_f64(),
        "preprocessed events"
    );
    out
}

fn cap_idle_time(events: &mut [Event], limit: Duration) {
    let limit = limit.as_secs_f64();
    if limit <= 0.0 {
        return;
    }

    let mut previous_raw = 0.0;
    let mut rebuilt = 0.0;
    for event in events {
        let delay = event.time - previous_raw;
        previous_raw = event.time;
        rebuilt += delay.min(limit);
        event.time = rebuilt;
    }
}

fn compress_events(events: Vec<Event>) -> Vec<Event> {
    let mut out: Vec<Event> = Vec::with_capacity(events.len());
    for event in events {
        if let Some(last) = out.last_mut() {
            if event.kind == EventKind::Output
                && last.kind == EventKind::Output
                && last.time == event.time
            {
                last.data.push_str(&event.data);
                continue;
            }
        }
        out.push(event);
    }
    out
}

/// Converts recording seconds to a `Duration`, treating garbage as zero.
pub fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}
