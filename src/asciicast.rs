//! Reader and writer for asciicast v2 recordings.
//!
//! A cast is a JSON header line followed by one `[time, code, data]` array per
//! line.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub version: u8,
    pub width: usize,
    pub height: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_time_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
}

impl Header {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            version: 2,
            width,
            height,
            timestamp: None,
            duration: None,
            idle_time_limit: None,
            command: None,
            title: None,
            env: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Output,
    Input,
    Marker,
    Resize,
}

impl EventKind {
    pub fn code(self) -> &'static str {
        match self {
            EventKind::Output => "o",
            EventKind::Input => "i",
            EventKind::Marker => "m",
            EventKind::Resize => "r",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "o" => Some(EventKind::Output),
            "i" => Some(EventKind::Input),
            "m" => Some(EventKind::Marker),
            "r" => Some(EventKind::Resize),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Seconds since the start of the recording.
    pub time: f64,
    pub kind: EventKind,
    pub data: String,
}

impl Event {
    pub fn output(time: f64, data: impl Into<String>) -> Self {
        Self {
            time,
            kind: EventKind::Output,
            data: data.into(),
        }
    }

    pub fn input(time: f64, data: impl Into<String>) -> Self {
        Self {
            time,
            kind: EventKind::Input,
            data: data.into(),
        }
    }

    pub fn is_output(&self) -> bool {
        self.kind == EventKind::Output
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cast {
    pub header: Header,
    pub events: Vec<Event>,
}

#[derive(Debug, Error)]
pub enum CastError {
    #[error("recording is empty: no header line found")]
    MissingHeader,
    #[error("line {line}: invalid header: {source}")]
    Header {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported asciicast version {0} (only version 2 is supported)")]
    Version(u8),
    #[error("terminal size must be positive, got {width}x{height}")]
    Size { width: usize, height: usize },
    #[error("line {line}: invalid event: {source}")]
    Event {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: unknown event code {code:?}")]
    UnknownCode { line: usize, code: String },
    #[error("line {line}: invalid event time {time}")]
    Time { line: usize, time: f64 },
    #[error("failed to read recording: {0}")]
    Io(#[from] std::io::Error),
}

impl Cast {
    pub fn new(header: Header, events: Vec<Event>) -> Self {
        Self { header, events }
    }

    pub fn load(path: &Path) -> Result<Self, CastError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn parse(raw: &str) -> Result<Self, CastError> {
        Self::from_reader(raw.as_bytes())
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, CastError> {
        let mut header: Option<Header> = None;
        let mut events = Vec::new();

        for (offset, line) in reader.lines().enumerate() {
            let line_number = offset + 1;
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if header.is_none() {
                let parsed: Header = serde_json::from_str(trimmed).map_err(|source| {
                    CastError::Header {
                        line: line_number,
                        source,
                    }
                })?;
                if parsed.version != 2 {
                    return Err(CastError::Version(parsed.version));
                }
                if parsed.width == 0 || parsed.height == 0 {
                    return Err(CastError::Size {
                        width: parsed.width,
                        height: parsed.height,
                    });
                }
                header = Some(parsed);
                continue;
            }

            events.push(parse_event_line(trimmed, line_number)?);
        }

        let header = header.ok_or(CastError::MissingHeader)?;
        Ok(Self { header, events })
    }

    /// Header duration when recorded, otherwise the time of the last event.
    pub fn duration(&self) -> f64 {
        self.header
            .duration
            .or_else(|| self.events.last().map(|event| event.time))
            .unwrap_or(0.0)
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|event| event.kind == kind).count()
    }

    pub fn to_writer<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        serde_json::to_writer(&mut writer, &self.header)?;
        writer.write_all(b"\n")?;
        for event in &self.events {
            serde_json::to_writer(&mut writer, &(event.time, event.kind.code(), &event.data))?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}

fn parse_event_line(line: &str, line_number: usize) -> Result<Event, CastError> {
    let (time, code, data): (f64, String, String) =
        serde_json::from_str(line).map_err(|source| CastError::Event {
            line: line_number,
            source,
        })?;

    if !time.is_finite() || time < 0.0 {
        return Err(CastError::Time {
            line: line_number,
            time,
        });
    }

    let kind = EventKind::from_code(&code).ok_or(CastError::UnknownCode {
        line: line_number,
        code,
    })?;

    Ok(Event { time, kind, data })
}

#[cfg(test)]
mod tests {
    use super::{Cast, CastError, Event, EventKind, Header};

    const SAMPLE: &str = r#"{"version": 2, "width": 80, "height": 24, "idle_time_limit": 1.5, "title": "demo"}
[0.1, "o", "hello"]

[0.5, "i", "x"]
[1.25, "o", "\u001b[31mred\u001b[0m"]
"#;

    #[test]
    fn parses_header_and_events() {
        let cast = Cast::parse(SAMPLE).expect("sample cast should parse");
        assert_eq!(cast.header.width, 80);
        assert_eq!(cast.header.height, 24);
        assert_eq!(cast.header.idle_time_limit, Some(1.5));
        assert_eq!(cast.header.title.as_deref(), Some("demo"));
        assert_eq!(cast.events.len(), 3);
        assert_eq!(cast.events[1].kind, EventKind::Input);
        assert_eq!(cast.events[2].data, "\u{1b}[31mred\u{1b}[0m");
        assert_eq!(cast.count(EventKind::Output), 2);
        assert!((cast.duration() - 1.25).abs() < f64::EPSILON);
    }

    #[test]
    fn errors_name_the_offending_line() {
        let raw = "{\"version\": 2, \"width\": 10, \"height\": 2}\n[0.0, \"o\", \"a\"]\n[0.1, \"z\", \"b\"]\n";
        let err = Cast::parse(raw).expect_err("unknown code must fail");
        assert!(matches!(err, CastError::UnknownCode { line: 3, .. }));
        assert!(err.to_string().contains("line 3"));

        let raw = "{\"version\": 2, \"width\": 10, \"height\": 2}\nnot json\n";
        let err = Cast::parse(raw).expect_err("garbage line must fail");
        assert!(matches!(err, CastError::Event { line: 2, .. }));
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(Cast::parse(""), Err(CastError::MissingHeader)));
        assert!(matches!(
            Cast::parse("{\"version\": 1, \"width\": 10, \"height\": 2}"),
            Err(CastError::Version(1))
        ));
        assert!(matches!(
            Cast::parse("{\"version\": 2, \"width\": 0, \"height\": 2}"),
            Err(CastError::Size { .. })
        ));
    }

    #[test]
    fn rejects_negative_times() {
        let raw = "{\"version\": 2, \"width\": 10, \"height\": 2}\n[-1.0, \"o\", \"a\"]\n";
        assert!(matches!(
            Cast::parse(raw),
            Err(CastError::Time { line: 2, .. })
        ));
    }

    #[test]
    fn writer_output_parses_back() {
        let cast = Cast::new(
            Header::new(20, 4),
            vec![Event::output(0.0, "a\"b"), Event::input(0.5, "\n")],
        );
        let mut buf = Vec::new();
        cast.to_writer(&mut buf).expect("cast should serialize");
        let parsed = Cast::parse(std::str::from_utf8(&buf).expect("utf-8 output"))
            .expect("serialized cast should parse");
        assert_eq!(parsed, cast);
    }
}
