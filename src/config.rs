use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::events::{seconds, PreprocessOptions};
use crate::render::video::FfmpegMode;

/// Export settings. Every field has a default; a YAML file may set any subset
/// and CLI flags override the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Builtin theme name or path to a theme JSON file.
    pub theme: String,
    pub speed: f64,
    /// Seconds. Absent means "use the recording's own idle_time_limit".
    pub max_idle: Option<f64>,
    pub compress: bool,
    pub window: bool,
    pub cursor: bool,
    pub font: Option<PathBuf>,
    pub font_size: f32,
    /// 0 loops forever, -1 plays once, n repeats n times.
    pub loop_count: i32,
    pub frame_rate: u32,
    /// kbps
    pub video_bitrate: Option<u32>,
    pub ffmpeg: FfmpegMode,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            theme: "default".to_owned(),
            speed: 1.0,
            max_idle: None,
            compress: true,
            window: true,
            cursor: true,
            font: None,
            font_size: 20.0,
            loop_count: 0,
            frame_rate: 30,
            video_bitrate: None,
            ffmpeg: FfmpegMode::Auto,
        }
    }
}

impl ExportConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ExportError> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(ExportError::InvalidConfig(format!(
                "speed must be a positive number, got {}",
                self.speed
            )));
        }
        if let Some(max_idle) = self.max_idle {
            if !max_idle.is_finite() || max_idle < 0.0 {
                return Err(ExportError::InvalidConfig(format!(
                    "max_idle must be >= 0 seconds, got {max_idle}"
                )));
            }
        }
        if !self.font_size.is_finite() || self.font_size <= 0.0 {
            return Err(ExportError::InvalidConfig(format!(
                "font_size must be > 0, got {}",
                self.font_size
            )));
        }
        if self.frame_rate == 0 {
            return Err(ExportError::InvalidConfig("frame_rate must be > 0".to_owned()));
        }
        if self.loop_count < -1 {
            return Err(ExportError::InvalidConfig(format!(
                "loop_count must be -1, 0 or a positive repeat count, got {}",
                self.loop_count
            )));
        }
        if self.theme.trim().is_empty() {
            return Err(ExportError::InvalidConfig("theme cannot be empty".to_owned()));
        }
        Ok(())
    }

    /// Idle cap from the config, falling back to the recording header.
    pub fn preprocess_options(&self, header_idle_limit: Option<f64>) -> PreprocessOptions {
        let idle = self
            .max_idle
            .or(header_idle_limit)
            .map(seconds)
            .unwrap_or(Duration::ZERO);
        PreprocessOptions {
            speed: self.speed,
            idle_time_limit: idle,
            compress: self.compress,
        }
    }
}

pub fn load_and_validate_config(path: &Path) -> Result<ExportConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = ExportConfig::from_yaml_str(&contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!(
            "failed to parse yaml in {} at {}: {}",
            path.display(),
            location,
            error
        )
    })?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}
