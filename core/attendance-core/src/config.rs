//! Configuration loading for the attendance engine.
//!
//! Read once at startup from `~/.classeye/config.toml` (or `$CLASSEYE_CONFIG`)
//! and immutable for the life of a run. A missing file yields defaults.

use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::path::PathBuf;

use crate::error::{AttendanceError, Result};
use crate::roster::BatchFilter;
use crate::session::SessionSchedule;
use crate::window::seconds_to_duration;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".classeye/config.toml";
const CONFIG_ENV: &str = "CLASSEYE_CONFIG";

/// A wall-clock time of day written as `HH:MM` (or `HH:MM:SS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTime(pub NaiveTime);

impl ClockTime {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        NaiveTime::parse_from_str(value, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
            .map(ClockTime)
            .map_err(|_| AttendanceError::InvalidClockTime(value.to_string()))
    }

    pub fn hm(hour: u32, minute: u32) -> Self {
        ClockTime(NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN))
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ClockTime::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.format("%H:%M:%S").to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_start")]
    pub start: ClockTime,
    #[serde(default = "default_session_end")]
    pub end: ClockTime,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start: default_session_start(),
            end: default_session_end(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceConfig {
    /// Recognizer distance below which a sighting counts.
    #[serde(default = "default_recognition_threshold")]
    pub recognition_threshold: f64,
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: f64,
    #[serde(default = "default_exit_timeout_seconds")]
    pub exit_timeout_seconds: f64,
    #[serde(default = "default_min_in_class_seconds")]
    pub min_in_class_seconds: u64,
    /// Batch whose students are tracked; `ALL` disables the filter.
    #[serde(default = "default_active_batch")]
    pub active_batch: String,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            recognition_threshold: default_recognition_threshold(),
            debounce_seconds: default_debounce_seconds(),
            exit_timeout_seconds: default_exit_timeout_seconds(),
            min_in_class_seconds: default_min_in_class_seconds(),
            active_batch: default_active_batch(),
            session: SessionConfig::default(),
        }
    }
}

impl AttendanceConfig {
    pub fn debounce(&self) -> Duration {
        seconds_to_duration(self.debounce_seconds)
    }

    pub fn exit_timeout(&self) -> Duration {
        seconds_to_duration(self.exit_timeout_seconds)
    }

    pub fn min_in_class_seconds(&self) -> f64 {
        self.min_in_class_seconds as f64
    }

    pub fn batch_filter(&self) -> BatchFilter {
        BatchFilter::parse(&self.active_batch)
    }

    pub fn schedule(&self) -> SessionSchedule {
        SessionSchedule::new(self.session.start.0, self.session.end.0)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.recognition_threshold.is_finite() || self.recognition_threshold <= 0.0 {
            return Err(AttendanceError::ConfigInvalid(
                "recognition_threshold must be a positive number".to_string(),
            ));
        }
        if !self.debounce_seconds.is_finite() || self.debounce_seconds < 0.0 {
            return Err(AttendanceError::ConfigInvalid(
                "debounce_seconds must not be negative".to_string(),
            ));
        }
        if !self.exit_timeout_seconds.is_finite() || self.exit_timeout_seconds < 0.0 {
            return Err(AttendanceError::ConfigInvalid(
                "exit_timeout_seconds must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_recognition_threshold() -> f64 {
    70.0
}

fn default_debounce_seconds() -> f64 {
    1.5
}

fn default_exit_timeout_seconds() -> f64 {
    6.0
}

fn default_min_in_class_seconds() -> u64 {
    40 * 60
}

fn default_active_batch() -> String {
    "ALL".to_string()
}

fn default_session_start() -> ClockTime {
    ClockTime::hm(9, 0)
}

fn default_session_end() -> ClockTime {
    ClockTime::hm(10, 0)
}

/// Returns `$CLASSEYE_CONFIG` if set, else `~/.classeye/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or(AttendanceError::HomeDirNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<AttendanceConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config file; using defaults");
        return Ok(AttendanceConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| AttendanceError::Io {
        context: format!("Failed to read config {}", config_path.display()),
        source: err,
    })?;
    let config = toml::from_str::<AttendanceConfig>(&content).map_err(|err| {
        AttendanceError::ConfigMalformed {
            path: config_path.clone(),
            details: err.to_string(),
        }
    })?;
    config.validate()?;
    Ok(config)
}
