//! GELF message types and utilities

use crate::{GelfError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// GELF payload specification version emitted in every message
pub const GELF_VERSION: &str = "1.1";

/// Type alias for additional log fields, keyed without the leading underscore
pub type LogFields = HashMap<String, Value>;

/// Log severity levels, syslog numbering as GELF expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "LevelRepr")]
pub enum LogLevel {
    /// Emergency: system is unusable
    Emergency = 0,
    /// Alert: action must be taken immediately
    Alert = 1,
    /// Critical: critical conditions
    Critical = 2,
    /// Error: error conditions
    Error = 3,
    /// Warning: warning conditions
    Warning = 4,
    /// Notice: normal but significant condition
    Notice = 5,
    /// Info: informational messages
    Info = 6,
    /// Debug: debug-level messages
    Debug = 7,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Emergency => write!(f, "EMERG"),
            LogLevel::Alert => write!(f, "ALERT"),
            LogLevel::Critical => write!(f, "CRIT"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Notice => write!(f, "NOTICE"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Debug => write!(f, "DEBUG"),
        }
    }
}

impl From<LogLevel> for u8 {
    fn from(level: LogLevel) -> Self {
        level as u8
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, String> {
        Ok(match code {
            0 => LogLevel::Emergency,
            1 => LogLevel::Alert,
            2 => LogLevel::Critical,
            3 => LogLevel::Error,
            4 => LogLevel::Warning,
            5 => LogLevel::Notice,
            6 => LogLevel::Info,
            7 => LogLevel::Debug,
            other => return Err(format!("log level {} is outside 0..=7", other)),
        })
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u8>() {
            return LogLevel::try_from(code);
        }
        Ok(match s.to_ascii_lowercase().as_str() {
            "emerg" | "emergency" => LogLevel::Emergency,
            "alert" => LogLevel::Alert,
            "crit" | "critical" => LogLevel::Critical,
            "err" | "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warning,
            "notice" => LogLevel::Notice,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            _ => return Err(format!("unknown log level '{}'", s)),
        })
    }
}

// Accepts both the wire form (a number) and names used in config files.
#[derive(Deserialize)]
#[serde(untagged)]
enum LevelRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<LevelRepr> for LogLevel {
    type Error = String;

    fn try_from(repr: LevelRepr) -> std::result::Result<Self, String> {
        match repr {
            LevelRepr::Code(code) => LogLevel::try_from(code),
            LevelRepr::Name(name) => name.parse(),
        }
    }
}

/// A GELF 1.1 message
///
/// Additional fields are stored with their leading underscore and are
/// flattened into the top-level JSON object on serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GelfMessage {
    /// GELF spec version
    pub version: String,

    /// Name of the host or application that sent this message
    pub host: String,

    /// Short descriptive message
    pub short_message: String,

    /// Long message, e.g. a backtrace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_message: Option<String>,

    /// Seconds since UNIX epoch with optional decimal places for milliseconds
    pub timestamp: f64,

    /// Syslog severity
    pub level: LogLevel,

    /// Optional facility name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,

    /// Additional `_`-prefixed fields
    #[serde(flatten)]
    pub additional: BTreeMap<String, Value>,
}

impl GelfMessage {
    /// Create a new message stamped with the current time at `Info` level
    pub fn new(host: impl Into<String>, short_message: impl Into<String>) -> Self {
        Self {
            version: GELF_VERSION.to_string(),
            host: host.into(),
            short_message: short_message.into(),
            full_message: None,
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
            level: LogLevel::Info,
            facility: None,
            additional: BTreeMap::new(),
        }
    }

    /// Set the severity
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the long message
    pub fn with_full_message(mut self, full_message: impl Into<String>) -> Self {
        self.full_message = Some(full_message.into());
        self
    }

    /// Set the facility
    pub fn with_facility(mut self, facility: impl Into<String>) -> Self {
        self.facility = Some(facility.into());
        self
    }

    /// Add an additional field; the `_` prefix is added when missing
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert_field(name, value);
        self
    }

    /// Add an additional field in place
    pub fn insert_field(&mut self, name: &str, value: impl Into<Value>) {
        let key = if name.starts_with('_') {
            name.to_string()
        } else {
            format!("_{}", name)
        };
        self.additional.insert(key, value.into());
    }

    /// Check the message against GELF field rules
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(GelfError::Validation("host cannot be empty".to_string()));
        }
        if self.short_message.is_empty() {
            return Err(GelfError::Validation(
                "short_message cannot be empty".to_string(),
            ));
        }
        for key in self.additional.keys() {
            validate_field_name(key)?;
        }
        Ok(())
    }

    /// Timestamp as a `DateTime`
    pub fn datetime(&self) -> DateTime<Utc> {
        let millis = (self.timestamp * 1000.0).round() as i64;
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to UTF-8 JSON bytes
    pub fn to_json_bytes(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Format as human-readable string
    pub fn to_human_readable(&self) -> String {
        let timestamp = self.datetime().format("%Y-%m-%d %H:%M:%S%.3f");
        format!(
            "{} {} {}: {}",
            timestamp, self.level, self.host, self.short_message
        )
    }
}

fn validate_field_name(key: &str) -> Result<()> {
    let name = key.strip_prefix('_').unwrap_or(key);
    if name.is_empty() {
        return Err(GelfError::Validation(format!(
            "additional field '{}' has an empty name",
            key
        )));
    }
    if name == "id" {
        return Err(GelfError::Validation(
            "additional field '_id' is reserved".to_string(),
        ));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid {
        return Err(GelfError::Validation(format!(
            "additional field '{}' contains characters outside [A-Za-z0-9_.-]",
            key
        )));
    }
    Ok(())
}
