//! Job log levels and entries.

use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::RunId;
use crate::policy::now_millis;

/// Severity of a job log entry, ordered `info < success < warning < danger`.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Success,
    Warning,
    Danger,
}

impl LogLevel {
    pub const ALL: [LogLevel; 4] = [
        LogLevel::Info,
        LogLevel::Success,
        LogLevel::Warning,
        LogLevel::Danger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Danger => "danger",
        }
    }
}

impl core::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::ALL
            .iter()
            .copied()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| CoreError::unknown("log level", s))
    }
}

/// One line of a job's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub run_id: Option<RunId>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            time: now_millis(),
            run_id: None,
            level,
            message: message.into(),
        }
    }
}

/// Echo threshold for mirroring log/progress lines to the side channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Echo {
    #[default]
    Off,
    AtLeast(LogLevel),
}

impl Echo {
    /// Echo every level.
    pub fn all() -> Self {
        Echo::AtLeast(LogLevel::Info)
    }

    pub fn should_echo(&self, level: LogLevel) -> bool {
        match self {
            Echo::Off => false,
            Echo::AtLeast(threshold) => level >= *threshold,
        }
    }
}

impl From<bool> for Echo {
    fn from(value: bool) -> Self {
        if value { Echo::all() } else { Echo::Off }
    }
}

impl From<LogLevel> for Echo {
    fn from(value: LogLevel) -> Self {
        Echo::AtLeast(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_level_is_info() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Info < LogLevel::Success);
        assert!(LogLevel::Success < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Danger);
    }

    #[test]
    fn echo_true_means_lowest_threshold() {
        let echo = Echo::from(true);
        for level in LogLevel::ALL {
            assert!(echo.should_echo(level));
        }
        assert!(!Echo::from(false).should_echo(LogLevel::Danger));
    }

    #[test]
    fn echo_threshold_filters_lower_levels() {
        let echo = Echo::from(LogLevel::Warning);
        assert!(!echo.should_echo(LogLevel::Info));
        assert!(!echo.should_echo(LogLevel::Success));
        assert!(echo.should_echo(LogLevel::Warning));
        assert!(echo.should_echo(LogLevel::Danger));
    }

    #[test]
    fn entry_uses_camel_case_and_millis() {
        let entry = LogEntry::new(LogLevel::Success, "Hello");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["level"], "success");
        assert!(value["time"].is_i64());
        assert!(value.get("runId").is_some());
    }
}
