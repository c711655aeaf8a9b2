//! Side channel that job log/progress echoes and queue notices are written to.

use std::sync::Mutex;

use crate::log::LogLevel;

/// Destination for echoed lines.
pub trait EchoSink: Send + Sync {
    fn echo(&self, level: LogLevel, message: &str);
}

/// Writes echoes as `tracing` events.
#[derive(Debug, Default, Copy, Clone)]
pub struct TracingEcho;

impl EchoSink for TracingEcho {
    fn echo(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!(target: "jobq::echo", "{message}"),
            LogLevel::Success => tracing::info!(target: "jobq::echo", success = true, "{message}"),
            LogLevel::Warning => tracing::warn!(target: "jobq::echo", "{message}"),
            LogLevel::Danger => tracing::error!(target: "jobq::echo", "{message}"),
        }
    }
}

/// Records echoes in memory (tests/dev).
#[derive(Debug, Default)]
pub struct MemoryEcho {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryEcho {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn levels(&self) -> Vec<LogLevel> {
        self.lines().into_iter().map(|(level, _)| level).collect()
    }
}

impl EchoSink for MemoryEcho {
    fn echo(&self, level: LogLevel, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((level, message.to_string()));
    }
}
