//! Process-wide tracing setup shared by the jobq binaries.

/// Subscriber configuration (filter and output format).
pub mod subscriber;

pub use subscriber::{LogConfig, LogFormat};

/// Initialize tracing from the environment (`RUST_LOG`, `JOBQ_LOG_FORMAT`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    subscriber::init(&LogConfig::from_env());
}

/// Initialize tracing with an explicit configuration.
pub fn init_with(config: &LogConfig) {
    subscriber::init(config);
}
