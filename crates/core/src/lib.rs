//! `jobq-core`: value types shared by the job entity and the worker pool.
//!
//! This crate is pure data: identifiers, closed enumerations, the status
//! transition table and the echo side channel. No I/O.

pub mod echo;
pub mod error;
pub mod id;
pub mod log;
pub mod policy;
pub mod priority;
pub mod progress;
pub mod status;

pub use echo::{EchoSink, MemoryEcho, TracingEcho};
pub use error::{CoreError, CoreResult};
pub use id::{JobId, RunId};
pub use log::{Echo, LogEntry, LogLevel};
pub use policy::{
    forever_date, now_millis, to_millis, RepeatWait, RetryBackoff, Schedule, DEFAULT_WAIT_MS,
    FOREVER,
};
pub use priority::PriorityLevel;
pub use progress::Progress;
pub use status::JobStatus;
