//! Worker pool error model.

use jobq_jobs::JobError;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    #[error("invalid queue option: {0}")]
    InvalidQueueOption(String),

    /// A unit callback was called a second time.
    #[error("worker callback was invoked multiple times (unit {unit})")]
    CallbackOveruse { unit: u64 },

    #[error("getWork failed: {0}")]
    Fetch(#[source] JobError),

    #[error("getWork returned {received} jobs, more than the {requested} requested")]
    ExcessJobs { requested: usize, received: usize },

    #[error("job queue must be started from within a tokio runtime")]
    NoRuntime,
}

impl QueueError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidQueueOption(msg.into())
    }
}
