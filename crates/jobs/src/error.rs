//! Job entity error model.

use jobq_core::JobStatus;
use jobq_rpc::RpcError;
use thiserror::Error;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    /// Constructor input was not a job: bad type, non-object data, or an
    /// undecodable document.
    #[error("new Job: bad parameter: {0}")]
    InvalidParameter(String),

    #[error("policy cannot be changed on a job that has been saved")]
    SavedJobImmutable,

    #[error("depends: each provided job must be saved and have an id ({0})")]
    InvalidDependency(String),

    #[error("priority must be a non-negative integer or valid priority level: {0}")]
    InvalidPriority(String),

    #[error("retry: bad option: {0}")]
    InvalidRetryOption(String),

    #[error("repeat: bad option: {0}")]
    InvalidRepeatOption(String),

    #[error("repeat: bad schedule option: {0}")]
    InvalidScheduleOption(String),

    #[error("bad parameter, delay requires a non-negative integer: {0}")]
    InvalidDelay(String),

    #[error("log level options must be one of info, success, warning, danger: {0}")]
    InvalidLogLevel(String),

    #[error("job.progress: something is wrong with progress params ({completed}, {total})")]
    InvalidProgress { completed: f64, total: f64 },

    #[error("cannot {0} on an unsaved job")]
    UnsavedJob(&'static str),

    #[error("cannot {0} an unsaved or non-running job")]
    UnsavedOrNotRunning(&'static str),

    #[error("status cannot move from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("getWork: bad option: {0}")]
    InvalidWorkOption(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl JobError {
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// True when the remote side rejected the call (as opposed to local
    /// validation).
    pub fn is_remote(&self) -> bool {
        matches!(self, JobError::Rpc(RpcError::Remote(_)))
    }
}
