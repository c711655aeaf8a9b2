//! `jobq-jobs`: the job entity and the operations built around it.
//!
//! A [`Job`] wraps one [`JobDocument`]. Before its first save every mutator
//! works on the local document; afterwards the policy is frozen and status
//! changes are requests to the server reached through a [`JobContext`].
//!
//! Operations spanning many jobs (leasing work, bulk status changes, server
//! control) live in [`collection`]. [`InMemoryJobServer`] answers the same
//! remote methods in process for tests and demos.

pub mod collection;
pub mod context;
pub mod document;
pub mod error;
pub mod job;
pub mod memory;
pub mod options;

pub use collection::{
    cancel_jobs, get_job, get_jobs, get_work, lease_work, pause_jobs, ready_jobs, remove_jobs,
    restart_jobs, resume_jobs, shutdown_job_server, start_job_server, start_jobs, stop_jobs,
    LeasedWork, MAX_IDS_PER_CALL,
};
pub use context::{with_callback, JobContext};
pub use document::JobDocument;
pub use error::{JobError, JobResult};
pub use job::Job;
pub use memory::{InMemoryJobServer, ServerStats};
pub use options::{
    CancelOptions, Dependencies, DoneOptions, FailOptions, GetJobOptions, GetWorkOptions,
    LogOptions, PriorityArg, ProgressOptions, ReadyOptions, RepeatOptions, RepeatSpec,
    RerunOptions, RestartOptions, RetryOptions, RetrySpec, SaveOptions, ServerOptions,
};
