//! Argument and option types accepted by job operations.
//!
//! Remote options serialise to the camelCase objects the server expects.

use chrono::{DateTime, Utc};
use jobq_core::{now_millis, to_millis, Echo, LogLevel, PriorityLevel, RetryBackoff};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JobError, JobResult};
use crate::job::Job;

/// Input to [`Job::depends`].
#[derive(Debug, Clone)]
pub enum Dependencies<'a> {
    /// Clears any existing dependencies.
    Clear,
    Jobs(Vec<&'a Job>),
}

impl<'a> From<&'a Job> for Dependencies<'a> {
    fn from(job: &'a Job) -> Self {
        Dependencies::Jobs(vec![job])
    }
}

impl<'a> From<&'a [Job]> for Dependencies<'a> {
    fn from(jobs: &'a [Job]) -> Self {
        Dependencies::Jobs(jobs.iter().collect())
    }
}

impl<'a> From<&'a Vec<Job>> for Dependencies<'a> {
    fn from(jobs: &'a Vec<Job>) -> Self {
        Dependencies::Jobs(jobs.iter().collect())
    }
}

impl<'a> From<Vec<&'a Job>> for Dependencies<'a> {
    fn from(jobs: Vec<&'a Job>) -> Self {
        Dependencies::Jobs(jobs)
    }
}

impl<'a> From<Option<&'a Job>> for Dependencies<'a> {
    fn from(job: Option<&'a Job>) -> Self {
        job.map_or(Dependencies::Clear, |j| Dependencies::Jobs(vec![j]))
    }
}

/// Input to [`Job::priority`]: a raw value or a level name.
#[derive(Debug, Clone, PartialEq)]
pub enum PriorityArg {
    Value(i64),
    Level(PriorityLevel),
    Named(String),
}

impl From<i64> for PriorityArg {
    fn from(value: i64) -> Self {
        PriorityArg::Value(value)
    }
}

impl From<i32> for PriorityArg {
    fn from(value: i32) -> Self {
        PriorityArg::Value(value.into())
    }
}

impl From<PriorityLevel> for PriorityArg {
    fn from(level: PriorityLevel) -> Self {
        PriorityArg::Level(level)
    }
}

impl From<&str> for PriorityArg {
    fn from(name: &str) -> Self {
        PriorityArg::Named(name.to_string())
    }
}

impl PriorityArg {
    pub(crate) fn resolve(&self) -> JobResult<i64> {
        match self {
            PriorityArg::Value(v) if *v >= 0 => Ok(*v),
            PriorityArg::Value(v) => Err(JobError::InvalidPriority(v.to_string())),
            PriorityArg::Level(level) => Ok(level.value()),
            PriorityArg::Named(name) => name
                .parse::<PriorityLevel>()
                .map(|level| level.value())
                .map_err(|_| JobError::InvalidPriority(format!("invalid level {name:?}"))),
        }
    }
}

/// Option form of [`Job::retry`]. Omitted fields take the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOptions {
    pub retries: Option<i64>,
    pub wait: Option<i64>,
    pub backoff: Option<String>,
    pub until: Option<DateTime<Utc>>,
}

impl RetryOptions {
    pub fn with_retries(mut self, retries: i64) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_wait(mut self, wait_ms: i64) -> Self {
        self.wait = Some(wait_ms);
        self
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = Some(backoff.as_str().to_string());
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrySpec {
    Count(i64),
    Options(RetryOptions),
}

impl From<i64> for RetrySpec {
    fn from(value: i64) -> Self {
        RetrySpec::Count(value)
    }
}

impl From<i32> for RetrySpec {
    fn from(value: i32) -> Self {
        RetrySpec::Count(value.into())
    }
}

impl From<RetryOptions> for RetrySpec {
    fn from(options: RetryOptions) -> Self {
        RetrySpec::Options(options)
    }
}

/// Option form of [`Job::repeat`].
///
/// `schedule` is an opaque recurrence descriptor; only its shape is checked.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepeatOptions {
    pub repeats: Option<i64>,
    pub wait: Option<i64>,
    pub schedule: Option<Value>,
    pub until: Option<DateTime<Utc>>,
}

impl RepeatOptions {
    pub fn with_repeats(mut self, repeats: i64) -> Self {
        self.repeats = Some(repeats);
        self
    }

    pub fn with_wait(mut self, wait_ms: i64) -> Self {
        self.wait = Some(wait_ms);
        self
    }

    pub fn with_schedule(mut self, schedule: Value) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepeatSpec {
    Count(i64),
    Options(RepeatOptions),
}

impl From<i64> for RepeatSpec {
    fn from(value: i64) -> Self {
        RepeatSpec::Count(value)
    }
}

impl From<i32> for RepeatSpec {
    fn from(value: i32) -> Self {
        RepeatSpec::Count(value.into())
    }
}

impl From<RepeatOptions> for RepeatSpec {
    fn from(options: RepeatOptions) -> Self {
        RepeatSpec::Options(options)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOptions {
    pub cancel_repeats: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetJobOptions {
    pub get_log: bool,
}

/// Options for [`Job::log`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub level: LogLevel,
    pub echo: Echo,
}

impl LogOptions {
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the level from its name, failing for unknown names.
    pub fn with_level_named(self, name: &str) -> JobResult<Self> {
        let level = name
            .parse::<LogLevel>()
            .map_err(|_| JobError::InvalidLogLevel(name.to_string()))?;
        Ok(self.with_level(level))
    }

    pub fn with_echo(mut self, echo: impl Into<Echo>) -> Self {
        self.echo = echo.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressOptions {
    pub echo: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneOptions {
    pub repeat_id: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailOptions {
    pub fatal: bool,
}

/// `time` defaults to the moment of the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReadyOptions {
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub time: Option<DateTime<Utc>>,
    pub force: bool,
}

impl ReadyOptions {
    pub(crate) fn resolved(self) -> Self {
        Self {
            time: Some(self.time.map(to_millis).unwrap_or_else(now_millis)),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancelOptions {
    pub antecedents: bool,
    pub dependents: bool,
}

impl Default for CancelOptions {
    fn default() -> Self {
        Self {
            antecedents: true,
            dependents: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestartOptions {
    pub retries: u64,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub until: Option<DateTime<Utc>>,
    pub antecedents: bool,
    pub dependents: bool,
}

impl Default for RestartOptions {
    fn default() -> Self {
        Self {
            retries: 1,
            until: None,
            antecedents: false,
            dependents: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RerunOptions {
    pub repeats: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait: Option<u64>,
}

/// Options for [`crate::get_work`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetWorkOptions {
    pub max_jobs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_timeout: Option<u64>,
}

impl Default for GetWorkOptions {
    fn default() -> Self {
        Self {
            max_jobs: 1,
            work_timeout: None,
        }
    }
}

impl GetWorkOptions {
    pub(crate) fn validate(&self) -> JobResult<()> {
        if self.max_jobs == 0 {
            return Err(JobError::InvalidWorkOption("maxJobs must be positive".into()));
        }
        if self.work_timeout == Some(0) {
            return Err(JobError::InvalidWorkOption(
                "workTimeout must be a positive integer".into(),
            ));
        }
        Ok(())
    }
}

/// Options for the server control operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerOptions {
    /// Milliseconds the server may take to drain running work.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

pub(crate) fn to_param<T: Serialize>(options: &T) -> Value {
    serde_json::to_value(options).unwrap_or_else(|_| Value::Object(Default::default()))
}
