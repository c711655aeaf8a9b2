//! Persisted job document.

use chrono::{DateTime, Utc};
use jobq_core::{
    forever_date, now_millis, JobId, JobStatus, LogEntry, LogLevel, PriorityLevel, Progress, RepeatWait,
    RetryBackoff, RunId, DEFAULT_WAIT_MS,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The logical shape of a job as stored by the server.
///
/// Timestamps travel as epoch milliseconds; `_id` is absent until the first
/// save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDocument {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    #[serde(default)]
    pub run_id: Option<RunId>,
    #[serde(rename = "type")]
    pub job_type: String,
    pub data: Map<String, Value>,
    pub status: JobStatus,
    pub priority: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub after: DateTime<Utc>,
    #[serde(default)]
    pub depends: Vec<JobId>,
    #[serde(default)]
    pub resolved: Vec<JobId>,
    pub retries: u64,
    pub retry_wait: u64,
    #[serde(default)]
    pub retried: u64,
    #[serde(default)]
    pub retry_backoff: RetryBackoff,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub retry_until: DateTime<Utc>,
    pub repeats: u64,
    #[serde(default)]
    pub repeat_wait: RepeatWait,
    #[serde(default)]
    pub repeated: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub repeat_until: DateTime<Utc>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(default)]
    pub progress: Progress,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated: DateTime<Utc>,
}

impl JobDocument {
    /// Fresh `waiting` document carrying the default policy and a "Created"
    /// log entry.
    pub fn new(job_type: impl Into<String>, data: Map<String, Value>) -> Self {
        let now = now_millis();
        let mut created = LogEntry::new(LogLevel::Info, "Created");
        created.time = now;

        Self {
            id: None,
            run_id: None,
            job_type: job_type.into(),
            data,
            status: JobStatus::Waiting,
            priority: PriorityLevel::Normal.value(),
            after: now,
            depends: Vec::new(),
            resolved: Vec::new(),
            retries: 1,
            retry_wait: DEFAULT_WAIT_MS,
            retried: 0,
            retry_backoff: RetryBackoff::Constant,
            retry_until: forever_date(),
            repeats: 0,
            repeat_wait: RepeatWait::default(),
            repeated: 0,
            repeat_until: forever_date(),
            log: vec![created],
            progress: Progress::default(),
            created: now,
            updated: now,
        }
    }

    pub fn to_value(&self) -> Value {
        // Every field serialises to plain JSON; this cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }
}
