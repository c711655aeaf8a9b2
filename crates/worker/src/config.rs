//! Queue configuration.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use jobq_core::FOREVER;

use crate::error::{QueueError, QueueResult};

/// Receives asynchronous queue errors (fetch failures, callback misuse).
pub type ErrorCallback = Arc<dyn Fn(&QueueError) + Send + Sync>;

/// How often the queue asks the server for work on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollInterval {
    Every(Duration),
    /// Only [`crate::JobQueue::trigger`] and unit completions poll.
    Forever,
}

impl PollInterval {
    /// `0` and anything at or beyond [`FOREVER`] mean no automatic polling.
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 || ms >= FOREVER {
            PollInterval::Forever
        } else {
            PollInterval::Every(Duration::from_millis(ms))
        }
    }

    fn normalized(self) -> Self {
        match self {
            PollInterval::Every(d) if d.is_zero() => PollInterval::Forever,
            other => other,
        }
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        PollInterval::Every(Duration::from_secs(5))
    }
}

/// The job types a queue leases work for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTypes(Vec<String>);

impl JobTypes {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub(crate) fn validate(&self) -> QueueResult<()> {
        if self.0.is_empty() {
            return Err(QueueError::invalid("at least one job type is required"));
        }
        if self.0.iter().any(String::is_empty) {
            return Err(QueueError::invalid("job types must be non-empty strings"));
        }
        Ok(())
    }
}

impl From<&str> for JobTypes {
    fn from(value: &str) -> Self {
        JobTypes(vec![value.to_string()])
    }
}

impl From<String> for JobTypes {
    fn from(value: String) -> Self {
        JobTypes(vec![value])
    }
}

impl From<Vec<String>> for JobTypes {
    fn from(value: Vec<String>) -> Self {
        JobTypes(value)
    }
}

impl From<Vec<&str>> for JobTypes {
    fn from(value: Vec<&str>) -> Self {
        JobTypes(value.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for JobTypes {
    fn from(value: &[&str]) -> Self {
        JobTypes(value.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for JobTypes {
    fn from(value: [&str; N]) -> Self {
        JobTypes(value.iter().map(|s| s.to_string()).collect())
    }
}

/// Worker pool configuration.
#[derive(Clone)]
pub struct QueueOptions {
    /// Maximum work units in flight.
    pub concurrency: usize,
    /// Jobs per work unit.
    pub payload: usize,
    /// Extra jobs to keep buffered beyond what can run.
    pub prefetch: usize,
    pub poll_interval: PollInterval,
    /// Lease requested from the server for each fetched job.
    pub work_timeout: Option<Duration>,
    /// Make a second unit callback an error instead of a report.
    pub callback_strict: bool,
    pub error_callback: Option<ErrorCallback>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            payload: 1,
            prefetch: 0,
            poll_interval: PollInterval::default(),
            work_timeout: None,
            callback_strict: false,
            error_callback: None,
        }
    }
}

impl fmt::Debug for QueueOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueOptions")
            .field("concurrency", &self.concurrency)
            .field("payload", &self.payload)
            .field("prefetch", &self.prefetch)
            .field("poll_interval", &self.poll_interval)
            .field("work_timeout", &self.work_timeout)
            .field("callback_strict", &self.callback_strict)
            .field("error_callback", &self.error_callback.is_some())
            .finish()
    }
}

impl QueueOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_payload(mut self, payload: usize) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_poll_interval(mut self, interval: PollInterval) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_work_timeout(mut self, timeout: Duration) -> Self {
        self.work_timeout = Some(timeout);
        self
    }

    pub fn with_callback_strict(mut self, strict: bool) -> Self {
        self.callback_strict = strict;
        self
    }

    pub fn with_error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&QueueError) + Send + Sync + 'static,
    {
        self.error_callback = Some(Arc::new(callback));
        self
    }

    /// Defaults overridden by `JOBQ_*` environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`QueueOptions::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> QueueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        if let Some(v) = parsed::<usize>(&lookup, "JOBQ_CONCURRENCY")? {
            options.concurrency = v;
        }
        if let Some(v) = parsed::<usize>(&lookup, "JOBQ_PAYLOAD")? {
            options.payload = v;
        }
        if let Some(v) = parsed::<usize>(&lookup, "JOBQ_PREFETCH")? {
            options.prefetch = v;
        }
        if let Some(v) = parsed::<u64>(&lookup, "JOBQ_POLL_INTERVAL_MS")? {
            options.poll_interval = PollInterval::from_millis(v);
        }
        if let Some(v) = parsed::<u64>(&lookup, "JOBQ_WORK_TIMEOUT_MS")? {
            options.work_timeout = Some(Duration::from_millis(v));
        }
        if let Some(v) = lookup("JOBQ_CALLBACK_STRICT") {
            options.callback_strict = match v.trim() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => {
                    return Err(QueueError::invalid(format!(
                        "JOBQ_CALLBACK_STRICT: expected a boolean, got {other:?}"
                    )));
                }
            };
        }
        Ok(options)
    }

    /// Checks the limits and normalises the poll interval.
    pub(crate) fn validated(mut self) -> QueueResult<Self> {
        if self.concurrency == 0 {
            return Err(QueueError::invalid("concurrency must be a positive integer"));
        }
        if self.payload == 0 {
            return Err(QueueError::invalid("payload must be a positive integer"));
        }
        if self.work_timeout.is_some_and(|t| t.as_millis() == 0) {
            return Err(QueueError::invalid("workTimeout must be a positive duration"));
        }
        self.poll_interval = self.poll_interval.normalized();
        Ok(self)
    }

    /// Jobs to request given what is buffered and running.
    pub(crate) fn capacity(&self, buffered: usize, running_units: usize) -> usize {
        let ceiling = self
            .concurrency
            .saturating_mul(self.payload)
            .saturating_add(self.prefetch);
        let used = buffered.saturating_add(self.payload.saturating_mul(running_units));
        ceiling.saturating_sub(used)
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> QueueResult<Option<T>>
where
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| QueueError::invalid(format!("{key}: {err}"))),
    }
}

/// How outstanding work is treated on shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ShutdownLevel {
    /// Stop polling; let buffered and running work finish.
    Soft,
    /// Fail buffered jobs; let running units finish.
    #[default]
    Normal,
    /// Fail buffered jobs and every running job not yet finished.
    Hard,
}

impl ShutdownLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownLevel::Soft => "soft",
            ShutdownLevel::Normal => "normal",
            ShutdownLevel::Hard => "hard",
        }
    }
}

impl fmt::Display for ShutdownLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShutdownLevel {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "soft" => Ok(ShutdownLevel::Soft),
            "normal" => Ok(ShutdownLevel::Normal),
            "hard" => Ok(ShutdownLevel::Hard),
            other => Err(QueueError::invalid(format!("unknown shutdown level {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownOptions {
    pub level: ShutdownLevel,
    /// Suppress the warning notices on the echo channel.
    pub quiet: bool,
}

impl ShutdownOptions {
    pub fn soft() -> Self {
        Self::default().with_level(ShutdownLevel::Soft)
    }

    pub fn hard() -> Self {
        Self::default().with_level(ShutdownLevel::Hard)
    }

    pub fn with_level(mut self, level: ShutdownLevel) -> Self {
        self.level = level;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }
}
