//! The job entity: validated policy mutators and remote lifecycle operations.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jobq_core::{
    forever_date, now_millis, to_millis, JobId, JobStatus, LogEntry, LogLevel, Progress,
    RepeatWait, RetryBackoff, RunId, Schedule, DEFAULT_WAIT_MS, FOREVER,
};
use jobq_rpc::{RpcError, RpcResult};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::context::JobContext;
use crate::document::JobDocument;
use crate::error::{JobError, JobResult};
use crate::options::{
    to_param, CancelOptions, Dependencies, DoneOptions, FailOptions, GetJobOptions, LogOptions,
    PriorityArg, ProgressOptions, ReadyOptions, RepeatSpec, RerunOptions, RestartOptions,
    RetrySpec, SaveOptions,
};

pub(crate) const NO_ERROR_INFO: &str = "No error information provided";

/// A single job bound to a [`JobContext`].
///
/// Before the first save every mutation is local. Once the job has an id its
/// policy is frozen and state changes go through the server.
///
/// Clones share the settlement flag, so a handler's copy calling
/// [`Job::done`] is visible to the queue's copy.
#[derive(Clone)]
pub struct Job {
    ctx: JobContext,
    doc: JobDocument,
    settled: Arc<AtomicBool>,
}

impl Job {
    /// Unbounded retries/repeats; also the "never poll" interval.
    pub const FOREVER: u64 = FOREVER;

    /// Creates a fresh, unsaved job.
    pub fn new(ctx: JobContext, job_type: impl Into<String>, data: Value) -> JobResult<Self> {
        let job_type = job_type.into();
        if job_type.is_empty() {
            return Err(JobError::invalid_parameter("job type must be a non-empty string"));
        }
        let Value::Object(data) = data else {
            return Err(JobError::invalid_parameter("job data must be an object"));
        };
        Ok(Self::wrap(ctx, JobDocument::new(job_type, data)))
    }

    /// Wraps an existing document, typically one returned by the server.
    pub fn from_document(ctx: JobContext, doc: Value) -> JobResult<Self> {
        let doc = JobDocument::from_value(doc)
            .map_err(|err| JobError::invalid_parameter(format!("not a job document: {err}")))?;
        Ok(Self::wrap(ctx, doc))
    }

    pub fn from_parts(ctx: JobContext, doc: JobDocument) -> Self {
        Self::wrap(ctx, doc)
    }

    fn wrap(ctx: JobContext, doc: JobDocument) -> Self {
        Self {
            ctx,
            doc,
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    pub fn root(&self) -> &str {
        self.ctx.root()
    }

    pub fn id(&self) -> Option<&JobId> {
        self.doc.id.as_ref()
    }

    pub fn run_id(&self) -> Option<&RunId> {
        self.doc.run_id.as_ref()
    }

    pub fn job_type(&self) -> &str {
        &self.doc.job_type
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.doc.data
    }

    pub fn status(&self) -> JobStatus {
        self.doc.status
    }

    pub fn document(&self) -> &JobDocument {
        &self.doc
    }

    pub fn into_document(self) -> JobDocument {
        self.doc
    }

    /// Whether `done` or `fail` has been acknowledged for this run.
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    // ---- policy mutators ---------------------------------------------------

    fn ensure_unsaved(&self) -> JobResult<()> {
        if self.doc.is_saved() {
            return Err(JobError::SavedJobImmutable);
        }
        Ok(())
    }

    /// Replaces the dependency list. An empty list leaves it unchanged;
    /// [`Dependencies::Clear`] empties it.
    pub fn depends<'a>(&mut self, jobs: impl Into<Dependencies<'a>>) -> JobResult<&mut Self> {
        self.ensure_unsaved()?;
        match jobs.into() {
            Dependencies::Clear => self.doc.depends.clear(),
            Dependencies::Jobs(jobs) if jobs.is_empty() => {}
            Dependencies::Jobs(jobs) => {
                let ids = jobs
                    .iter()
                    .map(|job| {
                        job.id().cloned().ok_or_else(|| {
                            JobError::InvalidDependency(format!(
                                "unsaved {} job",
                                job.job_type()
                            ))
                        })
                    })
                    .collect::<JobResult<Vec<_>>>()?;
                self.doc.depends = ids;
            }
        }
        Ok(self)
    }

    pub fn priority(&mut self, priority: impl Into<PriorityArg>) -> JobResult<&mut Self> {
        self.ensure_unsaved()?;
        self.doc.priority = priority.into().resolve()?;
        Ok(self)
    }

    /// `retry(n)` allows `n` retries after the first attempt.
    pub fn retry(&mut self, spec: impl Into<RetrySpec>) -> JobResult<&mut Self> {
        self.ensure_unsaved()?;
        let (retries, wait, backoff, until) = match spec.into() {
            RetrySpec::Count(n) => {
                let n = non_negative(n).ok_or_else(|| {
                    JobError::InvalidRetryOption(format!(
                        "bad parameter: accepts either an integer >= 0 or an options object, got {n}"
                    ))
                })?;
                (n, DEFAULT_WAIT_MS, RetryBackoff::Constant, None)
            }
            RetrySpec::Options(opts) => {
                let retries = match opts.retries {
                    Some(n) => non_negative(n).ok_or_else(|| {
                        JobError::InvalidRetryOption(format!(
                            "retries must be an integer >= 0, got {n}"
                        ))
                    })?,
                    None => 0,
                };
                let wait = match opts.wait {
                    Some(w) => non_negative(w).ok_or_else(|| {
                        JobError::InvalidRetryOption(format!(
                            "wait must be an integer >= 0, got {w}"
                        ))
                    })?,
                    None => DEFAULT_WAIT_MS,
                };
                let backoff = match opts.backoff.as_deref() {
                    Some(name) => name.parse::<RetryBackoff>().map_err(|_| {
                        JobError::InvalidRetryOption(format!(
                            "invalid retry backoff method {name:?}"
                        ))
                    })?,
                    None => RetryBackoff::Constant,
                };
                (retries, wait, backoff, opts.until)
            }
        };

        self.doc.retries = retries.saturating_add(1).min(FOREVER);
        self.doc.retry_wait = wait;
        self.doc.retry_backoff = backoff;
        self.doc.retry_until = until.map(to_millis).unwrap_or_else(forever_date);
        Ok(self)
    }

    pub fn repeat(&mut self, spec: impl Into<RepeatSpec>) -> JobResult<&mut Self> {
        self.ensure_unsaved()?;
        let (repeats, wait, until) = match spec.into() {
            RepeatSpec::Count(n) => {
                let n = non_negative(n).ok_or_else(|| {
                    JobError::InvalidRepeatOption(format!(
                        "bad parameter: accepts either an integer >= 0 or an options object, got {n}"
                    ))
                })?;
                (n, RepeatWait::default(), None)
            }
            RepeatSpec::Options(opts) => {
                if opts.wait.is_some() && opts.schedule.is_some() {
                    return Err(JobError::InvalidScheduleOption(
                        "wait and schedule options are mutually exclusive".into(),
                    ));
                }
                let repeats = match opts.repeats {
                    Some(n) => non_negative(n).ok_or_else(|| {
                        JobError::InvalidRepeatOption(format!(
                            "repeats must be an integer >= 0, got {n}"
                        ))
                    })?,
                    None => 0,
                };
                let wait = match (opts.wait, opts.schedule) {
                    (Some(w), _) => RepeatWait::Millis(non_negative(w).ok_or_else(|| {
                        JobError::InvalidRepeatOption(format!(
                            "wait must be an integer >= 0, got {w}"
                        ))
                    })?),
                    (None, Some(schedule)) => RepeatWait::Schedule(parse_schedule(&schedule)?),
                    (None, None) => RepeatWait::default(),
                };
                (repeats, wait, opts.until)
            }
        };

        self.doc.repeats = repeats.min(FOREVER);
        self.doc.repeat_wait = wait;
        self.doc.repeat_until = until.map(to_millis).unwrap_or_else(forever_date);
        Ok(self)
    }

    /// Earliest run time. `None` means now.
    pub fn after(&mut self, time: Option<DateTime<Utc>>) -> JobResult<&mut Self> {
        self.ensure_unsaved()?;
        self.doc.after = time.map(to_millis).unwrap_or_else(now_millis);
        Ok(self)
    }

    /// Delays the earliest run time by `ms` from now. `None` means no delay.
    pub fn delay(&mut self, ms: Option<i64>) -> JobResult<&mut Self> {
        self.ensure_unsaved()?;
        let ms = ms.unwrap_or(0);
        if ms < 0 {
            return Err(JobError::InvalidDelay(ms.to_string()));
        }
        let after = Duration::try_milliseconds(ms)
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .ok_or_else(|| JobError::InvalidDelay(format!("{ms} overflows")))?;
        self.after(Some(after))
    }

    // ---- remote operations -------------------------------------------------

    fn saved_id(&self, op: &'static str) -> JobResult<JobId> {
        self.doc.id.clone().ok_or(JobError::UnsavedJob(op))
    }

    fn running_ids(&self, op: &'static str) -> JobResult<(JobId, RunId)> {
        match (&self.doc.id, &self.doc.run_id) {
            (Some(id), Some(run_id)) => Ok((id.clone(), run_id.clone())),
            _ => Err(JobError::UnsavedOrNotRunning(op)),
        }
    }

    /// Submits the job. Returns the id assigned by the server, if any.
    pub async fn save(&mut self, options: SaveOptions) -> JobResult<Option<JobId>> {
        let id = self
            .ctx
            .call_then(
                "jobSave",
                vec![self.doc.to_value(), to_param(&options)],
                |v| decode_optional_id("jobSave", v),
            )
            .await?;
        if let Some(id) = &id {
            debug!(job_id = %id, job_type = %self.doc.job_type, "job saved");
            self.doc.id = Some(id.clone());
        }
        Ok(id)
    }

    /// Reloads the document from the server. `false` when the server no
    /// longer has it; local state is then left untouched.
    pub async fn refresh(&mut self, options: GetJobOptions) -> JobResult<bool> {
        let id = self.saved_id("refresh")?;
        let value = self
            .ctx
            .call("getJob", vec![json!(id), to_param(&options)])
            .await?;
        if value.is_null() || value == Value::Bool(false) {
            return Ok(false);
        }
        self.doc = JobDocument::from_value(value)
            .map_err(|err| RpcError::unexpected("getJob", err.to_string()))?;
        Ok(true)
    }

    /// Appends a log line. Unsaved jobs log locally; saved jobs log on the
    /// server, which answers with the stored level or `None` on mismatch.
    pub async fn log(
        &mut self,
        message: impl Into<String>,
        options: LogOptions,
    ) -> JobResult<Option<LogLevel>> {
        let message = message.into();
        if options.echo.should_echo(options.level) {
            let id = self.doc.id.as_ref().map(JobId::as_str).unwrap_or("unsaved");
            self.ctx.echo().echo(
                options.level,
                &format!("LOG: {}, {}: {}", options.level, id, message),
            );
        }

        let Some(id) = self.doc.id.clone() else {
            let mut entry = LogEntry::new(options.level, message);
            entry.run_id = self.doc.run_id.clone();
            self.doc.log.push(entry);
            return Ok(Some(options.level));
        };

        let level = self
            .ctx
            .call_then(
                "jobLog",
                vec![
                    json!(id),
                    json!(self.doc.run_id),
                    Value::String(message),
                    json!({ "level": options.level }),
                ],
                |v| match v {
                    Value::String(s) => s
                        .parse::<LogLevel>()
                        .map(Some)
                        .map_err(|err| RpcError::unexpected("jobLog", err.to_string())),
                    Value::Bool(false) | Value::Null => Ok(None),
                    other => Err(RpcError::unexpected("jobLog", other.to_string())),
                },
            )
            .await?;
        Ok(level)
    }

    /// Records progress and returns the percent complete (`None` when the
    /// server rejected the update).
    pub async fn progress(
        &mut self,
        completed: f64,
        total: f64,
        options: ProgressOptions,
    ) -> JobResult<Option<f64>> {
        let progress = Progress::checked(completed, total)
            .ok_or(JobError::InvalidProgress { completed, total })?;

        if options.echo {
            let id = self.doc.id.as_ref().map(JobId::as_str).unwrap_or("unsaved");
            self.ctx.echo().echo(
                LogLevel::Info,
                &format!(
                    "PROGRESS: {id} of type {} is {}% complete",
                    self.doc.job_type, progress.percent
                ),
            );
        }

        let Some(id) = self.doc.id.clone() else {
            self.doc.progress = progress;
            return Ok(Some(progress.percent));
        };

        let percent = self
            .ctx
            .call_then(
                "jobProgress",
                vec![json!(id), json!(self.doc.run_id), json!(completed), json!(total)],
                |v| match v {
                    Value::Number(n) => Ok(n.as_f64()),
                    Value::Bool(false) | Value::Null => Ok(None),
                    other => Err(RpcError::unexpected("jobProgress", other.to_string())),
                },
            )
            .await?;
        Ok(percent)
    }

    /// Reports successful completion of the current run.
    ///
    /// A `null` result is sent as `{}`; anything that is not an object is
    /// wrapped as `{value: result}`.
    pub async fn done(&self, result: Value, options: DoneOptions) -> JobResult<Value> {
        let (id, run_id) = self.running_ids("done")?;
        let result = match result {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => json!({ "value": other }),
        };
        let answer = self
            .ctx
            .call(
                "jobDone",
                vec![json!(id), json!(run_id), result, to_param(&options)],
            )
            .await?;
        self.settled.store(true, Ordering::Release);
        debug!(job_id = %id, run_id = %run_id, "job done");
        Ok(answer)
    }

    /// Reports failure of the current run. With `fatal` the server skips any
    /// remaining retries.
    pub async fn fail(&self, error: Value, options: FailOptions) -> JobResult<Value> {
        let (id, run_id) = self.running_ids("fail")?;
        let error = normalize_failure(error);
        let answer = self
            .ctx
            .call(
                "jobFail",
                vec![json!(id), json!(run_id), error, to_param(&options)],
            )
            .await?;
        self.settled.store(true, Ordering::Release);
        debug!(job_id = %id, run_id = %run_id, fatal = options.fatal, "job failed");
        Ok(answer)
    }

    pub async fn pause(&mut self) -> JobResult<bool> {
        match self.doc.id.clone() {
            None => self.local_transition(JobStatus::Paused),
            Some(id) => self.remote_flag("jobPause", vec![json!(id)]).await,
        }
    }

    pub async fn resume(&mut self) -> JobResult<bool> {
        match self.doc.id.clone() {
            None => self.local_transition(JobStatus::Waiting),
            Some(id) => self.remote_flag("jobResume", vec![json!(id)]).await,
        }
    }

    pub async fn ready(&self, options: ReadyOptions) -> JobResult<bool> {
        let id = self.saved_id("ready")?;
        self.remote_flag("jobReady", vec![json!(id), to_param(&options.resolved())])
            .await
    }

    pub async fn cancel(&self, options: CancelOptions) -> JobResult<bool> {
        let id = self.saved_id("cancel")?;
        self.remote_flag("jobCancel", vec![json!(id), to_param(&options)])
            .await
    }

    pub async fn restart(&self, options: RestartOptions) -> JobResult<bool> {
        let id = self.saved_id("restart")?;
        self.remote_flag("jobRestart", vec![json!(id), to_param(&options)])
            .await
    }

    /// Clones a completed job into a new one. Returns the new id.
    pub async fn rerun(&self, options: RerunOptions) -> JobResult<Option<JobId>> {
        let id = self.saved_id("rerun")?;
        let options = RerunOptions {
            wait: options.wait.or_else(|| self.doc.repeat_wait.as_millis()),
            ..options
        };
        let new_id = self
            .ctx
            .call_then("jobRerun", vec![json!(id), to_param(&options)], |v| {
                decode_optional_id("jobRerun", v)
            })
            .await?;
        Ok(new_id)
    }

    pub async fn remove(&self) -> JobResult<bool> {
        let id = self.saved_id("remove")?;
        self.remote_flag("jobRemove", vec![json!(id)]).await
    }

    fn local_transition(&mut self, next: JobStatus) -> JobResult<bool> {
        let current = self.doc.status;
        if current != next && !current.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        self.doc.status = next;
        self.doc.updated = now_millis();
        Ok(true)
    }

    async fn remote_flag(&self, method: &'static str, params: Vec<Value>) -> JobResult<bool> {
        Ok(self
            .ctx
            .call_then(method, params, |v| decode_flag(method, v))
            .await?)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("root", &self.ctx.root())
            .field("id", &self.doc.id)
            .field("type", &self.doc.job_type)
            .field("status", &self.doc.status)
            .field("settled", &self.is_settled())
            .finish()
    }
}

fn non_negative(n: i64) -> Option<u64> {
    u64::try_from(n).ok()
}

fn parse_schedule(value: &Value) -> JobResult<Schedule> {
    let Value::Object(map) = value else {
        return Err(JobError::InvalidScheduleOption(
            "schedule option must be an object".into(),
        ));
    };
    let Some(Value::Array(schedules)) = map.get("schedules") else {
        return Err(JobError::InvalidScheduleOption(
            "schedule object requires a schedules attribute of type Array".into(),
        ));
    };
    let exceptions = match map.get("exceptions") {
        None => Vec::new(),
        Some(Value::Array(exceptions)) => exceptions.clone(),
        Some(_) => {
            return Err(JobError::InvalidScheduleOption(
                "schedule object exceptions attribute must be an Array".into(),
            ));
        }
    };
    Ok(Schedule {
        schedules: schedules.clone(),
        exceptions,
    })
}

pub(crate) fn normalize_failure(error: Value) -> Value {
    match error {
        Value::Null => json!({ "value": NO_ERROR_INFO }),
        Value::Object(map) => Value::Object(map),
        other => json!({ "value": other }),
    }
}

pub(crate) fn decode_flag(method: &str, value: Value) -> RpcResult<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(RpcError::unexpected(method, format!("expected boolean, got {other}"))),
    }
}

fn decode_optional_id(method: &str, value: Value) -> RpcResult<Option<JobId>> {
    match value {
        Value::String(id) if !id.is_empty() => Ok(Some(JobId::new(id))),
        Value::Null | Value::Bool(false) => Ok(None),
        other => Err(RpcError::unexpected(method, format!("expected id, got {other}"))),
    }
}
