//! In-process job server for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jobq_core::{now_millis, JobId, JobStatus, LogEntry, LogLevel, Progress, RunId};
use jobq_rpc::{MethodInvoker, RemoteError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::document::JobDocument;

static NULL: Value = Value::Null;

/// Per-status job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub waiting: usize,
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub paused: usize,
}

/// Answers the remote job methods from a map held in memory.
///
/// Implements the status transition table and retry/repeat bookkeeping
/// closely enough to drive a worker pool end to end. Leases (`workTimeout`)
/// are accepted but never expire.
#[derive(Debug)]
pub struct InMemoryJobServer {
    root: String,
    jobs: RwLock<HashMap<JobId, JobDocument>>,
    accepting: AtomicBool,
}

impl InMemoryJobServer {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            jobs: RwLock::new(HashMap::new()),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn arc(root: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(root))
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn get(&self, id: &JobId) -> Option<JobDocument> {
        self.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn stats(&self) -> ServerStats {
        let mut stats = ServerStats::default();
        for doc in self.read().values() {
            let slot = match doc.status {
                JobStatus::Waiting => &mut stats.waiting,
                JobStatus::Ready => &mut stats.ready,
                JobStatus::Running => &mut stats.running,
                JobStatus::Completed => &mut stats.completed,
                JobStatus::Failed => &mut stats.failed,
                JobStatus::Cancelled => &mut stats.cancelled,
                JobStatus::Paused => &mut stats.paused,
            };
            *slot += 1;
        }
        stats
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobDocument>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobDocument>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle(&self, method: &str, params: &[Value]) -> Result<Value, RemoteError> {
        let now = now_millis();
        match method {
            "jobSave" => self.save(decode_document(param(params, 0))?, now),
            "getJob" => Ok(self.get_job(param(params, 0), flag(param(params, 1), "getLog"))),
            "getWork" => {
                let opts: WorkParams = decode(param(params, 1))?;
                Ok(self.get_work(&strings(param(params, 0)), opts.max_jobs, now))
            }
            "jobLog" => Ok(self.log(params)),
            "jobProgress" => Ok(self.progress(params)),
            "jobDone" => Ok(self.done(params, now)),
            "jobFail" => Ok(self.fail(params, now)),
            "jobPause" => Ok(self.transition(
                param(params, 0),
                |doc| doc.status.is_pausable(),
                JobStatus::Paused,
                now,
            )),
            "jobResume" => Ok(self.transition(
                param(params, 0),
                |doc| doc.status == JobStatus::Paused,
                JobStatus::Waiting,
                now,
            )),
            "jobReady" => {
                let opts: ReadyParams = decode(param(params, 1))?;
                Ok(self.ready(param(params, 0), opts, now))
            }
            "jobCancel" => {
                let opts: RelativesParams = decode(param(params, 1))?;
                Ok(self.cancel(param(params, 0), opts, now))
            }
            "jobRestart" => {
                let opts: RestartParams = decode(param(params, 1))?;
                Ok(self.restart(param(params, 0), opts, now))
            }
            "jobRerun" => {
                let opts: RerunParams = decode(param(params, 1))?;
                Ok(self.rerun(param(params, 0), opts, now))
            }
            "jobRemove" => Ok(self.remove(param(params, 0))),
            "startJobs" | "startJobServer" => {
                self.accepting.store(true, Ordering::Release);
                Ok(Value::Bool(true))
            }
            "stopJobs" | "shutdownJobServer" => {
                self.accepting.store(false, Ordering::Release);
                Ok(Value::Bool(true))
            }
            other => Err(RemoteError::new(format!("unknown method {other}"))),
        }
    }

    fn save(&self, mut doc: JobDocument, now: DateTime<Utc>) -> Result<Value, RemoteError> {
        let mut jobs = self.write();
        doc.updated = now;
        let id = match doc.id.clone() {
            Some(id) if jobs.contains_key(&id) => id,
            Some(_) => return Err(RemoteError::new("cannot save a job with an unknown _id")),
            None => {
                let id = JobId::new(Uuid::now_v7().to_string());
                doc.id = Some(id.clone());
                doc.run_id = None;
                if doc.status != JobStatus::Paused {
                    doc.status = JobStatus::Waiting;
                }
                id
            }
        };
        debug!(job_id = %id, job_type = %doc.job_type, "server stored job");
        jobs.insert(id.clone(), doc);
        Ok(json!(id))
    }

    fn get_job(&self, ids_param: &Value, get_log: bool) -> Value {
        let jobs = self.read();
        let render = |doc: &JobDocument| {
            let mut doc = doc.clone();
            if !get_log {
                doc.log.clear();
            }
            doc.to_value()
        };
        match ids_param {
            Value::Array(_) => Value::Array(
                ids(ids_param)
                    .iter()
                    .filter_map(|id| jobs.get(id))
                    .map(render)
                    .collect(),
            ),
            _ => ids(ids_param)
                .first()
                .and_then(|id| jobs.get(id))
                .map_or(Value::Null, render),
        }
    }

    fn get_work(&self, types: &[String], max_jobs: u64, now: DateTime<Utc>) -> Value {
        if !self.accepting.load(Ordering::Acquire) {
            return Value::Array(Vec::new());
        }
        let mut jobs = self.write();
        promote(&mut jobs, now);

        let mut candidates: Vec<&JobDocument> = jobs
            .values()
            .filter(|doc| doc.status == JobStatus::Ready && types.contains(&doc.job_type))
            .collect();
        candidates.sort_by_key(|doc| (doc.priority, doc.after, doc.created));
        let picked: Vec<JobId> = candidates
            .iter()
            .take(usize::try_from(max_jobs).unwrap_or(usize::MAX))
            .filter_map(|doc| doc.id.clone())
            .collect();

        let mut leased = Vec::with_capacity(picked.len());
        for id in picked {
            if let Some(doc) = jobs.get_mut(&id) {
                let run_id = RunId::new(Uuid::now_v7().to_string());
                doc.status = JobStatus::Running;
                doc.run_id = Some(run_id.clone());
                doc.retries = doc.retries.saturating_sub(1);
                doc.retried += 1;
                doc.progress = Progress::default();
                doc.updated = now;
                push_log(doc, LogLevel::Info, "Job Running", Some(run_id));
                leased.push(doc.to_value());
            }
        }
        Value::Array(leased)
    }

    fn log(&self, params: &[Value]) -> Value {
        let mut jobs = self.write();
        let Some(doc) = ids(param(params, 0)).first().and_then(|id| jobs.get_mut(id)) else {
            return Value::Bool(false);
        };
        let level = param(params, 3)
            .get("level")
            .and_then(|l| serde_json::from_value::<LogLevel>(l.clone()).ok())
            .unwrap_or_default();
        let message = param(params, 2).as_str().unwrap_or_default().to_string();
        let run_id = param(params, 1).as_str().map(RunId::from);
        push_log(doc, level, message, run_id);
        json!(level)
    }

    fn progress(&self, params: &[Value]) -> Value {
        let mut jobs = self.write();
        let Some(doc) = running_job(&mut jobs, params) else {
            return Value::Bool(false);
        };
        let completed = param(params, 2).as_f64().unwrap_or(-1.0);
        let total = param(params, 3).as_f64().unwrap_or(0.0);
        match Progress::checked(completed, total) {
            Some(progress) => {
                doc.progress = progress;
                json!(progress.percent)
            }
            None => Value::Bool(false),
        }
    }

    fn done(&self, params: &[Value], now: DateTime<Utc>) -> Value {
        let mut jobs = self.write();
        let Some(doc) = running_job(&mut jobs, params) else {
            return Value::Bool(false);
        };
        doc.status = JobStatus::Completed;
        doc.progress = Progress {
            completed: doc.progress.total,
            total: doc.progress.total,
            percent: 100.0,
        };
        doc.updated = now;
        let run_id = doc.run_id.take();
        push_log(doc, LogLevel::Success, "Job Completed", run_id);

        let repeat = (doc.repeats > 0 && now < doc.repeat_until).then(|| {
            let wait = doc.repeat_wait.as_millis().unwrap_or(0);
            let mut next = fresh_copy(doc, now);
            next.repeats = doc.repeats - 1;
            next.repeated = doc.repeated + 1;
            next.after = delay(now, wait);
            next
        });
        let result = param(params, 2).clone();
        let want_repeat_id = flag(param(params, 3), "repeatId");

        match repeat {
            Some(next) => {
                let new_id = next.id.clone();
                if let Some(id) = &new_id {
                    jobs.insert(id.clone(), next);
                }
                if want_repeat_id {
                    json!(new_id)
                } else {
                    result
                }
            }
            None => result,
        }
    }

    fn fail(&self, params: &[Value], now: DateTime<Utc>) -> Value {
        let mut jobs = self.write();
        let Some(doc) = running_job(&mut jobs, params) else {
            return Value::Bool(false);
        };
        let fatal = flag(param(params, 3), "fatal");
        let run_id = doc.run_id.take();
        doc.updated = now;
        if !fatal && doc.retries > 0 && now < doc.retry_until {
            let retried = u32::try_from(doc.retried).unwrap_or(u32::MAX);
            let wait = doc.retry_backoff.wait_for(doc.retry_wait, retried);
            doc.status = JobStatus::Waiting;
            doc.after = delay(now, wait);
        } else {
            doc.status = JobStatus::Failed;
        }
        push_log(doc, LogLevel::Danger, "Job Failed", run_id);
        param(params, 2).clone()
    }

    fn transition<F>(
        &self,
        ids_param: &Value,
        allowed: F,
        next: JobStatus,
        now: DateTime<Utc>,
    ) -> Value
    where
        F: Fn(&JobDocument) -> bool,
    {
        let mut jobs = self.write();
        let mut any = false;
        for id in ids(ids_param) {
            if let Some(doc) = jobs.get_mut(&id) {
                if allowed(doc) {
                    doc.status = next;
                    doc.updated = now;
                    any = true;
                }
            }
        }
        Value::Bool(any)
    }

    fn ready(&self, ids_param: &Value, opts: ReadyParams, now: DateTime<Utc>) -> Value {
        let mut jobs = self.write();
        let time = opts
            .time
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or(now);
        let mut any = false;
        for id in ids(ids_param) {
            let eligible = jobs.get(&id).is_some_and(|doc| {
                doc.status == JobStatus::Waiting
                    && (opts.force || (doc.after <= time && dependencies_met(&jobs, doc)))
            });
            if let Some(doc) = jobs.get_mut(&id).filter(|_| eligible) {
                doc.status = JobStatus::Ready;
                doc.updated = now;
                any = true;
            }
        }
        Value::Bool(any)
    }

    fn cancel(&self, ids_param: &Value, opts: RelativesParams, now: DateTime<Utc>) -> Value {
        let mut jobs = self.write();
        let targets = relatives(&jobs, ids(ids_param), opts.antecedents, opts.dependents);
        let mut any = false;
        for id in targets {
            if let Some(doc) = jobs.get_mut(&id).filter(|doc| doc.status.is_cancellable()) {
                doc.status = JobStatus::Cancelled;
                doc.run_id = None;
                doc.updated = now;
                push_log(doc, LogLevel::Warning, "Job cancelled", None);
                any = true;
            }
        }
        Value::Bool(any)
    }

    fn restart(&self, ids_param: &Value, opts: RestartParams, now: DateTime<Utc>) -> Value {
        let mut jobs = self.write();
        let targets = relatives(&jobs, ids(ids_param), opts.antecedents, opts.dependents);
        let mut any = false;
        for id in targets {
            if let Some(doc) = jobs.get_mut(&id).filter(|doc| doc.status.is_restartable()) {
                doc.status = JobStatus::Waiting;
                doc.retries = doc.retries.saturating_add(opts.retries);
                if let Some(until) = opts.until.and_then(DateTime::<Utc>::from_timestamp_millis) {
                    doc.retry_until = until;
                }
                doc.after = now;
                doc.updated = now;
                push_log(doc, LogLevel::Info, "Job restarted", None);
                any = true;
            }
        }
        Value::Bool(any)
    }

    fn rerun(&self, id_param: &Value, opts: RerunParams, now: DateTime<Utc>) -> Value {
        let mut jobs = self.write();
        let Some(original) = ids(id_param)
            .first()
            .and_then(|id| jobs.get(id))
            .filter(|doc| doc.status == JobStatus::Completed)
        else {
            return Value::Bool(false);
        };
        let mut next = fresh_copy(original, now);
        next.repeats = opts.repeats;
        next.repeated = 0;
        next.after = delay(now, opts.wait.unwrap_or(0));
        let new_id = next.id.clone();
        if let Some(id) = &new_id {
            jobs.insert(id.clone(), next);
        }
        json!(new_id)
    }

    fn remove(&self, ids_param: &Value) -> Value {
        let mut jobs = self.write();
        let mut any = false;
        for id in ids(ids_param) {
            if jobs.get(&id).is_some_and(|doc| doc.status.is_removable()) {
                jobs.remove(&id);
                any = true;
            }
        }
        Value::Bool(any)
    }
}

#[async_trait]
impl MethodInvoker for InMemoryJobServer {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RemoteError> {
        let Some(name) = method
            .strip_prefix(self.root.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
        else {
            return Err(RemoteError::new(format!("unknown method {method}")));
        };
        self.handle(name, &params)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WorkParams {
    max_jobs: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReadyParams {
    time: Option<i64>,
    force: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RelativesParams {
    antecedents: bool,
    dependents: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RestartParams {
    retries: u64,
    until: Option<i64>,
    antecedents: bool,
    dependents: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RerunParams {
    repeats: u64,
    wait: Option<u64>,
}

fn param(params: &[Value], index: usize) -> &Value {
    params.get(index).unwrap_or(&NULL)
}

fn decode<T: DeserializeOwned + Default>(value: &Value) -> Result<T, RemoteError> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone()).map_err(|err| RemoteError::new(err.to_string()))
}

fn decode_document(value: &Value) -> Result<JobDocument, RemoteError> {
    if value.is_null() {
        return Err(RemoteError::new("jobSave requires a job document"));
    }
    serde_json::from_value(value.clone())
        .map_err(|err| RemoteError::new(format!("invalid job document: {err}")))
}

fn flag(options: &Value, key: &str) -> bool {
    options.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn ids(value: &Value) -> Vec<JobId> {
    strings(value).into_iter().map(JobId::from).collect()
}

fn delay(now: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or_else(jobq_core::forever_date)
}

fn push_log(
    doc: &mut JobDocument,
    level: LogLevel,
    message: impl Into<String>,
    run_id: Option<RunId>,
) {
    let mut entry = LogEntry::new(level, message);
    entry.run_id = run_id;
    doc.log.push(entry);
}

fn running_job<'a>(
    jobs: &'a mut HashMap<JobId, JobDocument>,
    params: &[Value],
) -> Option<&'a mut JobDocument> {
    let id = ids(param(params, 0)).into_iter().next()?;
    let run_id = param(params, 1).as_str()?;
    jobs.get_mut(&id).filter(|doc| {
        doc.status == JobStatus::Running && doc.run_id.as_ref().map(RunId::as_str) == Some(run_id)
    })
}

fn fresh_copy(doc: &JobDocument, now: DateTime<Utc>) -> JobDocument {
    let mut next = doc.clone();
    next.id = Some(JobId::new(Uuid::now_v7().to_string()));
    next.run_id = None;
    next.status = JobStatus::Waiting;
    next.retried = 0;
    next.progress = Progress::default();
    next.log = vec![LogEntry::new(LogLevel::Info, "Created")];
    next.created = now;
    next.updated = now;
    next
}

fn dependencies_met(jobs: &HashMap<JobId, JobDocument>, doc: &JobDocument) -> bool {
    doc.depends.iter().all(|dep| {
        jobs.get(dep)
            .is_none_or(|d| d.status == JobStatus::Completed)
    })
}

/// Moves every due `waiting` job whose dependencies completed to `ready`.
fn promote(jobs: &mut HashMap<JobId, JobDocument>, now: DateTime<Utc>) {
    let due: Vec<JobId> = jobs
        .values()
        .filter(|doc| {
            doc.status == JobStatus::Waiting && doc.after <= now && dependencies_met(jobs, doc)
        })
        .filter_map(|doc| doc.id.clone())
        .collect();
    for id in due {
        if let Some(doc) = jobs.get_mut(&id) {
            doc.resolved = doc.depends.clone();
            doc.status = JobStatus::Ready;
            doc.updated = now;
        }
    }
}

/// `ids` plus, transitively, their dependencies and/or dependents.
fn relatives(
    jobs: &HashMap<JobId, JobDocument>,
    ids: Vec<JobId>,
    antecedents: bool,
    dependents: bool,
) -> Vec<JobId> {
    let mut seen: HashSet<JobId> = ids.iter().cloned().collect();
    let mut ordered = ids.clone();
    let mut frontier = ids;
    while let Some(id) = frontier.pop() {
        let mut next = Vec::new();
        if antecedents {
            if let Some(doc) = jobs.get(&id) {
                next.extend(doc.depends.iter().cloned());
            }
        }
        if dependents {
            next.extend(
                jobs.values()
                    .filter(|doc| doc.depends.contains(&id))
                    .filter_map(|doc| doc.id.clone()),
            );
        }
        for candidate in next {
            if seen.insert(candidate.clone()) {
                ordered.push(candidate.clone());
                frontier.push(candidate);
            }
        }
    }
    ordered
}
