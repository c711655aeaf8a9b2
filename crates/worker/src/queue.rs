//! The worker pool: polling, dispatch and shutdown.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use jobq_core::LogLevel;
use jobq_jobs::{lease_work, FailOptions, GetWorkOptions, Job, JobContext, LeasedWork};
use serde_json::json;
use tokio::sync::{watch, Notify};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{JobTypes, PollInterval, QueueOptions, ShutdownLevel, ShutdownOptions};
use crate::error::{QueueError, QueueResult};
use crate::unit::{UnitCallback, WorkUnit};

/// Message recorded on jobs failed by a shutdown.
pub const SHUTDOWN_FAILURE: &str = "Worker shutdown";

/// User handler invoked once per work unit.
pub type WorkHandler = Arc<dyn Fn(WorkUnit, UnitCallback) + Send + Sync>;

#[derive(Default)]
struct QueueState {
    buffered: VecDeque<Job>,
    in_flight: HashMap<u64, Vec<Job>>,
    paused: bool,
    fetching: bool,
    stopping: Option<ShutdownLevel>,
    drained: Option<watch::Receiver<bool>>,
}

impl QueueState {
    fn dispatch_blocked(&self) -> bool {
        self.paused || matches!(self.stopping, Some(ShutdownLevel::Normal | ShutdownLevel::Hard))
    }
}

pub(crate) struct Inner {
    ctx: JobContext,
    types: Vec<String>,
    options: QueueOptions,
    handler: WorkHandler,
    state: Mutex<QueueState>,
    /// Bumped on every state change; drain waits on it.
    changed: watch::Sender<u64>,
    trigger: Notify,
    stop: watch::Sender<bool>,
    next_unit: AtomicU64,
    runtime: tokio::runtime::Handle,
}

impl Inner {
    pub(crate) fn root(&self) -> &str {
        self.ctx.root()
    }

    pub(crate) fn callback_strict(&self) -> bool {
        self.options.callback_strict
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self) {
        self.changed.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub(crate) fn report(&self, err: &QueueError) {
        match &self.options.error_callback {
            Some(callback) => callback(err),
            None => error!(queue = %self.root(), error = %err, "job queue error"),
        }
    }

    /// Starts a fetch if the queue is accepting work and has room.
    fn poll(self: &Arc<Self>) {
        let requested = {
            let mut state = self.state();
            if state.paused || state.stopping.is_some() || state.fetching {
                return;
            }
            let requested = self
                .options
                .capacity(state.buffered.len(), state.in_flight.len());
            if requested == 0 {
                return;
            }
            state.fetching = true;
            requested
        };
        self.bump();

        let inner = Arc::clone(self);
        self.runtime.spawn(async move { inner.fetch(requested).await });
    }

    async fn fetch(self: Arc<Self>, requested: usize) {
        let options = GetWorkOptions {
            max_jobs: requested as u64,
            work_timeout: self
                .options
                .work_timeout
                .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        };
        debug!(queue = %self.root(), requested, "requesting work");
        let result = lease_work(&self.ctx, &self.types, options).await;

        match result {
            Ok(LeasedWork { jobs, rejected }) => {
                let received = jobs.len() + rejected.len();
                if received > requested {
                    self.report(&QueueError::ExcessJobs { requested, received });
                }
                for err in rejected {
                    self.report(&QueueError::Fetch(err));
                }
                let mut state = self.state();
                state.buffered.extend(jobs);
                state.fetching = false;
                debug!(queue = %self.root(), received, buffered = state.buffered.len(), "work received");
            }
            Err(err) => {
                self.state().fetching = false;
                self.report(&QueueError::Fetch(err));
            }
        }
        self.bump();
        self.dispatch();
    }

    /// Hands buffered jobs to the handler while units are available.
    fn dispatch(self: &Arc<Self>) {
        loop {
            let (unit_id, jobs) = {
                let mut state = self.state();
                if state.dispatch_blocked()
                    || state.buffered.is_empty()
                    || state.in_flight.len() >= self.options.concurrency
                {
                    return;
                }
                let take = self.options.payload.min(state.buffered.len());
                let jobs: Vec<Job> = state.buffered.drain(..take).collect();
                let unit_id = self.next_unit.fetch_add(1, Ordering::Relaxed);
                state.in_flight.insert(unit_id, jobs.clone());
                (unit_id, jobs)
            };
            self.bump();

            debug!(queue = %self.root(), unit = unit_id, jobs = jobs.len(), "dispatching work unit");
            let unit = WorkUnit::from_jobs(jobs, self.options.payload);
            let callback = UnitCallback::new(Arc::clone(self), unit_id);
            (self.handler)(unit, callback);
        }
    }

    pub(crate) fn complete_unit(self: &Arc<Self>, unit_id: u64) {
        let removed = self.state().in_flight.remove(&unit_id).is_some();
        if !removed {
            return;
        }
        debug!(queue = %self.root(), unit = unit_id, "work unit finished");
        self.bump();

        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            inner.dispatch();
            inner.poll();
        });
    }

    async fn wait_until<F>(&self, condition: F)
    where
        F: Fn(&QueueState) -> bool,
    {
        let mut changes = self.changed.subscribe();
        loop {
            let ready = condition(&self.state());
            if ready {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    async fn fail_all(&self, jobs: Vec<Job>) {
        for job in jobs {
            if let Err(err) = job.fail(json!(SHUTDOWN_FAILURE), FailOptions::default()).await {
                warn!(
                    queue = %self.root(),
                    job_id = ?job.id(),
                    error = %err,
                    "failed to fail job during shutdown"
                );
            }
        }
    }

    async fn drain(self: Arc<Self>, options: ShutdownOptions) {
        let level = options.level;
        if !options.quiet {
            self.ctx.echo().echo(
                LogLevel::Warning,
                &format!("Initiating {level} shutdown of job queue {}", self.root()),
            );
        }
        info!(queue = %self.root(), %level, "job queue shutting down");

        self.wait_until(|s| !s.fetching).await;

        match level {
            ShutdownLevel::Soft => {
                self.dispatch();
                self.wait_until(|s| s.buffered.is_empty() && s.in_flight.is_empty())
                    .await;
            }
            ShutdownLevel::Normal => {
                let buffered: Vec<Job> = std::mem::take(&mut self.state().buffered).into();
                self.bump();
                if !options.quiet && !buffered.is_empty() {
                    self.ctx.echo().echo(
                        LogLevel::Warning,
                        &format!("Failing {} buffered jobs", buffered.len()),
                    );
                }
                self.fail_all(buffered).await;
                self.wait_until(|s| s.in_flight.is_empty()).await;
            }
            ShutdownLevel::Hard => {
                let doomed: Vec<Job> = {
                    let mut state = self.state();
                    let mut doomed: Vec<Job> = std::mem::take(&mut state.buffered).into();
                    // Abandoned units; a late callback for one of them is a no-op.
                    doomed.extend(
                        state
                            .in_flight
                            .drain()
                            .flat_map(|(_, jobs)| jobs)
                            .filter(|job| !job.is_settled()),
                    );
                    doomed
                };
                self.bump();
                if !options.quiet && !doomed.is_empty() {
                    self.ctx.echo().echo(
                        LogLevel::Warning,
                        &format!("Failing {} buffered and running jobs", doomed.len()),
                    );
                }
                self.fail_all(doomed).await;
            }
        }

        if !options.quiet {
            self.ctx.echo().echo(
                LogLevel::Warning,
                &format!("Shutdown of job queue {} complete", self.root()),
            );
        }
        info!(queue = %self.root(), %level, "job queue stopped");
    }
}

/// A pool of workers pulling jobs of the given types from the server.
///
/// The queue keeps running until [`JobQueue::shutdown`]; dropping the handle
/// does not stop it.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    /// Validates the options and starts polling. Must be called from within
    /// a tokio runtime. Nothing is spawned when validation fails.
    pub fn spawn<F>(
        ctx: JobContext,
        types: impl Into<JobTypes>,
        options: QueueOptions,
        handler: F,
    ) -> QueueResult<Self>
    where
        F: Fn(WorkUnit, UnitCallback) + Send + Sync + 'static,
    {
        let types = types.into();
        types.validate()?;
        let options = options.validated()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        let (changed, _) = watch::channel(0);
        let (stop, stop_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            ctx,
            types: types.as_slice().to_vec(),
            options,
            handler: Arc::new(handler),
            state: Mutex::new(QueueState::default()),
            changed,
            trigger: Notify::new(),
            stop,
            next_unit: AtomicU64::new(1),
            runtime,
        });

        info!(
            queue = %inner.root(),
            types = ?inner.types,
            concurrency = inner.options.concurrency,
            payload = inner.options.payload,
            prefetch = inner.options.prefetch,
            "job queue started"
        );
        inner.runtime.spawn(poll_loop(Arc::clone(&inner), stop_rx));
        Ok(Self { inner })
    }

    pub fn context(&self) -> &JobContext {
        &self.inner.ctx
    }

    pub fn options(&self) -> &QueueOptions {
        &self.inner.options
    }

    /// Stops polling and dispatching. Running units are unaffected.
    pub fn pause(&self) {
        self.inner.state().paused = true;
        self.inner.bump();
        debug!(queue = %self.inner.root(), "job queue paused");
    }

    pub fn resume(&self) {
        self.inner.state().paused = false;
        self.inner.bump();
        debug!(queue = %self.inner.root(), "job queue resumed");
        self.inner.dispatch();
        self.inner.trigger.notify_one();
    }

    /// Polls for work now, outside the regular interval.
    pub fn trigger(&self) {
        self.inner.trigger.notify_one();
    }

    /// Jobs fetched but not yet dispatched.
    pub fn length(&self) -> usize {
        self.inner.state().buffered.len()
    }

    /// Work units currently with the handler.
    pub fn running(&self) -> usize {
        self.inner.state().in_flight.len()
    }

    pub fn full(&self) -> bool {
        self.running() == self.inner.options.concurrency
    }

    pub fn idle(&self) -> bool {
        let state = self.inner.state();
        state.buffered.is_empty() && state.in_flight.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state().paused
    }

    /// Begins shutting the queue down and returns a handle that completes
    /// when the drain for `options.level` is finished.
    ///
    /// Later calls return a handle to the first drain; their options are
    /// ignored.
    pub fn shutdown(&self, options: ShutdownOptions) -> ShutdownHandle {
        let done_tx = {
            let mut state = self.inner.state();
            if let Some(done) = &state.drained {
                debug!(queue = %self.inner.root(), "shutdown already in progress");
                return ShutdownHandle { done: done.clone() };
            }
            let (done_tx, done_rx) = watch::channel(false);
            state.drained = Some(done_rx);
            state.stopping = Some(options.level);
            if options.level == ShutdownLevel::Soft {
                state.paused = false;
            }
            done_tx
        };
        self.inner.stop.send_replace(true);
        self.inner.bump();

        let handle = ShutdownHandle {
            done: done_tx.subscribe(),
        };
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            inner.drain(options).await;
            done_tx.send_replace(true);
        });
        handle
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("JobQueue")
            .field("root", &self.inner.root())
            .field("types", &self.inner.types)
            .field("length", &state.buffered.len())
            .field("running", &state.in_flight.len())
            .field("paused", &state.paused)
            .field("stopping", &state.stopping)
            .finish()
    }
}

/// Completes when a queue shutdown has drained. Await it directly or call
/// [`ShutdownHandle::wait`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    done: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub fn is_complete(&self) -> bool {
        *self.done.borrow()
    }

    pub async fn wait(mut self) {
        let _ = self.done.wait_for(|done| *done).await;
    }
}

impl IntoFuture for ShutdownHandle {
    type Output = ();
    type IntoFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

async fn poll_loop(inner: Arc<Inner>, mut stop: watch::Receiver<bool>) {
    let mut ticker = match inner.options.poll_interval {
        PollInterval::Every(period) => {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        }
        PollInterval::Forever => None,
    };

    loop {
        tokio::select! {
            _ = next_tick(&mut ticker) => {}
            _ = inner.trigger.notified() => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *stop.borrow() {
            break;
        }
        inner.poll();
    }
    debug!(queue = %inner.root(), "poll loop exited");
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
