//! Work units handed to the user handler.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jobq_jobs::Job;
use tracing::warn;

use crate::error::{QueueError, QueueResult};
use crate::queue::Inner;

/// The jobs given to one handler invocation: a single job when the queue's
/// payload is 1, otherwise a batch of up to `payload` jobs.
#[derive(Debug, Clone)]
pub enum WorkUnit {
    Single(Job),
    Batch(Vec<Job>),
}

impl WorkUnit {
    pub(crate) fn from_jobs(mut jobs: Vec<Job>, payload: usize) -> Self {
        if payload == 1 && jobs.len() == 1 {
            WorkUnit::Single(jobs.remove(0))
        } else {
            WorkUnit::Batch(jobs)
        }
    }

    pub fn jobs(&self) -> &[Job] {
        match self {
            WorkUnit::Single(job) => std::slice::from_ref(job),
            WorkUnit::Batch(jobs) => jobs,
        }
    }

    pub fn into_jobs(self) -> Vec<Job> {
        match self {
            WorkUnit::Single(job) => vec![job],
            WorkUnit::Batch(jobs) => jobs,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }
}

/// Signals the queue that a work unit is finished.
///
/// Call it once, after every job in the unit has been settled with
/// `done`/`fail`. Clones share the same "already called" state.
#[derive(Clone)]
pub struct UnitCallback {
    queue: Arc<Inner>,
    unit: u64,
    called: Arc<AtomicBool>,
}

impl UnitCallback {
    pub(crate) fn new(queue: Arc<Inner>, unit: u64) -> Self {
        Self {
            queue,
            unit,
            called: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn unit(&self) -> u64 {
        self.unit
    }

    /// Marks the unit finished. A repeated call is reported to the error
    /// callback and, in strict mode, returned as
    /// [`QueueError::CallbackOveruse`].
    pub fn call(&self) -> QueueResult<()> {
        if self.called.swap(true, Ordering::AcqRel) {
            let err = QueueError::CallbackOveruse { unit: self.unit };
            warn!(queue = %self.queue.root(), unit = self.unit, "unit callback invoked again");
            self.queue.report(&err);
            return if self.queue.callback_strict() {
                Err(err)
            } else {
                Ok(())
            };
        }
        self.queue.complete_unit(self.unit);
        Ok(())
    }
}

impl fmt::Debug for UnitCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitCallback")
            .field("unit", &self.unit)
            .field("called", &self.called.load(Ordering::Acquire))
            .finish()
    }
}
