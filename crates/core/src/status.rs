//! Job status enumeration and its legal transitions.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle status of a job document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Saved, waiting on `after` and/or dependencies
    Waiting,
    /// Eligible to be claimed by a worker
    Ready,
    /// Claimed by a worker and executing
    Running,
    /// Last attempt failed and no retries remain
    Failed,
    /// Cancelled by a user or by a failed antecedent
    Cancelled,
    /// Finished successfully
    Completed,
    /// Held back until resumed
    Paused,
}

impl JobStatus {
    /// All statuses in canonical order.
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Waiting,
        JobStatus::Ready,
        JobStatus::Running,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Completed,
        JobStatus::Paused,
    ];

    pub const CANCELLABLE: [JobStatus; 4] = [
        JobStatus::Running,
        JobStatus::Ready,
        JobStatus::Waiting,
        JobStatus::Paused,
    ];

    pub const PAUSABLE: [JobStatus; 2] = [JobStatus::Ready, JobStatus::Waiting];

    pub const REMOVABLE: [JobStatus; 3] = [
        JobStatus::Cancelled,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub const RESTARTABLE: [JobStatus; 2] = [JobStatus::Cancelled, JobStatus::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Completed => "completed",
            JobStatus::Paused => "paused",
        }
    }

    pub fn is_cancellable(&self) -> bool {
        Self::CANCELLABLE.contains(self)
    }

    pub fn is_pausable(&self) -> bool {
        Self::PAUSABLE.contains(self)
    }

    pub fn is_removable(&self) -> bool {
        Self::REMOVABLE.contains(self)
    }

    pub fn is_restartable(&self) -> bool {
        Self::RESTARTABLE.contains(self)
    }

    /// Terminal statuses are the ones a job may be removed from.
    pub fn is_terminal(&self) -> bool {
        self.is_removable()
    }

    /// Whether `self -> next` is a legal status change.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        if next == Cancelled {
            return self.is_cancellable();
        }

        match (self, next) {
            (Waiting, Ready) => true,
            (Ready, Running) => true,
            (Running, Completed | Failed) => true,
            // automatic retry and explicit restart
            (Failed, Waiting) => true,
            (Cancelled, Waiting) => true,
            (Waiting | Ready, Paused) => true,
            (Paused, Waiting | Ready) => true,
            _ => false,
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::unknown("job status", s))
    }
}
