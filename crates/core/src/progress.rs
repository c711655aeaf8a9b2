//! Progress snapshot of a running job.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: f64,
    pub total: f64,
    pub percent: f64,
}

impl Progress {
    /// Build a snapshot, or `None` unless `0 <= completed <= total` and `total > 0`.
    pub fn checked(completed: f64, total: f64) -> Option<Self> {
        if !completed.is_finite() || !total.is_finite() {
            return None;
        }
        if completed < 0.0 || completed > total || total <= 0.0 {
            return None;
        }
        Some(Self {
            completed,
            total,
            percent: 100.0 * completed / total,
        })
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            completed: 0.0,
            total: 1.0,
            percent: 0.0,
        }
    }
}
