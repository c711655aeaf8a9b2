//! Retry and repeat policy value types.

use chrono::{DateTime, SubsecRound, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Sentinel meaning "unbounded" for counts and poll intervals (2^53).
pub const FOREVER: u64 = 9_007_199_254_740_992;

/// Current time at the millisecond precision documents travel with.
pub fn now_millis() -> DateTime<Utc> {
    to_millis(Utc::now())
}

/// Drops sub-millisecond precision so the value survives the wire unchanged.
pub fn to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    time.trunc_subsecs(3)
}

/// Default wait between retries and between repeats.
pub const DEFAULT_WAIT_MS: u64 = 5 * 60 * 1000;

const FOREVER_DATE_MS: i64 = 253_402_300_799_999;

/// Far-future date used for unbounded `retryUntil` / `repeatUntil`.
pub fn forever_date() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(FOREVER_DATE_MS).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// How the wait between retries grows.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    /// Same wait before every retry
    #[default]
    Constant,
    /// wait * 2^(retried - 1)
    Exponential,
}

impl RetryBackoff {
    pub const ALL: [RetryBackoff; 2] = [RetryBackoff::Constant, RetryBackoff::Exponential];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetryBackoff::Constant => "constant",
            RetryBackoff::Exponential => "exponential",
        }
    }

    /// Wait before the next attempt after `retried` attempts were consumed.
    pub fn wait_for(&self, base_ms: u64, retried: u32) -> u64 {
        match self {
            RetryBackoff::Constant => base_ms,
            RetryBackoff::Exponential => {
                let exp = retried.saturating_sub(1).min(62);
                base_ms.saturating_mul(1u64 << exp)
            }
        }
    }
}

impl FromStr for RetryBackoff {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RetryBackoff::ALL
            .iter()
            .copied()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| CoreError::unknown("retry backoff method", s))
    }
}

/// Recurrence schedule descriptor. Evaluated by the server; the client only
/// carries the rule arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub schedules: Vec<serde_json::Value>,
    #[serde(default)]
    pub exceptions: Vec<serde_json::Value>,
}

/// Wait between repeats: a fixed number of milliseconds or a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepeatWait {
    Millis(u64),
    Schedule(Schedule),
}

impl RepeatWait {
    pub fn as_millis(&self) -> Option<u64> {
        match self {
            RepeatWait::Millis(ms) => Some(*ms),
            RepeatWait::Schedule(_) => None,
        }
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        match self {
            RepeatWait::Millis(_) => None,
            RepeatWait::Schedule(s) => Some(s),
        }
    }
}

impl Default for RepeatWait {
    fn default() -> Self {
        Self::Millis(DEFAULT_WAIT_MS)
    }
}
