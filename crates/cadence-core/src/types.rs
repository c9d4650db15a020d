use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Instant at which a job becomes due. All scheduling math is done in UTC.
pub type FireTime = DateTime<Utc>;

/// Identifier of a registered job.
///
/// Handed out from a per-registry sequence, so ordering two ids is the same as
/// ordering their registration. Round tie-breaks rely on that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// Lifecycle state of a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its next fire time.
    Scheduled,
    /// Excluded from dispatch until resumed.
    Paused,
    /// Trigger exhausted; kept until acknowledged with a cancel.
    Completed,
    /// Cancelled. Never fires again.
    Removed,
}

impl JobState {
    /// Whether the job can still produce fires (now or after a resume).
    pub fn is_live(&self) -> bool {
        matches!(self, JobState::Scheduled | JobState::Paused)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Scheduled => "scheduled",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Removed => "removed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobState::Scheduled),
            "paused" => Ok(JobState::Paused),
            "completed" => Ok(JobState::Completed),
            "removed" => Ok(JobState::Removed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// How many times an interval trigger repeats after its first fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    /// `n` repeats, so `n + 1` fires in total.
    Times(u64),
    Forever,
}

impl Repeat {
    /// Total number of fire slots, `None` when unbounded.
    pub fn total_fires(&self) -> Option<u64> {
        match self {
            Repeat::Times(n) => Some(n.saturating_add(1)),
            Repeat::Forever => None,
        }
    }
}
