use cadence_core::{CoreError, FireTime, JobId, JobState};
use thiserror::Error;

/// Errors returned synchronously by the scheduler API.
///
/// Runtime failures of individual fires never show up here; they are routed
/// to observers (see [`crate::observer`]).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The trigger can never fire or is malformed.
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// No job with the given ID exists, or it has been removed.
    #[error("Job not found: {id}")]
    NotFound { id: JobId },

    /// The job exists but the operation does not apply to its state.
    #[error("Job {id} is {state}, cannot {op}")]
    InvalidState {
        id: JobId,
        state: JobState,
        op: &'static str,
    },

    /// A custom policy produced a fire time that does not move forward.
    #[error("Custom policy is not monotonic: {next} does not follow {previous}")]
    MisfirePolicyViolation { previous: FireTime, next: FireTime },

    /// The clock could not be read. Fatal for the dispatcher loop.
    #[error("Clock failure: {0}")]
    ClockFailure(#[from] ClockError),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// In-flight callbacks were still running when the grace period ended.
    #[error("Shutdown grace period of {grace_ms}ms elapsed with {in_flight} callbacks still running")]
    ShutdownTimedOut { grace_ms: u64, in_flight: usize },

    #[error(transparent)]
    Config(#[from] CoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Short error code string for embedders that map errors onto their own wire format.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidTrigger(_) => "INVALID_TRIGGER",
            SchedulerError::NotFound { .. } => "NOT_FOUND",
            SchedulerError::InvalidState { .. } => "INVALID_STATE",
            SchedulerError::MisfirePolicyViolation { .. } => "MISFIRE_POLICY_VIOLATION",
            SchedulerError::ClockFailure(_) => "CLOCK_FAILURE",
            SchedulerError::AlreadyRunning => "ALREADY_RUNNING",
            SchedulerError::ShutdownTimedOut { .. } => "SHUTDOWN_TIMED_OUT",
            SchedulerError::Config(e) => e.code(),
            SchedulerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// The clock could not produce the current time.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ClockError(pub String);

/// Failure of a single callback run. Reported to observers, never returned.
#[derive(Debug, Clone, Error)]
pub enum CallbackError {
    /// The callback returned an error.
    #[error("Callback failed: {0}")]
    Failed(String),

    /// The callback panicked; the payload message is captured when it is a string.
    #[error("Callback panicked: {0}")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
