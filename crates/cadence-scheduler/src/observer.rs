use std::sync::{Arc, RwLock};

use cadence_core::{FireTime, JobId};
use tracing::{error, warn};

use crate::error::{CallbackError, SchedulerError};

/// Runtime events the engine cannot return to a caller.
///
/// Handlers run inline on the dispatcher or a worker, so they must be cheap
/// and non-blocking. All methods default to no-ops.
pub trait SchedulerObserver: Send + Sync {
    /// A due fire was dropped from a full pending queue. The job keeps scheduling.
    fn on_missed_fire(&self, _job_id: JobId, _scheduled_time: FireTime) {}

    /// A callback returned an error or panicked. The job keeps scheduling.
    fn on_callback_error(&self, _job_id: JobId, _error: &CallbackError) {}

    /// A custom policy stopped moving forward at runtime; the job was completed.
    fn on_policy_violation(&self, _job_id: JobId, _error: &SchedulerError) {}
}

/// Fan-out over every subscribed observer, in subscription order.
#[derive(Default)]
pub struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn SchedulerObserver>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn SchedulerObserver>) {
        self.observers
            .write()
            .expect("observer set poisoned")
            .push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().expect("observer set poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn missed_fire(&self, job_id: JobId, scheduled_time: FireTime) {
        for observer in self.observers.read().expect("observer set poisoned").iter() {
            observer.on_missed_fire(job_id, scheduled_time);
        }
    }

    pub fn callback_error(&self, job_id: JobId, error: &CallbackError) {
        for observer in self.observers.read().expect("observer set poisoned").iter() {
            observer.on_callback_error(job_id, error);
        }
    }

    pub fn policy_violation(&self, job_id: JobId, error: &SchedulerError) {
        for observer in self.observers.read().expect("observer set poisoned").iter() {
            observer.on_policy_violation(job_id, error);
        }
    }
}

/// Observer that turns scheduler events into `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SchedulerObserver for TracingObserver {
    fn on_missed_fire(&self, job_id: JobId, scheduled_time: FireTime) {
        warn!(job_id = %job_id, scheduled = %scheduled_time, "missed fire: pending queue full");
    }

    fn on_callback_error(&self, job_id: JobId, error: &CallbackError) {
        error!(job_id = %job_id, %error, "job callback failed");
    }

    fn on_policy_violation(&self, job_id: JobId, error: &SchedulerError) {
        error!(job_id = %job_id, %error, "custom policy violated monotonicity, job completed");
    }
}
