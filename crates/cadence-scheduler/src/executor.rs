use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_core::{FireTime, JobId};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::{
    clock::Clock,
    error::{CallbackError, Result, SchedulerError},
    observer::ObserverSet,
    registry::{DueFire, FireOutcome, JobRegistry},
};

/// Bounded worker pool that runs job callbacks.
///
/// Fires beyond the pool size wait in a bounded FIFO queue. Cloning is cheap
/// and shares the same pool.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    registry: Arc<JobRegistry>,
    observers: Arc<ObserverSet>,
    clock: Arc<dyn Clock>,
    permits: Arc<Semaphore>,
    pool_size: usize,
    pending: Mutex<VecDeque<DueFire>>,
    pending_capacity: usize,
    tracker: TaskTracker,
}

impl Executor {
    pub fn new(
        pool_size: usize,
        pending_capacity: usize,
        registry: Arc<JobRegistry>,
        observers: Arc<ObserverSet>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                registry,
                observers,
                clock,
                permits: Arc::new(Semaphore::new(pool_size)),
                pool_size,
                pending: Mutex::new(VecDeque::with_capacity(pending_capacity)),
                pending_capacity,
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Hand a due fire to the pool. Never blocks.
    ///
    /// With every worker busy the fire is queued; a full queue drops its
    /// oldest entry (the incoming fire itself when the capacity is zero) and
    /// reports it as missed.
    pub fn submit(&self, fire: DueFire) {
        let mut pending = self.inner.pending.lock().expect("pending queue poisoned");
        // Permit check and enqueue happen under the queue lock; workers release
        // their permit under the same lock, so a queued fire is never stranded.
        match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => {
                drop(pending);
                self.spawn_worker(fire, permit);
            }
            Err(_) => {
                let dropped = if self.inner.pending_capacity == 0 {
                    Some(fire)
                } else {
                    let oldest = if pending.len() >= self.inner.pending_capacity {
                        pending.pop_front()
                    } else {
                        None
                    };
                    pending.push_back(fire);
                    oldest
                };
                drop(pending);
                if let Some(missed) = dropped {
                    self.inner.miss(missed);
                }
            }
        }
    }

    fn spawn_worker(&self, first: DueFire, permit: OwnedSemaphorePermit) {
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            let mut fire = first;
            loop {
                inner.run(fire).await;
                let next = {
                    let mut pending = inner.pending.lock().expect("pending queue poisoned");
                    match pending.pop_front() {
                        Some(next) => next,
                        None => {
                            drop(permit);
                            break;
                        }
                    }
                };
                fire = next;
            }
        });
    }

    /// Put every queued fire back on its job's schedule without running it.
    /// Returns how many were abandoned.
    pub fn abandon_pending(&self) -> usize {
        let abandoned: Vec<DueFire> = self
            .inner
            .pending
            .lock()
            .expect("pending queue poisoned")
            .drain(..)
            .collect();
        for fire in &abandoned {
            self.inner.registry.requeue(fire.job_id, fire.scheduled_time);
        }
        abandoned.len()
    }

    /// Wait up to `grace` for running callbacks to finish.
    pub async fn drain(&self, grace: Duration) -> Result<()> {
        self.inner.tracker.close();
        match tokio::time::timeout(grace, self.inner.tracker.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(SchedulerError::ShutdownTimedOut {
                grace_ms: u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                in_flight: self.in_flight(),
            }),
        }
    }

    /// Callbacks currently holding a worker slot.
    pub fn in_flight(&self) -> usize {
        self.inner.pool_size - self.inner.permits.available_permits()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().expect("pending queue poisoned").len()
    }
}

impl ExecutorInner {
    /// Run one fire to completion and record it. Failures go to observers only.
    async fn run(&self, fire: DueFire) {
        let DueFire {
            job_id,
            scheduled_time,
            callback,
        } = fire;

        if !self.registry.begin(job_id) {
            debug!(job_id = %job_id, scheduled = %scheduled_time, "job cancelled while queued");
            self.record(job_id, scheduled_time, FireOutcome::Skipped);
            return;
        }

        debug!(job_id = %job_id, scheduled = %scheduled_time, "running callback");
        let outcome = tokio::task::spawn_blocking(move || callback.invoke()).await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(CallbackError::Failed(format!("{e:#}"))),
            Err(join) if join.is_panic() => {
                Some(CallbackError::Panicked(panic_message(join.into_panic())))
            }
            Err(join) => Some(CallbackError::Failed(join.to_string())),
        };
        if let Some(error) = &failure {
            self.observers.callback_error(job_id, error);
        }

        self.record(job_id, scheduled_time, FireOutcome::Ran);
    }

    fn miss(&self, fire: DueFire) {
        if !self.registry.begin(fire.job_id) {
            self.record(fire.job_id, fire.scheduled_time, FireOutcome::Skipped);
            return;
        }
        self.observers.missed_fire(fire.job_id, fire.scheduled_time);
        self.record(fire.job_id, fire.scheduled_time, FireOutcome::Missed);
    }

    fn record(&self, job_id: JobId, scheduled_time: FireTime, outcome: FireOutcome) {
        // A broken clock is the dispatcher's to report; the scheduled time is a
        // safe lower bound for clamping the next fire.
        let now = self.clock.now().unwrap_or(scheduled_time);
        if let Err(e) = self.registry.complete(job_id, scheduled_time, outcome, now) {
            self.observers.policy_violation(job_id, &e);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
