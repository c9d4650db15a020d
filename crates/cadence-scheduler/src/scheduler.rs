use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use cadence_core::{FireTime, JobId, Repeat, SchedulerConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    callback::Callback,
    clock::{Clock, SystemClock},
    dispatcher::Dispatcher,
    error::{Result, SchedulerError},
    executor::Executor,
    observer::{ObserverSet, SchedulerObserver},
    registry::{JobRecord, JobRegistry},
    trigger::{to_delta, Trigger},
};

/// Caller-owned scheduler with an explicit start/stop lifecycle.
///
/// Jobs can be registered before `start`; they fire once the dispatcher runs.
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    observers: Arc<ObserverSet>,
    /// Time source for registration-relative triggers. Replaced by `start`.
    clock: RwLock<Arc<dyn Clock>>,
    running: Mutex<Option<Running>>,
}

struct Running {
    shutdown: CancellationToken,
    dispatcher: JoinHandle<Result<()>>,
    executor: Executor,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: Arc::new(JobRegistry::new()),
            observers: Arc::new(ObserverSet::new()),
            clock: RwLock::new(Arc::new(SystemClock)),
            running: Mutex::new(None),
        })
    }

    /// Builder form of [`subscribe`](Self::subscribe).
    pub fn with_observer(self, observer: Arc<dyn SchedulerObserver>) -> Self {
        self.subscribe(observer);
        self
    }

    /// Receive missed-fire, callback-error and policy-violation events.
    pub fn subscribe(&self, observer: Arc<dyn SchedulerObserver>) {
        self.observers.subscribe(observer);
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Spawn the dispatcher on the current Tokio runtime, driven by `clock`.
    ///
    /// A dispatcher that already halted on a clock failure is reaped first:
    /// its queued fires go back on schedule and its running callbacks finish
    /// in the background. Call [`stop`](Self::stop) instead to observe the
    /// failure. Must be called from within a Tokio runtime.
    pub fn start(&self, clock: Arc<dyn Clock>) -> Result<()> {
        let mut running = self.running.lock().expect("scheduler state poisoned");
        match running.take() {
            Some(live) if !live.dispatcher.is_finished() => {
                *running = Some(live);
                return Err(SchedulerError::AlreadyRunning);
            }
            Some(halted) => {
                halted.shutdown.cancel();
                let abandoned = halted.executor.abandon_pending();
                warn!(abandoned, "restarting after dispatcher halted");
            }
            None => {}
        }

        *self.clock.write().expect("scheduler clock poisoned") = Arc::clone(&clock);

        let executor = Executor::new(
            self.config.worker_pool_size,
            self.config.pending_queue_capacity,
            Arc::clone(&self.registry),
            Arc::clone(&self.observers),
            Arc::clone(&clock),
        );
        let shutdown = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.registry),
            executor.clone(),
            clock,
            shutdown.clone(),
        );

        *running = Some(Running {
            shutdown,
            dispatcher: tokio::spawn(dispatcher.run()),
            executor,
        });

        info!(
            workers = self.config.worker_pool_size,
            pending_capacity = self.config.pending_queue_capacity,
            "scheduler started"
        );
        Ok(())
    }

    /// Whether the dispatcher loop is alive. False after `stop` or a fatal clock failure.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .expect("scheduler state poisoned")
            .as_ref()
            .is_some_and(|r| !r.dispatcher.is_finished())
    }

    /// Halt the dispatcher, abandon queued fires, and give running callbacks
    /// up to `grace` to finish.
    ///
    /// Reports a fatal dispatcher error first, then a drain timeout. Stopping
    /// a scheduler that is not running is a no-op.
    pub async fn stop(&self, grace: Duration) -> Result<()> {
        let Some(running) = self
            .running
            .lock()
            .expect("scheduler state poisoned")
            .take()
        else {
            return Ok(());
        };

        running.shutdown.cancel();
        let dispatched = match running.dispatcher.await {
            Ok(result) => result,
            Err(e) => Err(SchedulerError::Internal(format!("dispatcher task failed: {e}"))),
        };

        let abandoned = running.executor.abandon_pending();
        if abandoned > 0 {
            warn!(abandoned, "queued fires abandoned at shutdown");
        }
        let drained = running.executor.drain(grace).await;

        match (&dispatched, &drained) {
            (Err(e), _) | (Ok(()), Err(e)) => error!(error = %e, "scheduler stopped with error"),
            (Ok(()), Ok(())) => info!("scheduler stopped"),
        }
        dispatched?;
        drained
    }

    /// [`stop`](Self::stop) with the configured grace period.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop(self.config.shutdown_grace()).await
    }

    fn now(&self) -> Result<FireTime> {
        let clock = Arc::clone(&*self.clock.read().expect("scheduler clock poisoned"));
        Ok(clock.now()?)
    }

    /// Fire after `delay`, then every `interval`.
    pub fn schedule_interval<C: Callback>(
        &self,
        callback: C,
        delay: Duration,
        interval: Duration,
        repeat: Repeat,
    ) -> Result<JobId> {
        let start = self
            .now()?
            .checked_add_signed(to_delta(delay)?)
            .ok_or_else(|| SchedulerError::InvalidTrigger(format!("delay {delay:?} is out of range")))?;
        self.schedule(callback, Trigger::interval(start, interval, repeat)?)
    }

    /// Whole-second form of [`schedule_interval`](Self::schedule_interval) that repeats forever.
    pub fn schedule_interval_secs<C: Callback>(
        &self,
        callback: C,
        delay_secs: u64,
        interval_secs: u64,
    ) -> Result<JobId> {
        self.schedule_interval(
            callback,
            Duration::from_secs(delay_secs),
            Duration::from_secs(interval_secs),
            Repeat::Forever,
        )
    }

    /// Fire once at `at`. A time already in the past fires immediately.
    pub fn schedule_at<C: Callback>(&self, callback: C, at: FireTime) -> Result<JobId> {
        self.schedule(callback, Trigger::once(at))
    }

    /// Fire on a caller-supplied policy of the previous fire time.
    pub fn schedule_custom<C, F>(&self, callback: C, next_fire_time: F) -> Result<JobId>
    where
        C: Callback,
        F: Fn(Option<FireTime>) -> Option<FireTime> + Send + Sync + 'static,
    {
        self.schedule(callback, Trigger::custom(next_fire_time))
    }

    /// Register `callback` under an arbitrary trigger.
    pub fn schedule<C: Callback>(&self, callback: C, trigger: Trigger) -> Result<JobId> {
        let now = self.now()?;
        self.registry.register(trigger, Arc::new(callback), now)
    }

    pub fn cancel(&self, id: JobId) -> Result<()> {
        self.registry.cancel(id)
    }

    pub fn pause(&self, id: JobId) -> Result<()> {
        self.registry.pause(id)
    }

    pub fn resume(&self, id: JobId) -> Result<()> {
        let now = self.now()?;
        self.registry.resume(id, now)
    }

    pub fn job(&self, id: JobId) -> Option<JobRecord> {
        self.registry.get(id)
    }

    /// Next planned fire of `id`, `None` when paused, running, or finished.
    pub fn next_fire_time(&self, id: JobId) -> Result<Option<FireTime>> {
        self.registry
            .get(id)
            .map(|r| r.next_fire_time)
            .ok_or(SchedulerError::NotFound { id })
    }

    /// Every job ordered by next fire time.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.registry.snapshot()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Without this the detached dispatcher would outlive its owner.
        if let Ok(mut running) = self.running.lock() {
            if let Some(running) = running.take() {
                running.shutdown.cancel();
            }
        }
    }
}
