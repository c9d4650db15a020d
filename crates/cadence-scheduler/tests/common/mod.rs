// Shared helpers for scheduler integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use cadence_core::{FireTime, JobId, SchedulerConfig};
use cadence_scheduler::{
    CallbackError, ManualClock, Scheduler, SchedulerError, SchedulerObserver,
};
use chrono::{TimeDelta, TimeZone, Utc};

pub fn t(secs: i64) -> FireTime {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(secs)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scheduler started on a manual clock at `t(0)`, with a recording observer.
pub struct Fixture {
    pub scheduler: Scheduler,
    pub clock: ManualClock,
    pub events: Arc<RecordingObserver>,
}

pub fn start(workers: usize, pending_capacity: usize) -> Fixture {
    init_tracing();
    let config = SchedulerConfig {
        worker_pool_size: workers,
        pending_queue_capacity: pending_capacity,
        ..SchedulerConfig::default()
    };
    let events = Arc::new(RecordingObserver::default());
    let scheduler = Scheduler::new(config).unwrap().with_observer(events.clone());
    let clock = ManualClock::starting_at(t(0));
    scheduler.start(Arc::new(clock.clone())).unwrap();
    Fixture {
        scheduler,
        clock,
        events,
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub missed: Mutex<Vec<(JobId, FireTime)>>,
    pub errors: Mutex<Vec<(JobId, CallbackError)>>,
    pub violations: Mutex<Vec<JobId>>,
}

impl SchedulerObserver for RecordingObserver {
    fn on_missed_fire(&self, job_id: JobId, scheduled_time: FireTime) {
        self.missed.lock().unwrap().push((job_id, scheduled_time));
    }

    fn on_callback_error(&self, job_id: JobId, error: &CallbackError) {
        self.errors.lock().unwrap().push((job_id, error.clone()));
    }

    fn on_policy_violation(&self, job_id: JobId, _error: &SchedulerError) {
        self.violations.lock().unwrap().push(job_id);
    }
}

/// Poll `cond` until it holds, panicking after two seconds of real time.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give the dispatcher a moment to (wrongly) fire something.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Counts invocations and records the virtual time each one saw.
#[derive(Clone)]
pub struct Probe {
    clock: ManualClock,
    seen: Arc<Mutex<Vec<FireTime>>>,
}

impl Probe {
    pub fn new(clock: &ManualClock) -> Self {
        Self {
            clock: clock.clone(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn callback(&self) -> impl Fn() -> anyhow::Result<()> + Send + Sync + 'static {
        let probe = self.clone();
        move || {
            probe.seen.lock().unwrap().push(probe.clock.current());
            Ok(())
        }
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn times(&self) -> Vec<FireTime> {
        self.seen.lock().unwrap().clone()
    }
}

/// A callback that blocks until released, for holding a worker busy.
pub struct Gate {
    release: mpsc::Sender<()>,
    receiver: Arc<Mutex<mpsc::Receiver<()>>>,
    entered: Arc<AtomicUsize>,
}

impl Gate {
    pub fn new() -> Self {
        let (release, receiver) = mpsc::channel();
        Self {
            release,
            receiver: Arc::new(Mutex::new(receiver)),
            entered: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn callback(&self) -> impl Fn() -> anyhow::Result<()> + Send + Sync + 'static {
        let receiver = Arc::clone(&self.receiver);
        let entered = Arc::clone(&self.entered);
        move || {
            entered.fetch_add(1, Ordering::SeqCst);
            let _ = receiver
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5));
            Ok(())
        }
    }

    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        let _ = self.release.send(());
    }
}
