use std::collections::BTreeMap;
use std::sync::Mutex;

use cadence_core::{FireTime, JobId, JobState};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::{
    callback::SharedCallback,
    error::{Result, SchedulerError},
    trigger::{next_fire, resume_fire, validate, FireCursor, Trigger},
};

/// Point-in-time view of a job, as returned by [`JobRegistry::snapshot`].
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub trigger: Trigger,
    pub state: JobState,
    /// Next time the dispatcher will fire this job. `None` while paused,
    /// running, or once the trigger is exhausted.
    pub next_fire_time: Option<FireTime>,
    /// Scheduled time of the most recent fire whose callback actually ran.
    pub last_fire_time: Option<FireTime>,
    /// Number of completed runs, failed ones included.
    pub fire_count: u64,
    pub in_flight: bool,
}

/// A fire handed from the dispatcher to the executor.
#[derive(Clone)]
pub struct DueFire {
    pub job_id: JobId,
    pub scheduled_time: FireTime,
    pub callback: SharedCallback,
}

/// How a taken fire ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// The callback ran, whether it succeeded or not.
    Ran,
    /// The fire was dropped before it could run.
    Missed,
    /// The job was cancelled while the fire waited for a worker.
    Skipped,
}

struct JobEntry {
    trigger: Trigger,
    /// Dropped once the job can never fire again.
    callback: Option<SharedCallback>,
    state: JobState,
    cursor: FireCursor,
    next_fire_time: Option<FireTime>,
    last_fire_time: Option<FireTime>,
    fire_count: u64,
    in_flight: bool,
    /// Set when a paused job is resumed while its fire is still in flight;
    /// completion then re-anchors on this instant instead of the cursor.
    resumed_at: Option<FireTime>,
}

impl JobEntry {
    fn record(&self, id: JobId) -> JobRecord {
        JobRecord {
            id,
            trigger: self.trigger.clone(),
            state: self.state,
            next_fire_time: self.next_fire_time,
            last_fire_time: self.last_fire_time,
            fire_count: self.fire_count,
            in_flight: self.in_flight,
        }
    }

    fn is_dispatchable(&self) -> bool {
        self.state == JobState::Scheduled && !self.in_flight
    }

    fn finish(&mut self) {
        self.state = JobState::Completed;
        self.next_fire_time = None;
        self.callback = None;
    }
}

#[derive(Default)]
struct RegistryInner {
    jobs: BTreeMap<JobId, JobEntry>,
    next_id: u64,
}

/// Owner of every job record. All reads and writes are serialized behind one
/// mutex; every mutation bumps a version published on a watch channel so the
/// dispatcher can tell its wait target has gone stale.
pub struct JobRegistry {
    inner: Mutex<RegistryInner>,
    version: watch::Sender<u64>,
}

impl JobRegistry {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Mutex::new(RegistryInner::default()),
            version,
        }
    }

    /// Current version. Increases on every mutation.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Receiver that is notified on every version bump.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    /// Validate `trigger`, compute its first fire time and store the job.
    ///
    /// A first fire time already in the past is clamped to `now`, so the job
    /// fires once immediately.
    #[instrument(skip(self, callback))]
    pub fn register(
        &self,
        trigger: Trigger,
        callback: SharedCallback,
        now: FireTime,
    ) -> Result<JobId> {
        let first = validate(&trigger)?;
        let next = first.max(now);

        let id = {
            let mut inner = self.inner.lock().expect("job registry poisoned");
            inner.next_id += 1;
            let id = JobId(inner.next_id);
            inner.jobs.insert(
                id,
                JobEntry {
                    trigger: trigger.clone(),
                    callback: Some(callback),
                    state: JobState::Scheduled,
                    cursor: FireCursor::default(),
                    next_fire_time: Some(next),
                    last_fire_time: None,
                    fire_count: 0,
                    in_flight: false,
                    resumed_at: None,
                },
            );
            id
        };
        self.bump();

        info!(job_id = %id, kind = trigger.kind(), next_fire = %next, "job registered");
        Ok(id)
    }

    /// Remove a job. Cancelling a removed job is a no-op; an in-flight run is
    /// allowed to finish but the job is never re-inserted.
    #[instrument(skip(self))]
    pub fn cancel(&self, id: JobId) -> Result<()> {
        {
            let mut inner = self.inner.lock().expect("job registry poisoned");
            let entry = inner
                .jobs
                .get_mut(&id)
                .ok_or(SchedulerError::NotFound { id })?;
            if entry.state == JobState::Removed {
                return Ok(());
            }
            entry.state = JobState::Removed;
            entry.next_fire_time = None;
            entry.callback = None;
        }
        self.bump();

        info!(job_id = %id, "job cancelled");
        Ok(())
    }

    /// Exclude a job from dispatch until [`resume`](Self::resume).
    #[instrument(skip(self))]
    pub fn pause(&self, id: JobId) -> Result<()> {
        {
            let mut inner = self.inner.lock().expect("job registry poisoned");
            let entry = inner
                .jobs
                .get_mut(&id)
                .ok_or(SchedulerError::NotFound { id })?;
            match entry.state {
                JobState::Paused => return Ok(()),
                JobState::Removed => return Err(SchedulerError::NotFound { id }),
                JobState::Completed => {
                    return Err(SchedulerError::InvalidState {
                        id,
                        state: entry.state,
                        op: "pause",
                    })
                }
                JobState::Scheduled => {
                    entry.state = JobState::Paused;
                    entry.next_fire_time = None;
                    entry.resumed_at = None;
                }
            }
        }
        self.bump();

        debug!(job_id = %id, "job paused");
        Ok(())
    }

    /// Put a paused job back on the schedule, re-anchored on `now`.
    ///
    /// Fire slots that elapsed during the pause are not replayed. If the
    /// trigger turns out to be exhausted the job completes instead.
    #[instrument(skip(self))]
    pub fn resume(&self, id: JobId, now: FireTime) -> Result<()> {
        let result = {
            let mut inner = self.inner.lock().expect("job registry poisoned");
            let entry = inner
                .jobs
                .get_mut(&id)
                .ok_or(SchedulerError::NotFound { id })?;
            match entry.state {
                JobState::Scheduled => return Ok(()),
                JobState::Removed => return Err(SchedulerError::NotFound { id }),
                JobState::Completed => {
                    return Err(SchedulerError::InvalidState {
                        id,
                        state: entry.state,
                        op: "resume",
                    })
                }
                JobState::Paused => {}
            }

            entry.state = JobState::Scheduled;
            if entry.in_flight {
                // Completion of the running fire computes the next time.
                entry.resumed_at = Some(now);
                Ok(())
            } else {
                match resume_fire(&entry.trigger, &entry.cursor, now) {
                    Ok(Some(next)) => {
                        entry.next_fire_time = Some(next.max(now));
                        Ok(())
                    }
                    Ok(None) => {
                        entry.finish();
                        Ok(())
                    }
                    Err(e) => {
                        entry.finish();
                        Err(e)
                    }
                }
            }
        };
        self.bump();

        debug!(job_id = %id, "job resumed");
        result
    }

    /// Claim every dispatchable job due at or before `now`, ordered by fire
    /// time then registration order. Claimed jobs stay in flight until
    /// [`complete`](Self::complete) is called for them.
    pub fn take_due(&self, now: FireTime) -> Vec<DueFire> {
        let due = {
            let mut inner = self.inner.lock().expect("job registry poisoned");
            let mut due: Vec<DueFire> = inner
                .jobs
                .iter_mut()
                .filter(|(_, e)| e.is_dispatchable())
                .filter_map(|(id, e)| {
                    let at = e.next_fire_time.filter(|at| *at <= now)?;
                    let callback = e.callback.clone()?;
                    e.in_flight = true;
                    e.next_fire_time = None;
                    Some(DueFire {
                        job_id: *id,
                        scheduled_time: at,
                        callback,
                    })
                })
                .collect();
            // BTreeMap iteration already yields ascending ids; a stable sort keeps that for ties.
            due.sort_by_key(|f| f.scheduled_time);
            due
        };
        if !due.is_empty() {
            self.bump();
        }
        due
    }

    /// Whether a claimed fire may still start. False once the job has been
    /// cancelled or has finished; the caller then completes the fire as
    /// [`FireOutcome::Skipped`] without invoking the callback.
    pub fn begin(&self, id: JobId) -> bool {
        let inner = self.inner.lock().expect("job registry poisoned");
        inner.jobs.get(&id).is_some_and(|e| e.state.is_live())
    }

    /// Record the end of a fire claimed by [`take_due`](Self::take_due) and
    /// compute the job's next fire time.
    ///
    /// Called exactly once per claimed fire. A custom policy that stops moving
    /// forward completes the job and the violation is returned for reporting.
    pub fn complete(
        &self,
        id: JobId,
        scheduled_time: FireTime,
        outcome: FireOutcome,
        now: FireTime,
    ) -> Result<()> {
        let result = {
            let mut inner = self.inner.lock().expect("job registry poisoned");
            let entry = inner
                .jobs
                .get_mut(&id)
                .ok_or(SchedulerError::NotFound { id })?;

            entry.in_flight = false;
            entry.cursor = entry.cursor.advanced(scheduled_time);
            if outcome == FireOutcome::Ran {
                entry.last_fire_time = Some(scheduled_time);
                entry.fire_count += 1;
            }

            let resumed_at = entry.resumed_at.take();
            match entry.state {
                JobState::Scheduled => {
                    let next = match resumed_at {
                        Some(at) => resume_fire(&entry.trigger, &entry.cursor, at.max(now)),
                        None => next_fire(&entry.trigger, &entry.cursor),
                    };
                    match next {
                        Ok(Some(next)) => {
                            entry.next_fire_time = Some(next.max(now));
                            Ok(())
                        }
                        Ok(None) => {
                            entry.finish();
                            info!(job_id = %id, fires = entry.fire_count, "job completed");
                            Ok(())
                        }
                        Err(e) => {
                            entry.finish();
                            Err(e)
                        }
                    }
                }
                // Paused jobs get their next time on resume; removed ones never again.
                JobState::Paused | JobState::Removed | JobState::Completed => Ok(()),
            }
        };
        self.bump();
        result
    }

    /// Release a claimed fire that will not run, leaving its slot unconsumed.
    /// Used when shutdown abandons queued fires.
    pub fn requeue(&self, id: JobId, scheduled_time: FireTime) {
        {
            let mut inner = self.inner.lock().expect("job registry poisoned");
            let Some(entry) = inner.jobs.get_mut(&id) else {
                return;
            };
            if !entry.in_flight {
                return;
            }
            entry.in_flight = false;
            entry.resumed_at = None;
            if entry.state == JobState::Scheduled {
                entry.next_fire_time = Some(scheduled_time);
            }
        }
        self.bump();
    }

    /// Earliest fire time over jobs the dispatcher may fire next.
    pub fn next_wakeup(&self) -> Option<FireTime> {
        let inner = self.inner.lock().expect("job registry poisoned");
        inner
            .jobs
            .values()
            .filter(|e| e.is_dispatchable())
            .filter_map(|e| e.next_fire_time)
            .min()
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        let inner = self.inner.lock().expect("job registry poisoned");
        inner.jobs.get(&id).map(|e| e.record(id))
    }

    /// All jobs ordered by next fire time ascending, ties by id, unscheduled last.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = {
            let inner = self.inner.lock().expect("job registry poisoned");
            inner.jobs.iter().map(|(id, e)| e.record(*id)).collect()
        };
        records.sort_by_key(|r| (r.next_fire_time.is_none(), r.next_fire_time, r.id));
        records
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("job registry poisoned").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
