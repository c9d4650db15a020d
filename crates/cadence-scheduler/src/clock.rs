//! Clock abstraction so the dispatcher can run against virtual time.
//!
//! - `SystemClock`: wall-clock UTC, sleeps on the tokio timer
//! - `ManualClock`: time moves only when told to; sleepers wake on `advance`/`set`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::FireTime;
use chrono::{TimeDelta, Utc};
use tokio::sync::watch;

use crate::error::ClockError;

/// Source of "now" and of the dispatcher's only suspension point.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Current time. An error here halts the dispatcher.
    fn now(&self) -> Result<FireTime, ClockError>;

    /// Resolve once the clock reads at least `deadline`.
    ///
    /// Must be cancel-safe: the dispatcher drops this future whenever the
    /// registry changes or shutdown is requested.
    async fn sleep_until(&self, deadline: FireTime);
}

/// Live implementation backed by `chrono::Utc::now` and `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Result<FireTime, ClockError> {
        Ok(Utc::now())
    }

    async fn sleep_until(&self, deadline: FireTime) {
        // Negative remaining time means the deadline already passed.
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(remaining).await;
    }
}

/// Virtual clock for tests and simulations.
///
/// Cloning shares the same timeline. `sleep_until` parks on a watch channel
/// and wakes as soon as `advance`/`set` moves time past the deadline.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<ManualClockInner>,
}

struct ManualClockInner {
    now: watch::Sender<FireTime>,
    failing: AtomicBool,
}

impl ManualClock {
    pub fn starting_at(start: FireTime) -> Self {
        let (now, _) = watch::channel(start);
        Self {
            inner: Arc::new(ManualClockInner {
                now,
                failing: AtomicBool::new(false),
            }),
        }
    }

    /// Move time forward by `by`. Saturates at chrono's representable range.
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        self.inner.now.send_modify(|t| {
            if let Some(next) = t.checked_add_signed(delta) {
                *t = next;
            }
        });
    }

    /// Jump to an absolute time. Moving backwards is allowed.
    pub fn set(&self, to: FireTime) {
        self.inner.now.send_replace(to);
    }

    /// Make subsequent `now()` reads fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Current virtual time, ignoring the failure switch.
    pub fn current(&self) -> FireTime {
        *self.inner.now.borrow()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Result<FireTime, ClockError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(ClockError("manual clock switched to failing".to_string()));
        }
        Ok(self.current())
    }

    async fn sleep_until(&self, deadline: FireTime) {
        let mut rx = self.inner.now.subscribe();
        // The sender lives as long as `self`, so this only returns once time is reached.
        let _ = rx.wait_for(|t| *t >= deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> FireTime {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::starting_at(t0());
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now().unwrap(), t0() + TimeDelta::seconds(5));
    }

    #[test]
    fn manual_clock_failure_switch() {
        let clock = ManualClock::starting_at(t0());
        clock.set_failing(true);
        assert!(clock.now().is_err());
        clock.set_failing(false);
        assert_eq!(clock.now().unwrap(), t0());
    }

    #[tokio::test]
    async fn sleep_until_past_deadline_returns_immediately() {
        let clock = ManualClock::starting_at(t0());
        clock.sleep_until(t0() - TimeDelta::seconds(1)).await;
    }

    #[tokio::test]
    async fn sleep_until_wakes_on_advance() {
        let clock = ManualClock::starting_at(t0());
        let sleeper = clock.clone();
        let handle = tokio::spawn(async move {
            sleeper.sleep_until(t0() + TimeDelta::seconds(10)).await;
        });

        clock.advance(Duration::from_secs(3));
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        clock.advance(Duration::from_secs(7));
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sleeper should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn system_clock_sleeps_past_deadline() {
        let clock = SystemClock;
        let deadline = clock.now().unwrap() + TimeDelta::milliseconds(20);
        clock.sleep_until(deadline).await;
        assert!(clock.now().unwrap() >= deadline);
    }
}
