//! Trigger definitions and the pure policy that turns them into fire times.
//!
//! # Trigger variants
//!
//! | Variant          | Behaviour                                              |
//! |------------------|--------------------------------------------------------|
//! | `SimpleInterval` | First fire at `start`, then every `interval`, `repeat` times |
//! | `OneShot`        | Single fire at an absolute UTC instant                 |
//! | `Custom`         | Caller-supplied function of the previous fire time     |
//!
//! Every function here is side-effect free; all mutable state (the cursor) is
//! owned by the registry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::{FireTime, Repeat};
use chrono::TimeDelta;

use crate::error::{Result, SchedulerError};

/// Number of successive fires a custom policy is dry-run for at registration.
pub const CUSTOM_DRY_RUN_STEPS: usize = 3;

/// Rule determining when a job fires. Immutable once built.
#[derive(Clone)]
pub enum Trigger {
    SimpleInterval {
        start: FireTime,
        interval: TimeDelta,
        repeat: Repeat,
    },
    OneShot {
        at: FireTime,
    },
    Custom(CustomPolicy),
}

/// Caller-supplied fire-time function.
///
/// Receives the previous nominal fire time (`None` on first evaluation) and
/// returns the next one, or `None` once the job is finished. Must be strictly
/// increasing.
#[derive(Clone)]
pub struct CustomPolicy(Arc<dyn Fn(Option<FireTime>) -> Option<FireTime> + Send + Sync>);

impl CustomPolicy {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Option<FireTime>) -> Option<FireTime> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn evaluate(&self, previous: Option<FireTime>) -> Option<FireTime> {
        (self.0)(previous)
    }
}

impl fmt::Debug for CustomPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomPolicy(..)")
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::SimpleInterval {
                start,
                interval,
                repeat,
            } => f
                .debug_struct("SimpleInterval")
                .field("start", start)
                .field("interval", interval)
                .field("repeat", repeat)
                .finish(),
            Trigger::OneShot { at } => f.debug_struct("OneShot").field("at", at).finish(),
            Trigger::Custom(policy) => f.debug_tuple("Custom").field(policy).finish(),
        }
    }
}

impl Trigger {
    /// Interval trigger from std durations, as accepted by the scheduler facade.
    pub fn interval(start: FireTime, interval: Duration, repeat: Repeat) -> Result<Self> {
        Ok(Trigger::SimpleInterval {
            start,
            interval: to_delta(interval)?,
            repeat,
        })
    }

    pub fn once(at: FireTime) -> Self {
        Trigger::OneShot { at }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Option<FireTime>) -> Option<FireTime> + Send + Sync + 'static,
    {
        Trigger::Custom(CustomPolicy::new(f))
    }

    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::SimpleInterval { .. } => "simple_interval",
            Trigger::OneShot { .. } => "one_shot",
            Trigger::Custom(_) => "custom",
        }
    }
}

pub(crate) fn to_delta(d: Duration) -> Result<TimeDelta> {
    TimeDelta::from_std(d)
        .map_err(|_| SchedulerError::InvalidTrigger(format!("duration {d:?} is out of range")))
}

/// Progress of a job through its trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireCursor {
    /// Nominal time of the last consumed fire slot.
    pub previous: Option<FireTime>,
    /// Fire slots consumed so far, whether they ran or were missed.
    pub fired: u64,
}

impl FireCursor {
    /// Cursor after consuming the slot nominally due at `at`.
    pub fn advanced(self, at: FireTime) -> Self {
        Self {
            previous: Some(at),
            fired: self.fired.saturating_add(1),
        }
    }
}

/// Next nominal fire time for `trigger` given how far it has progressed.
///
/// Returns `Ok(None)` when the trigger is exhausted. A custom policy that fails
/// to move forward is a configuration error, not an exhaustion.
pub fn next_fire(trigger: &Trigger, cursor: &FireCursor) -> Result<Option<FireTime>> {
    match trigger {
        Trigger::SimpleInterval {
            start,
            interval,
            repeat,
        } => {
            let Some(previous) = cursor.previous else {
                // Even a start in the past fires once, not once per missed slot.
                return Ok(Some(*start));
            };
            if repeat.total_fires().is_some_and(|total| cursor.fired >= total) {
                return Ok(None);
            }
            Ok(previous.checked_add_signed(*interval))
        }

        Trigger::OneShot { at } => Ok(cursor.previous.is_none().then_some(*at)),

        Trigger::Custom(policy) => {
            let next = policy.evaluate(cursor.previous);
            match (cursor.previous, next) {
                (Some(previous), Some(next)) if next <= previous => {
                    Err(SchedulerError::MisfirePolicyViolation { previous, next })
                }
                _ => Ok(next),
            }
        }
    }
}

/// Check a trigger before it is registered and return its first fire time.
///
/// Rejects triggers that would never fire and dry-runs custom policies for
/// [`CUSTOM_DRY_RUN_STEPS`] fires to catch non-monotonic functions early.
pub fn validate(trigger: &Trigger) -> Result<FireTime> {
    if let Trigger::SimpleInterval {
        interval, repeat, ..
    } = trigger
    {
        if *interval <= TimeDelta::zero() && *repeat != Repeat::Times(0) {
            return Err(SchedulerError::InvalidTrigger(format!(
                "interval must be positive for repeating triggers, got {interval}"
            )));
        }
    }

    let first = next_fire(trigger, &FireCursor::default())?.ok_or_else(|| {
        SchedulerError::InvalidTrigger(format!(
            "{} trigger produces no fire time",
            trigger.kind()
        ))
    })?;

    if matches!(trigger, Trigger::Custom(_)) {
        let mut cursor = FireCursor::default().advanced(first);
        for _ in 1..CUSTOM_DRY_RUN_STEPS {
            match next_fire(trigger, &cursor)? {
                Some(next) => cursor = cursor.advanced(next),
                None => break,
            }
        }
    }

    Ok(first)
}

/// Where a job resumed at `now` fires next, without backfilling the pause.
///
/// A job that never fired keeps its first time (clamped to `now` by the
/// caller). Otherwise the trigger is re-anchored on `now`.
pub fn resume_fire(
    trigger: &Trigger,
    cursor: &FireCursor,
    now: FireTime,
) -> Result<Option<FireTime>> {
    if cursor.previous.is_none() {
        return next_fire(trigger, cursor);
    }
    match trigger {
        Trigger::SimpleInterval { .. } => next_fire(
            trigger,
            &FireCursor {
                previous: Some(now),
                fired: cursor.fired,
            },
        ),
        Trigger::OneShot { .. } => Ok(None),
        Trigger::Custom(policy) => match policy.evaluate(Some(now)) {
            Some(next) if next <= now => Err(SchedulerError::MisfirePolicyViolation {
                previous: now,
                next,
            }),
            next => Ok(next),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t(secs: i64) -> FireTime {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn every_second(repeat: Repeat) -> Trigger {
        Trigger::interval(t(0), Duration::from_secs(1), repeat).unwrap()
    }

    /// Walk a trigger the way the registry does and collect every nominal fire.
    fn fires(trigger: &Trigger, limit: usize) -> Vec<FireTime> {
        let mut cursor = FireCursor::default();
        let mut out = Vec::new();
        while out.len() < limit {
            match next_fire(trigger, &cursor).unwrap() {
                Some(at) => {
                    out.push(at);
                    cursor = cursor.advanced(at);
                }
                None => break,
            }
        }
        out
    }

    #[test]
    fn interval_fires_n_plus_one_times() {
        assert_eq!(fires(&every_second(Repeat::Times(2)), 10), vec![t(0), t(1), t(2)]);
        assert_eq!(fires(&every_second(Repeat::Times(0)), 10), vec![t(0)]);
    }

    #[test]
    fn interval_forever_has_no_drift() {
        let all = fires(&every_second(Repeat::Forever), 1000);
        assert_eq!(all.len(), 1000);
        assert_eq!(all[999], t(999));
    }

    #[test]
    fn interval_start_in_past_fires_once_at_start() {
        let trigger = Trigger::interval(t(-30), Duration::from_secs(10), Repeat::Forever).unwrap();
        assert_eq!(validate(&trigger).unwrap(), t(-30));
    }

    #[test]
    fn zero_interval_rejected_unless_single_fire() {
        let repeating = Trigger::interval(t(0), Duration::ZERO, Repeat::Forever).unwrap();
        assert!(matches!(
            validate(&repeating),
            Err(SchedulerError::InvalidTrigger(_))
        ));

        let single = Trigger::interval(t(0), Duration::ZERO, Repeat::Times(0)).unwrap();
        assert_eq!(validate(&single).unwrap(), t(0));
    }

    #[test]
    fn one_shot_fires_once() {
        assert_eq!(fires(&Trigger::once(t(5)), 10), vec![t(5)]);
    }

    #[test]
    fn custom_policy_delegates() {
        let trigger = Trigger::custom(|prev| match prev {
            None => Some(t(10)),
            Some(p) if p < t(30) => Some(p + TimeDelta::seconds(10)),
            Some(_) => None,
        });
        assert_eq!(fires(&trigger, 10), vec![t(10), t(20), t(30)]);
    }

    #[test]
    fn custom_policy_without_first_fire_is_invalid() {
        let trigger = Trigger::custom(|_| None);
        assert!(matches!(
            validate(&trigger),
            Err(SchedulerError::InvalidTrigger(_))
        ));
    }

    #[test]
    fn non_monotonic_custom_policy_caught_by_dry_run() {
        // Second step moves forward, third goes backwards.
        let trigger = Trigger::custom(|prev| match prev {
            None => Some(t(10)),
            Some(p) if p == t(10) => Some(t(20)),
            Some(_) => Some(t(15)),
        });
        match validate(&trigger) {
            Err(SchedulerError::MisfirePolicyViolation { previous, next }) => {
                assert_eq!(previous, t(20));
                assert_eq!(next, t(15));
            }
            other => panic!("expected policy violation, got {other:?}"),
        }
    }

    #[test]
    fn equal_time_is_a_violation() {
        let trigger = Trigger::custom(|_| Some(t(10)));
        assert!(matches!(
            validate(&trigger),
            Err(SchedulerError::MisfirePolicyViolation { .. })
        ));
    }

    #[test]
    fn resume_reanchors_interval_on_now() {
        let trigger = every_second(Repeat::Forever);
        let cursor = FireCursor::default().advanced(t(0));
        assert_eq!(resume_fire(&trigger, &cursor, t(100)).unwrap(), Some(t(101)));
    }

    #[test]
    fn resume_respects_exhaustion() {
        let trigger = every_second(Repeat::Times(1));
        let cursor = FireCursor::default().advanced(t(0)).advanced(t(1));
        assert_eq!(resume_fire(&trigger, &cursor, t(100)).unwrap(), None);
    }

    #[test]
    fn resume_before_first_fire_keeps_first_time() {
        let trigger = Trigger::once(t(5));
        assert_eq!(
            resume_fire(&trigger, &FireCursor::default(), t(100)).unwrap(),
            Some(t(5))
        );
    }
}
