//! `cadence-scheduler` — in-process recurring-job scheduler on Tokio.
//!
//! # Overview
//!
//! Callers hand a [`Scheduler`] a plain closure plus either a delay/interval
//! pair or a [`Trigger`]. A single dispatcher task sleeps until the earliest
//! fire time (or until the job set changes), then hands every due job to a
//! bounded worker pool. Each job has at most one run in flight; its next fire
//! time is computed when that run completes.
//!
//! Failures that happen while firing (callback errors, panics, fires dropped
//! because the pool and its queue were full) never reach the caller of a
//! scheduling method. They are delivered to [`SchedulerObserver`]s;
//! [`TracingObserver`] forwards them to `tracing`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use cadence_core::{Repeat, SchedulerConfig};
//! use cadence_scheduler::{action, Scheduler, SystemClock, TracingObserver};
//!
//! # async fn demo() -> cadence_scheduler::Result<()> {
//! let scheduler = Scheduler::new(SchedulerConfig::default())?
//!     .with_observer(Arc::new(TracingObserver));
//! scheduler.start(Arc::new(SystemClock))?;
//!
//! let id = scheduler.schedule_interval(
//!     action(|| println!("tick")),
//!     Duration::from_secs(5),
//!     Duration::from_secs(60),
//!     Repeat::Forever,
//! )?;
//!
//! scheduler.cancel(id)?;
//! scheduler.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod observer;
pub mod registry;
pub mod scheduler;
pub mod trigger;

pub use callback::{action, Callback};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CallbackError, ClockError, Result, SchedulerError};
pub use observer::{SchedulerObserver, TracingObserver};
pub use registry::{JobRecord, JobRegistry};
pub use scheduler::Scheduler;
pub use trigger::{CustomPolicy, Trigger};
