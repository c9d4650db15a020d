//! `cadence-core` — vocabulary shared by the scheduler and its embedders:
//! job identifiers, lifecycle states, repeat counts, and configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::SchedulerConfig;
pub use error::{CoreError, Result};
pub use types::{FireTime, JobId, JobState, Repeat};
