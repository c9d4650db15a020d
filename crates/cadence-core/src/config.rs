use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;
pub const DEFAULT_PENDING_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Scheduler tuning (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of callbacks allowed to run at the same time.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Due fires buffered while every worker is busy. Overflow drops the
    /// oldest buffered fire and reports it as missed.
    #[serde(default = "default_pending_queue_capacity")]
    pub pending_queue_capacity: usize,
    /// Default drain window used by `stop` callers that don't pick their own.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            pending_queue_capacity: DEFAULT_PENDING_QUEUE_CAPACITY,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

fn default_worker_pool_size() -> usize {
    DEFAULT_WORKER_POOL_SIZE
}
fn default_pending_queue_capacity() -> usize {
    DEFAULT_PENDING_QUEUE_CAPACITY
}
fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

impl SchedulerConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// A missing file is not an error: every field has a default, so the
    /// result is defaults plus whatever the environment sets.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.unwrap_or("cadence.toml");

        let config: SchedulerConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CADENCE_"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(CoreError::Config(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_when_nothing_is_set() {
        Jail::expect_with(|_jail| {
            let config = SchedulerConfig::load(Some("missing.toml")).unwrap();
            assert_eq!(config, SchedulerConfig::default());
            Ok(())
        });
    }

    #[test]
    fn toml_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "cadence.toml",
                r#"
                worker_pool_size = 2
                pending_queue_capacity = 8
                "#,
            )?;
            jail.set_env("CADENCE_PENDING_QUEUE_CAPACITY", "0");

            let config = SchedulerConfig::load(None).unwrap();
            assert_eq!(config.worker_pool_size, 2);
            assert_eq!(config.pending_queue_capacity, 0);
            assert_eq!(config.shutdown_grace_ms, DEFAULT_SHUTDOWN_GRACE_MS);
            Ok(())
        });
    }

    #[test]
    fn zero_workers_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("cadence.toml", "worker_pool_size = 0")?;
            let err = SchedulerConfig::load(None).unwrap_err();
            assert_eq!(err.code(), "CONFIG_ERROR");
            Ok(())
        });
    }

    #[test]
    fn grace_as_duration() {
        let config = SchedulerConfig {
            shutdown_grace_ms: 250,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.shutdown_grace(), Duration::from_millis(250));
    }
}
