use std::sync::Arc;

use cadence_core::FireTime;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    clock::Clock,
    error::Result,
    executor::Executor,
    registry::JobRegistry,
};

/// Why a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Shutdown,
    RegistryChanged,
    Deadline,
}

/// Single scheduling loop: fire whatever is due, then wait for the earliest
/// of the next fire time, a registry change, or shutdown.
pub struct Dispatcher {
    registry: Arc<JobRegistry>,
    executor: Executor,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<JobRegistry>,
        executor: Executor,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            executor,
            clock,
            shutdown,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Returns `ClockFailure` if the clock cannot be read: no scheduling
    /// decision is trustworthy without time, so the loop stops.
    pub async fn run(self) -> Result<()> {
        info!("dispatcher started");
        let mut changes = self.registry.subscribe();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            // Firing: everything due now, not just the earliest job.
            let now = match self.clock.now() {
                Ok(now) => now,
                Err(e) => {
                    error!(error = %e, "clock read failed, halting dispatcher");
                    return Err(e.into());
                }
            };
            let due = self.registry.take_due(now);
            if !due.is_empty() {
                debug!(count = due.len(), %now, "firing round");
            }
            for fire in due {
                self.executor.submit(fire);
            }

            // Idle: mark the version seen before reading the target, so any
            // later mutation wakes the wait below.
            let version = *changes.borrow_and_update();
            let target = self.registry.next_wakeup();
            debug!(version, target = ?target, "waiting");

            match self.wait(&mut changes, target).await {
                Wake::Shutdown => break,
                Wake::RegistryChanged | Wake::Deadline => {}
            }
        }

        info!("dispatcher stopped");
        Ok(())
    }

    async fn wait(&self, changes: &mut watch::Receiver<u64>, target: Option<FireTime>) -> Wake {
        let deadline = async {
            match target {
                Some(at) => self.clock.sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Wake::Shutdown,
            changed = changes.changed() => match changed {
                Ok(()) => Wake::RegistryChanged,
                // Registry dropped: nothing left to schedule.
                Err(_) => Wake::Shutdown,
            },
            _ = deadline => Wake::Deadline,
        }
    }
}
