//! Periodic tick driver for the round controller.

use super::{ControllerStore, RoundAction};
use coursedraw_core::environment::Clock;
use coursedraw_runtime::StoreError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Sends a `Tick` to the controller store at a fixed period
#[derive(Clone)]
pub struct Scheduler {
    store: ControllerStore,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl Scheduler {
    /// Create a scheduler ticking every `period`
    #[must_use]
    pub fn new(store: ControllerStore, clock: Arc<dyn Clock>, period: Duration) -> Self {
        Self {
            store,
            clock,
            period,
        }
    }

    /// The store being driven
    #[must_use]
    pub const fn store(&self) -> &ControllerStore {
        &self.store
    }

    /// Send one tick and wait for everything it triggers
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is shutting down or the
    /// action cascade does not settle.
    pub async fn tick(&self) -> Result<usize, StoreError> {
        self.store
            .send(RoundAction::Tick {
                now: self.clock.now(),
            })
            .await
    }

    /// Tick until `shutdown` turns `true` or the store shuts down
    ///
    /// A tick that overruns the period delays the next one instead of
    /// bunching ticks up.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period = ?self.period, "Round scheduler started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(reduced) => tracing::trace!(reduced, "Tick processed"),
                        Err(StoreError::ShutdownInProgress) => break,
                        Err(e) => tracing::error!(error = %e, "Tick failed"),
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!("Round scheduler stopped");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}
