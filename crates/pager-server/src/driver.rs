//! Leadership supervision loop.
//!
//! Every `leadership_check_interval` the driver makes sure this process is
//! either leading with both watch loops alive, or trying to become leader.
//! On shutdown it destroys the engine's lock and returns.

use pager::{PagerError, WatchEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Not leader; will try again on the next tick
    Idle,
    /// Acquisition in progress
    Attempting,
    /// Leader with both watch loops running
    Leading,
}

pub struct Driver {
    engine: Arc<WatchEngine>,
    check_interval: Duration,
    state: DriverState,
}

impl Driver {
    pub fn new(engine: Arc<WatchEngine>, check_interval: Duration) -> Self {
        Self {
            engine,
            check_interval,
            state: DriverState::Idle,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn engine(&self) -> &Arc<WatchEngine> {
        &self.engine
    }

    /// One supervision step.
    pub async fn tick(&mut self) -> DriverState {
        match self.state {
            DriverState::Idle | DriverState::Attempting => self.attempt().await,
            DriverState::Leading => {
                if !self.engine.is_leader().await {
                    info!("No longer the leader, trying again");
                    self.attempt().await;
                } else if !self.engine.is_watching() {
                    warn!(
                        active_loops = self.engine.active_loops(),
                        "Watch loop stopped while leading, restarting"
                    );
                    self.attempt().await;
                } else {
                    debug!(term = self.engine.term(), "Still the leader");
                }
            }
        }
        self.state
    }

    async fn attempt(&mut self) {
        self.state = DriverState::Attempting;
        match self.engine.run().await {
            Ok(()) if self.engine.is_leader().await => {
                info!(term = self.engine.term(), "I am the leader now");
                self.state = DriverState::Leading;
            }
            Ok(()) => {
                debug!("Acquired but lost leadership immediately");
                self.state = DriverState::Idle;
            }
            Err(PagerError::LockUnavailable { reason, .. }) => {
                debug!(reason = %reason, "Standing by");
                self.state = DriverState::Idle;
            }
            Err(e) => {
                warn!(error = %e, "Leadership attempt failed");
                self.state = DriverState::Idle;
            }
        }
    }

    /// Supervise until `shutdown` flips to true or its sender goes away,
    /// then destroy the lock.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PagerError> {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Stopping pager watch");
        self.state = DriverState::Idle;
        self.engine.destroy().await
    }
}
