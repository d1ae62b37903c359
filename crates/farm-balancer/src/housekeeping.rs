//! Periodic house-cleaning ticks.
//!
//! Emits `FarmEvent::HouseCleaning` on a fixed interval until the
//! shutdown signal flips. Handlers run on the blocking pool since a
//! balancing run does synchronous repository I/O.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::events::{EventHub, FarmEvent};

pub struct HouseCleaning {
    hub: EventHub,
    interval: Duration,
}

impl HouseCleaning {
    pub fn new(hub: EventHub, interval: Duration) -> Self {
        Self { hub, interval }
    }

    /// Run the tick loop. Returns the number of ticks dispatched.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(interval_secs = self.interval.as_secs_f64(), "house cleaning started");
        let mut ticks = 0;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let hub = self.hub.clone();
                    match tokio::task::spawn_blocking(move || hub.dispatch(&FarmEvent::HouseCleaning)).await {
                        Ok(report) if report.failed > 0 => {
                            error!(failed = report.failed, "house cleaning handlers failed");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "house cleaning task aborted"),
                    }
                    ticks += 1;
                }
                _ = shutdown.changed() => {
                    info!(ticks, "house cleaning shutting down");
                    break;
                }
            }
        }

        ticks
    }
}
