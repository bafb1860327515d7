use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::queue::EventQueue;

/// Periodically returns expired leases to the queue so they become visible
/// even when no consumer is polling.
pub struct LeaseSweeper {
    queue: Arc<dyn EventQueue>,
    interval: Duration,
}

impl LeaseSweeper {
    pub fn new(queue: Arc<dyn EventQueue>, interval: Duration) -> Self {
        Self { queue, interval }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "lease sweeper starting");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.queue.sweep_expired().await {
                        Ok(report) if report.redelivered + report.dead_lettered > 0 => {
                            info!(
                                redelivered = report.redelivered,
                                dead_lettered = report.dead_lettered,
                                dedup_purged = report.dedup_purged,
                                "swept expired leases"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "lease sweep failed"),
                    }
                }
            }
        }

        info!("lease sweeper stopped");
    }
}
