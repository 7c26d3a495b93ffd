use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{config::ReclaimerConfig, queue::JobQueue, QueueError, QueueResult};

/// Periodic sweep returning abandoned processing jobs to pending
pub struct StuckJobReclaimer {
    queue: JobQueue,
    stuck_after_minutes: u32,
    interval: Duration,
}

impl StuckJobReclaimer {
    pub fn new(queue: JobQueue, stuck_after_minutes: u32) -> Self {
        Self {
            queue,
            stuck_after_minutes,
            interval: Duration::from_secs(60),
        }
    }

    pub fn from_config(queue: JobQueue, config: &ReclaimerConfig) -> Self {
        Self::new(queue, config.stuck_after_minutes).with_interval(config.interval)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one sweep
    pub async fn run_once(&self) -> QueueResult<u64> {
        self.queue.reclaim_stuck_jobs(self.stuck_after_minutes).await
    }

    /// Sweep every `interval` until the handle is shut down
    pub fn start(self) -> ReclaimerHandle {
        let token = CancellationToken::new();
        let stop = token.clone();

        let join = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            info!(
                interval = ?self.interval,
                stuck_after_minutes = self.stuck_after_minutes,
                "Starting stuck-job reclaimer"
            );

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match self.run_once().await {
                    Ok(0) => debug!("No stuck jobs found"),
                    Ok(count) => info!("Reclaimed {} stuck jobs", count),
                    Err(e) => warn!("Error during stuck-job sweep: {}", e),
                }
            }
            debug!("Reclaimer stopped");
        });

        ReclaimerHandle { token, join }
    }
}

pub struct ReclaimerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl ReclaimerHandle {
    pub async fn shutdown(self) -> QueueResult<()> {
        self.token.cancel();
        self.join
            .await
            .map_err(|e| QueueError::Internal(format!("Reclaimer join error: {e}")))
    }
}
