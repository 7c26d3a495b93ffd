//! Singleton maintenance tasks. Every instance runs the timers, but a
//! distributed lock lets only one of them act per period.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use trunk_queue::{DistributedLock, EnqueueOptions, JobId, JobQueue, QueueResult};

use crate::jobs::{BalanceSync, CarrierSync, PlatformJob};

pub const STARTUP_SYNC_KEY: &str = "startup_carrier_sync";
pub const BALANCE_SYNC_KEY: &str = "balance_sync";
pub const CLEANUP_KEY: &str = "job_cleanup";

/// Lease for the one-time startup sync; long enough that instances booting
/// together see it held
const STARTUP_SYNC_TTL_SECS: u64 = 600;

/// Enqueue a full carrier sync unless another instance already did.
///
/// Returns the enqueued job's id, or `None` when the lease was taken.
pub async fn startup_sync(queue: &JobQueue, lock: &DistributedLock) -> QueueResult<Option<JobId>> {
    // The lease is left to expire so later boots in the same window skip too
    if !lock.acquire(STARTUP_SYNC_KEY, STARTUP_SYNC_TTL_SECS).await? {
        debug!("Startup carrier sync already claimed by another instance");
        return Ok(None);
    }

    let job = PlatformJob::CarrierSync(CarrierSync { carrier_id: None });
    let id = queue.enqueue_set(&job, EnqueueOptions::default()).await?;
    info!(job_id = %id, "Enqueued startup carrier sync");
    Ok(Some(id))
}

/// One balance-sync period: enqueue a refresh if this instance takes the period's lease
pub async fn balance_sync_tick(
    queue: &JobQueue,
    lock: &DistributedLock,
    period: Duration,
) -> QueueResult<bool> {
    // The lease is left to expire so every other tick in this period skips
    let key = period_key(BALANCE_SYNC_KEY, period, Utc::now());
    if !lock.acquire(&key, ttl_for(period)).await? {
        debug!(%key, "Balance sync already taken for this period");
        return Ok(false);
    }

    let job = PlatformJob::BalanceSync(BalanceSync { carrier_id: None });
    let id = queue.enqueue_set(&job, EnqueueOptions::default()).await?;
    info!(job_id = %id, "Enqueued balance sync");
    Ok(true)
}

/// One cleanup period: delete completed jobs older than `older_than_days`
pub async fn cleanup_tick(
    queue: &JobQueue,
    lock: &DistributedLock,
    older_than_days: u32,
    period: Duration,
) -> QueueResult<Option<u64>> {
    let key = period_key(CLEANUP_KEY, period, Utc::now());
    if !lock.acquire(&key, ttl_for(period)).await? {
        return Ok(None);
    }

    queue.cleanup_old_jobs(older_than_days).await.map(Some)
}

/// Lease length for a periodic task: one full period
fn ttl_for(period: Duration) -> u64 {
    period.as_secs().max(1)
}

/// Lease key for the wall-clock period containing `now`. Instances whose
/// timers fire at different offsets still compete for the same key.
fn period_key(base: &str, period: Duration, now: DateTime<Utc>) -> String {
    let period_secs = i64::try_from(ttl_for(period)).unwrap_or(i64::MAX);
    format!("{base}:{}", now.timestamp().div_euclid(period_secs))
}

/// Handles to the recurring tasks
pub struct PeriodicTasks {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PeriodicTasks {
    /// Spawn the balance-sync and cleanup timers
    pub fn start(
        queue: JobQueue,
        lock: DistributedLock,
        balance_sync_interval: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let cleanup_after_days = queue.config().cleanup_after_days;

        let balance = {
            let (queue, lock, stop) = (queue.clone(), lock.clone(), token.clone());
            tokio::spawn(async move {
                let mut ticker = interval(balance_sync_interval);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    if let Err(e) = balance_sync_tick(&queue, &lock, balance_sync_interval).await {
                        error!("Balance sync tick failed: {}", e);
                    }
                }
            })
        };

        let cleanup = {
            let stop = token.clone();
            tokio::spawn(async move {
                let mut ticker = interval(cleanup_interval);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    match cleanup_tick(&queue, &lock, cleanup_after_days, cleanup_interval).await {
                        Ok(Some(removed)) => debug!(removed, "Cleanup tick finished"),
                        Ok(None) => debug!("Cleanup held by another instance"),
                        Err(e) => error!("Cleanup tick failed: {}", e),
                    }
                }
            })
        };

        info!(?balance_sync_interval, ?cleanup_interval, "Periodic tasks started");
        Self {
            token,
            tasks: vec![balance, cleanup],
        }
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Periodic task join error: {}", e);
            }
        }
    }
}
