pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    config::QueueConfig,
    QueueError, QueueResult,
    types::{JobFilter, JobId, JobPatch, JobRecord, JobStatus, NewJob, Page, StatusCounts},
};

/// How a failed attempt resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// Back to pending if attempts remain, optionally delayed until `run_at`
    Retry { run_at: Option<DateTime<Utc>> },
    /// Straight to failed regardless of attempts left
    Permanent,
    /// Straight to failed without spending an attempt (no handler ran)
    Unhandled,
}

/// Storage primitives for job records.
///
/// Pure data access: every method is atomic per job id and carries no
/// scheduling policy beyond the state checks it names.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new pending job and return the stored record
    async fn insert(&self, job: NewJob) -> QueueResult<JobRecord>;

    async fn get(&self, id: JobId) -> QueueResult<Option<JobRecord>>;

    /// Apply a partial update; `NotFound` if the id is unknown,
    /// `InvalidStateTransition` if the job has completed
    async fn update(&self, id: JobId, patch: JobPatch) -> QueueResult<JobRecord>;

    /// Newest first
    async fn list(&self, filter: &JobFilter, page: Page) -> QueueResult<Vec<JobRecord>>;

    /// Claim the next eligible pending job (priority desc, then insertion order),
    /// moving it to processing with `locked_at = now` and `attempts + 1`.
    ///
    /// Eligible jobs with no attempts left are failed instead of claimed.
    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<JobRecord>>;

    /// Mark a processing job completed. Returns `None` when the job is no longer
    /// processing (e.g. cancelled mid-run) and nothing was written.
    async fn ack_complete(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<Option<JobRecord>>;

    /// Resolve a failed attempt of a processing job. Exhausted attempts or a
    /// permanent disposition end in failed; otherwise the job returns to pending.
    /// Returns `None` when the job is no longer processing.
    async fn ack_fail(
        &self,
        id: JobId,
        error: String,
        disposition: FailDisposition,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<JobRecord>>;

    /// Hand back a claim that never ran: processing -> pending with the attempt
    /// refunded. Only applies while the job still carries the claim taken at
    /// `claimed_at`; returns `None` otherwise.
    async fn unclaim(
        &self,
        id: JobId,
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<JobRecord>>;

    /// failed|cancelled -> pending with a fresh attempt budget
    async fn retry(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<JobRecord>;

    /// any non-completed -> cancelled
    async fn cancel(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<JobRecord>;

    /// Remove jobs whose `completed_at` predates `cutoff`
    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> QueueResult<u64>;

    /// processing jobs with `locked_at < cutoff` -> pending
    async fn reclaim_stuck(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> QueueResult<Vec<JobId>>;

    async fn counts(&self) -> QueueResult<StatusCounts>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Operator-initiated transitions guarded by a status precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperatorAction {
    Retry,
    Cancel,
}

impl OperatorAction {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Cancel => "cancel",
        }
    }

    pub(crate) fn allowed_from(self, status: JobStatus) -> bool {
        match self {
            Self::Retry => status.can_retry(),
            Self::Cancel => status.can_cancel(),
        }
    }

    /// `InvalidStateTransition` unless the record's status permits the action
    pub(crate) fn check(self, record: &JobRecord) -> QueueResult<()> {
        if self.allowed_from(record.status) {
            Ok(())
        } else {
            Err(QueueError::transition(record.id, record.status, self.as_str()))
        }
    }
}

/// Select and open the job store named by configuration.
///
/// A configured `database_url` selects Postgres; otherwise the in-process store
/// is used.
pub async fn open_store(config: &QueueConfig) -> QueueResult<Arc<dyn JobStore>> {
    match config.database_url.as_deref() {
        Some(url) => open_postgres(url, config).await,
        None => {
            info!("No database configured, using in-memory job store");
            Ok(Arc::new(memory::MemoryJobStore::new()))
        }
    }
}

#[cfg(feature = "postgres")]
async fn open_postgres(url: &str, config: &QueueConfig) -> QueueResult<Arc<dyn JobStore>> {
    let store = postgres::PostgresJobStore::connect(url, config.max_connections).await?;
    store.migrate().await?;
    info!("Using Postgres job store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_url: &str, _config: &QueueConfig) -> QueueResult<Arc<dyn JobStore>> {
    Err(QueueError::Validation(
        "a database URL is configured but trunk-queue was built without the `postgres` feature".to_string(),
    ))
}
