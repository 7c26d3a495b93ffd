//! Durable job store on PostgreSQL.
//!
//! Claims use `FOR UPDATE SKIP LOCKED`, so any number of worker processes can
//! poll the same table and each row is handed to exactly one of them.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, warn};

use crate::{
    QueueError, QueueResult,
    backend::{FailDisposition, JobStore, OperatorAction},
    types::{
        record::ATTEMPTS_EXHAUSTED, JobFilter, JobId, JobPatch, JobRecord, JobStatus, NewJob, Page,
        StatusCounts, TagMatch,
    },
};

const COLUMNS: &str = "id, job_type, payload, status, attempts, max_attempts, priority, tags, \
     timeout_ms, error, created_at, updated_at, run_at, locked_at, completed_at, failed_at";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS trunk_jobs (
        id           BIGSERIAL PRIMARY KEY,
        job_type     TEXT        NOT NULL,
        payload      JSONB       NOT NULL DEFAULT 'null',
        status       TEXT        NOT NULL DEFAULT 'pending',
        attempts     INTEGER     NOT NULL DEFAULT 0,
        max_attempts INTEGER     NOT NULL DEFAULT 3,
        priority     INTEGER     NOT NULL DEFAULT 0,
        tags         TEXT[]      NOT NULL DEFAULT '{}',
        timeout_ms   BIGINT,
        error        TEXT,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        run_at       TIMESTAMPTZ,
        locked_at    TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        failed_at    TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS trunk_jobs_claim_idx ON trunk_jobs (priority DESC, id) WHERE status = 'pending'",
    "CREATE INDEX IF NOT EXISTS trunk_jobs_locked_idx ON trunk_jobs (locked_at) WHERE status = 'processing'",
    "CREATE INDEX IF NOT EXISTS trunk_jobs_completed_idx ON trunk_jobs (completed_at)",
    "CREATE INDEX IF NOT EXISTS trunk_jobs_status_idx ON trunk_jobs (status)",
    "CREATE INDEX IF NOT EXISTS trunk_jobs_tags_idx ON trunk_jobs USING GIN (tags)",
];

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    job_type: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    max_attempts: i32,
    priority: i32,
    tags: Vec<String>,
    timeout_ms: Option<i64>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    run_at: Option<DateTime<Utc>>,
    locked_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(QueueError::Backend)?;

        Ok(Self {
            id: JobId(row.id),
            job_type: row.job_type,
            payload: row.payload,
            status,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            max_attempts: u32::try_from(row.max_attempts).unwrap_or(0),
            priority: row.priority,
            tags: row.tags.into_iter().collect(),
            timeout_ms: row.timeout_ms.and_then(|ms| u64::try_from(ms).ok()),
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            run_at: row.run_at,
            locked_at: row.locked_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
        })
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn tag_vec(tags: BTreeSet<String>) -> Vec<String> {
    tags.into_iter().collect()
}

/// Job store backed by a PostgreSQL table
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool against `url`
    pub async fn connect(url: &str, max_connections: u32) -> QueueResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the jobs table and indexes if missing
    pub async fn migrate(&self) -> QueueResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("trunk_jobs schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn transition(
        &self,
        id: JobId,
        action: OperatorAction,
        now: DateTime<Utc>,
    ) -> QueueResult<JobRecord> {
        let sql = match action {
            OperatorAction::Retry => format!(
                "UPDATE trunk_jobs
                 SET status = 'pending', attempts = 0, error = NULL, failed_at = NULL,
                     locked_at = NULL, updated_at = $2
                 WHERE id = $1 AND status IN ('failed', 'cancelled')
                 RETURNING {COLUMNS}"
            ),
            OperatorAction::Cancel => format!(
                "UPDATE trunk_jobs
                 SET status = 'cancelled', locked_at = NULL, updated_at = $2
                 WHERE id = $1 AND status <> 'completed'
                 RETURNING {COLUMNS}"
            ),
        };

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.rejected(id, action.as_str()).await),
        }
    }

    /// Explain an update that matched no row: unknown id or a forbidden status
    async fn rejected(&self, id: JobId, action: &'static str) -> QueueError {
        match self.get(id).await {
            Ok(Some(record)) => QueueError::transition(record.id, record.status, action),
            Ok(None) => QueueError::NotFound(id),
            Err(e) => e,
        }
    }

    /// `None` from a guarded update means "not processing", unless the row is gone
    async fn guarded(&self, id: JobId, row: Option<JobRow>) -> QueueResult<Option<JobRecord>> {
        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None if self.get(id).await?.is_none() => Err(QueueError::NotFound(id)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, job: NewJob) -> QueueResult<JobRecord> {
        let sql = format!(
            "INSERT INTO trunk_jobs
                (job_type, payload, status, attempts, max_attempts, priority, tags, timeout_ms,
                 run_at, created_at, updated_at)
             VALUES ($1, $2, 'pending', 0, $3, $4, $5, $6, $7, $8, $8)
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job.job_type)
            .bind(job.payload)
            .bind(to_i32(job.max_attempts))
            .bind(job.priority)
            .bind(tag_vec(job.tags))
            .bind(job.timeout_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)))
            .bind(job.run_at)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<JobRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM trunk_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn update(&self, id: JobId, patch: JobPatch) -> QueueResult<JobRecord> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE trunk_jobs SET updated_at = ");
        qb.push_bind(Utc::now());

        if let Some(status) = patch.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(attempts) = patch.attempts {
            qb.push(", attempts = ").push_bind(to_i32(attempts));
        }
        if let Some(max_attempts) = patch.max_attempts {
            qb.push(", max_attempts = ").push_bind(to_i32(max_attempts));
        }
        if let Some(priority) = patch.priority {
            qb.push(", priority = ").push_bind(priority);
        }
        if let Some(payload) = patch.payload {
            qb.push(", payload = ").push_bind(payload);
        }
        if let Some(tags) = patch.tags {
            qb.push(", tags = ").push_bind(tag_vec(tags));
        }
        if let Some(run_at) = patch.run_at {
            qb.push(", run_at = ").push_bind(run_at);
        }
        if let Some(locked_at) = patch.locked_at {
            qb.push(", locked_at = ").push_bind(locked_at);
        }
        if let Some(completed_at) = patch.completed_at {
            qb.push(", completed_at = ").push_bind(completed_at);
        }
        if let Some(failed_at) = patch.failed_at {
            qb.push(", failed_at = ").push_bind(failed_at);
        }
        if let Some(error) = patch.error {
            qb.push(", error = ").push_bind(error);
        }

        qb.push(" WHERE id = ").push_bind(id.0);
        qb.push(" AND status <> 'completed'");
        qb.push(" RETURNING ").push(COLUMNS);

        let row = qb
            .build_query_as::<JobRow>()
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.rejected(id, "update").await),
        }
    }

    async fn list(&self, filter: &JobFilter, page: Page) -> QueueResult<Vec<JobRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(COLUMNS).push(" FROM trunk_jobs");

        match filter {
            JobFilter::All => {}
            JobFilter::Status(status) => {
                qb.push(" WHERE status = ").push_bind(status.as_str());
            }
            JobFilter::Type(job_type) => {
                qb.push(" WHERE job_type = ").push_bind(job_type.clone());
            }
            JobFilter::Tags { tags, mode } => {
                let op = match mode {
                    TagMatch::All => " WHERE tags @> ",
                    TagMatch::Any => " WHERE tags && ",
                };
                qb.push(op).push_bind(tags.iter().cloned().collect::<Vec<_>>());
            }
        }

        qb.push(" ORDER BY id DESC LIMIT ")
            .push_bind(to_i64(page.limit))
            .push(" OFFSET ")
            .push_bind(to_i64(page.offset));

        let rows = qb.build_query_as::<JobRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<JobRecord>> {
        let exhausted: Vec<i64> = sqlx::query_scalar(
            "UPDATE trunk_jobs
             SET status = 'failed', error = COALESCE(error, $2), failed_at = $1, updated_at = $1
             WHERE status = 'pending' AND attempts >= max_attempts
               AND (run_at IS NULL OR run_at <= $1)
             RETURNING id",
        )
        .bind(now)
        .bind(ATTEMPTS_EXHAUSTED)
        .fetch_all(&self.pool)
        .await?;

        if !exhausted.is_empty() {
            warn!(?exhausted, "Failed jobs with no attempts left");
        }

        let sql = format!(
            "UPDATE trunk_jobs
             SET status = 'processing', locked_at = $1, attempts = attempts + 1, updated_at = $1
             WHERE id = (
                 SELECT id FROM trunk_jobs
                 WHERE status = 'pending' AND attempts < max_attempts
                   AND (run_at IS NULL OR run_at <= $1)
                 ORDER BY priority DESC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = &row {
            debug!(job_id = row.id, job_type = %row.job_type, "Claimed job");
        }
        row.map(JobRecord::try_from).transpose()
    }

    async fn ack_complete(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<Option<JobRecord>> {
        let sql = format!(
            "UPDATE trunk_jobs
             SET status = 'completed', completed_at = $2, locked_at = NULL, updated_at = $2
             WHERE id = $1 AND status = 'processing'
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        self.guarded(id, row).await
    }

    async fn ack_fail(
        &self,
        id: JobId,
        error: String,
        disposition: FailDisposition,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<JobRecord>> {
        let (permanent, refund, retry_at) = match disposition {
            FailDisposition::Retry { run_at } => (false, false, run_at),
            FailDisposition::Permanent => (true, false, None),
            FailDisposition::Unhandled => (true, true, None),
        };

        let sql = format!(
            "UPDATE trunk_jobs
             SET status    = CASE WHEN $3 OR attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                 failed_at = CASE WHEN $3 OR attempts >= max_attempts THEN $4 ELSE failed_at END,
                 run_at    = CASE WHEN $3 OR attempts >= max_attempts THEN run_at ELSE COALESCE($5, run_at) END,
                 attempts  = CASE WHEN $6 THEN GREATEST(attempts - 1, 0) ELSE attempts END,
                 error = $2, locked_at = NULL, updated_at = $4
             WHERE id = $1 AND status = 'processing'
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .bind(error)
            .bind(permanent)
            .bind(now)
            .bind(retry_at)
            .bind(refund)
            .fetch_optional(&self.pool)
            .await?;

        self.guarded(id, row).await
    }

    async fn unclaim(
        &self,
        id: JobId,
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<JobRecord>> {
        let sql = format!(
            "UPDATE trunk_jobs
             SET status = 'pending', attempts = GREATEST(attempts - 1, 0), locked_at = NULL, updated_at = $3
             WHERE id = $1 AND status = 'processing' AND locked_at = $2
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .bind(claimed_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        self.guarded(id, row).await
    }

    async fn retry(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<JobRecord> {
        self.transition(id, OperatorAction::Retry, now).await
    }

    async fn cancel(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<JobRecord> {
        self.transition(id, OperatorAction::Cancel, now).await
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        let result = sqlx::query(
            "DELETE FROM trunk_jobs WHERE completed_at IS NOT NULL AND completed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn reclaim_stuck(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> QueueResult<Vec<JobId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "UPDATE trunk_jobs
             SET status = 'pending', locked_at = NULL, updated_at = $2
             WHERE status = 'processing' AND locked_at < $1
             RETURNING id",
        )
        .bind(cutoff)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(JobId).collect())
    }

    async fn counts(&self) -> QueueResult<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM trunk_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            let status = status.parse::<JobStatus>().map_err(QueueError::Backend)?;
            counts.add(status, u64::try_from(n).unwrap_or(0));
        }
        Ok(counts)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
