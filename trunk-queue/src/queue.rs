use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, instrument, warn};

use crate::{
    QueueError, QueueResult,
    backend::{memory::MemoryJobStore, open_store, JobStore},
    config::QueueConfig,
    job::{Job, JobSet},
    observability::ObservabilityLayer,
    types::{
        EnqueueOptions, JobEvent, JobFilter, JobId, JobPatch, JobRecord, JobStatus, NewJob, Page,
        QueueStats, TagMatch,
    },
};

/// Job-type-aware API over a [`JobStore`].
///
/// Validates submissions, applies enqueue defaults and publishes job events.
/// Cheap to clone; clones share the store and the event stream.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    config: Arc<QueueConfig>,
    observability: Arc<ObservabilityLayer>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::with_config(store, QueueConfig::default())
    }

    pub fn with_config(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        let observability = ObservabilityLayer::with_capacity(config.event_capacity);
        Self {
            store,
            config: Arc::new(config),
            observability: Arc::new(observability),
        }
    }

    /// Queue over a fresh in-process store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryJobStore::new()))
    }

    /// Open the store selected by `config` and wrap it
    pub async fn open(config: QueueConfig) -> QueueResult<Self> {
        let store = open_store(&config).await?;
        info!(backend = store.name(), "Job queue ready");
        Ok(Self::with_config(store, config))
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn observability(&self) -> &ObservabilityLayer {
        &self.observability
    }

    /// Subscribe to job lifecycle events
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.observability.event_stream()
    }

    /// Job lifecycle events as a `Stream`; lagged receivers yield an error item
    pub fn event_stream(&self) -> BroadcastStream<JobEvent> {
        BroadcastStream::new(self.events())
    }

    fn prepare(&self, job_type: &str, payload: Value, options: EnqueueOptions) -> QueueResult<NewJob> {
        let job_type = job_type.trim();
        if job_type.is_empty() {
            return Err(QueueError::Validation("job type must not be empty".to_string()));
        }

        let max_attempts = options.max_attempts.unwrap_or(self.config.default_max_attempts);
        if max_attempts == 0 {
            return Err(QueueError::Validation("max_attempts must be at least 1".to_string()));
        }

        let tags: BTreeSet<String> = match options.tags {
            Some(tags) => tags.into_iter().collect(),
            None => [job_type.to_string()].into(),
        };

        Ok(NewJob {
            job_type: job_type.to_string(),
            payload,
            priority: options.priority.unwrap_or(self.config.default_priority),
            run_at: options.run_at,
            max_attempts,
            timeout_ms: options.timeout_ms,
            tags,
        })
    }

    /// Persist a new pending job
    #[instrument(skip(self, payload, options))]
    pub async fn add_job(
        &self,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> QueueResult<JobId> {
        let job = self.prepare(job_type, payload, options)?;
        let record = self.store.insert(job).await?;

        self.observability.record_job_enqueued(&record);
        info!(job_id = %record.id, job_type = %record.job_type, priority = record.priority, "Enqueued job");
        Ok(record.id)
    }

    /// Enqueue a typed job. Unset options fall back to the job's own constants.
    pub async fn enqueue<J: Job>(&self, job: &J, mut options: EnqueueOptions) -> QueueResult<JobId> {
        options.priority = options.priority.or(Some(J::PRIORITY));
        options.max_attempts = options.max_attempts.or(Some(J::MAX_ATTEMPTS));
        if options.tags.is_none() {
            options.tags = Some(job.tags());
        }

        let payload = serde_json::to_value(job)?;
        self.add_job(J::JOB_TYPE, payload, options).await
    }

    /// Enqueue one variant of a [`JobSet`]
    pub async fn enqueue_set<S: JobSet>(&self, job: &S, mut options: EnqueueOptions) -> QueueResult<JobId> {
        let (job_type, payload) = job.into_parts()?;
        options.priority = options.priority.or(job.priority());
        self.add_job(&job_type, payload, options).await
    }

    /// Enqueue a job that becomes eligible at `run_at`
    pub async fn schedule_job(
        &self,
        job_type: &str,
        payload: Value,
        run_at: DateTime<Utc>,
        options: EnqueueOptions,
    ) -> QueueResult<JobId> {
        self.add_job(job_type, payload, options.with_run_at(run_at)).await
    }

    pub async fn get_job_by_id(&self, id: JobId) -> QueueResult<JobRecord> {
        self.store.get(id).await?.ok_or(QueueError::NotFound(id))
    }

    /// Apply a partial update to a job. Completed jobs are immutable.
    pub async fn update_job(&self, id: JobId, patch: JobPatch) -> QueueResult<()> {
        if patch.is_empty() {
            // Still report unknown ids and completed jobs
            let job = self.get_job_by_id(id).await?;
            if job.status == JobStatus::Completed {
                return Err(QueueError::transition(id, job.status, "update"));
            }
            return Ok(());
        }
        self.store.update(id, patch).await?;
        Ok(())
    }

    pub async fn get_jobs_by_status(
        &self,
        status: JobStatus,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> QueueResult<Vec<JobRecord>> {
        self.store
            .list(&JobFilter::Status(status), Page::new(limit, offset))
            .await
    }

    pub async fn get_all_jobs(&self, limit: Option<usize>, offset: Option<usize>) -> QueueResult<Vec<JobRecord>> {
        self.store.list(&JobFilter::All, Page::new(limit, offset)).await
    }

    pub async fn get_jobs_by_type(
        &self,
        job_type: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> QueueResult<Vec<JobRecord>> {
        self.store
            .list(&JobFilter::Type(job_type.to_string()), Page::new(limit, offset))
            .await
    }

    /// Jobs carrying all (`TagMatch::All`) or any (`TagMatch::Any`) of `tags`
    pub async fn get_jobs_by_tags<I, S>(
        &self,
        tags: I,
        mode: TagMatch,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> QueueResult<Vec<JobRecord>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filter = JobFilter::Tags {
            tags: tags.into_iter().map(Into::into).collect(),
            mode,
        };
        self.store.list(&filter, Page::new(limit, offset)).await
    }

    /// Move a failed or cancelled job back to pending with a fresh attempt budget
    #[instrument(skip(self))]
    pub async fn retry_job(&self, id: JobId) -> QueueResult<JobRecord> {
        let record = self.store.retry(id, Utc::now()).await?;
        self.observability.record_job_requeued(&record);
        info!(job_id = %id, job_type = %record.job_type, "Job requeued for retry");
        Ok(record)
    }

    /// Cancel any job that has not completed
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, id: JobId) -> QueueResult<JobRecord> {
        let record = self.store.cancel(id, Utc::now()).await?;
        self.observability.record_job_cancelled(&record);
        info!(job_id = %id, job_type = %record.job_type, "Job cancelled");
        Ok(record)
    }

    /// Remove jobs completed more than `older_than_days` ago
    pub async fn delete_old_jobs(&self, older_than_days: u32) -> QueueResult<u64> {
        // A cutoff before the representable range matches nothing
        let Some(cutoff) = cutoff_before(Utc::now(), Duration::try_days(i64::from(older_than_days))) else {
            return Ok(0);
        };
        let removed = self.store.delete_completed_before(cutoff).await?;
        debug!(removed, %cutoff, "Deleted completed jobs");
        Ok(removed)
    }

    /// Same as [`delete_old_jobs`](Self::delete_old_jobs), logged as a maintenance sweep
    #[instrument(skip(self))]
    pub async fn cleanup_old_jobs(&self, older_than_days: u32) -> QueueResult<u64> {
        let removed = self.delete_old_jobs(older_than_days).await?;
        if removed > 0 {
            info!(removed, older_than_days, "Cleaned up old completed jobs");
        }
        Ok(removed)
    }

    /// Return processing jobs claimed more than `max_processing_minutes` ago to pending
    #[instrument(skip(self))]
    pub async fn reclaim_stuck_jobs(&self, max_processing_minutes: u32) -> QueueResult<u64> {
        let now = Utc::now();
        let Some(cutoff) = cutoff_before(now, Duration::try_minutes(i64::from(max_processing_minutes))) else {
            return Ok(0);
        };
        let reclaimed = self.store.reclaim_stuck(cutoff, now).await?;

        if !reclaimed.is_empty() {
            warn!(count = reclaimed.len(), ?reclaimed, "Reclaimed stuck jobs");
            self.observability.record_jobs_reclaimed(&reclaimed, now);
        }
        Ok(reclaimed.len() as u64)
    }

    /// Per-status counts and success rate
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        Ok(self.store.counts().await?.into())
    }
}

fn cutoff_before(now: DateTime<Utc>, age: Option<Duration>) -> Option<DateTime<Utc>> {
    age.and_then(|age| now.checked_sub_signed(age))
}
