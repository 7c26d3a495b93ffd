use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::warn;

use crate::{
    QueueError, QueueResult,
    backend::{FailDisposition, JobStore, OperatorAction},
    types::{JobFilter, JobId, JobPatch, JobRecord, JobStatus, NewJob, Page, StatusCounts},
};

/// Non-durable, in-process job store for single-instance deployments and tests.
///
/// Every operation takes the write lock once, so each read-modify-write is
/// atomic per job.
#[derive(Clone)]
pub struct MemoryJobStore {
    /// Job records indexed by id; ids are assigned in insertion order
    pub(crate) jobs: Arc<RwLock<BTreeMap<JobId, JobRecord>>>,

    next_id: Arc<AtomicI64>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Number of stored jobs
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    fn transition(
        &self,
        id: JobId,
        action: OperatorAction,
        now: DateTime<Utc>,
    ) -> QueueResult<JobRecord> {
        let mut jobs = self.jobs.write();
        let record = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        action.check(record)?;

        match action {
            OperatorAction::Retry => record.requeue(now),
            OperatorAction::Cancel => record.cancel(now),
        }
        Ok(record.clone())
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: NewJob) -> QueueResult<JobRecord> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = JobRecord::new(id, job, Utc::now());
        self.jobs.write().insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    async fn update(&self, id: JobId, patch: JobPatch) -> QueueResult<JobRecord> {
        let mut jobs = self.jobs.write();
        let record = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if record.status == JobStatus::Completed {
            return Err(QueueError::transition(id, record.status, "update"));
        }
        record.apply(patch, Utc::now());
        Ok(record.clone())
    }

    async fn list(&self, filter: &JobFilter, page: Page) -> QueueResult<Vec<JobRecord>> {
        let jobs = self.jobs.read();
        Ok(jobs
            .values()
            .rev()
            .filter(|record| record.matches(filter))
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<JobRecord>> {
        let mut jobs = self.jobs.write();

        for record in jobs
            .values_mut()
            .filter(|record| record.is_eligible(now) && record.attempts_exhausted())
        {
            warn!(job_id = %record.id, attempts = record.attempts, "Failing job with no attempts left");
            record.exhaust(now);
        }

        // Higher priority first, then FIFO by id
        let next = jobs
            .values()
            .filter(|record| record.is_eligible(now))
            .max_by_key(|record| (record.priority, Reverse(record.id)))
            .map(|record| record.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|record| {
                record.start_processing(now);
                record.clone()
            })
        }))
    }

    async fn ack_complete(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<Option<JobRecord>> {
        let mut jobs = self.jobs.write();
        let record = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        if record.status != JobStatus::Processing {
            return Ok(None);
        }

        record.complete(now);
        Ok(Some(record.clone()))
    }

    async fn ack_fail(
        &self,
        id: JobId,
        error: String,
        disposition: FailDisposition,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<JobRecord>> {
        let mut jobs = self.jobs.write();
        let record = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        if record.status != JobStatus::Processing {
            return Ok(None);
        }

        match disposition {
            FailDisposition::Retry { run_at } if !record.attempts_exhausted() => {
                record.schedule_retry(error, run_at, now);
            }
            FailDisposition::Unhandled => {
                record.fail(error, now);
                record.attempts = record.attempts.saturating_sub(1);
            }
            _ => record.fail(error, now),
        }
        Ok(Some(record.clone()))
    }

    async fn unclaim(
        &self,
        id: JobId,
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<JobRecord>> {
        let mut jobs = self.jobs.write();
        let record = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        if record.status != JobStatus::Processing || record.locked_at != Some(claimed_at) {
            return Ok(None);
        }

        record.unclaim(now);
        Ok(Some(record.clone()))
    }

    async fn retry(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<JobRecord> {
        self.transition(id, OperatorAction::Retry, now)
    }

    async fn cancel(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<JobRecord> {
        self.transition(id, OperatorAction::Cancel, now)
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, record| record.completed_at.map_or(true, |completed_at| completed_at >= cutoff));
        Ok((before - jobs.len()) as u64)
    }

    async fn reclaim_stuck(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> QueueResult<Vec<JobId>> {
        let mut jobs = self.jobs.write();
        let mut reclaimed = Vec::new();

        for record in jobs.values_mut().filter(|record| record.is_stuck(cutoff)) {
            record.reclaim(now);
            reclaimed.push(record.id);
        }

        Ok(reclaimed)
    }

    async fn counts(&self) -> QueueResult<StatusCounts> {
        let jobs = self.jobs.read();
        let mut counts = StatusCounts::default();
        for record in jobs.values() {
            counts.add(record.status, 1);
        }
        Ok(counts)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn new_job(job_type: &str, priority: i32) -> NewJob {
        NewJob {
            job_type: job_type.to_string(),
            payload: json!({ "carrier_id": 42 }),
            priority,
            run_at: None,
            max_attempts: 3,
            timeout_ms: None,
            tags: [job_type.to_string()].into(),
        }
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let store = MemoryJobStore::new();
        let first = store.insert(new_job("carrier_sync", 0)).await.unwrap();
        let second = store.insert(new_job("carrier_sync", 0)).await.unwrap();
        assert!(second.id > first.id);
        assert_eq!(first.status, JobStatus::Pending);
        assert_eq!(first.attempts, 0);
    }

    #[tokio::test]
    async fn claim_prefers_priority_then_fifo() {
        let store = MemoryJobStore::new();
        let low = store.insert(new_job("a", 0)).await.unwrap();
        let high = store.insert(new_job("b", 5)).await.unwrap();
        let low_later = store.insert(new_job("c", 0)).await.unwrap();

        let now = Utc::now();
        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, high.id);
        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, low.id);
        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, low_later.id);
        assert!(store.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_skips_future_jobs() {
        let store = MemoryJobStore::new();
        let mut job = new_job("invoice_generation", 0);
        job.run_at = Some(Utc::now() + Duration::hours(1));
        store.insert(job).await.unwrap();

        assert!(store.claim_next(Utc::now()).await.unwrap().is_none());
        assert!(store
            .claim_next(Utc::now() + Duration::hours(2))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn claim_sets_lock_and_attempts() {
        let store = MemoryJobStore::new();
        let job = store.insert(new_job("crm_sync", 0)).await.unwrap();
        let now = Utc::now();

        let claimed = store.claim_next(now).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.locked_at, Some(now));
        assert_eq!(claimed.attempts, 1);
    }

    #[tokio::test]
    async fn ack_fail_respects_attempt_budget() {
        let store = MemoryJobStore::new();
        let mut job = new_job("crm_sync", 0);
        job.max_attempts = 2;
        let job = store.insert(job).await.unwrap();
        let retry = FailDisposition::Retry { run_at: None };

        store.claim_next(Utc::now()).await.unwrap();
        let first = store.ack_fail(job.id, "timeout".into(), retry, Utc::now()).await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Pending);
        assert!(first.locked_at.is_none());

        store.claim_next(Utc::now()).await.unwrap();
        let second = store.ack_fail(job.id, "timeout again".into(), retry, Utc::now()).await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Failed);
        assert_eq!(second.attempts, 2);
        assert_eq!(second.error.as_deref(), Some("timeout again"));
        assert!(second.failed_at.is_some());
    }

    #[tokio::test]
    async fn ack_after_cancel_is_ignored() {
        let store = MemoryJobStore::new();
        let job = store.insert(new_job("call_simulation", 0)).await.unwrap();
        store.claim_next(Utc::now()).await.unwrap();
        store.cancel(job.id, Utc::now()).await.unwrap();

        assert!(store.ack_complete(job.id, Utc::now()).await.unwrap().is_none());
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(stored.locked_at.is_none());
    }

    #[tokio::test]
    async fn unclaim_ignores_a_newer_claim() {
        let store = MemoryJobStore::new();
        let job = store.insert(new_job("crm_sync", 0)).await.unwrap();
        let first_claim = Utc::now() - Duration::seconds(5);
        store.claim_next(first_claim).await.unwrap().unwrap();

        // Operator cancels and retries, another worker claims again
        store.cancel(job.id, Utc::now()).await.unwrap();
        store.retry(job.id, Utc::now()).await.unwrap();
        let second = store.claim_next(Utc::now()).await.unwrap().unwrap();

        assert!(store.unclaim(job.id, first_claim, Utc::now()).await.unwrap().is_none());
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.locked_at, second.locked_at);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paginated() {
        let store = MemoryJobStore::new();
        for i in 0..5 {
            store.insert(new_job(&format!("job_{i}"), 0)).await.unwrap();
        }

        let page = store.list(&JobFilter::All, Page::new(Some(2), Some(1))).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store.cancel(JobId(99), Utc::now()).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(JobId(99))));
        assert!(store.get(JobId(99)).await.unwrap().is_none());
    }
}
