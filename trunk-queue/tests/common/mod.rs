//! Behaviour every `JobStore` backend must share.
//!
//! Each check takes a fresh, empty store.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use trunk_queue::{
    FailDisposition, JobFilter, JobId, JobPatch, JobStatus, JobStore, NewJob, Page, QueueError,
    TagMatch,
};

/// Test factory functions
pub fn new_job(job_type: &str) -> NewJob {
    NewJob {
        job_type: job_type.to_string(),
        payload: json!({ "carrier_id": 7 }),
        priority: 0,
        run_at: None,
        max_attempts: 3,
        timeout_ms: None,
        tags: [job_type.to_string()].into(),
    }
}

pub fn job_with_priority(job_type: &str, priority: i32) -> NewJob {
    NewJob {
        priority,
        ..new_job(job_type)
    }
}

pub fn job_with_tags(job_type: &str, tags: &[&str]) -> NewJob {
    NewJob {
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ..new_job(job_type)
    }
}

fn tag_set(tags: &[&str]) -> BTreeSet<String> {
    tags.iter().map(|t| t.to_string()).collect()
}

/// A1. Claim moves one job to processing
pub async fn claim_marks_processing(store: Arc<dyn JobStore>) {
    let inserted = store.insert(new_job("carrier_sync")).await.unwrap();
    assert_eq!(inserted.status, JobStatus::Pending);
    assert_eq!(inserted.attempts, 0);

    let claimed = store.claim_next(Utc::now()).await.unwrap().unwrap();
    assert_eq!(claimed.id, inserted.id);
    assert_eq!(claimed.status, JobStatus::Processing);
    assert_eq!(claimed.attempts, 1);
    assert!(claimed.locked_at.is_some());
    assert_eq!(claimed.payload, json!({ "carrier_id": 7 }));

    // Nothing else is eligible
    assert!(store.claim_next(Utc::now()).await.unwrap().is_none());
}

/// A2. Priority Then FIFO
pub async fn claim_orders_by_priority_then_fifo(store: Arc<dyn JobStore>) {
    let low = store.insert(job_with_priority("crm_sync", 1)).await.unwrap();
    let first_high = store.insert(job_with_priority("crm_sync", 10)).await.unwrap();
    let second_high = store.insert(job_with_priority("crm_sync", 10)).await.unwrap();

    let order: Vec<JobId> = [
        store.claim_next(Utc::now()).await.unwrap().unwrap().id,
        store.claim_next(Utc::now()).await.unwrap().unwrap().id,
        store.claim_next(Utc::now()).await.unwrap().unwrap().id,
    ]
    .into();

    assert_eq!(order, vec![first_high.id, second_high.id, low.id]);
}

/// A3. Future run_at is not eligible
pub async fn claim_skips_scheduled_jobs(store: Arc<dyn JobStore>) {
    let later = NewJob {
        run_at: Some(Utc::now() + Duration::hours(1)),
        ..new_job("invoice_generation")
    };
    let scheduled = store.insert(later).await.unwrap();

    assert!(store.claim_next(Utc::now()).await.unwrap().is_none());

    let claimed = store
        .claim_next(Utc::now() + Duration::hours(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, scheduled.id);
}

/// B1. At-Most-Once Completion
pub async fn complete_only_from_processing(store: Arc<dyn JobStore>) {
    let job = store.insert(new_job("carrier_sync")).await.unwrap();

    // Not claimed yet
    assert!(store.ack_complete(job.id, Utc::now()).await.unwrap().is_none());

    store.claim_next(Utc::now()).await.unwrap().unwrap();
    let done = store.ack_complete(job.id, Utc::now()).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.completed_at.is_some());
    assert!(done.locked_at.is_none());

    assert!(store.ack_complete(job.id, Utc::now()).await.unwrap().is_none());
}

/// B2. Cancel Wins Over A Late Outcome
pub async fn cancel_wins_over_late_outcome(store: Arc<dyn JobStore>) {
    let job = store.insert(new_job("call_simulation")).await.unwrap();
    store.claim_next(Utc::now()).await.unwrap().unwrap();

    let cancelled = store.cancel(job.id, Utc::now()).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.locked_at.is_none());

    assert!(store.ack_complete(job.id, Utc::now()).await.unwrap().is_none());
    let failed = store
        .ack_fail(job.id, "late".to_string(), FailDisposition::Permanent, Utc::now())
        .await
        .unwrap();
    assert!(failed.is_none());

    let current = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(current.status, JobStatus::Cancelled);
}

/// C1. Retryable Failures Respect The Attempt Budget
pub async fn retryable_failure_uses_attempt_budget(store: Arc<dyn JobStore>) {
    let job = store
        .insert(NewJob {
            max_attempts: 2,
            ..new_job("crm_sync")
        })
        .await
        .unwrap();
    let retry = FailDisposition::Retry { run_at: None };

    store.claim_next(Utc::now()).await.unwrap().unwrap();
    let first = store
        .ack_fail(job.id, "CRM timeout".to_string(), retry, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, JobStatus::Pending);
    assert_eq!(first.attempts, 1);
    assert_eq!(first.error.as_deref(), Some("CRM timeout"));
    assert!(first.locked_at.is_none());
    assert!(first.failed_at.is_none());

    store.claim_next(Utc::now()).await.unwrap().unwrap();
    let second = store
        .ack_fail(job.id, "CRM timeout again".to_string(), retry, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.status, JobStatus::Failed);
    assert_eq!(second.attempts, 2);
    assert_eq!(second.error.as_deref(), Some("CRM timeout again"));
    assert!(second.failed_at.is_some());
}

/// C2. Permanent Failures Skip Remaining Attempts
pub async fn permanent_failure_ends_job(store: Arc<dyn JobStore>) {
    let job = store.insert(new_job("invoice_generation")).await.unwrap();
    store.claim_next(Utc::now()).await.unwrap().unwrap();

    let failed = store
        .ack_fail(job.id, "bad invoice".to_string(), FailDisposition::Permanent, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 1);
}

/// C3. Delayed Retry Reschedules
pub async fn delayed_retry_sets_run_at(store: Arc<dyn JobStore>) {
    let job = store.insert(new_job("balance_sync")).await.unwrap();
    store.claim_next(Utc::now()).await.unwrap().unwrap();

    let later = Utc::now() + Duration::minutes(10);
    let pending = store
        .ack_fail(job.id, "busy".to_string(), FailDisposition::Retry { run_at: Some(later) }, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status, JobStatus::Pending);
    assert!(pending.run_at.is_some());

    assert!(store.claim_next(Utc::now()).await.unwrap().is_none());
}

/// D1. Operator Retry From Failed
pub async fn retry_resets_failed_job(store: Arc<dyn JobStore>) {
    let job = store.insert(new_job("crm_sync")).await.unwrap();
    store.claim_next(Utc::now()).await.unwrap().unwrap();
    store
        .ack_fail(job.id, "down".to_string(), FailDisposition::Permanent, Utc::now())
        .await
        .unwrap();

    let requeued = store.retry(job.id, Utc::now()).await.unwrap();
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.attempts, 0);
    assert!(requeued.error.is_none());
    assert!(requeued.failed_at.is_none());

    assert_eq!(store.claim_next(Utc::now()).await.unwrap().unwrap().id, job.id);
}

/// D2. Operator Retry Is Rejected For Live Jobs
pub async fn retry_rejects_pending_and_processing(store: Arc<dyn JobStore>) {
    let job = store.insert(new_job("crm_sync")).await.unwrap();
    let err = store.retry(job.id, Utc::now()).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidStateTransition { from: JobStatus::Pending, action: "retry", .. }
    ));

    store.claim_next(Utc::now()).await.unwrap().unwrap();
    let err = store.retry(job.id, Utc::now()).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidStateTransition { from: JobStatus::Processing, .. }
    ));

    let err = store.retry(JobId(999_999), Utc::now()).await.unwrap_err();
    assert!(err.is_not_found());
}

/// D3. Completed Jobs Cannot Be Cancelled
pub async fn cancel_rejects_completed(store: Arc<dyn JobStore>) {
    let job = store.insert(new_job("knowledge_base_index")).await.unwrap();
    store.claim_next(Utc::now()).await.unwrap().unwrap();
    store.ack_complete(job.id, Utc::now()).await.unwrap().unwrap();

    let err = store.cancel(job.id, Utc::now()).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidStateTransition { from: JobStatus::Completed, action: "cancel", .. }
    ));
    assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Completed);

    let err = store.cancel(JobId(999_999), Utc::now()).await.unwrap_err();
    assert!(err.is_not_found());
}

/// E1. Reclaim Only Stale Claims
pub async fn reclaim_only_stale_claims(store: Arc<dyn JobStore>) {
    let now = Utc::now();
    let stale = store.insert(new_job("carrier_sync")).await.unwrap();
    let fresh = store.insert(new_job("carrier_sync")).await.unwrap();
    let waiting = store.insert(new_job("carrier_sync")).await.unwrap();

    // One claim 20 minutes ago, one just now
    store.claim_next(now - Duration::minutes(20)).await.unwrap().unwrap();
    store.claim_next(now).await.unwrap().unwrap();

    let reclaimed = store.reclaim_stuck(now - Duration::minutes(15), now).await.unwrap();
    assert_eq!(reclaimed, vec![stale.id]);

    let stale = store.get(stale.id).await.unwrap().unwrap();
    assert_eq!(stale.status, JobStatus::Pending);
    assert!(stale.locked_at.is_none());
    assert_eq!(stale.attempts, 1);

    assert_eq!(store.get(fresh.id).await.unwrap().unwrap().status, JobStatus::Processing);
    assert_eq!(store.get(waiting.id).await.unwrap().unwrap().status, JobStatus::Pending);
}

/// E2. Cleanup Removes Only Old Completed Jobs
pub async fn cleanup_removes_old_completed(store: Arc<dyn JobStore>) {
    let now = Utc::now();
    let old = store.insert(new_job("invoice_generation")).await.unwrap();
    let recent = store.insert(new_job("invoice_generation")).await.unwrap();
    let failed = store.insert(new_job("invoice_generation")).await.unwrap();

    // Claimed in insertion order, finished at different ages
    store.claim_next(now).await.unwrap().unwrap();
    store.ack_complete(old.id, now - Duration::days(40)).await.unwrap().unwrap();
    store.claim_next(now).await.unwrap().unwrap();
    store.ack_complete(recent.id, now - Duration::days(5)).await.unwrap().unwrap();
    store.claim_next(now).await.unwrap().unwrap();
    store
        .ack_fail(failed.id, "bad period".to_string(), FailDisposition::Permanent, now - Duration::days(40))
        .await
        .unwrap()
        .unwrap();

    let removed = store.delete_completed_before(now - Duration::days(30)).await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.get(old.id).await.unwrap().is_none());
    assert!(store.get(recent.id).await.unwrap().is_some());
    assert!(store.get(failed.id).await.unwrap().is_some());
}

/// E3. A Reclaimed Job With No Attempts Left Fails Instead Of Running Again
pub async fn reclaimed_exhausted_job_fails_on_claim(store: Arc<dyn JobStore>) {
    let now = Utc::now();
    let job = store
        .insert(NewJob { max_attempts: 1, ..new_job("carrier_sync") })
        .await
        .unwrap();

    store.claim_next(now - Duration::minutes(20)).await.unwrap().unwrap();
    let reclaimed = store.reclaim_stuck(now - Duration::minutes(15), now).await.unwrap();
    assert_eq!(reclaimed, vec![job.id]);

    let pending = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(pending.status, JobStatus::Pending);
    assert_eq!(pending.attempts, 1);

    assert!(store.claim_next(now).await.unwrap().is_none());

    let failed = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.error.as_deref(), Some("Attempts exhausted"));
    assert!(failed.failed_at.is_some());
    assert!(failed.locked_at.is_none());
}

/// E4. Exhausted Jobs Do Not Block Others
pub async fn exhausted_job_is_skipped_for_the_next(store: Arc<dyn JobStore>) {
    let now = Utc::now();
    let spent = store
        .insert(NewJob { max_attempts: 1, ..job_with_priority("carrier_sync", 10) })
        .await
        .unwrap();
    let fresh = store.insert(new_job("crm_sync")).await.unwrap();

    store.claim_next(now - Duration::minutes(20)).await.unwrap().unwrap();
    store
        .ack_fail(spent.id, "carrier API unavailable".to_string(), FailDisposition::Retry { run_at: None }, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.get(spent.id).await.unwrap().unwrap().status, JobStatus::Failed);

    // Force it back to pending with the budget still spent
    store.update(spent.id, JobPatch::new().status(JobStatus::Pending)).await.unwrap();

    let claimed = store.claim_next(now).await.unwrap().unwrap();
    assert_eq!(claimed.id, fresh.id);

    let spent = store.get(spent.id).await.unwrap().unwrap();
    assert_eq!(spent.status, JobStatus::Failed);
    assert_eq!(spent.attempts, 1);
    assert_eq!(spent.error.as_deref(), Some("carrier API unavailable"));
}

/// B3. Unclaim Refunds The Attempt Of The Current Claim Only
pub async fn unclaim_refunds_current_claim(store: Arc<dyn JobStore>) {
    let job = store.insert(new_job("balance_sync")).await.unwrap();
    let claimed = store.claim_next(Utc::now()).await.unwrap().unwrap();
    let claimed_at = claimed.locked_at.unwrap();

    let other_claim = claimed_at - Duration::seconds(1);
    assert!(store.unclaim(job.id, other_claim, Utc::now()).await.unwrap().is_none());
    assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Processing);

    let released = store.unclaim(job.id, claimed_at, Utc::now()).await.unwrap().unwrap();
    assert_eq!(released.status, JobStatus::Pending);
    assert_eq!(released.attempts, 0);
    assert!(released.locked_at.is_none());

    assert!(store.unclaim(job.id, claimed_at, Utc::now()).await.unwrap().is_none());
    let err = store.unclaim(JobId(999_999), claimed_at, Utc::now()).await.unwrap_err();
    assert!(err.is_not_found());
}

/// C4. An Unhandled Job Fails Without Spending An Attempt
pub async fn unhandled_failure_refunds_attempt(store: Arc<dyn JobStore>) {
    let job = store.insert(new_job("unknown_type")).await.unwrap();
    store.claim_next(Utc::now()).await.unwrap().unwrap();

    let failed = store
        .ack_fail(
            job.id,
            "No handler for job type: unknown_type".to_string(),
            FailDisposition::Unhandled,
            Utc::now(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 0);
    assert!(failed.locked_at.is_none());
    assert!(failed.failed_at.is_some());
}

/// F1. Listing Is Newest First And Paginated
pub async fn list_filters_and_paginates(store: Arc<dyn JobStore>) {
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(store.insert(new_job("crm_sync")).await.unwrap().id);
    }
    let carrier = store.insert(new_job("carrier_sync")).await.unwrap();

    let all = store.list(&JobFilter::All, Page::default()).await.unwrap();
    assert_eq!(all.len(), 6);
    assert_eq!(all[0].id, carrier.id);

    let crm = store
        .list(&JobFilter::Type("crm_sync".to_string()), Page::new(Some(2), Some(1)))
        .await
        .unwrap();
    let crm_ids: Vec<JobId> = crm.iter().map(|job| job.id).collect();
    assert_eq!(crm_ids, vec![ids[3], ids[2]]);

    store.claim_next(Utc::now()).await.unwrap().unwrap();
    let processing = store
        .list(&JobFilter::Status(JobStatus::Processing), Page::default())
        .await
        .unwrap();
    assert_eq!(processing.len(), 1);
    assert_eq!(processing[0].id, ids[0]);
}

/// F2. Tag Filters Match All Or Any
pub async fn list_by_tags(store: Arc<dyn JobStore>) {
    let both = store.insert(job_with_tags("invoice_generation", &["billing", "nightly"])).await.unwrap();
    let billing = store.insert(job_with_tags("invoice_generation", &["billing"])).await.unwrap();
    let crm = store.insert(job_with_tags("crm_sync", &["crm"])).await.unwrap();

    let all = JobFilter::Tags { tags: tag_set(&["billing", "nightly"]), mode: TagMatch::All };
    let found: Vec<JobId> = store.list(&all, Page::default()).await.unwrap().iter().map(|j| j.id).collect();
    assert_eq!(found, vec![both.id]);

    let any = JobFilter::Tags { tags: tag_set(&["nightly", "crm"]), mode: TagMatch::Any };
    let found: Vec<JobId> = store.list(&any, Page::default()).await.unwrap().iter().map(|j| j.id).collect();
    assert_eq!(found, vec![crm.id, both.id]);

    let billing_only = JobFilter::Tags { tags: tag_set(&["billing"]), mode: TagMatch::All };
    assert_eq!(store.list(&billing_only, Page::default()).await.unwrap().len(), 2);
    assert!(store.get(billing.id).await.unwrap().is_some());
}

/// G1. Patches Apply Partially
pub async fn update_applies_patch(store: Arc<dyn JobStore>) {
    let job = store.insert(new_job("call_simulation")).await.unwrap();

    let updated = store
        .update(job.id, JobPatch::new().priority(9).tags(["urgent"]).error(Some("note".to_string())))
        .await
        .unwrap();
    assert_eq!(updated.priority, 9);
    assert_eq!(updated.tags, tag_set(&["urgent"]));
    assert_eq!(updated.error.as_deref(), Some("note"));
    assert_eq!(updated.status, JobStatus::Pending);
    assert_eq!(updated.payload, job.payload);

    let cleared = store.update(job.id, JobPatch::new().error(None)).await.unwrap();
    assert!(cleared.error.is_none());
    assert_eq!(cleared.priority, 9);

    let err = store.update(JobId(999_999), JobPatch::new().priority(1)).await.unwrap_err();
    assert!(err.is_not_found());
}

/// G3. Completed Jobs Are Immutable
pub async fn update_rejects_completed(store: Arc<dyn JobStore>) {
    let job = store.insert(new_job("crm_sync")).await.unwrap();
    store.claim_next(Utc::now()).await.unwrap().unwrap();
    store.ack_complete(job.id, Utc::now()).await.unwrap().unwrap();

    let err = store
        .update(job.id, JobPatch::new().status(JobStatus::Pending).payload(json!({ "x": 1 })))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidStateTransition { from: JobStatus::Completed, action: "update", .. }
    ));

    let stored = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.payload, job.payload);
}

/// G2. Counts Per Status
pub async fn counts_by_status(store: Arc<dyn JobStore>) {
    let a = store.insert(new_job("crm_sync")).await.unwrap();
    store.insert(new_job("crm_sync")).await.unwrap();
    store.insert(new_job("crm_sync")).await.unwrap();

    store.claim_next(Utc::now()).await.unwrap().unwrap();
    store.ack_complete(a.id, Utc::now()).await.unwrap().unwrap();
    store.claim_next(Utc::now()).await.unwrap().unwrap();

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.processing, 1);
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.failed, 0);
    assert_eq!(counts.total(), 3);
}
