use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{JobFilter, JobId, JobPatch, JobStatus, NewJob, TagMatch};

/// Error recorded when a pending job is found with no attempts left
pub const ATTEMPTS_EXHAUSTED: &str = "Attempts exhausted";

/// Job record - runtime state stored by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier
    pub id: JobId,

    /// Selects the handler
    pub job_type: String,

    /// Opaque handler input, returned unchanged
    pub payload: serde_json::Value,

    pub status: JobStatus,

    /// Executions started so far
    pub attempts: u32,

    pub max_attempts: u32,

    pub priority: i32,

    pub tags: BTreeSet<String>,

    /// Per-attempt execution budget
    pub timeout_ms: Option<u64>,

    /// Last failure message (if any)
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Earliest eligible dispatch time
    pub run_at: Option<DateTime<Utc>>,

    /// Set exactly while the job is processing
    pub locked_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a pending record from a defaulted submission
    pub fn new(id: JobId, job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job_type: job.job_type,
            payload: job.payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: job.max_attempts,
            priority: job.priority,
            tags: job.tags,
            timeout_ms: job.timeout_ms,
            error: None,
            created_at: now,
            updated_at: now,
            run_at: job.run_at,
            locked_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Pending and not scheduled into the future
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.run_at.map_or(true, |run_at| run_at <= now)
    }

    /// Processing with a claim older than `cutoff`
    pub fn is_stuck(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self.locked_at.map_or(false, |locked_at| locked_at < cutoff)
    }

    /// Every allowed attempt has been started
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn matches_tags(&self, tags: &BTreeSet<String>, mode: TagMatch) -> bool {
        match mode {
            TagMatch::All => tags.is_subset(&self.tags),
            TagMatch::Any => !self.tags.is_disjoint(tags),
        }
    }

    pub fn matches(&self, filter: &JobFilter) -> bool {
        match filter {
            JobFilter::All => true,
            JobFilter::Status(status) => self.status == *status,
            JobFilter::Type(job_type) => self.job_type == *job_type,
            JobFilter::Tags { tags, mode } => self.matches_tags(tags, *mode),
        }
    }

    /// Claim for processing
    pub fn start_processing(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.attempts += 1;
        self.locked_at = Some(now);
        self.updated_at = now;
    }

    /// Complete the job successfully
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.locked_at = None;
        self.updated_at = now;
    }

    /// Fail the job permanently
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.failed_at = Some(now);
        self.locked_at = None;
        self.updated_at = now;
    }

    /// Return to pending after a failed attempt
    pub fn schedule_retry(&mut self, error: String, run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.error = Some(error);
        self.locked_at = None;
        if run_at.is_some() {
            self.run_at = run_at;
        }
        self.updated_at = now;
    }

    /// Operator retry: fresh attempt budget
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.attempts = 0;
        self.error = None;
        self.failed_at = None;
        self.locked_at = None;
        self.updated_at = now;
    }

    /// Cancel the job
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Cancelled;
        self.locked_at = None;
        self.updated_at = now;
    }

    /// Fail a pending job whose attempt budget is already spent, keeping the
    /// last recorded error
    pub fn exhaust(&mut self, now: DateTime<Utc>) {
        let error = self.error.take().unwrap_or_else(|| ATTEMPTS_EXHAUSTED.to_string());
        self.fail(error, now);
    }

    /// Undo a claim that never ran: back to pending with the attempt refunded
    pub fn unclaim(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.attempts = self.attempts.saturating_sub(1);
        self.locked_at = None;
        self.updated_at = now;
    }

    /// Release a stale claim; attempts are kept
    pub fn reclaim(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.locked_at = None;
        self.updated_at = now;
    }

    pub fn apply(&mut self, patch: JobPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(attempts) = patch.attempts {
            self.attempts = attempts;
        }
        if let Some(max_attempts) = patch.max_attempts {
            self.max_attempts = max_attempts;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(payload) = patch.payload {
            self.payload = payload;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(run_at) = patch.run_at {
            self.run_at = run_at;
        }
        if let Some(locked_at) = patch.locked_at {
            self.locked_at = locked_at;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
        }
        if let Some(failed_at) = patch.failed_at {
            self.failed_at = failed_at;
        }
        if let Some(error) = patch.error {
            self.error = error;
        }
        self.updated_at = now;
    }
}
