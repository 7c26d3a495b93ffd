use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::JobStatus;

/// Caller-supplied options for a new job. Unset fields take the queue defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Higher values are dispatched first (default 0)
    pub priority: Option<i32>,

    /// Earliest time the job may be claimed
    pub run_at: Option<DateTime<Utc>>,

    /// Allowed execution attempts (default 3)
    pub max_attempts: Option<u32>,

    /// Per-attempt execution budget enforced by the processor
    pub timeout_ms: Option<u64>,

    /// Labels for filtering (default `[job_type]`)
    pub tags: Option<Vec<String>>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }
}

/// Fully-defaulted job submission handed to a store
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub run_at: Option<DateTime<Utc>>,
    pub max_attempts: u32,
    pub timeout_ms: Option<u64>,
    pub tags: BTreeSet<String>,
}

/// Partial update applied by `update_job`.
///
/// Nullable columns use `Option<Option<T>>`: `None` leaves the field alone,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub attempts: Option<u32>,
    pub max_attempts: Option<u32>,
    pub priority: Option<i32>,
    pub payload: Option<serde_json::Value>,
    pub tags: Option<BTreeSet<String>>,
    pub run_at: Option<Option<DateTime<Utc>>>,
    pub locked_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub failed_at: Option<Option<DateTime<Utc>>>,
    pub error: Option<Option<String>>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn run_at(mut self, run_at: Option<DateTime<Utc>>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn locked_at(mut self, locked_at: Option<DateTime<Utc>>) -> Self {
        self.locked_at = Some(locked_at);
        self
    }

    pub fn completed_at(mut self, completed_at: Option<DateTime<Utc>>) -> Self {
        self.completed_at = Some(completed_at);
        self
    }

    pub fn failed_at(mut self, failed_at: Option<DateTime<Utc>>) -> Self {
        self.failed_at = Some(failed_at);
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    /// True when the patch would not change anything
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.attempts.is_none()
            && self.max_attempts.is_none()
            && self.priority.is_none()
            && self.payload.is_none()
            && self.tags.is_none()
            && self.run_at.is_none()
            && self.locked_at.is_none()
            && self.completed_at.is_none()
            && self.failed_at.is_none()
            && self.error.is_none()
    }
}

/// Tag filter semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMatch {
    /// Job carries every filter tag
    All,
    /// Job carries at least one filter tag
    Any,
}

/// Pagination window for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn new(limit: Option<usize>, offset: Option<usize>) -> Self {
        Self {
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Selection applied by list queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFilter {
    All,
    Status(JobStatus),
    Type(String),
    Tags { tags: BTreeSet<String>, mode: TagMatch },
}
