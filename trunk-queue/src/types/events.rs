use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Minimal stable event protocol for structured observability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobEvent {
    /// Job was enqueued
    Enqueued {
        job_id: JobId,
        job_type: String,
        at: DateTime<Utc>,
    },

    /// Job was claimed by a worker
    Claimed {
        job_id: JobId,
        attempt: u32,
        at: DateTime<Utc>,
    },

    /// Attempt failed; job is pending again
    Retrying {
        job_id: JobId,
        error: String,
        run_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },

    /// Job completed successfully
    Completed {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Job failed permanently
    Failed {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },

    /// Job was cancelled
    Cancelled {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Operator retry moved the job back to pending
    Requeued {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Stale claim released by the reclaimer
    Reclaimed {
        job_id: JobId,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Claimed { .. } => "claimed",
            Self::Retrying { .. } => "retrying",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Requeued { .. } => "requeued",
            Self::Reclaimed { .. } => "reclaimed",
        }
    }

    /// Get the job ID from any event
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Enqueued { job_id, .. }
            | Self::Claimed { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id, .. }
            | Self::Requeued { job_id, .. }
            | Self::Reclaimed { job_id, .. } => *job_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. }
            | Self::Claimed { at, .. }
            | Self::Retrying { at, .. }
            | Self::Completed { at, .. }
            | Self::Failed { at, .. }
            | Self::Cancelled { at, .. }
            | Self::Requeued { at, .. }
            | Self::Reclaimed { at, .. } => at,
        }
    }
}
