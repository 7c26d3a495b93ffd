use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use super::LiveMetrics;
use crate::types::{JobEvent, JobId, JobRecord};

/// Job event stream plus live counters, shared by the queue, processor and reclaimer
#[derive(Clone)]
pub struct ObservabilityLayer {
    event_broadcaster: broadcast::Sender<JobEvent>,
    metrics: Arc<LiveMetrics>,
}

impl ObservabilityLayer {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (event_broadcaster, _) = broadcast::channel(capacity.max(1));
        Self {
            event_broadcaster,
            metrics: Arc::new(LiveMetrics::new()),
        }
    }

    fn emit(&self, event: JobEvent) {
        debug!(job_id = %event.job_id(), event = event.event_name(), "Job event");
        // No subscribers is fine
        let _ = self.event_broadcaster.send(event);
    }

    pub fn record_job_enqueued(&self, job: &JobRecord) {
        self.metrics.increment_jobs_enqueued(&job.job_type);
        self.emit(JobEvent::Enqueued {
            job_id: job.id,
            job_type: job.job_type.clone(),
            at: job.created_at,
        });
    }

    pub fn record_job_claimed(&self, job: &JobRecord) {
        self.emit(JobEvent::Claimed {
            job_id: job.id,
            attempt: job.attempts,
            at: job.locked_at.unwrap_or_else(Utc::now),
        });
    }

    pub fn record_job_completed(&self, job: &JobRecord, elapsed: Duration) {
        self.metrics.increment_jobs_completed(&job.job_type);
        self.metrics.record_execution_time(&job.job_type, elapsed);
        self.emit(JobEvent::Completed {
            job_id: job.id,
            at: job.completed_at.unwrap_or_else(Utc::now),
        });
    }

    pub fn record_job_retrying(&self, job: &JobRecord, error: &str, run_at: Option<DateTime<Utc>>) {
        self.metrics.increment_jobs_retried(&job.job_type);
        self.emit(JobEvent::Retrying {
            job_id: job.id,
            error: error.to_string(),
            run_at,
            at: job.updated_at,
        });
    }

    pub fn record_job_failed(&self, job: &JobRecord, error: &str) {
        self.metrics.increment_jobs_failed(&job.job_type);
        self.emit(JobEvent::Failed {
            job_id: job.id,
            error: error.to_string(),
            at: job.failed_at.unwrap_or_else(Utc::now),
        });
    }

    pub fn record_job_cancelled(&self, job: &JobRecord) {
        self.metrics.increment_jobs_canceled(&job.job_type);
        self.emit(JobEvent::Cancelled {
            job_id: job.id,
            at: job.updated_at,
        });
    }

    pub fn record_job_requeued(&self, job: &JobRecord) {
        self.emit(JobEvent::Requeued {
            job_id: job.id,
            at: job.updated_at,
        });
    }

    pub fn record_jobs_reclaimed(&self, ids: &[JobId], at: DateTime<Utc>) {
        self.metrics.increment_jobs_reclaimed(ids.len() as u64);
        for id in ids {
            self.emit(JobEvent::Reclaimed { job_id: *id, at });
        }
    }

    pub fn event_stream(&self) -> broadcast::Receiver<JobEvent> {
        self.event_broadcaster.subscribe()
    }

    pub fn metrics(&self) -> &LiveMetrics {
        &self.metrics
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}
