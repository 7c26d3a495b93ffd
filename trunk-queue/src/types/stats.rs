use serde::{Deserialize, Serialize};

use super::JobStatus;

/// Per-status job counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: JobStatus, n: u64) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Processing => self.processing += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Failed => self.failed += n,
            JobStatus::Cancelled => self.cancelled += n,
        }
    }

    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Cancelled => self.cancelled,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }
}

/// Aggregate view served to the admin surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub total: u64,
    /// Completed share of finished jobs, in percent
    pub success_rate: f64,
}

impl From<StatusCounts> for QueueStats {
    fn from(counts: StatusCounts) -> Self {
        let finished = counts.completed + counts.failed;
        let success_rate = if finished == 0 {
            100.0
        } else {
            (counts.completed as f64 / finished as f64) * 100.0
        };

        Self {
            counts,
            total: counts.total(),
            success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_ignores_unfinished_jobs() {
        let mut counts = StatusCounts::default();
        counts.add(JobStatus::Completed, 3);
        counts.add(JobStatus::Failed, 1);
        counts.add(JobStatus::Pending, 10);

        let stats = QueueStats::from(counts);
        assert_eq!(stats.total, 14);
        assert!((stats.success_rate - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_queue_reports_full_success() {
        let stats = QueueStats::from(StatusCounts::default());
        assert_eq!(stats.success_rate, 100.0);
    }
}
