use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

/// Samples kept per job type for execution-time statistics
const MAX_SAMPLES: usize = 1000;

/// Live counters for queue activity since process start
pub struct LiveMetrics {
    jobs_enqueued: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_canceled: AtomicU64,
    jobs_reclaimed: AtomicU64,

    job_type_metrics: RwLock<HashMap<String, JobTypeMetrics>>,
    performance: RwLock<PerformanceMetrics>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self {
            jobs_enqueued: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            jobs_canceled: AtomicU64::new(0),
            jobs_reclaimed: AtomicU64::new(0),
            job_type_metrics: RwLock::new(HashMap::new()),
            performance: RwLock::new(PerformanceMetrics::new()),
        }
    }

    fn per_type(&self, job_type: &str, update: impl FnOnce(&mut JobTypeMetrics)) {
        let mut metrics = self.job_type_metrics.write();
        update(metrics.entry(job_type.to_string()).or_default());
    }

    pub fn increment_jobs_enqueued(&self, job_type: &str) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
        self.per_type(job_type, |m| m.enqueued += 1);
    }

    pub fn increment_jobs_completed(&self, job_type: &str) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.per_type(job_type, |m| m.completed += 1);
    }

    pub fn increment_jobs_failed(&self, job_type: &str) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.per_type(job_type, |m| m.failed += 1);
    }

    pub fn increment_jobs_retried(&self, job_type: &str) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
        self.per_type(job_type, |m| m.retried += 1);
    }

    pub fn increment_jobs_canceled(&self, job_type: &str) {
        self.jobs_canceled.fetch_add(1, Ordering::Relaxed);
        self.per_type(job_type, |m| m.canceled += 1);
    }

    pub fn increment_jobs_reclaimed(&self, count: u64) {
        self.jobs_reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn jobs_enqueued(&self) -> u64 {
        self.jobs_enqueued.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_retried(&self) -> u64 {
        self.jobs_retried.load(Ordering::Relaxed)
    }

    pub fn jobs_canceled(&self) -> u64 {
        self.jobs_canceled.load(Ordering::Relaxed)
    }

    pub fn jobs_reclaimed(&self) -> u64 {
        self.jobs_reclaimed.load(Ordering::Relaxed)
    }

    pub fn job_type_metrics(&self, job_type: &str) -> Option<JobTypeMetrics> {
        self.job_type_metrics.read().get(job_type).cloned()
    }

    pub fn record_execution_time(&self, job_type: &str, duration: Duration) {
        self.performance.write().record_execution_time(job_type, duration);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            global: GlobalMetrics {
                jobs_enqueued: self.jobs_enqueued(),
                jobs_completed: self.jobs_completed(),
                jobs_failed: self.jobs_failed(),
                jobs_retried: self.jobs_retried(),
                jobs_canceled: self.jobs_canceled(),
                jobs_reclaimed: self.jobs_reclaimed(),
            },
            job_types: self.job_type_metrics.read().clone(),
            execution: self.performance.read().summary(),
        }
    }
}

impl Default for LiveMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for one job type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobTypeMetrics {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub canceled: u64,
}

impl JobTypeMetrics {
    /// Completed share of finished jobs, in percent
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            100.0
        } else {
            (self.completed as f64 / finished as f64) * 100.0
        }
    }
}

/// Handler execution times per job type
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    execution_times: HashMap<String, Vec<Duration>>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution_time(&mut self, job_type: &str, duration: Duration) {
        let times = self.execution_times.entry(job_type.to_string()).or_default();
        times.push(duration);
        if times.len() > MAX_SAMPLES {
            times.remove(0);
        }
    }

    pub fn average_execution_time(&self, job_type: &str) -> Option<Duration> {
        let times = self.execution_times.get(job_type)?;
        if times.is_empty() {
            return None;
        }
        let total: Duration = times.iter().sum();
        Some(total / times.len() as u32)
    }

    /// Nearest-rank percentile over the retained samples
    pub fn percentile_execution_time(&self, job_type: &str, percentile: f64) -> Option<Duration> {
        let times = self.execution_times.get(job_type)?;
        if times.is_empty() {
            return None;
        }

        let mut sorted = times.clone();
        sorted.sort();
        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted.get(index).copied()
    }

    /// Average and p95 for every job type with samples
    pub fn summary(&self) -> HashMap<String, ExecutionTimes> {
        self.execution_times
            .iter()
            .filter_map(|(job_type, times)| {
                let average = self.average_execution_time(job_type)?;
                let p95 = self.percentile_execution_time(job_type, 95.0)?;
                Some((
                    job_type.clone(),
                    ExecutionTimes {
                        samples: times.len(),
                        average,
                        p95,
                    },
                ))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionTimes {
    pub samples: usize,
    pub average: Duration,
    pub p95: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub global: GlobalMetrics,
    pub job_types: HashMap<String, JobTypeMetrics>,
    pub execution: HashMap<String, ExecutionTimes>,
}

impl MetricsSnapshot {
    /// Log the totals and per-type handler times at `info`
    pub fn log_summary(&self) {
        let global = &self.global;
        info!(
            enqueued = global.jobs_enqueued,
            completed = global.jobs_completed,
            failed = global.jobs_failed,
            reclaimed = global.jobs_reclaimed,
            success_rate = %format!("{:.1}%", global.success_rate()),
            retry_rate = %format!("{:.1}%", global.retry_rate()),
            "Queue metrics"
        );

        let mut job_types: Vec<_> = self.execution.iter().collect();
        job_types.sort_by(|a, b| a.0.cmp(b.0));
        for (job_type, times) in job_types {
            info!(
                job_type = %job_type,
                samples = times.samples,
                average_ms = times.average.as_millis() as u64,
                p95_ms = times.p95.as_millis() as u64,
                "Handler execution times"
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GlobalMetrics {
    pub jobs_enqueued: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_canceled: u64,
    pub jobs_reclaimed: u64,
}

impl GlobalMetrics {
    pub fn success_rate(&self) -> f64 {
        let finished = self.jobs_completed + self.jobs_failed;
        if finished == 0 {
            100.0
        } else {
            (self.jobs_completed as f64 / finished as f64) * 100.0
        }
    }

    pub fn retry_rate(&self) -> f64 {
        if self.jobs_enqueued == 0 {
            0.0
        } else {
            (self.jobs_retried as f64 / self.jobs_enqueued as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_per_type() {
        let metrics = LiveMetrics::new();
        metrics.increment_jobs_enqueued("carrier_sync");
        metrics.increment_jobs_completed("carrier_sync");
        metrics.increment_jobs_enqueued("crm_sync");
        metrics.increment_jobs_failed("crm_sync");

        assert_eq!(metrics.jobs_enqueued(), 2);
        let carrier = metrics.job_type_metrics("carrier_sync").unwrap();
        assert_eq!(carrier.completed, 1);
        assert_eq!(carrier.success_rate(), 100.0);
        assert_eq!(metrics.job_type_metrics("crm_sync").unwrap().success_rate(), 0.0);
    }

    #[test]
    fn snapshot_summarizes_execution_times() {
        let metrics = LiveMetrics::new();
        for ms in [100, 200, 300] {
            metrics.record_execution_time("invoice_generation", Duration::from_millis(ms));
        }

        let snapshot = metrics.snapshot();
        let times = snapshot.execution["invoice_generation"];
        assert_eq!(times.samples, 3);
        assert_eq!(times.average, Duration::from_millis(200));
        assert_eq!(times.p95, Duration::from_millis(300));
        assert!(!snapshot.execution.contains_key("crm_sync"));
    }

    #[test]
    #[tracing_test::traced_test]
    fn summary_is_logged() {
        let metrics = LiveMetrics::new();
        metrics.increment_jobs_enqueued("carrier_sync");
        metrics.increment_jobs_retried("carrier_sync");
        metrics.increment_jobs_completed("carrier_sync");
        metrics.record_execution_time("carrier_sync", Duration::from_millis(40));

        metrics.snapshot().log_summary();

        assert!(logs_contain("Queue metrics"));
        assert!(logs_contain("retry_rate=100.0%"));
        assert!(logs_contain("Handler execution times"));
        assert!(logs_contain("average_ms=40"));
    }

    #[test]
    fn global_rates() {
        let global = GlobalMetrics {
            jobs_enqueued: 100,
            jobs_completed: 80,
            jobs_failed: 20,
            jobs_retried: 5,
            jobs_canceled: 0,
            jobs_reclaimed: 0,
        };
        assert_eq!(global.success_rate(), 80.0);
        assert_eq!(global.retry_rate(), 5.0);
    }
}
