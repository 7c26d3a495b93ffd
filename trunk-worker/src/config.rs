use std::env;
use std::time::Duration;

use trunk_queue::{LockConfig, ProcessorConfig, QueueConfig, ReclaimerConfig};

/// Everything the worker process reads from its environment
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue: QueueConfig,
    pub processor: ProcessorConfig,
    pub reclaimer: ReclaimerConfig,
    pub lock: LockConfig,

    /// Emit JSON log lines instead of the human-readable format
    pub log_json: bool,

    pub balance_sync_interval: Duration,
    pub cleanup_interval: Duration,

    /// Enqueue a full carrier sync once when the fleet starts
    pub startup_sync: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            processor: ProcessorConfig::default(),
            reclaimer: ReclaimerConfig::default(),
            lock: LockConfig::default(),
            log_json: false,
            balance_sync_interval: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(86_400),
            startup_sync: true,
        }
    }
}

impl WorkerConfig {
    /// Read `QUEUE_*`, `TRUNK_*`, `DATABASE_URL` and `REDIS_URL`
    pub fn from_env() -> Self {
        let balance_sync_secs = env::var("TRUNK_BALANCE_SYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);
        let cleanup_secs = env::var("TRUNK_CLEANUP_INTERVAL_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()
            .unwrap_or(86_400);

        Self {
            queue: QueueConfig::from_env(),
            processor: ProcessorConfig::from_env(),
            reclaimer: ReclaimerConfig::from_env(),
            lock: LockConfig::from_env(),
            log_json: flag("TRUNK_LOG_JSON", false),
            balance_sync_interval: Duration::from_secs(balance_sync_secs),
            cleanup_interval: Duration::from_secs(cleanup_secs),
            startup_sync: flag("TRUNK_STARTUP_SYNC", true),
        }
    }
}

fn flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
