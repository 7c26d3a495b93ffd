use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Storage and enqueue defaults for a [`JobQueue`](crate::JobQueue)
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Postgres connection string; `None` selects the in-process store
    pub database_url: Option<String>,

    /// Pool size for the Postgres store
    pub max_connections: u32,

    /// Applied when a job is enqueued without `max_attempts`
    pub default_max_attempts: u32,

    /// Applied when a job is enqueued without `priority`
    pub default_priority: i32,

    /// Age after which completed jobs are purged by periodic cleanup
    pub cleanup_after_days: u32,

    /// Capacity of the job event broadcast channel
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            default_max_attempts: 3,
            default_priority: 0,
            cleanup_after_days: 30,
            event_capacity: 1024,
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `DATABASE_URL` and the `QUEUE_*` variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_opt("DATABASE_URL"),
            max_connections: env_or("QUEUE_DB_MAX_CONNECTIONS", defaults.max_connections),
            default_max_attempts: env_or("QUEUE_DEFAULT_MAX_ATTEMPTS", defaults.default_max_attempts),
            default_priority: env_or("QUEUE_DEFAULT_PRIORITY", defaults.default_priority),
            cleanup_after_days: env_or("QUEUE_CLEANUP_AFTER_DAYS", defaults.cleanup_after_days),
            event_capacity: defaults.event_capacity,
        }
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    pub fn with_default_priority(mut self, priority: i32) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn with_cleanup_after_days(mut self, days: u32) -> Self {
        self.cleanup_after_days = days;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

/// Delay applied before a failed attempt becomes eligible again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Retry on the next poll tick
    #[default]
    Immediate,

    /// `base * 2^(attempt - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl RetryPolicy {
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self::Exponential { base, max }
    }

    /// Backoff after the given (1-based) attempt failed
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Immediate => Duration::ZERO,
            Self::Exponential { base, max } => {
                let factor = 2_u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                base.checked_mul(factor).map_or(max, |delay| delay.min(max))
            }
        }
    }

    /// `run_at` for the next attempt; `None` means eligible immediately
    pub fn retry_at(&self, attempt: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let delay = self.delay(attempt);
        if delay.is_zero() {
            return None;
        }
        chrono::Duration::from_std(delay).ok().map(|delay| now + delay)
    }
}

/// Polling and concurrency settings for a [`Processor`](crate::Processor)
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Time between scheduler ticks
    pub poll_interval: Duration,

    /// Worker tasks, and so the most jobs in flight at once
    pub concurrency: usize,

    pub retry_policy: RetryPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            concurrency: 4,
            retry_policy: RetryPolicy::Immediate,
        }
    }
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retry_policy = match env_opt("QUEUE_RETRY_BACKOFF").as_deref() {
            Some("exponential") => RetryPolicy::exponential(
                Duration::from_secs(env_or("QUEUE_BASE_RETRY_BACKOFF_SECS", 1)),
                Duration::from_secs(env_or("QUEUE_MAX_RETRY_BACKOFF_SECS", 3600)),
            ),
            _ => RetryPolicy::Immediate,
        };

        Self {
            poll_interval: Duration::from_millis(env_or("QUEUE_POLL_INTERVAL_MS", 1000)),
            concurrency: env_or("QUEUE_CONCURRENCY", defaults.concurrency).max(1),
            retry_policy,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Sweep settings for a [`StuckJobReclaimer`](crate::StuckJobReclaimer)
#[derive(Debug, Clone)]
pub struct ReclaimerConfig {
    pub interval: Duration,

    /// Processing jobs claimed longer ago than this are presumed abandoned
    pub stuck_after_minutes: u32,
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stuck_after_minutes: 15,
        }
    }
}

impl ReclaimerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: Duration::from_secs(env_or("QUEUE_RECLAIM_INTERVAL_SECS", 60)),
            stuck_after_minutes: env_or("QUEUE_STUCK_AFTER_MINUTES", defaults.stuck_after_minutes),
        }
    }
}

/// Backing service for [`DistributedLock`](crate::DistributedLock)
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Redis connection string; `None` selects the in-process lock
    pub redis_url: Option<String>,

    /// Namespace prepended to every lock key
    pub key_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "lock:".to_string(),
        }
    }
}

impl LockConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: env_opt("REDIS_URL"),
            key_prefix: env_opt("TRUNK_LOCK_PREFIX").unwrap_or_else(|| "lock:".to_string()),
        }
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}
