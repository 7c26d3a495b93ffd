//! Named, time-bounded exclusive leases for singleton work across processes.
//!
//! The lock is independent of job execution: callers take it around periodic
//! tasks that must run on one instance at a time.

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{config::LockConfig, types::LeaseToken, QueueError, QueueResult};

pub use memory::MemoryLockBackend;

/// Key/value primitives a lock service must provide atomically
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Store `token` under `key` with expiry `ttl` unless the key exists.
    /// Returns whether the value was stored.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> QueueResult<bool>;

    /// Delete `key` only if it still holds `token`
    async fn delete_if_owner(&self, key: &str, token: &str) -> QueueResult<bool>;

    fn name(&self) -> &'static str;
}

/// Exclusive lease façade over a [`LockBackend`].
///
/// Keys are namespaced with a prefix (`lock:` by default). Each instance owns a
/// holder token, so `release` never removes a lease another holder took after
/// ours expired.
#[derive(Clone)]
pub struct DistributedLock {
    backend: Arc<dyn LockBackend>,
    prefix: String,
    holder: LeaseToken,
}

impl DistributedLock {
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self {
            backend,
            prefix: "lock:".to_string(),
            holder: LeaseToken::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLockBackend::new()))
    }

    /// Select the backend named by `config`
    pub async fn open(config: &LockConfig) -> QueueResult<Self> {
        let backend = open_backend(config).await?;
        info!(backend = backend.name(), "Distributed lock ready");
        Ok(Self::new(backend).with_prefix(config.key_prefix.clone()))
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Holder token stored as the lease value
    pub fn holder(&self) -> &LeaseToken {
        &self.holder
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Try to take `key` for `ttl_seconds`. Returns `false` if someone holds it.
    pub async fn acquire(&self, key: &str, ttl_seconds: u64) -> QueueResult<bool> {
        if ttl_seconds == 0 {
            return Err(QueueError::Validation("lock ttl must be at least one second".to_string()));
        }

        let acquired = self
            .backend
            .set_if_absent(&self.namespaced(key), self.holder.as_str(), Duration::from_secs(ttl_seconds))
            .await?;

        debug!(key, ttl_seconds, acquired, "Lock acquire");
        Ok(acquired)
    }

    /// Drop our lease on `key` before it expires. Returns `false` if we no longer held it.
    pub async fn release(&self, key: &str) -> QueueResult<bool> {
        let released = self
            .backend
            .delete_if_owner(&self.namespaced(key), self.holder.as_str())
            .await?;

        if !released {
            debug!(key, "Lock was not held at release");
        }
        Ok(released)
    }

    /// Run `task` only if `key` can be acquired, releasing afterwards.
    ///
    /// Returns `None` without polling `task` when another holder has the lease.
    pub async fn with_lock<F, T>(&self, key: &str, ttl_seconds: u64, task: F) -> QueueResult<Option<T>>
    where
        F: Future<Output = T>,
    {
        if !self.acquire(key, ttl_seconds).await? {
            return Ok(None);
        }

        let output = task.await;
        if let Err(e) = self.release(key).await {
            warn!(key, "Failed to release lock, it will expire: {}", e);
        }
        Ok(Some(output))
    }
}

async fn open_backend(config: &LockConfig) -> QueueResult<Arc<dyn LockBackend>> {
    match config.redis_url.as_deref() {
        Some(url) => open_redis(url).await,
        None => Ok(Arc::new(MemoryLockBackend::new())),
    }
}

#[cfg(feature = "redis")]
async fn open_redis(url: &str) -> QueueResult<Arc<dyn LockBackend>> {
    Ok(Arc::new(redis::RedisLockBackend::connect(url).await?))
}

#[cfg(not(feature = "redis"))]
async fn open_redis(_url: &str) -> QueueResult<Arc<dyn LockBackend>> {
    Err(QueueError::Validation(
        "a Redis URL is configured but trunk-queue was built without the `redis` feature".to_string(),
    ))
}
