use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::LockBackend;
use crate::QueueResult;

struct Lease {
    token: String,
    expires_at: Instant,
}

/// In-process lock backend; only excludes holders within one process
#[derive(Default)]
pub struct MemoryLockBackend {
    leases: Mutex<HashMap<String, Lease>>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored leases, expired ones included until the next acquire prunes them
    pub fn stored(&self) -> usize {
        self.leases.lock().len()
    }

    /// Live leases
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.leases
            .lock()
            .values()
            .filter(|lease| lease.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Expiry used when `now + ttl` is not representable; about 30 years out
fn far_future(now: Instant) -> Instant {
    now + Duration::from_secs(86400 * 365 * 30)
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> QueueResult<bool> {
        let now = Instant::now();
        let mut leases = self.leases.lock();

        // Drop expired leases so distinct keys do not accumulate
        leases.retain(|_, lease| lease.expires_at > now);
        if leases.contains_key(key) {
            return Ok(false);
        }

        leases.insert(
            key.to_string(),
            Lease {
                token: token.to_string(),
                expires_at: now.checked_add(ttl).unwrap_or_else(|| far_future(now)),
            },
        );
        Ok(true)
    }

    async fn delete_if_owner(&self, key: &str, token: &str) -> QueueResult<bool> {
        let now = Instant::now();
        let mut leases = self.leases.lock();

        match leases.get(key) {
            Some(lease) if lease.token == token && lease.expires_at > now => {
                leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
