use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::info;

use super::LockBackend;
use crate::QueueResult;

/// Delete the key only while it still holds our token
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lock backend on a shared Redis instance
pub struct RedisLockBackend {
    conn: ConnectionManager,
    release: Script,
}

impl RedisLockBackend {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    pub async fn connect(url: &str) -> QueueResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis lock service");
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn delete_if_owner(&self, key: &str, token: &str) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        Ok(deleted == 1)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
