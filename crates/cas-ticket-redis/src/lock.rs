//! Cleaner lock on Redis.

use std::time::Duration;

use async_trait::async_trait;
use cas_ticket::TicketResult;
use cas_ticket::cleaner::LockingStrategy;
use deadpool_redis::Pool;
use redis::Script;
use uuid::Uuid;

use crate::error::RedisStoreResult;

/// Takes the lock if free, or refreshes it if this owner already holds it.
const ACQUIRE_SCRIPT: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then return 1 end
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
  return 1
end
return 0
";

const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

/// Lock held as a single Redis key with an expiry.
///
/// A node that dies mid-sweep blocks other nodes for at most `ttl`.
#[derive(Clone)]
pub struct RedisLockingStrategy {
    pool: Pool,
    key: String,
    owner: String,
    ttl: Duration,
    acquire_script: Script,
    release_script: Script,
}

impl RedisLockingStrategy {
    pub fn new(pool: Pool, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            pool,
            key: key.into(),
            owner: Uuid::new_v4().to_string(),
            ttl,
            acquire_script: Script::new(ACQUIRE_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    /// Unique id of this lock owner.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    async fn try_acquire(&self) -> RedisStoreResult<bool> {
        let mut conn = self.pool.get().await?;
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let acquired: i64 = self
            .acquire_script
            .key(&self.key)
            .arg(&self.owner)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(acquired == 1)
    }

    async fn try_release(&self) -> RedisStoreResult<()> {
        let mut conn = self.pool.get().await?;
        let released: i64 = self
            .release_script
            .key(&self.key)
            .arg(&self.owner)
            .invoke_async(&mut conn)
            .await?;
        if released == 0 {
            tracing::warn!(key = %self.key, "Cleaner lock was not held at release");
        }
        Ok(())
    }
}

impl std::fmt::Debug for RedisLockingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockingStrategy")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LockingStrategy for RedisLockingStrategy {
    async fn acquire(&self) -> TicketResult<bool> {
        Ok(self.try_acquire().await?)
    }

    async fn release(&self) -> TicketResult<()> {
        Ok(self.try_release().await?)
    }
}
