//! Redis ticket store.
//!
//! # Key Layout
//!
//! With the default `cas:` prefix:
//!
//! | Key | Type | Content |
//! |-----|------|---------|
//! | `cas:ticket:{key}` | hash | `kind`, `parent`, `principal`, `version`, `expires_at`, `body` |
//! | `cas:tickets` | sorted set | every record key, score 0, ordered lexically for paging |
//! | `cas:kind:{Kind}` | set | record keys of one ticket kind |
//! | `cas:children:{parent}` | set | record keys granted by `parent` |
//! | `cas:principal:{principal}` | set | granting-ticket keys of a principal |
//!
//! # Implementation Notes
//!
//! - Conditional updates and removals run as Lua scripts, so the version
//!   check and the write are one atomic step on the server
//! - Kind, parent and principal of a record never change after insertion;
//!   updates only rewrite `version`, `body` and `expires_at`
//! - Every key a script touches is passed in `KEYS`. On Redis Cluster,
//!   give the prefix a hash tag (`{cas}:`) so all keys share one slot
//! - Records carry no Redis TTL. Expired tickets are reclaimed by the
//!   registry cleaner, which keeps the secondary sets exact

use std::fmt;

use async_trait::async_trait;
use cas_ticket::TicketResult;
use cas_ticket::model::TicketKind;
use cas_ticket::store::{TicketRecord, TicketStore};
use deadpool_redis::{Connection, Pool};
use redis::{AsyncCommands, Script};
use time::OffsetDateTime;

use crate::error::{RedisStoreError, RedisStoreResult};

/// Rewrites body and expiry if the record exists, optionally checking its
/// version first.
///
/// KEYS[1] record hash; ARGV[1] expected version or '', ARGV[2] body,
/// ARGV[3] expiry in unix milliseconds or ''.
const UPDATE_SCRIPT: &str = r"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then return 0 end
if ARGV[1] ~= '' and tonumber(current) ~= tonumber(ARGV[1]) then return 0 end
redis.call('HSET', KEYS[1], 'version', tonumber(current) + 1, 'body', ARGV[2])
if ARGV[3] == '' then
  redis.call('HDEL', KEYS[1], 'expires_at')
else
  redis.call('HSET', KEYS[1], 'expires_at', ARGV[3])
end
return 1
";

/// Removes a record and its index entries, optionally checking its version.
///
/// KEYS[1] record hash, KEYS[2] key index, KEYS[3] kind set, then the
/// children set if ARGV[4] is set and the principal set if ARGV[5] is set.
/// ARGV[1] record key, ARGV[2] expected version or '', ARGV[3..5] the kind,
/// parent and principal the caller read. Returns -1 when those no longer
/// match the stored record.
const REMOVE_SCRIPT: &str = r"
local fields = redis.call('HMGET', KEYS[1], 'version', 'kind', 'parent', 'principal')
if not fields[1] then return 0 end
if ARGV[2] ~= '' and tonumber(fields[1]) ~= tonumber(ARGV[2]) then return 0 end
if fields[2] ~= ARGV[3] or (fields[3] or '') ~= ARGV[4] or (fields[4] or '') ~= ARGV[5] then
  return -1
end
redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('SREM', KEYS[3], ARGV[1])
local slot = 4
if ARGV[4] ~= '' then
  redis.call('SREM', KEYS[slot], ARGV[1])
  slot = slot + 1
end
if ARGV[5] ~= '' then redis.call('SREM', KEYS[slot], ARGV[1]) end
return 1
";

/// Attempts of a removal whose record is replaced under it.
const REMOVE_ATTEMPTS: usize = 3;

const RECORD_FIELDS: [&str; 6] = ["kind", "parent", "principal", "version", "expires_at", "body"];

type RawRecord = (
    Option<String>,
    Option<String>,
    Option<String>,
    Option<u64>,
    Option<i64>,
    Option<Vec<u8>>,
);

/// Ticket store on a Redis server.
#[derive(Clone)]
pub struct RedisTicketStore {
    pool: Pool,
    prefix: String,
    update_script: Script,
    remove_script: Script,
}

impl RedisTicketStore {
    /// Creates a store writing keys under `prefix`.
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            update_script: Script::new(UPDATE_SCRIPT),
            remove_script: Script::new(REMOVE_SCRIPT),
        }
    }

    fn record_key(&self, key: &str) -> String {
        format!("{}ticket:{key}", self.prefix)
    }

    fn index_key(&self) -> String {
        format!("{}tickets", self.prefix)
    }

    fn kind_key(&self, kind: TicketKind) -> String {
        format!("{}kind:{}", self.prefix, kind.as_str())
    }

    fn children_key(&self, parent_key: &str) -> String {
        format!("{}children:{parent_key}", self.prefix)
    }

    fn principal_key(&self, principal_key: &str) -> String {
        format!("{}principal:{principal_key}", self.prefix)
    }

    async fn connection(&self) -> RedisStoreResult<Connection> {
        Ok(self.pool.get().await?)
    }

    async fn insert_record(&self, record: TicketRecord) -> RedisStoreResult<()> {
        let mut conn = self.connection().await?;
        let hash = self.record_key(&record.key);

        let mut hset = redis::cmd("HSET");
        hset.arg(&hash)
            .arg("kind")
            .arg(record.kind.as_str())
            .arg("version")
            .arg(1)
            .arg("body")
            .arg(&record.body);
        if let Some(parent) = &record.parent_key {
            hset.arg("parent").arg(parent);
        }
        if let Some(principal) = &record.principal_key {
            hset.arg("principal").arg(principal);
        }
        if let Some(millis) = record.expires_at.and_then(to_millis) {
            hset.arg("expires_at").arg(millis);
        }

        let mut pipe = redis::pipe();
        pipe.atomic().del(&hash).ignore();
        pipe.add_command(hset).ignore();
        pipe.zadd(self.index_key(), &record.key, 0).ignore();
        pipe.sadd(self.kind_key(record.kind), &record.key).ignore();
        if let Some(parent) = &record.parent_key {
            pipe.sadd(self.children_key(parent), &record.key).ignore();
        }
        if let Some(principal) = &record.principal_key {
            pipe.sadd(self.principal_key(principal), &record.key).ignore();
        }
        let () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn update_record(&self, record: &TicketRecord, expected_version: Option<u64>) -> RedisStoreResult<bool> {
        let mut conn = self.connection().await?;
        let expected = expected_version.map(|v| v.to_string()).unwrap_or_default();
        let expires_at = record
            .expires_at
            .and_then(to_millis)
            .map(|m| m.to_string())
            .unwrap_or_default();

        let updated: i64 = self
            .update_script
            .key(self.record_key(&record.key))
            .arg(expected)
            .arg(&record.body)
            .arg(expires_at)
            .invoke_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn remove_record(&self, key: &str, expected_version: Option<u64>) -> RedisStoreResult<bool> {
        let mut conn = self.connection().await?;
        let hash = self.record_key(key);
        let expected = expected_version.map(|v| v.to_string()).unwrap_or_default();

        for _ in 0..REMOVE_ATTEMPTS {
            let (kind, parent, principal): (Option<String>, Option<String>, Option<String>) =
                redis::cmd("HMGET")
                    .arg(&hash)
                    .arg(&["kind", "parent", "principal"][..])
                    .query_async(&mut conn)
                    .await?;
            let Some(kind) = kind else {
                return Ok(false);
            };

            let mut invocation = self.remove_script.prepare_invoke();
            invocation
                .key(&hash)
                .key(self.index_key())
                .key(format!("{}kind:{kind}", self.prefix));
            if let Some(parent) = &parent {
                invocation.key(self.children_key(parent));
            }
            if let Some(principal) = &principal {
                invocation.key(self.principal_key(principal));
            }
            invocation
                .arg(key)
                .arg(&expected)
                .arg(&kind)
                .arg(parent.as_deref().unwrap_or_default())
                .arg(principal.as_deref().unwrap_or_default());

            let outcome: i64 = invocation.invoke_async(&mut conn).await?;
            if outcome >= 0 {
                return Ok(outcome == 1);
            }
            tracing::debug!(key = %key, "Ticket record replaced during removal, retrying");
        }
        Err(RedisStoreError::Contended(key.to_string()))
    }

    /// Loads records for `keys`, skipping keys whose record is gone.
    async fn load_many(&self, keys: &[String]) -> RedisStoreResult<Vec<TicketRecord>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("HMGET").arg(self.record_key(key)).arg(&RECORD_FIELDS[..]);
        }
        let raws: Vec<RawRecord> = pipe.query_async(&mut conn).await?;

        let mut records = Vec::with_capacity(keys.len());
        for (key, raw) in keys.iter().zip(raws) {
            match into_record(key, raw)? {
                Some(record) => records.push(record),
                None => tracing::debug!(key = %key, "Indexed ticket record is gone"),
            }
        }
        Ok(records)
    }

    async fn members(&self, set: String) -> RedisStoreResult<Vec<TicketRecord>> {
        let mut conn = self.connection().await?;
        let mut keys: Vec<String> = conn.smembers(set).await?;
        keys.sort_unstable();
        self.load_many(&keys).await
    }

    async fn page_records(&self, after: Option<&str>, limit: usize) -> RedisStoreResult<Vec<TicketRecord>> {
        let mut conn = self.connection().await?;
        let min = after.map_or_else(|| "-".to_string(), |after| format!("({after}"));
        let keys: Vec<String> = redis::cmd("ZRANGEBYLEX")
            .arg(self.index_key())
            .arg(min)
            .arg("+")
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;
        self.load_many(&keys).await
    }

    async fn remove_every_record(&self) -> RedisStoreResult<u64> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn.zrange(self.index_key(), 0, -1).await?;
        drop(conn);

        let mut removed = 0;
        for key in &keys {
            if self.remove_record(key, None).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn count_records(&self, kind: Option<TicketKind>) -> RedisStoreResult<u64> {
        let mut conn = self.connection().await?;
        let count: u64 = match kind {
            None => conn.zcard(self.index_key()).await?,
            Some(kind) => conn.scard(self.kind_key(kind)).await?,
        };
        Ok(count)
    }
}

impl fmt::Debug for RedisTicketStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTicketStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn to_millis(at: OffsetDateTime) -> Option<i64> {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).ok()
}

fn into_record(key: &str, raw: RawRecord) -> RedisStoreResult<Option<TicketRecord>> {
    let (kind, parent_key, principal_key, version, expires_at, body) = raw;
    let (kind, version, body) = match (kind, version, body) {
        (None, None, None) => return Ok(None),
        (Some(kind), Some(version), Some(body)) => (kind, version, body),
        _ => return Err(RedisStoreError::corrupt(key, "missing kind, version or body")),
    };
    let kind = kind
        .parse::<TicketKind>()
        .map_err(|e| RedisStoreError::corrupt(key, e))?;
    let expires_at = expires_at
        .and_then(|ms| OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok());

    Ok(Some(TicketRecord {
        key: key.to_string(),
        kind,
        parent_key,
        principal_key,
        version,
        expires_at,
        body,
    }))
}

#[async_trait]
impl TicketStore for RedisTicketStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn insert(&self, record: TicketRecord) -> TicketResult<()> {
        Ok(self.insert_record(record).await?)
    }

    async fn load(&self, key: &str) -> TicketResult<Option<TicketRecord>> {
        let mut records = self.load_many(&[key.to_string()]).await?;
        Ok(records.pop())
    }

    async fn replace(&self, record: TicketRecord) -> TicketResult<bool> {
        Ok(self.update_record(&record, None).await?)
    }

    async fn compare_and_swap(&self, record: TicketRecord, expected_version: u64) -> TicketResult<bool> {
        Ok(self.update_record(&record, Some(expected_version)).await?)
    }

    async fn remove(&self, key: &str) -> TicketResult<bool> {
        Ok(self.remove_record(key, None).await?)
    }

    async fn remove_if_version(&self, key: &str, expected_version: u64) -> TicketResult<bool> {
        Ok(self.remove_record(key, Some(expected_version)).await?)
    }

    async fn remove_all(&self) -> TicketResult<u64> {
        Ok(self.remove_every_record().await?)
    }

    async fn page(&self, after: Option<&str>, limit: usize) -> TicketResult<Vec<TicketRecord>> {
        Ok(self.page_records(after, limit).await?)
    }

    async fn children(&self, parent_key: &str) -> TicketResult<Vec<TicketRecord>> {
        Ok(self.members(self.children_key(parent_key)).await?)
    }

    async fn find_by_principal(&self, principal_key: &str) -> TicketResult<Vec<TicketRecord>> {
        Ok(self.members(self.principal_key(principal_key)).await?)
    }

    async fn count(&self, kind: Option<TicketKind>) -> TicketResult<u64> {
        Ok(self.count_records(kind).await?)
    }
}
