use serde::{Deserialize, Serialize};

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStoreConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    pub timeout_ms: u64,

    /// Prefix of every key written by the store
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            timeout_ms: 5000,
            key_prefix: "cas:".to_string(),
        }
    }
}
