use std::net::SocketAddr;
use std::time::Duration;

use cas_ticket::TicketConfig;
use cas_ticket_postgres::PostgresStoreConfig;
use cas_ticket_redis::RedisStoreConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Ticket lifetimes, tracking, registry and cleaner settings
    #[serde(default)]
    pub tickets: TicketConfig,
    /// Ticket store backend
    #[serde(default)]
    pub storage: StorageConfig,
    /// Single logout delivery
    #[serde(default)]
    pub logout: LogoutConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.tickets
            .validate()
            .map_err(|e| format!("tickets config error: {e}"))?;
        match self.storage.backend {
            StorageBackend::Memory => {}
            StorageBackend::Redis => {
                if self.storage.redis.url.is_empty() {
                    return Err("storage.redis.url must not be empty".into());
                }
                if self.storage.redis.pool_size == 0 {
                    return Err("storage.redis.pool_size must be > 0".into());
                }
            }
            StorageBackend::Postgres => {
                if self.storage.postgres.url.is_empty() {
                    return Err("storage.postgres.url must not be empty".into());
                }
                if self.storage.postgres.pool_size == 0 {
                    return Err("storage.postgres.pool_size must be > 0".into());
                }
            }
        }
        if self.logout.enabled && self.logout.timeout_ms == 0 {
            return Err("logout.timeout_ms must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest page the admin API returns for one request
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_max_page_size() -> usize {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_page_size: default_max_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Redis,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub redis: RedisStoreConfig,
    pub postgres: PostgresStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogoutConfig {
    /// Send single logout messages to services when a session ends
    pub enabled: bool,
    /// Per-message HTTP timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for LogoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 5000,
        }
    }
}

impl LogoutConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, used when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "cas.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., CAS__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("CAS")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
