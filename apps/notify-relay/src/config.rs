use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

use thiserror::Error;

use crate::heartbeat::{HeartbeatConfig, DEFAULT_PROBE_PERCENT};

const DEFAULT_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_LOG_FILTER: &str = "info,notify_relay=debug";
const DEFAULT_LIVENESS_SECS: u64 = 60;
const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PENDING_TTL_SECS: u64 = 2_592_000; // 30 days

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address {value:?}: {source}")]
    InvalidAddr {
        value: String,
        #[source]
        source: AddrParseError,
    },
    #[error("liveness window and probe period must be non-zero")]
    ZeroHeartbeat,
    #[error("write timeout must be non-zero")]
    ZeroWriteTimeout,
    #[error(
        "probe period {probe_period:?} must be shorter than liveness window {liveness_window:?}"
    )]
    ProbeTooSlow {
        probe_period: Duration,
        liveness_window: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub heartbeat: HeartbeatConfig,
    pub store_backend: StoreBackend,
    pub redis_url: Option<String>,
    pub pending_ttl_secs: u64,
    pub known_users: Option<Vec<String>>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr = lookup("NOTIFY_RELAY_ADDR").unwrap_or_else(|| DEFAULT_ADDR.into());
        let bind_addr = addr
            .parse()
            .map_err(|source| ConfigError::InvalidAddr {
                value: addr.clone(),
                source,
            })?;
        let log_filter = lookup("RUST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.into());
        let liveness_secs = lookup("NOTIFY_RELAY_LIVENESS_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_LIVENESS_SECS);
        let probe_percent = lookup("NOTIFY_RELAY_PROBE_PERCENT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PROBE_PERCENT);
        let write_timeout_secs = lookup("NOTIFY_RELAY_WRITE_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_WRITE_TIMEOUT_SECS);
        let heartbeat =
            HeartbeatConfig::from_percent(Duration::from_secs(liveness_secs), probe_percent)?
                .with_write_timeout(Duration::from_secs(write_timeout_secs))?;
        let store_backend = StoreBackend::parse(lookup("NOTIFY_RELAY_STORE_BACKEND").as_deref());
        let redis_url = lookup("REDIS_URL");
        let pending_ttl_secs = lookup("NOTIFY_RELAY_PENDING_TTL_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PENDING_TTL_SECS);
        let known_users = lookup("NOTIFY_RELAY_KNOWN_USERS").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        });
        Ok(Self {
            bind_addr,
            log_filter,
            heartbeat,
            store_backend,
            redis_url,
            pending_ttl_secs,
            known_users,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Redis,
}

impl StoreBackend {
    fn parse(raw: Option<&str>) -> Self {
        match raw.unwrap_or("memory") {
            "redis" => StoreBackend::Redis,
            _ => StoreBackend::InMemory,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::InMemory => "memory",
            StoreBackend::Redis => "redis",
        }
    }
}
