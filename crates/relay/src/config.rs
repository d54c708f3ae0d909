// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Every knob the relay reads lives here so startup can
// validate the whole set before binding a socket.

use std::net::SocketAddr;
use std::time::Duration;

use crate::db::pool::PoolConfig;

pub(crate) const DEV_JWT_SECRET: &str = "picedit_local_development_jwt_secret_must_be_32_chars";

/// 2^18 slots, matching the ring size the edit pipeline was tuned for.
pub const DEFAULT_EVENT_BUFFER_CAPACITY: usize = 1 << 18;
pub const DEFAULT_EVENT_WORKERS: usize = 4;
pub const MAX_EVENT_WORKERS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("event buffer capacity {0} must be a non-zero power of two")]
    CapacityNotPowerOfTwo(usize),
    #[error("event worker count {0} must be between 1 and {MAX_EVENT_WORKERS}")]
    WorkerCountOutOfRange(usize),
    #[error("event buffer capacity {capacity} cannot be split across {workers} workers")]
    CapacityBelowWorkers { capacity: usize, workers: usize },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Sizing of the edit event pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventChannelConfig {
    /// Total buffered events across all worker shards.
    pub capacity: usize,
    /// Number of dispatcher workers; each owns one shard.
    pub workers: usize,
}

impl Default for EventChannelConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_EVENT_BUFFER_CAPACITY, workers: DEFAULT_EVENT_WORKERS }
    }
}

impl EventChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.capacity.is_power_of_two() {
            return Err(ConfigError::CapacityNotPowerOfTwo(self.capacity));
        }
        if self.workers == 0 || self.workers > MAX_EVENT_WORKERS {
            return Err(ConfigError::WorkerCountOutOfRange(self.workers));
        }
        if self.capacity < self.workers {
            return Err(ConfigError::CapacityBelowWorkers {
                capacity: self.capacity,
                workers: self.workers,
            });
        }
        Ok(())
    }

    /// Slots available to each worker shard.
    pub fn shard_capacity(&self) -> usize {
        (self.capacity / self.workers.max(1)).max(1)
    }
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HS256 secret shared with the identity service that issues access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string for the picture directory.
    pub database_url: Option<String>,
    pub pool: PoolConfig,
    /// Log filter directive (e.g. `info`, `picedit_relay=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    pub events: EventChannelConfig,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `PICEDIT_RELAY_HOST` | `0.0.0.0` |
    /// | `PICEDIT_RELAY_PORT` | `8123` |
    /// | `PICEDIT_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `PICEDIT_RELAY_DATABASE_URL` | *(none, in-memory directory)* |
    /// | `PICEDIT_RELAY_DB_MIN_CONNECTIONS` | `2` |
    /// | `PICEDIT_RELAY_DB_MAX_CONNECTIONS` | `20` |
    /// | `PICEDIT_RELAY_DB_ACQUIRE_TIMEOUT_SECS` | `10` |
    /// | `PICEDIT_RELAY_LOG_FILTER` | `info` |
    /// | `PICEDIT_RELAY_LOG_FORMAT` | `text` |
    /// | `PICEDIT_RELAY_EVENT_BUFFER_CAPACITY` | `262144` |
    /// | `PICEDIT_RELAY_EVENT_WORKERS` | `4` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let parsed = |key: &str| env(key).ok().and_then(|value| value.trim().parse::<u64>().ok());

        let host = env("PICEDIT_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = parsed("PICEDIT_RELAY_PORT")
            .and_then(|value| u16::try_from(value).ok())
            .unwrap_or(8123);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("PICEDIT_RELAY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());
        let database_url =
            env("PICEDIT_RELAY_DATABASE_URL").ok().filter(|value| !value.trim().is_empty());

        let defaults = PoolConfig::default();
        let pool = PoolConfig {
            min_connections: parsed("PICEDIT_RELAY_DB_MIN_CONNECTIONS")
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(defaults.min_connections),
            max_connections: parsed("PICEDIT_RELAY_DB_MAX_CONNECTIONS")
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(defaults.max_connections),
            acquire_timeout: parsed("PICEDIT_RELAY_DB_ACQUIRE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
        };

        let log_filter = env("PICEDIT_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("PICEDIT_RELAY_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let events = EventChannelConfig {
            capacity: parsed("PICEDIT_RELAY_EVENT_BUFFER_CAPACITY")
                .and_then(|value| usize::try_from(value).ok())
                .unwrap_or(DEFAULT_EVENT_BUFFER_CAPACITY),
            workers: parsed("PICEDIT_RELAY_EVENT_WORKERS")
                .and_then(|value| usize::try_from(value).ok())
                .unwrap_or(DEFAULT_EVENT_WORKERS),
        };

        Self { listen_addr, jwt_secret, database_url, pool, log_filter, log_format, events }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
