//! Cache configuration.
//!
//! Sources are layered with the `config` crate: an optional
//! `object-cache.{toml,yaml,json}` file, an explicit file, then environment
//! variables prefixed with `OBJECT_CACHE_` (for example `OBJECT_CACHE_HOST`).

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::Serializer;
use crate::error::ConfigError;
use crate::namespace::TenantId;

const DEFAULT_CONFIG_BASENAME: &str = "object-cache";
const ENV_PREFIX: &str = "OBJECT_CACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 6379;
const DEFAULT_TIMEOUT_SECS: f64 = 1.0;
const MAX_DATABASE: i64 = 15;
const DEFAULT_SCAN_COUNT: usize = 500;
const DEFAULT_SCAN_MAX_ITERATIONS: usize = 10_000;

/// Configuration for [`ObjectCache`](crate::ObjectCache) and its Redis backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis host. Ignored when `socket` is set.
    pub host: String,
    pub port: u16,
    /// Unix socket path; overrides host/port when present.
    pub socket: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Database index, 0-15.
    pub database: i64,
    /// Connect timeout in seconds.
    pub connect_timeout: f64,
    /// Per-command read timeout in seconds.
    pub read_timeout: f64,
    /// Tenant context used until [`switch_tenant`](crate::ObjectCache::switch_tenant).
    pub tenant: TenantId,
    /// Prefix isolating this application instance on a shared backend.
    pub prefix: String,
    /// TTL ceiling in seconds; 0 disables the ceiling.
    pub max_ttl: u64,
    /// Run memory-only without attempting a connection.
    pub disabled: bool,
    pub serializer: Serializer,
    /// Whether the database belongs to this instance alone, making a full
    /// `FLUSHDB` safe. Defaults to `database > 0`.
    pub dedicated_database: Option<bool>,
    /// `COUNT` hint for `SCAN` during flushes.
    pub scan_count: usize,
    /// Upper bound on `SCAN` round-trips per flush.
    pub scan_max_iterations: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            socket: None,
            username: None,
            password: None,
            database: 0,
            connect_timeout: DEFAULT_TIMEOUT_SECS,
            read_timeout: DEFAULT_TIMEOUT_SECS,
            tenant: TenantId::default(),
            prefix: String::new(),
            max_ttl: 0,
            disabled: false,
            serializer: Serializer::default(),
            dedicated_database: None,
            scan_count: DEFAULT_SCAN_COUNT,
            scan_max_iterations: DEFAULT_SCAN_MAX_ITERATIONS,
        }
    }
}

impl CacheConfig {
    /// Load from the default file (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load with an additional, required configuration file.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: CacheConfig = builder.build()?.try_deserialize()?;
        Ok(config.sanitized())
    }

    /// Clamp ranges and replace unusable values with defaults.
    pub fn sanitized(mut self) -> Self {
        let host = self.host.trim();
        if host.is_empty() || host.contains('@') {
            self.host = DEFAULT_HOST.to_owned();
        } else {
            self.host = host.to_owned();
        }
        self.port = self.port.max(1);
        self.database = self.database.clamp(0, MAX_DATABASE);
        self.scan_count = self.scan_count.max(1);
        self.scan_max_iterations = self.scan_max_iterations.max(1);
        self.username = self.username.filter(|u| !u.is_empty());
        self.password = self.password.filter(|p| !p.is_empty());
        self.socket = self.socket.filter(|s| !s.as_os_str().is_empty());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        seconds(self.connect_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        seconds(self.read_timeout)
    }

    pub fn is_dedicated_database(&self) -> bool {
        self.dedicated_database.unwrap_or(self.database > 0)
    }

    /// Human-readable endpoint for logs.
    pub fn endpoint(&self) -> String {
        match &self.socket {
            Some(socket) => format!("socket {}", socket.display()),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    /// Build the Redis connection info (address, credentials, database).
    pub fn connection_info(&self) -> redis::ConnectionInfo {
        redis::ConnectionInfo {
            addr: self.connection_addr(),
            redis: redis::RedisConnectionInfo {
                db: self.database,
                username: self.username.clone(),
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }

    #[cfg(unix)]
    fn connection_addr(&self) -> redis::ConnectionAddr {
        match &self.socket {
            Some(socket) => redis::ConnectionAddr::Unix(socket.clone()),
            None => redis::ConnectionAddr::Tcp(self.host.clone(), self.port),
        }
    }

    #[cfg(not(unix))]
    fn connection_addr(&self) -> redis::ConnectionAddr {
        if self.socket.is_some() {
            tracing::warn!("unix sockets are unavailable on this platform; using {}:{}", self.host, self.port);
        }
        redis::ConnectionAddr::Tcp(self.host.clone(), self.port)
    }
}

/// Non-positive or non-finite values fall back to the default timeout.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
}
