//! Configuration management for the gateway
//!
//! TOML file support with `TSKV_*` environment overrides and a default for
//! every field, so an empty file (or no file at all) is a valid setup.
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [store]
//! backend = "tdengine"
//!
//! [store.tdengine]
//! url = "http://taos:6041"
//!
//! [bus]
//! redis_url = "redis://redis:6379"
//! channel = "device:attributes"
//!
//! [ingestion]
//! batch_size = 1000
//! write_workers = 4
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bus::BusConfig;
use crate::error::{self, Error};
use crate::ingestion::IngestionConfig;
use crate::query::{DEFAULT_PAGE_SIZE, MAX_RANGE_DAYS};
use crate::storage::TdengineConfig;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "TSKV_CONFIG";

/// File looked up in the working directory when nothing else is given
pub const DEFAULT_CONFIG_FILE: &str = "tskv.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// HTTP server
    pub server: ServerConfig,
    /// Time-series store
    pub store: StoreConfig,
    /// Device bus
    pub bus: BusConfig,
    /// Ingestion pipeline
    pub ingestion: IngestionSection,
    /// History queries
    pub query: QueryConfig,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Log level when `RUST_LOG` is unset
    pub log_level: String,
    /// Allowed CORS origins, any origin when empty
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// `host:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which store implementation backs the gateway
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// TDengine over REST
    #[default]
    Tdengine,
    /// In-process store, data lost on exit
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tdengine" => Ok(StoreBackend::Tdengine),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend selection
    pub backend: StoreBackend,
    /// TDengine settings, used when `backend = "tdengine"`
    pub tdengine: TdengineConfig,
}

/// Ingestion settings as written in the file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestionSection {
    /// Samples per bulk insert
    pub batch_size: usize,
    /// Maximum batch age in milliseconds
    pub batch_wait_ms: u64,
    /// Worker ticker period in milliseconds
    pub flush_interval_ms: u64,
    /// Queue capacity between intake and workers
    pub channel_buffer_size: usize,
    /// Number of write workers
    pub write_workers: usize,
}

impl Default for IngestionSection {
    fn default() -> Self {
        let defaults = IngestionConfig::default();
        Self {
            batch_size: defaults.batch_size,
            batch_wait_ms: defaults.batch_wait_time.as_millis() as u64,
            flush_interval_ms: defaults.flush_interval.as_millis() as u64,
            channel_buffer_size: defaults.channel_buffer_size,
            write_workers: defaults.write_workers,
        }
    }
}

impl IngestionSection {
    /// Build and validate the pipeline configuration
    pub fn to_ingestion_config(&self) -> Result<IngestionConfig, String> {
        IngestionConfig::builder()
            .batch_size(self.batch_size)
            .batch_wait_time(Duration::from_millis(self.batch_wait_ms))
            .flush_interval(Duration::from_millis(self.flush_interval_ms))
            .channel_buffer_size(self.channel_buffer_size)
            .write_workers(self.write_workers)
            .build()
    }
}

/// History query settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Page size for paged history when the request leaves it at 0
    pub page_size: usize,
    /// Row limit for `GetDeviceHistory` when the request leaves it at 0
    pub history_limit: usize,
    /// Longest range a paged query may span, in days
    pub max_range_days: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            history_limit: 10,
            max_range_days: MAX_RANGE_DAYS,
        }
    }
}

impl ApplicationConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` naming the file when it cannot be read
    /// or parsed.
    pub fn load(path: impl AsRef<Path>) -> error::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load from a file, then apply environment overrides
    pub fn load_with_env(path: impl AsRef<Path>) -> error::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Pick the config file: explicit path, then `TSKV_CONFIG`, then
    /// `./tskv.toml`; no file at all means defaults
    ///
    /// Environment overrides are applied in every case.
    pub fn resolve(explicit: Option<&Path>) -> error::Result<(Self, Option<PathBuf>)> {
        let candidate = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                local.exists().then_some(local)
            });

        match candidate {
            Some(path) => Ok((Self::load_with_env(&path)?, Some(path))),
            None => Ok((Self::from_env(), None)),
        }
    }

    /// Apply `TSKV_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source
    ///
    /// Unparseable numeric values are ignored and the previous value is kept.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(host) = lookup("TSKV_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TSKV_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(level) = lookup("TSKV_LOG_LEVEL") {
            self.server.log_level = level;
        }

        // Store
        if let Some(backend) = lookup("TSKV_STORE_BACKEND").and_then(|v| v.parse().ok()) {
            self.store.backend = backend;
        }
        if let Some(url) = lookup("TSKV_TDENGINE_URL") {
            self.store.tdengine.url = url;
        }
        if let Some(user) = lookup("TSKV_TDENGINE_USER") {
            self.store.tdengine.username = user;
        }
        if let Some(password) = lookup("TSKV_TDENGINE_PASSWORD") {
            self.store.tdengine.password = password;
        }
        if let Some(database) = lookup("TSKV_TDENGINE_DATABASE") {
            self.store.tdengine.database = database;
        }

        // Bus
        if let Some(enabled) = lookup("TSKV_BUS_ENABLED").and_then(|v| v.parse().ok()) {
            self.bus.enabled = enabled;
        }
        if let Some(url) = lookup("TSKV_REDIS_URL") {
            self.bus.redis_url = url;
        }
        if let Some(channel) = lookup("TSKV_BUS_CHANNEL") {
            self.bus.channel = channel;
        }

        // Ingestion
        if let Some(size) = lookup("TSKV_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            self.ingestion.batch_size = size;
        }
        if let Some(workers) = lookup("TSKV_WRITE_WORKERS").and_then(|v| v.parse().ok()) {
            self.ingestion.write_workers = workers;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }
        if self.store.backend == StoreBackend::Tdengine && self.store.tdengine.url.is_empty() {
            return Err("store.tdengine.url cannot be empty".to_string());
        }
        if self.bus.enabled {
            self.bus.validate()?;
        }
        self.ingestion.to_ingestion_config()?;

        if self.query.page_size == 0 || self.query.history_limit == 0 {
            return Err("query.page_size and query.history_limit must be > 0".to_string());
        }
        if self.query.max_range_days <= 0 {
            return Err("query.max_range_days must be > 0".to_string());
        }
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> error::Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
