//! TOML Configuration File Support
//!
//! Centralized configuration loading for the data layer, supporting a TOML
//! file at `~/.config/jobs-monitor/datalayer.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! The environment variable names match the ones the dashboard app is
//! deployed with (`DATABRICKS_HOST`, `WAREHOUSE_ID`, `CACHE_TTL`, ...), so
//! the same deployment manifest drives both.
//!
//! # Example Configuration
//!
//! ```toml
//! [workspace]
//! host = "adb-1234567890.12.azuredatabricks.net"
//!
//! [warehouse]
//! id = "abc123def456"
//! wait_timeout_secs = 50
//!
//! [namespace]
//! catalog = "hls_amer_catalog"
//! schema = "cost_management"
//!
//! [lakebase]
//! enabled = true
//! instance_id = "jobs-monitor-lakebase"
//! pool_min_size = 2
//! pool_max_size = 10
//!
//! [cache]
//! ttl_secs = 300
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! reset_timeout_secs = 60
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{LakebaseSettings, WarehouseSettings};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::connection_pool::PoolConfig;
use crate::translator::{default_mappings, IdentifierTranslator, DEFAULT_PHYSICAL_NAMESPACE};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceToml {
    /// Workspace hostname or URL
    pub host: Option<String>,

    /// Personal access / service principal token
    pub token: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseToml {
    /// SQL warehouse ID
    pub id: Option<String>,

    /// Server-side wait before the API returns a pending statement
    pub wait_timeout_secs: Option<u64>,

    /// Overall query deadline including polling
    pub query_timeout_secs: Option<u64>,

    pub poll_interval_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceToml {
    pub catalog: Option<String>,
    pub schema: Option<String>,

    /// Lakebase namespace that `catalog.schema` tables are synced into
    pub physical_prefix: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LakebaseToml {
    pub enabled: Option<bool>,
    pub instance_id: Option<String>,

    /// Direct hostname, bypassing instance lookup
    pub host: Option<String>,

    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub pool_min_size: Option<usize>,
    pub pool_max_size: Option<usize>,
    pub pool_timeout_secs: Option<u64>,
    pub statement_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    pub ttl_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerToml {
    pub failure_threshold: Option<u32>,
    pub reset_timeout_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLayerToml {
    pub workspace: WorkspaceToml,
    pub warehouse: WarehouseToml,
    pub namespace: NamespaceToml,
    pub lakebase: LakebaseToml,
    pub cache: CacheToml,
    pub circuit_breaker: CircuitBreakerToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved data layer configuration
///
/// Use [`load_config`] to build one with proper priority handling, then
/// [`DataLayerConfig::validate`] before connecting.
#[derive(Clone)]
pub struct DataLayerConfig {
    pub host: Option<String>,
    pub token: Option<String>,

    pub warehouse_id: Option<String>,
    pub warehouse_wait_timeout: Duration,
    pub warehouse_query_timeout: Duration,
    pub warehouse_poll_interval: Duration,

    pub catalog: String,
    pub schema: String,
    pub physical_namespace: String,

    pub lakebase_enabled: bool,
    pub lakebase_instance_id: Option<String>,
    pub lakebase_host: Option<String>,
    pub lakebase_port: u16,
    pub lakebase_database: String,
    pub lakebase_user: String,
    pub pool_min_size: usize,
    pub pool_max_size: usize,
    pub pool_timeout: Duration,
    pub statement_timeout: Duration,

    pub cache_ttl: Duration,

    pub failure_threshold: u32,
    pub circuit_reset_timeout: Duration,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    pub(crate) source: ConfigSource,
}

impl Default for DataLayerConfig {
    fn default() -> Self {
        Self {
            host: None,
            token: None,
            warehouse_id: None,
            warehouse_wait_timeout: Duration::from_secs(50),
            warehouse_query_timeout: Duration::from_secs(120),
            warehouse_poll_interval: Duration::from_millis(1000),
            catalog: "hls_amer_catalog".to_string(),
            schema: "cost_management".to_string(),
            physical_namespace: DEFAULT_PHYSICAL_NAMESPACE.to_string(),
            lakebase_enabled: true,
            lakebase_instance_id: None,
            lakebase_host: None,
            lakebase_port: 5432,
            lakebase_database: "postgres".to_string(),
            lakebase_user: "token".to_string(),
            pool_min_size: 2,
            pool_max_size: 10,
            pool_timeout: Duration::from_secs(10),
            statement_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
            failure_threshold: 3,
            circuit_reset_timeout: Duration::from_secs(60),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl std::fmt::Debug for DataLayerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLayerConfig")
            .field("host", &self.host)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("warehouse_id", &self.warehouse_id)
            .field("catalog", &self.catalog)
            .field("schema", &self.schema)
            .field("lakebase_enabled", &self.lakebase_enabled)
            .field("lakebase_instance_id", &self.lakebase_instance_id)
            .field("lakebase_host", &self.lakebase_host)
            .field("pool_min_size", &self.pool_min_size)
            .field("pool_max_size", &self.pool_max_size)
            .field("cache_ttl", &self.cache_ttl)
            .field("failure_threshold", &self.failure_threshold)
            .field("circuit_reset_timeout", &self.circuit_reset_timeout)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl DataLayerConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Whether a Lakebase primary should be built
    #[must_use]
    pub fn primary_configured(&self) -> bool {
        self.lakebase_enabled
            && (self.lakebase_instance_id.is_some() || self.lakebase_host.is_some())
    }

    /// Check required values and internal consistency
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.as_deref().map_or(true, |h| h.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "workspace host is required (DATABRICKS_HOST or [workspace] host)".into(),
            ));
        }
        if self
            .warehouse_id
            .as_deref()
            .map_or(true, |w| w.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(
                "warehouse id is required (WAREHOUSE_ID or [warehouse] id)".into(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.warehouse_poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "warehouse.poll_interval_ms must be at least 1".into(),
            ));
        }
        if self.pool_max_size == 0 {
            return Err(ConfigError::ValidationError(
                "lakebase.pool_max_size must be at least 1".into(),
            ));
        }
        if self.pool_min_size > self.pool_max_size {
            return Err(ConfigError::ValidationError(format!(
                "lakebase.pool_min_size ({}) exceeds pool_max_size ({})",
                self.pool_min_size, self.pool_max_size
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: self.circuit_reset_timeout,
        }
    }

    #[must_use]
    pub fn translator(&self) -> IdentifierTranslator {
        IdentifierTranslator::new(
            default_mappings(),
            &self.catalog,
            &self.schema,
            &self.physical_namespace,
        )
    }

    #[must_use]
    pub fn warehouse_settings(&self) -> WarehouseSettings {
        WarehouseSettings {
            warehouse_id: self.warehouse_id.clone().unwrap_or_default(),
            wait_timeout: self.warehouse_wait_timeout,
            query_timeout: self.warehouse_query_timeout,
            poll_interval: self.warehouse_poll_interval,
        }
    }

    #[must_use]
    pub fn lakebase_settings(&self) -> LakebaseSettings {
        LakebaseSettings {
            instance_id: self.lakebase_instance_id.clone(),
            host: self.lakebase_host.clone(),
            port: self.lakebase_port,
            database: self.lakebase_database.clone(),
            user: self.lakebase_user.clone(),
            password: self.token.clone(),
            connect_timeout: Duration::from_secs(10),
            statement_timeout: self.statement_timeout,
            pool: PoolConfig {
                min_size: self.pool_min_size,
                max_size: self.pool_max_size,
                acquire_timeout: self.pool_timeout,
            },
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/jobs-monitor/datalayer.toml` or
/// `~/.config/jobs-monitor/datalayer.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("jobs-monitor").join("datalayer.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<DataLayerConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DataLayerConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment values through `env`
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env<F>(
    path: Option<PathBuf>,
    env: F,
) -> Result<DataLayerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = DataLayerConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: DataLayerToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut DataLayerConfig, toml: &DataLayerToml) {
    // Workspace
    if toml.workspace.host.is_some() {
        config.host = toml.workspace.host.clone();
    }
    if toml.workspace.token.is_some() {
        config.token = toml.workspace.token.clone();
    }

    // Warehouse
    if toml.warehouse.id.is_some() {
        config.warehouse_id = toml.warehouse.id.clone();
    }
    if let Some(secs) = toml.warehouse.wait_timeout_secs {
        config.warehouse_wait_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.warehouse.query_timeout_secs {
        config.warehouse_query_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = toml.warehouse.poll_interval_ms {
        config.warehouse_poll_interval = Duration::from_millis(ms);
    }

    // Namespace
    if let Some(ref catalog) = toml.namespace.catalog {
        config.catalog = catalog.clone();
    }
    if let Some(ref schema) = toml.namespace.schema {
        config.schema = schema.clone();
    }
    if let Some(ref prefix) = toml.namespace.physical_prefix {
        config.physical_namespace = prefix.clone();
    }

    // Lakebase
    let lb = &toml.lakebase;
    if let Some(enabled) = lb.enabled {
        config.lakebase_enabled = enabled;
    }
    if lb.instance_id.is_some() {
        config.lakebase_instance_id = lb.instance_id.clone();
    }
    if lb.host.is_some() {
        config.lakebase_host = lb.host.clone();
    }
    if let Some(port) = lb.port {
        config.lakebase_port = port;
    }
    if let Some(ref database) = lb.database {
        config.lakebase_database = database.clone();
    }
    if let Some(ref user) = lb.user {
        config.lakebase_user = user.clone();
    }
    if let Some(min) = lb.pool_min_size {
        config.pool_min_size = min;
    }
    if let Some(max) = lb.pool_max_size {
        config.pool_max_size = max;
    }
    if let Some(secs) = lb.pool_timeout_secs {
        config.pool_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = lb.statement_timeout_secs {
        config.statement_timeout = Duration::from_secs(secs);
    }

    // Cache and breaker
    if let Some(secs) = toml.cache.ttl_secs {
        config.cache_ttl = Duration::from_secs(secs);
    }
    if let Some(threshold) = toml.circuit_breaker.failure_threshold {
        config.failure_threshold = threshold;
    }
    if let Some(secs) = toml.circuit_breaker.reset_timeout_secs {
        config.circuit_reset_timeout = Duration::from_secs(secs);
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(value.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off" | "")
}

/// Read and parse one environment value, warning on garbage
fn env_parsed<T, F>(env: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut DataLayerConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = false;

    // Workspace and warehouse
    if let Some(host) = env("DATABRICKS_HOST") {
        config.host = Some(host);
        applied = true;
    }
    if let Some(token) = env("DATABRICKS_TOKEN") {
        config.token = Some(token);
        applied = true;
    }
    if let Some(id) = env("WAREHOUSE_ID") {
        config.warehouse_id = Some(id);
        applied = true;
    }
    if let Some(secs) = env_parsed(&env, "WAREHOUSE_WAIT_TIMEOUT") {
        config.warehouse_wait_timeout = Duration::from_secs(secs);
        applied = true;
    }
    if let Some(secs) = env_parsed(&env, "WAREHOUSE_QUERY_TIMEOUT") {
        config.warehouse_query_timeout = Duration::from_secs(secs);
        applied = true;
    }

    // Namespace
    if let Some(catalog) = env("CATALOG") {
        config.catalog = catalog;
        applied = true;
    }
    if let Some(schema) = env("SCHEMA") {
        config.schema = schema;
        applied = true;
    }

    // Lakebase (empty strings mean unset, as in the app manifest)
    if let Some(id) = env("LAKEBASE_INSTANCE_ID") {
        config.lakebase_instance_id = Some(id).filter(|s| !s.is_empty());
        applied = true;
    }
    if let Some(host) = env("LAKEBASE_HOST") {
        config.lakebase_host = Some(host).filter(|s| !s.is_empty());
        applied = true;
    }
    if let Some(flag) = env("LAKEBASE_ENABLED") {
        config.lakebase_enabled = parse_flag(&flag);
        applied = true;
    }
    if let Some(min) = env_parsed(&env, "LAKEBASE_POOL_MIN") {
        config.pool_min_size = min;
        applied = true;
    }
    if let Some(max) = env_parsed(&env, "LAKEBASE_POOL_MAX") {
        config.pool_max_size = max;
        applied = true;
    }

    // Cache and breaker
    if let Some(secs) = env_parsed(&env, "CACHE_TTL") {
        config.cache_ttl = Duration::from_secs(secs);
        applied = true;
    }
    if let Some(threshold) = env_parsed(&env, "DATALAYER_FAILURE_THRESHOLD") {
        config.failure_threshold = threshold;
        applied = true;
    }
    if let Some(secs) = env_parsed(&env, "DATALAYER_CIRCUIT_RESET_SECS") {
        config.circuit_reset_timeout = Duration::from_secs(secs);
        applied = true;
    }

    if applied {
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub warehouse_id: Option<String>,
    pub lakebase_enabled: Option<bool>,
    pub cache_ttl_secs: Option<u64>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
}

impl ConfigOverrides {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_host(mut self, host: String) -> Self {
        self.host = Some(host);
        self
    }

    #[must_use]
    pub fn with_warehouse_id(mut self, id: String) -> Self {
        self.warehouse_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_lakebase_enabled(mut self, enabled: bool) -> Self {
        self.lakebase_enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, catalog: String, schema: String) -> Self {
        self.catalog = Some(catalog);
        self.schema = Some(schema);
        self
    }

    fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.warehouse_id.is_none()
            && self.lakebase_enabled.is_none()
            && self.cache_ttl_secs.is_none()
            && self.catalog.is_none()
            && self.schema.is_none()
    }

    /// Apply overrides to a loaded configuration
    pub fn apply(&self, config: &mut DataLayerConfig) {
        if self.is_empty() {
            return;
        }

        if let Some(ref host) = self.host {
            config.host = Some(host.clone());
        }
        if let Some(ref id) = self.warehouse_id {
            config.warehouse_id = Some(id.clone());
        }
        if let Some(enabled) = self.lakebase_enabled {
            config.lakebase_enabled = enabled;
        }
        if let Some(secs) = self.cache_ttl_secs {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(ref catalog) = self.catalog {
            config.catalog = catalog.clone();
        }
        if let Some(ref schema) = self.schema {
            config.schema = schema.clone();
        }

        config.source = ConfigSource::Cli;
    }
}

// =============================================================================
// Tests
// =============================================================================
