//! Unified data layer
//!
//! One `execute_query` entry point over two interchangeable stores. Callers
//! never pick a backend; the layer does, and hides primary outages.
//!
//! # Query Flow
//!
//! ```text
//! 1. Cache lookup (when enabled) -> hit returns immediately
//! 2. Primary, if preferred, configured, open for business and not
//!    circuit-broken -> success is cached and returned
//!    failure is logged, counted by the breaker and swallowed
//! 3. Fallback -> success is cached and returned, failure is returned
//! ```
//!
//! Breaker and cache state live on the instance. Share one layer per
//! process behind an `Arc`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{LakebaseExecutor, QueryExecutor, WarehouseExecutor};
use crate::cache::{fingerprint, ResultCache};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::DataLayerConfig;
use crate::error::{DataLayerError, QueryExecutionError};
use crate::result::{DataSource, QueryParams, QueryResult};
use crate::workspace::WorkspaceClient;

/// Slack on top of the server-side wait for each workspace HTTP request
const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

// ============================================================================
// Options
// ============================================================================

/// Per-call routing options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryOptions {
    /// Serve from and store into the result cache
    pub use_cache: bool,

    /// Try the primary before the fallback
    pub prefer_primary: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            prefer_primary: true,
        }
    }
}

impl QueryOptions {
    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    #[must_use]
    pub fn fallback_only(mut self) -> Self {
        self.prefer_primary = false;
        self
    }
}

/// Construction options for [`UnifiedDataLayer::new`]
#[derive(Clone, Debug)]
pub struct DataLayerOptions {
    /// Logical catalog, used for the tag-correlation lookup
    pub catalog: String,
    pub schema: String,
    pub cache_ttl: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for DataLayerOptions {
    fn default() -> Self {
        Self {
            catalog: "hls_amer_catalog".to_string(),
            schema: "cost_management".to_string(),
            cache_ttl: Duration::from_secs(300),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl From<&DataLayerConfig> for DataLayerOptions {
    fn from(config: &DataLayerConfig) -> Self {
        Self {
            catalog: config.catalog.clone(),
            schema: config.schema.clone(),
            cache_ttl: config.cache_ttl,
            breaker: config.breaker_config(),
        }
    }
}

// ============================================================================
// Unified Data Layer
// ============================================================================

pub struct UnifiedDataLayer {
    primary: Option<Arc<dyn QueryExecutor>>,
    fallback: Arc<dyn QueryExecutor>,
    cache: ResultCache,
    breaker: CircuitBreaker,
    catalog: String,
    schema: String,
    closed: AtomicBool,
}

impl UnifiedDataLayer {
    /// Assemble a layer from explicit executors
    #[must_use]
    pub fn new(
        primary: Option<Arc<dyn QueryExecutor>>,
        fallback: Arc<dyn QueryExecutor>,
        options: DataLayerOptions,
    ) -> Self {
        Self {
            primary,
            fallback,
            cache: ResultCache::new(options.cache_ttl),
            breaker: CircuitBreaker::new(options.breaker),
            catalog: options.catalog,
            schema: options.schema,
            closed: AtomicBool::new(false),
        }
    }

    /// Build the Lakebase and warehouse executors described by `config`
    ///
    /// Nothing connects here. The Lakebase pool is created on the first
    /// primary query.
    ///
    /// # Errors
    ///
    /// Fails if the configuration does not validate or the workspace client
    /// cannot be built.
    pub fn connect(config: &DataLayerConfig) -> Result<Self, DataLayerError> {
        config.validate()?;

        let host = config.host.as_deref().unwrap_or_default();
        let workspace = WorkspaceClient::new(
            host,
            config.token.clone(),
            config.warehouse_wait_timeout + HTTP_TIMEOUT_SLACK,
        )?;

        let fallback: Arc<dyn QueryExecutor> = Arc::new(WarehouseExecutor::new(
            workspace.clone(),
            config.warehouse_settings(),
        ));

        let primary: Option<Arc<dyn QueryExecutor>> = if config.primary_configured() {
            tracing::info!(
                instance = ?config.lakebase_instance_id,
                host = ?config.lakebase_host,
                pool_max = config.pool_max_size,
                "Lakebase primary configured"
            );
            Some(Arc::new(LakebaseExecutor::new(
                config.lakebase_settings(),
                Some(workspace),
                config.translator(),
            )))
        } else {
            tracing::info!("Lakebase not configured, serving from the SQL warehouse only");
            None
        };

        tracing::info!(
            workspace = host,
            warehouse_id = ?config.warehouse_id,
            cache_ttl_secs = config.cache_ttl.as_secs(),
            failure_threshold = config.failure_threshold,
            "Unified data layer ready"
        );

        Ok(Self::new(primary, fallback, DataLayerOptions::from(config)))
    }

    /// Run a query with default options (cache on, primary preferred)
    ///
    /// # Errors
    ///
    /// Returns the fallback's failure when every eligible backend fails.
    pub async fn execute(&self, query: &str) -> Result<QueryResult, QueryExecutionError> {
        self.execute_query(query, None, QueryOptions::default()).await
    }

    /// Run a query against the best available backend
    ///
    /// Primary failures are never returned: they count against the circuit
    /// breaker and the query is retried once on the fallback.
    ///
    /// # Errors
    ///
    /// Returns the fallback's failure when it is reached and fails.
    pub async fn execute_query(
        &self,
        query: &str,
        params: Option<&QueryParams>,
        options: QueryOptions,
    ) -> Result<QueryResult, QueryExecutionError> {
        let key = options.use_cache.then(|| fingerprint(query, params));

        if let Some(ref key) = key {
            if let Some(hit) = self.cache.get(key) {
                tracing::debug!(source = %hit.source(), "Served query from cache");
                return Ok(hit);
            }
        }

        if options.prefer_primary {
            if let Some(primary) = self.eligible_primary() {
                match primary.execute(query, params).await {
                    Ok(result) => {
                        self.breaker.record_success();
                        self.store(key, &result);
                        return Ok(result);
                    }
                    Err(e) => {
                        tracing::warn!(
                            kind = %e.kind,
                            error = %e.message(),
                            "Primary query failed, falling back to warehouse"
                        );
                        self.breaker.record_failure(e.message());
                    }
                }
            }
        }

        let result = self.fallback.execute(query, params).await?;
        self.store(key, &result);
        Ok(result)
    }

    fn eligible_primary(&self) -> Option<&Arc<dyn QueryExecutor>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let primary = self.primary.as_ref()?;
        self.breaker.is_available().then_some(primary)
    }

    fn store(&self, key: Option<String>, result: &QueryResult) {
        if let Some(key) = key {
            self.cache.put(key, result.clone());
        }
    }

    /// Whether the next preferred query would be attempted on the primary
    ///
    /// Reads breaker state without triggering its reset.
    #[must_use]
    pub fn primary_available(&self) -> bool {
        self.primary.is_some() && !self.is_closed() && !self.breaker.is_open()
    }

    /// Backend the next preferred query would go to
    #[must_use]
    pub fn current_source(&self) -> DataSource {
        if self.primary_available() {
            DataSource::Primary
        } else {
            DataSource::Fallback
        }
    }

    #[must_use]
    pub fn primary_configured(&self) -> bool {
        self.primary.is_some()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Logical `(catalog, schema)` the layer serves
    #[must_use]
    pub fn namespace(&self) -> (&str, &str) {
        (&self.catalog, &self.schema)
    }

    pub(crate) fn primary(&self) -> Option<&Arc<dyn QueryExecutor>> {
        self.primary.as_ref()
    }

    pub(crate) fn fallback(&self) -> &Arc<dyn QueryExecutor> {
        &self.fallback
    }

    /// Release backend resources
    ///
    /// Safe to call more than once. After closing, queries skip the primary
    /// and go straight to the warehouse.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(primary) = &self.primary {
            primary.close().await;
        }
        self.fallback.close().await;

        tracing::info!("Unified data layer closed");
    }
}
