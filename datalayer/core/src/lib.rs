//! Datalayer Core - dual-backend query access for the jobs monitor
//!
//! Serves analytical queries from a low-latency Lakebase (Postgres) replica
//! when it is healthy and from the SQL warehouse when it is not. Route
//! handlers call one method and get the same tabular result either way.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    UnifiedDataLayer                          │
//! │                                                              │
//! │  execute_query ──► ResultCache ──hit──► QueryResult          │
//! │        │                                                     │
//! │        ▼ miss                                                │
//! │  CircuitBreaker ──closed──► LakebaseExecutor                 │
//! │        │                    (translator + connection pool)   │
//! │        ▼ open / failed                                       │
//! │  WarehouseExecutor (statement execution REST API)            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`UnifiedDataLayer`]: the orchestrator; share one per process
//! - [`QueryResult`]: columns, rows and provenance
//! - [`QueryExecutor`]: the seam both backends implement
//! - [`DataLayerConfig`]: TOML/env configuration
//!
//! # Quick Start
//!
//! ```ignore
//! use datalayer_core::{config, UnifiedDataLayer};
//!
//! let config = config::load_config()?;
//! let layer = UnifiedDataLayer::connect(&config)?;
//!
//! let result = layer.execute("SELECT * FROM system.lakeflow.jobs LIMIT 10").await?;
//! println!("{} rows from {}", result.row_count(), result.source());
//!
//! layer.close().await;
//! ```

pub mod backend;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod connection_pool;
pub mod data_layer;
pub mod diagnostics;
pub mod error;
pub mod result;
pub mod translator;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_utils;

pub use backend::QueryExecutor;
pub use config::{ConfigOverrides, DataLayerConfig};
pub use data_layer::{DataLayerOptions, QueryOptions, UnifiedDataLayer};
pub use diagnostics::{PerformanceComparison, TimingOutcome, StatusReport, TableAccess};
pub use error::{DataLayerError, FailureKind, QueryExecutionError};
pub use result::{DataSource, QueryParams, QueryResult};
