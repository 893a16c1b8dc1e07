//! Health and diagnostics reports
//!
//! Read-only views over a [`UnifiedDataLayer`] for the dashboard's settings
//! page and the CLI: which source tables are reachable, how the two backends
//! compare on a fixed query, and the live routing state.

use std::sync::Arc;

use serde::Serialize;

use crate::backend::QueryExecutor;
use crate::cache::CacheStats;
use crate::circuit_breaker::BreakerSnapshot;
use crate::data_layer::{QueryOptions, UnifiedDataLayer};
use crate::result::DataSource;

/// Query both backends run for the latency comparison
pub const COMPARISON_QUERY: &str =
    "SELECT COUNT(*) AS cnt FROM system.lakeflow.jobs WHERE delete_time IS NULL";

/// Source tables the dashboard cannot work without
const REQUIRED_SYSTEM_TABLES: [(&str, &str); 3] = [
    ("system.lakeflow.job_run_timeline", "Job run history"),
    ("system.lakeflow.jobs", "Job definitions"),
    ("system.billing.usage", "Billing data"),
];

// ============================================================================
// Report Types
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableAccess {
    pub table: String,
    pub description: String,
    pub accessible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of running the comparison query on one backend
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TimingOutcome {
    Success { time_ms: f64 },
    Error { error: String },
}

impl TimingOutcome {
    fn time_ms(&self) -> Option<f64> {
        match self {
            Self::Success { time_ms } => Some(*time_ms),
            Self::Error { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PerformanceComparison {
    /// `None` when no primary is configured
    pub primary: Option<TimingOutcome>,
    pub fallback: TimingOutcome,
    /// How many times faster the primary answered, to two decimals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speedup_factor: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub current_source: DataSource,
    pub primary_configured: bool,
    pub primary_available: bool,
    pub closed: bool,
    pub circuit_breaker: BreakerSnapshot,
    pub cache: CacheStats,
}

// ============================================================================
// Diagnostics
// ============================================================================

impl UnifiedDataLayer {
    /// Check every required table with `SELECT 1 ... LIMIT 1`
    ///
    /// Checks run concurrently through the normal routing path with the
    /// cache disabled. Each failure is recorded against its table; the scan
    /// itself never fails. Results keep the table order.
    pub async fn check_table_access(&self) -> Vec<TableAccess> {
        let (catalog, schema) = self.namespace();
        let mut tables: Vec<(String, &str)> = REQUIRED_SYSTEM_TABLES
            .iter()
            .map(|(table, description)| ((*table).to_string(), *description))
            .collect();
        tables.push((
            format!("{catalog}.{schema}.serverless_tag_correlation"),
            "Tag correlation",
        ));

        let checks = tables.into_iter().map(|(table, description)| async move {
            let query = format!("SELECT 1 FROM {table} LIMIT 1");
            let outcome = self
                .execute_query(&query, None, QueryOptions::default().no_cache())
                .await;

            if let Err(ref e) = outcome {
                tracing::debug!(table = %table, error = %e, "Table access check failed");
            }

            TableAccess {
                table,
                description: description.to_string(),
                accessible: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            }
        });

        futures::future::join_all(checks).await
    }

    /// Time [`COMPARISON_QUERY`] on each backend directly
    ///
    /// Bypasses the cache and the circuit breaker so an open circuit does
    /// not hide how the primary is doing, and a slow timing run does not trip it.
    pub async fn get_performance_comparison(&self) -> PerformanceComparison {
        let fallback = time_query(self.fallback());
        let primary = async {
            match self.primary() {
                Some(executor) => Some(time_query(executor).await),
                None => None,
            }
        };
        let (primary, fallback) = tokio::join!(primary, fallback);

        let speedup_factor = primary
            .as_ref()
            .and_then(TimingOutcome::time_ms)
            .zip(fallback.time_ms())
            .filter(|(primary_ms, _)| *primary_ms > 0.0)
            .map(|(primary_ms, fallback_ms)| round2(fallback_ms / primary_ms));

        PerformanceComparison {
            primary,
            fallback,
            speedup_factor,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusReport {
        StatusReport {
            current_source: self.current_source(),
            primary_configured: self.primary_configured(),
            primary_available: self.primary_available(),
            closed: self.is_closed(),
            circuit_breaker: self.breaker().snapshot(),
            cache: self.cache().stats(),
        }
    }
}

async fn time_query(executor: &Arc<dyn QueryExecutor>) -> TimingOutcome {
    match executor.execute(COMPARISON_QUERY, None).await {
        Ok(result) => TimingOutcome::Success {
            time_ms: round2(result.execution_time_ms()),
        },
        Err(e) => TimingOutcome::Error {
            error: e.to_string(),
        },
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
