//! Uniform tabular results
//!
//! Both backends return a [`QueryResult`] regardless of wire format, so
//! callers never care which store answered.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QueryExecutionError;

/// Named query parameters, referenced in SQL text as `:name`
///
/// Ordered so that fingerprints of equal maps are identical.
pub type QueryParams = BTreeMap<String, Value>;

// ============================================================================
// Data Source
// ============================================================================

/// Which backend produced a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Low-latency row store (Lakebase)
    Primary,

    /// Analytical SQL warehouse
    Fallback,
}

impl DataSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Query Result
// ============================================================================

/// Columns and rows returned by a backend, plus provenance
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    source: DataSource,
    execution_time_ms: f64,
    from_cache: bool,
}

impl QueryResult {
    /// Build a result, rejecting any row whose arity differs from the column count
    ///
    /// # Errors
    ///
    /// Returns an `Execution` failure attributed to `source` when a row is
    /// malformed.
    pub fn new(
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        source: DataSource,
        execution_time_ms: f64,
    ) -> Result<Self, QueryExecutionError> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(QueryExecutionError::execution(
                source,
                format!(
                    "row {idx} has {} values but result has {} columns",
                    row.len(),
                    columns.len()
                ),
            ));
        }

        Ok(Self {
            columns,
            rows,
            source,
            execution_time_ms,
            from_cache: false,
        })
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    #[must_use]
    pub fn source(&self) -> DataSource {
        self.source
    }

    #[must_use]
    pub fn execution_time_ms(&self) -> f64 {
        self.execution_time_ms
    }

    #[must_use]
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy of this result flagged as served from cache
    pub(crate) fn cached_copy(&self) -> Self {
        Self {
            from_cache: true,
            ..self.clone()
        }
    }

    /// Reshape rows into column-keyed objects, the form route handlers return
    #[must_use]
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>()
            })
            .collect()
    }
}
