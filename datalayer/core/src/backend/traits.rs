//! Executor trait shared by both backends

use async_trait::async_trait;

use crate::error::QueryExecutionError;
use crate::result::{DataSource, QueryParams, QueryResult};

/// A backing store that can run a query and return a uniform result
///
/// Implementations measure their own wall-clock execution time and tag the
/// result with their [`DataSource`].
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Which role this executor plays
    fn source(&self) -> DataSource;

    /// Execute `query`, binding `params` to its `:name` placeholders
    async fn execute(
        &self,
        query: &str,
        params: Option<&QueryParams>,
    ) -> Result<QueryResult, QueryExecutionError>;

    /// Release held resources; later calls to `execute` fail
    async fn close(&self) {}
}
