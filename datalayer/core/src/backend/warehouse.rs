//! SQL warehouse executor (fallback backend)
//!
//! Submits statements to the statement execution API and waits for them to
//! finish. Short queries complete inside the server-side `wait_timeout` and
//! come back in the first response. Longer ones are polled until a terminal
//! state or the overall query deadline, after which the statement is
//! cancelled.
//!
//! Queries run untranslated: the warehouse owns the logical catalog names.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Number, Value};
use tokio::time::{Instant, MissedTickBehavior};

use super::traits::QueryExecutor;
use crate::error::QueryExecutionError;
use crate::result::{DataSource, QueryParams, QueryResult};
use crate::workspace::{
    ColumnInfo, StatementParameter, StatementRequest, StatementResponse, StatementState,
    WorkspaceClient,
};

/// Server-side wait bounds accepted by the statement API
const MIN_WAIT: Duration = Duration::from_secs(5);
const MAX_WAIT: Duration = Duration::from_secs(50);

/// Floor for the status polling period; `interval` rejects zero
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug)]
pub struct WarehouseSettings {
    pub warehouse_id: String,
    /// How long the submit call blocks server-side before returning a
    /// pending statement (clamped to 5..=50s)
    pub wait_timeout: Duration,
    /// Overall deadline including polling
    pub query_timeout: Duration,
    /// Status polling period (at least 10ms)
    pub poll_interval: Duration,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            warehouse_id: String::new(),
            wait_timeout: MAX_WAIT,
            query_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct WarehouseExecutor {
    client: WorkspaceClient,
    settings: WarehouseSettings,
}

impl WarehouseExecutor {
    #[must_use]
    pub fn new(client: WorkspaceClient, settings: WarehouseSettings) -> Self {
        Self { client, settings }
    }

    #[must_use]
    pub fn settings(&self) -> &WarehouseSettings {
        &self.settings
    }

    fn build_request(&self, query: &str, params: Option<&QueryParams>) -> StatementRequest {
        let wait = self.settings.wait_timeout.clamp(MIN_WAIT, MAX_WAIT);

        StatementRequest {
            warehouse_id: self.settings.warehouse_id.clone(),
            statement: query.to_string(),
            wait_timeout: format!("{}s", wait.as_secs()),
            on_wait_timeout: "CONTINUE",
            format: "JSON_ARRAY",
            disposition: "INLINE",
            parameters: params.map(statement_parameters).unwrap_or_default(),
        }
    }

    /// Poll until the statement reaches a terminal state
    async fn wait_for_completion(
        &self,
        mut response: StatementResponse,
    ) -> Result<StatementResponse, QueryExecutionError> {
        if response.status.state.is_terminal() {
            return Ok(response);
        }

        let mut ticker = tokio::time::interval(self.settings.poll_interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            response = self
                .client
                .get_statement(&response.statement_id)
                .await
                .map_err(|e| QueryExecutionError::from_workspace(DataSource::Fallback, &e))?;

            tracing::trace!(
                statement_id = %response.statement_id,
                state = ?response.status.state,
                "Polled warehouse statement"
            );

            if response.status.state.is_terminal() {
                return Ok(response);
            }
        }
    }

    /// Columns and all rows of a finished statement, following result chunks
    async fn collect_rows(
        &self,
        response: StatementResponse,
    ) -> Result<(Vec<String>, Vec<Vec<Value>>), QueryExecutionError> {
        if response.status.state != StatementState::Succeeded {
            let message = response
                .status
                .error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(QueryExecutionError::execution(
                DataSource::Fallback,
                format!("Query failed: {message}"),
            ));
        }

        let schema = response.manifest.map(|m| m.schema.columns).unwrap_or_default();
        let columns: Vec<String> = schema.iter().map(|c| c.name.clone()).collect();

        let mut data = response.result.unwrap_or_default();
        let mut rows = Vec::new();
        loop {
            rows.extend(data.data_array.into_iter().map(|row| coerce_row(row, &schema)));

            let Some(next) = data.next_chunk_index else {
                break;
            };
            data = self
                .client
                .get_result_chunk(&response.statement_id, next)
                .await
                .map_err(|e| QueryExecutionError::from_workspace(DataSource::Fallback, &e))?;
        }

        Ok((columns, rows))
    }
}

#[async_trait]
impl QueryExecutor for WarehouseExecutor {
    fn source(&self) -> DataSource {
        DataSource::Fallback
    }

    async fn execute(
        &self,
        query: &str,
        params: Option<&QueryParams>,
    ) -> Result<QueryResult, QueryExecutionError> {
        let started = Instant::now();
        let request = self.build_request(query, params);

        let submitted = self
            .client
            .execute_statement(&request)
            .await
            .map_err(|e| QueryExecutionError::from_workspace(DataSource::Fallback, &e))?;

        let statement_id = submitted.statement_id.clone();
        let mut guard = StatementGuard::new(self.client.clone(), statement_id.clone());

        let completion = self.wait_for_completion(submitted);
        let finished = match tokio::time::timeout(self.settings.query_timeout, completion).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    statement_id = %statement_id,
                    timeout_secs = self.settings.query_timeout.as_secs(),
                    "Warehouse statement exceeded query timeout, cancelling"
                );
                return Err(QueryExecutionError::timeout(
                    DataSource::Fallback,
                    format!(
                        "Statement {statement_id} did not finish within {}s",
                        self.settings.query_timeout.as_secs()
                    ),
                ));
            }
        };
        guard.disarm();

        let (columns, rows) = self.collect_rows(finished).await?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        tracing::debug!(
            statement_id = %statement_id,
            rows = rows.len(),
            elapsed_ms,
            "Warehouse query completed"
        );

        QueryResult::new(columns, rows, DataSource::Fallback, elapsed_ms)
    }
}

// ============================================================================
// Statement Guard
// ============================================================================

/// Cancels a submitted statement unless disarmed
///
/// Covers the query deadline and callers dropping the future mid-poll.
struct StatementGuard {
    client: WorkspaceClient,
    statement_id: String,
    armed: bool,
}

impl StatementGuard {
    fn new(client: WorkspaceClient, statement_id: String) -> Self {
        Self {
            client,
            statement_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StatementGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let client = self.client.clone();
        let statement_id = std::mem::take(&mut self.statement_id);
        handle.spawn(async move {
            match client.cancel_statement(&statement_id).await {
                Ok(()) => tracing::debug!(%statement_id, "Cancelled warehouse statement"),
                Err(e) => tracing::debug!(
                    %statement_id,
                    error = %e,
                    "Failed to cancel warehouse statement"
                ),
            }
        });
    }
}

// ============================================================================
// Value Conversion
// ============================================================================

/// Typed named parameters for the statement API
fn statement_parameters(params: &QueryParams) -> Vec<StatementParameter> {
    params
        .iter()
        .map(|(name, value)| {
            let (value, type_name) = match value {
                Value::Null => (None, "STRING"),
                Value::Bool(b) => (Some(b.to_string()), "BOOLEAN"),
                Value::Number(n) if n.is_i64() || n.is_u64() => (Some(n.to_string()), "BIGINT"),
                Value::Number(n) => (Some(n.to_string()), "DOUBLE"),
                Value::String(s) => (Some(s.clone()), "STRING"),
                other => (Some(other.to_string()), "STRING"),
            };
            StatementParameter {
                name: name.clone(),
                value,
                type_name,
            }
        })
        .collect()
}

/// `JSON_ARRAY` results carry every cell as a string; restore scalar types
fn coerce_row(row: Vec<Value>, schema: &[ColumnInfo]) -> Vec<Value> {
    row.into_iter()
        .enumerate()
        .map(|(idx, cell)| {
            let type_name = schema.get(idx).and_then(|c| c.type_name.as_deref());
            coerce_cell(cell, type_name)
        })
        .collect()
}

fn coerce_cell(cell: Value, type_name: Option<&str>) -> Value {
    let (Value::String(text), Some(type_name)) = (&cell, type_name) else {
        return cell;
    };

    let coerced = match type_name.to_ascii_uppercase().as_str() {
        "BYTE" | "SHORT" | "INT" | "LONG" | "TINYINT" | "SMALLINT" | "INTEGER" | "BIGINT" => {
            text.parse::<i64>().ok().map(Value::from)
        }
        "FLOAT" | "DOUBLE" | "DECIMAL" => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        "BOOLEAN" => text.parse::<bool>().ok().map(Value::Bool),
        _ => None,
    };

    coerced.unwrap_or(cell)
}
