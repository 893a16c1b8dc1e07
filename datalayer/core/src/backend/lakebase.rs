//! Lakebase executor (primary backend)
//!
//! Lakebase speaks the Postgres wire protocol. Connections authenticate with
//! the workspace token as password and always require TLS. Each session
//! carries a server-side `statement_timeout`; a client-side deadline a few
//! seconds longer backs it up in case the server never answers.
//!
//! The pool is created on first use. Until then nothing touches the network,
//! so a data layer with an unreachable Lakebase still constructs and serves
//! from the warehouse. A failed initialisation is returned as a
//! `ConnectionUnavailable` error and retried on the next call.
//!
//! String and null parameters are spliced into the SQL as untyped literals
//! so the server infers their type from context (`usage_date >= :since`
//! with a string value compares as a date). Other values are bound as typed
//! `$n` arguments. Sessions pin `standard_conforming_strings`, which makes
//! quote doubling a complete escape.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow, PgSslMode};
use sqlx::{Column, Connection, Executor, PgConnection, Row, Statement, TypeInfo};
use tokio::sync::OnceCell;
use tokio::time::Instant;

use super::params::{quote_literal, rewrite_params};
use super::traits::QueryExecutor;
use crate::connection_pool::{ConnectionPool, Connector, PoolConfig, PoolError};
use crate::error::QueryExecutionError;
use crate::result::{DataSource, QueryParams, QueryResult};
use crate::translator::IdentifierTranslator;
use crate::workspace::WorkspaceClient;

/// Postgres SQLSTATE for a cancelled statement (`statement_timeout` included)
const QUERY_CANCELED: &str = "57014";

/// Extra time the client waits past the server-side statement timeout
const CLIENT_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct LakebaseSettings {
    /// Database instance name, resolved to a hostname through the workspace API
    pub instance_id: Option<String>,
    /// Explicit hostname; skips instance resolution when set
    pub host: Option<String>,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    pub statement_timeout: Duration,
    pub pool: PoolConfig,
}

impl Default for LakebaseSettings {
    fn default() -> Self {
        Self {
            instance_id: None,
            host: None,
            port: 5432,
            database: "postgres".to_string(),
            user: "token".to_string(),
            password: None,
            connect_timeout: Duration::from_secs(10),
            statement_timeout: Duration::from_secs(30),
            pool: PoolConfig::default(),
        }
    }
}

// ============================================================================
// Connector
// ============================================================================

struct PgConnector {
    options: PgConnectOptions,
    connect_timeout: Duration,
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, PoolError> {
        match tokio::time::timeout(
            self.connect_timeout,
            PgConnection::connect_with(&self.options),
        )
        .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(PoolError::ConnectionFailed(e.to_string())),
            Err(_) => Err(PoolError::ConnectionFailed(format!(
                "connect timed out after {}s",
                self.connect_timeout.as_secs()
            ))),
        }
    }

    async fn disconnect(&self, connection: PgConnection) {
        if let Err(e) = connection.close().await {
            tracing::debug!(error = %e, "Error closing Lakebase connection");
        }
    }
}

// ============================================================================
// Executor
// ============================================================================

pub struct LakebaseExecutor {
    settings: LakebaseSettings,
    workspace: Option<WorkspaceClient>,
    translator: IdentifierTranslator,
    pool: OnceCell<Arc<ConnectionPool<PgConnector>>>,
    closed: AtomicBool,
}

impl LakebaseExecutor {
    /// `workspace` is required unless `settings.host` is set
    #[must_use]
    pub fn new(
        settings: LakebaseSettings,
        workspace: Option<WorkspaceClient>,
        translator: IdentifierTranslator,
    ) -> Self {
        Self {
            settings,
            workspace,
            translator,
            pool: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn translator(&self) -> &IdentifierTranslator {
        &self.translator
    }

    /// Whether the pool has been created
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.pool.initialized()
    }

    async fn pool(&self) -> Result<&Arc<ConnectionPool<PgConnector>>, QueryExecutionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueryExecutionError::connection(
                DataSource::Primary,
                "Lakebase executor is closed",
            ));
        }
        let pool = self.pool.get_or_try_init(|| self.init_pool()).await?;

        // close() may have run while the pool was still being built
        if self.closed.load(Ordering::Acquire) {
            pool.close().await;
            return Err(QueryExecutionError::connection(
                DataSource::Primary,
                "Lakebase executor is closed",
            ));
        }
        Ok(pool)
    }

    async fn init_pool(&self) -> Result<Arc<ConnectionPool<PgConnector>>, QueryExecutionError> {
        let host = self.resolve_host().await?;

        let mut options = PgConnectOptions::new()
            .host(&host)
            .port(self.settings.port)
            .username(&self.settings.user)
            .database(&self.settings.database)
            .ssl_mode(PgSslMode::Require)
            .application_name("jobs-monitor-datalayer")
            .options([
                (
                    "statement_timeout",
                    self.settings.statement_timeout.as_millis().to_string(),
                ),
                ("standard_conforming_strings", "on".to_string()),
            ]);
        if let Some(password) = &self.settings.password {
            options = options.password(password);
        }

        let pool = ConnectionPool::new(
            PgConnector {
                options,
                connect_timeout: self.settings.connect_timeout,
            },
            self.settings.pool.clone(),
        );

        let warmed = pool.warm_up().await.map_err(|e| {
            tracing::warn!(host = %host, error = %e, "Lakebase pool initialisation failed");
            QueryExecutionError::connection(DataSource::Primary, e.to_string())
        })?;

        tracing::info!(
            host = %host,
            port = self.settings.port,
            database = %self.settings.database,
            warm_connections = warmed,
            max_connections = self.settings.pool.max_size,
            "Lakebase connection pool initialized"
        );

        Ok(pool)
    }

    async fn resolve_host(&self) -> Result<String, QueryExecutionError> {
        if let Some(host) = &self.settings.host {
            return Ok(host.clone());
        }

        let (Some(instance), Some(workspace)) = (&self.settings.instance_id, &self.workspace)
        else {
            return Err(QueryExecutionError::connection(
                DataSource::Primary,
                "no Lakebase host or instance configured",
            ));
        };

        workspace
            .database_endpoint(instance)
            .await
            .map_err(|e| QueryExecutionError::from_workspace(DataSource::Primary, &e))
    }

    async fn run(
        &self,
        query: &str,
        params: Option<&QueryParams>,
    ) -> Result<(Vec<String>, Vec<Vec<Value>>), QueryExecutionError> {
        let translated = self.translator.translate(query);
        let (sql, arguments) = bind_params(&translated, params)?;

        let pool = self.pool().await?;
        let mut conn = pool.acquire().await.map_err(pool_failure)?;

        conn.mark_busy();
        let client_timeout = self.settings.statement_timeout + CLIENT_TIMEOUT_GRACE;
        let fetched = tokio::time::timeout(client_timeout, async {
            // Column names come from the statement, so empty results keep them
            let statement = (&mut *conn).prepare(&sql).await?;
            let columns: Vec<String> = statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
            let rows = statement.query_with(arguments).fetch_all(&mut *conn).await?;
            Ok::<_, sqlx::Error>((columns, rows))
        })
        .await;

        let (columns, rows) = match fetched {
            Ok(Ok(fetched)) => {
                conn.mark_idle();
                fetched
            }
            Ok(Err(e)) => {
                conn.mark_idle();
                if is_connection_error(&e) {
                    conn.mark_unhealthy();
                }
                return Err(sqlx_failure(e));
            }
            // Still busy: the guard discards the connection
            Err(_) => {
                return Err(QueryExecutionError::timeout(
                    DataSource::Primary,
                    format!("no response within {}s", client_timeout.as_secs()),
                ));
            }
        };

        Ok((columns, decode_rows(&rows)))
    }
}

#[async_trait]
impl QueryExecutor for LakebaseExecutor {
    fn source(&self) -> DataSource {
        DataSource::Primary
    }

    async fn execute(
        &self,
        query: &str,
        params: Option<&QueryParams>,
    ) -> Result<QueryResult, QueryExecutionError> {
        let started = Instant::now();
        let (columns, rows) = self.run(query, params).await?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        tracing::debug!(rows = rows.len(), elapsed_ms, "Lakebase query completed");

        QueryResult::new(columns, rows, DataSource::Primary, elapsed_ms)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Inline form of a value whose type the server should infer
fn untyped_literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("NULL".to_string()),
        Value::String(s) => Some(quote_literal(s)),
        _ => None,
    }
}

/// Rewrite `:name` placeholders, inlining strings and nulls and binding the
/// rest in order
fn bind_params(
    query: &str,
    params: Option<&QueryParams>,
) -> Result<(String, PgArguments), QueryExecutionError> {
    let mut arguments = PgArguments::default();

    let Some(params) = params.filter(|p| !p.is_empty()) else {
        return Ok((query.to_string(), arguments));
    };

    let positional = rewrite_params(query, |name| params.get(name).and_then(untyped_literal));
    for name in &positional.names {
        let value = params.get(name).ok_or_else(|| {
            QueryExecutionError::execution(
                DataSource::Primary,
                format!("no value supplied for parameter :{name}"),
            )
        })?;
        add_argument(&mut arguments, value).map_err(|e| {
            QueryExecutionError::execution(
                DataSource::Primary,
                format!("cannot bind parameter :{name}: {e}"),
            )
        })?;
    }

    Ok((positional.sql, arguments))
}

fn add_argument(
    arguments: &mut PgArguments,
    value: &Value,
) -> Result<(), sqlx::error::BoxDynError> {
    use sqlx::Arguments;

    match value {
        Value::Bool(b) => arguments.add(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => arguments.add(i),
            None => arguments.add(n.as_f64().unwrap_or(f64::NAN)),
        },
        // Strings and nulls are inlined before binding
        Value::Null | Value::String(_) => Ok(()),
        other => arguments.add(sqlx::types::Json(other.clone())),
    }
}

// ============================================================================
// Row Decoding
// ============================================================================

fn decode_rows(rows: &[PgRow]) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|row| (0..row.len()).map(|idx| decode_cell(row, idx)).collect())
        .collect()
}

fn decode_cell(row: &PgRow, idx: usize) -> Value {
    let type_name = row.column(idx).type_info().name().to_string();

    let decoded = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(idx).map(|v| v.map(Value::Bool)),
        "INT2" => row.try_get::<Option<i16>, _>(idx).map(|v| v.map(Value::from)),
        "INT4" => row.try_get::<Option<i32>, _>(idx).map(|v| v.map(Value::from)),
        "INT8" => row.try_get::<Option<i64>, _>(idx).map(|v| v.map(Value::from)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .map(|v| v.and_then(|f| float_value(f64::from(f)))),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)
            .map(|v| v.and_then(float_value)),
        "NUMERIC" => row
            .try_get::<Option<Decimal>, _>(idx)
            .map(|v| v.map(decimal_value)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => row
            .try_get::<Option<String>, _>(idx)
            .map(|v| v.map(Value::String)),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)
            .map(|v| v.map(|u| Value::String(u.to_string()))),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map(|v| v.map(|t| Value::String(t.to_rfc3339()))),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map(|v| v.map(|t| Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map(|v| v.map(|d| Value::String(d.to_string()))),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(idx)
            .map(|v| v.map(|t| Value::String(t.to_string()))),
        _ => row.try_get::<Option<String>, _>(idx).map(|v| v.map(Value::String)),
    };

    match decoded {
        Ok(value) => value.unwrap_or(Value::Null),
        Err(e) => {
            tracing::debug!(
                column = idx,
                type_name = %type_name,
                error = %e,
                "Unsupported Lakebase column type"
            );
            Value::Null
        }
    }
}

fn float_value(f: f64) -> Option<Value> {
    Number::from_f64(f).map(Value::Number)
}

/// JSON number when the decimal survives the trip through `f64`, else its
/// exact text
fn decimal_value(d: Decimal) -> Value {
    let d = d.normalize();
    if d.scale() == 0 {
        if let Some(i) = d.to_i64() {
            return Value::from(i);
        }
    }

    let text = d.to_string();
    d.to_f64()
        .filter(|f| f.to_string() == text)
        .and_then(float_value)
        .unwrap_or(Value::String(text))
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Every pool failure means the primary could not be reached in time
fn pool_failure(err: PoolError) -> QueryExecutionError {
    QueryExecutionError::connection(DataSource::Primary, err.to_string())
}

fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

fn sqlx_failure(err: sqlx::Error) -> QueryExecutionError {
    if is_connection_error(&err) {
        return QueryExecutionError::connection(DataSource::Primary, err.to_string());
    }

    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(QUERY_CANCELED) {
            return QueryExecutionError::timeout(DataSource::Primary, db.message().to_string());
        }
        return QueryExecutionError::execution(DataSource::Primary, db.message().to_string());
    }

    QueryExecutionError::execution(DataSource::Primary, err.to_string())
}
