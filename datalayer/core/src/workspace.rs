//! Workspace REST API client
//!
//! Thin async wrapper over the two platform APIs the data layer needs:
//! database instance lookup (to find the Lakebase endpoint) and SQL
//! statement execution (the warehouse backend).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Invalid workspace host: {0:?}")]
    InvalidHost(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        error_code: Option<String>,
        message: String,
    },

    #[error("Database instance {0} has no DNS endpoint")]
    MissingEndpoint(String),
}

impl WorkspaceError {
    /// Whether the request never reached the server or never completed
    #[must_use]
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_connect())
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_timeout())
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// `GET /api/2.0/database/instances/{name}`
#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseInstance {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub read_write_dns: Option<String>,
    #[serde(default)]
    pub read_only_dns: Option<String>,
}

impl DatabaseInstance {
    /// Hostname to connect to for read-write sessions
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.read_write_dns
            .as_deref()
            .or(self.read_only_dns.as_deref())
            .filter(|h| !h.is_empty())
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StatementParameter {
    pub name: String,
    /// `None` binds SQL NULL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "type")]
    pub type_name: &'static str,
}

/// `POST /api/2.0/sql/statements`
#[derive(Clone, Debug, Serialize)]
pub struct StatementRequest {
    pub warehouse_id: String,
    pub statement: String,
    pub wait_timeout: String,
    pub on_wait_timeout: &'static str,
    pub format: &'static str,
    pub disposition: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<StatementParameter>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Closed,
    #[serde(other)]
    Unknown,
}

impl StatementState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct StatementError {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StatementStatus {
    pub state: StatementState,
    #[serde(default)]
    pub error: Option<StatementError>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default)]
    pub type_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ResultSchema {
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResultManifest {
    #[serde(default)]
    pub schema: ResultSchema,
    #[serde(default)]
    pub total_chunk_count: Option<u32>,
}

/// One chunk of inline `JSON_ARRAY` results
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ResultData {
    #[serde(default)]
    pub chunk_index: Option<u32>,
    #[serde(default)]
    pub data_array: Vec<Vec<Value>>,
    #[serde(default)]
    pub next_chunk_index: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StatementResponse {
    pub statement_id: String,
    pub status: StatementStatus,
    #[serde(default)]
    pub manifest: Option<ResultManifest>,
    #[serde(default)]
    pub result: Option<ResultData>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Authenticated client for one workspace
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct WorkspaceClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl WorkspaceClient {
    /// # Errors
    ///
    /// Fails on an empty host or if the HTTP client cannot be built.
    pub fn new(
        host: &str,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, WorkspaceError> {
        let base_url = normalize_host(host)?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("jobs-monitor-datalayer/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub async fn database_instance(&self, name: &str) -> Result<DatabaseInstance, WorkspaceError> {
        let url = format!("{}/api/2.0/database/instances/{name}", self.base_url);
        self.send(self.http.get(url)).await
    }

    /// Lakebase hostname for the named instance
    pub async fn database_endpoint(&self, name: &str) -> Result<String, WorkspaceError> {
        let instance = self.database_instance(name).await?;
        instance
            .endpoint()
            .map(str::to_string)
            .ok_or_else(|| WorkspaceError::MissingEndpoint(name.to_string()))
    }

    pub async fn execute_statement(
        &self,
        request: &StatementRequest,
    ) -> Result<StatementResponse, WorkspaceError> {
        let url = format!("{}/api/2.0/sql/statements", self.base_url);
        self.send(self.http.post(url).json(request)).await
    }

    pub async fn get_statement(
        &self,
        statement_id: &str,
    ) -> Result<StatementResponse, WorkspaceError> {
        let url = format!("{}/api/2.0/sql/statements/{statement_id}", self.base_url);
        self.send(self.http.get(url)).await
    }

    pub async fn get_result_chunk(
        &self,
        statement_id: &str,
        chunk_index: u32,
    ) -> Result<ResultData, WorkspaceError> {
        let url = format!(
            "{}/api/2.0/sql/statements/{statement_id}/result/chunks/{chunk_index}",
            self.base_url
        );
        self.send(self.http.get(url)).await
    }

    pub async fn cancel_statement(&self, statement_id: &str) -> Result<(), WorkspaceError> {
        let url = format!(
            "{}/api/2.0/sql/statements/{statement_id}/cancel",
            self.base_url
        );
        let response = self.authorize(self.http.post(url)).send().await?;
        check_status(response).await.map(|_| ())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, WorkspaceError> {
        let response = self.authorize(request).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, WorkspaceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (error_code, message) = match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(body) => (body.error_code, body.message.unwrap_or(text)),
        Err(_) => (None, text),
    };

    Err(WorkspaceError::Api {
        status: status.as_u16(),
        error_code,
        message: if message.is_empty() {
            status.to_string()
        } else {
            message
        },
    })
}

/// `adb-123.azuredatabricks.net` -> `https://adb-123.azuredatabricks.net`
fn normalize_host(host: &str) -> Result<String, WorkspaceError> {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(WorkspaceError::InvalidHost(host.to_string()));
    }

    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("https://{trimmed}"))
    }
}
