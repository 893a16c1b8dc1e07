//! Test doubles shared by unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::backend::QueryExecutor;
use crate::error::QueryExecutionError;
use crate::result::{DataSource, QueryParams, QueryResult};

/// Executor whose outcome is scripted and whose calls are counted
pub(crate) struct ScriptedExecutor {
    source: DataSource,
    calls: AtomicUsize,
    closes: AtomicUsize,
    failing: AtomicBool,
    failure_message: String,
    /// Queries containing this text fail even when `failing` is off
    fail_matching: Mutex<Option<String>>,
    latency_ms: Mutex<f64>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub(crate) fn succeeding(source: DataSource) -> Arc<Self> {
        Arc::new(Self::build(source, false, "scripted failure"))
    }

    pub(crate) fn failing(source: DataSource, message: &str) -> Arc<Self> {
        Arc::new(Self::build(source, true, message))
    }

    fn build(source: DataSource, failing: bool, message: &str) -> Self {
        Self {
            source,
            calls: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            failing: AtomicBool::new(failing),
            failure_message: message.to_string(),
            fail_matching: Mutex::new(None),
            latency_ms: Mutex::new(1.0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn fail_queries_containing(&self, needle: &str) {
        *self.fail_matching.lock() = Some(needle.to_string());
    }

    pub(crate) fn set_latency_ms(&self, ms: f64) {
        *self.latency_ms.lock() = ms;
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    fn source(&self) -> DataSource {
        self.source
    }

    async fn execute(
        &self,
        query: &str,
        _params: Option<&QueryParams>,
    ) -> Result<QueryResult, QueryExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.to_string());

        let matched = self
            .fail_matching
            .lock()
            .as_deref()
            .is_some_and(|needle| query.contains(needle));
        if matched || self.failing.load(Ordering::SeqCst) {
            return Err(QueryExecutionError::execution(
                self.source,
                self.failure_message.clone(),
            ));
        }

        let latency = *self.latency_ms.lock();
        QueryResult::new(
            vec!["value".to_string()],
            vec![vec![json!(1)]],
            self.source,
            latency,
        )
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
