//! Warehouse executor against a mocked statement execution API

use std::time::Duration;

use datalayer_core::backend::{QueryExecutor, WarehouseExecutor, WarehouseSettings};
use datalayer_core::workspace::WorkspaceClient;
use datalayer_core::{DataSource, FailureKind, QueryParams};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn executor(server: &MockServer, query_timeout: Duration) -> WarehouseExecutor {
    executor_polling_every(server, query_timeout, Duration::from_millis(20))
}

fn executor_polling_every(
    server: &MockServer,
    query_timeout: Duration,
    poll_interval: Duration,
) -> WarehouseExecutor {
    let client = WorkspaceClient::new(
        &server.uri(),
        Some("dapi-test".to_string()),
        Duration::from_secs(5),
    )
    .unwrap();

    WarehouseExecutor::new(
        client,
        WarehouseSettings {
            warehouse_id: "wh-test".to_string(),
            wait_timeout: Duration::from_secs(10),
            query_timeout,
            poll_interval,
        },
    )
}

fn succeeded(statement_id: &str, rows: Value, next_chunk: Option<u32>) -> Value {
    json!({
        "statement_id": statement_id,
        "status": { "state": "SUCCEEDED" },
        "manifest": {
            "schema": {
                "columns": [
                    { "name": "job_id", "type_name": "STRING" },
                    { "name": "runs", "type_name": "LONG" }
                ]
            }
        },
        "result": {
            "chunk_index": 0,
            "data_array": rows,
            "next_chunk_index": next_chunk
        }
    })
}

#[tokio::test]
async fn test_inline_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/sql/statements"))
        .and(header("authorization", "Bearer dapi-test"))
        .and(body_partial_json(json!({
            "warehouse_id": "wh-test",
            "wait_timeout": "10s",
            "on_wait_timeout": "CONTINUE",
            "format": "JSON_ARRAY",
            "disposition": "INLINE"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(succeeded(
            "st-1",
            json!([["101", "4"], ["102", "9"]]),
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let result = executor(&server, Duration::from_secs(5))
        .execute("SELECT job_id, runs FROM system.lakeflow.jobs", None)
        .await
        .unwrap();

    assert_eq!(result.source(), DataSource::Fallback);
    assert_eq!(result.columns(), ["job_id", "runs"]);
    assert_eq!(result.rows()[0], vec![json!("101"), json!(4)]);
    assert_eq!(result.row_count(), 2);
    assert!(!result.from_cache());
}

#[tokio::test]
async fn test_named_parameters_are_sent_typed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/sql/statements"))
        .and(body_partial_json(json!({
            "parameters": [
                { "name": "days", "value": "30", "type": "BIGINT" },
                { "name": "workspace", "value": "prod", "type": "STRING" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(succeeded("st-p", json!([]), None)))
        .expect(1)
        .mount(&server)
        .await;

    let mut params = QueryParams::new();
    params.insert("days".into(), json!(30));
    params.insert("workspace".into(), json!("prod"));

    let result = executor(&server, Duration::from_secs(5))
        .execute(
            "SELECT * FROM system.billing.usage WHERE usage_date > current_date() - :days",
            Some(&params),
        )
        .await
        .unwrap();

    assert!(result.is_empty());
}

#[tokio::test]
async fn test_failed_statement_carries_remote_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/sql/statements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statement_id": "st-2",
            "status": {
                "state": "FAILED",
                "error": {
                    "error_code": "TABLE_OR_VIEW_NOT_FOUND",
                    "message": "Table or view not found: system.billing.nope"
                }
            }
        })))
        .mount(&server)
        .await;

    let err = executor(&server, Duration::from_secs(5))
        .execute("SELECT * FROM system.billing.nope", None)
        .await
        .unwrap_err();

    assert_eq!(err.backend, DataSource::Fallback);
    assert_eq!(err.kind, FailureKind::Execution);
    assert_eq!(
        err.message(),
        "Query failed: Table or view not found: system.billing.nope"
    );
}

#[tokio::test]
async fn test_failed_statement_without_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/sql/statements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statement_id": "st-3",
            "status": { "state": "CANCELED" }
        })))
        .mount(&server)
        .await;

    let err = executor(&server, Duration::from_secs(5))
        .execute("SELECT 1", None)
        .await
        .unwrap_err();

    assert_eq!(err.message(), "Query failed: Unknown error");
}

#[tokio::test]
async fn test_pending_statement_is_polled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/sql/statements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statement_id": "st-4",
            "status": { "state": "PENDING" }
        })))
        .mount(&server)
        .await;

    // First poll still running, then done
    Mock::given(method("GET"))
        .and(path("/api/2.0/sql/statements/st-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statement_id": "st-4",
            "status": { "state": "RUNNING" }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/sql/statements/st-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(succeeded(
            "st-4",
            json!([["7", "1"]]),
            None,
        )))
        .mount(&server)
        .await;

    let result = executor(&server, Duration::from_secs(5))
        .execute("SELECT 1", None)
        .await
        .unwrap();

    assert_eq!(result.rows(), [vec![json!("7"), json!(1)]]);
}

#[tokio::test]
async fn test_result_chunks_are_followed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/sql/statements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(succeeded(
            "st-5",
            json!([["1", "1"], ["2", "2"]]),
            Some(1),
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/sql/statements/st-5/result/chunks/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chunk_index": 1,
            "data_array": [["3", null]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = executor(&server, Duration::from_secs(5))
        .execute("SELECT job_id, runs FROM big_table", None)
        .await
        .unwrap();

    assert_eq!(result.row_count(), 3);
    assert_eq!(result.rows()[2], vec![json!("3"), Value::Null]);
}

#[tokio::test]
async fn test_query_timeout_cancels_statement() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/sql/statements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statement_id": "st-slow",
            "status": { "state": "PENDING" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/sql/statements/st-slow"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statement_id": "st-slow",
            "status": { "state": "RUNNING" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/sql/statements/st-slow/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let err = executor(&server, Duration::from_millis(200))
        .execute("SELECT pg_sleep(600)", None)
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::StatementTimeout);

    // The cancel is issued from a spawned task
    let cancelled = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests
                .iter()
                .any(|r| r.url.path() == "/api/2.0/sql/statements/st-slow/cancel")
            {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(cancelled.is_ok(), "statement was not cancelled");
}

/// Mounts a statement that never leaves `RUNNING`, plus its cancel endpoint
async fn mount_stuck_statement(server: &MockServer, statement_id: &str) {
    let running = json!({
        "statement_id": statement_id,
        "status": { "state": "RUNNING" }
    });
    Mock::given(method("POST"))
        .and(path("/api/2.0/sql/statements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(running.clone()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/2.0/sql/statements/{statement_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(running))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/api/2.0/sql/statements/{statement_id}/cancel")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

async fn cancel_received(server: &MockServer, statement_id: &str) -> bool {
    let cancel_path = format!("/api/2.0/sql/statements/{statement_id}/cancel");
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.iter().any(|r| r.url.path() == cancel_path) {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_dropped_query_cancels_statement() {
    let server = MockServer::start().await;
    mount_stuck_statement(&server, "st-dropped").await;

    let executor = executor(&server, Duration::from_secs(30));
    // Caller gives up long before the executor's own deadline
    let outcome = tokio::time::timeout(
        Duration::from_millis(150),
        executor.execute("SELECT * FROM big_table", None),
    )
    .await;

    assert!(outcome.is_err(), "query should still have been running");
    assert!(
        cancel_received(&server, "st-dropped").await,
        "dropped query was not cancelled"
    );
}

#[tokio::test]
async fn test_zero_poll_interval_still_polls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/sql/statements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statement_id": "st-fast",
            "status": { "state": "PENDING" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/sql/statements/st-fast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(succeeded(
            "st-fast",
            json!([["1", "2"]]),
            None,
        )))
        .mount(&server)
        .await;

    let result = executor_polling_every(&server, Duration::from_secs(5), Duration::ZERO)
        .execute("SELECT 1", None)
        .await
        .unwrap();

    assert_eq!(result.rows(), [vec![json!("1"), json!(2)]]);
}

#[tokio::test]
async fn test_api_error_maps_to_execution_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/sql/statements"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error_code": "PERMISSION_DENIED",
            "message": "User does not have CAN_USE on warehouse"
        })))
        .mount(&server)
        .await;

    let err = executor(&server, Duration::from_secs(5))
        .execute("SELECT 1", None)
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Execution);
    assert!(err.message().contains("CAN_USE"));
}
