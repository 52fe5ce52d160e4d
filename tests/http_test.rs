use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use formata::app::JobService;
use formata::config::Settings;
use formata::pipeline::storage::InMemoryJobStore;
use formata::server::create_server;

fn app(dir: &TempDir) -> Router {
    let service = JobService::new(&Settings::rooted_at(dir.path()), Arc::new(InMemoryJobStore::new()));
    create_server(Arc::new(service))
}

async fn send(app: &Router, method: &str, uri: &str, body: String) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let raw = if body.is_null() { String::new() } else { body.to_string() };
    let (status, bytes) = send(app, method, uri, raw).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_ingest_process_and_download() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let upload = r#"[{"name":"Ann","age":"29"},{"name":"Bob","age":"not_a_number"},{"name":"Cy","age":"41"}]"#;
    let (status, receipt) = send(&app, "POST", "/ingest?filename=ages.json", upload.to_string()).await;
    assert_eq!(status, StatusCode::CREATED);
    let receipt: Value = serde_json::from_slice(&receipt).unwrap();
    let id = receipt["job_id"].as_str().unwrap().to_string();

    let (status, preview) = send_json(
        &app,
        "POST",
        &format!("/preview/{}", id),
        json!({"name": {"op": "starts_with", "value": "a"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["matched_rows"], 1);

    let (status, accepted) = send_json(
        &app,
        "POST",
        &format!("/process/{}", id),
        json!({"filters": {"age": {"op": ">=", "value": 30}}}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(accepted["status"], "processing");

    let mut done = Value::Null;
    for _ in 0..200 {
        let (_, body) = send_json(&app, "GET", &format!("/status/{}", id), Value::Null).await;
        if body["status"] == "completed" {
            done = body;
            break;
        }
        assert_ne!(body["status"], "failed", "job failed: {}", body);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(done["progress"], 1.0);

    let (status, result) = send_json(&app, "GET", &format!("/result/{}", id), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let data = result["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["name"], "Cy");
    assert_eq!(result["metadata"]["rows_before"], 3);
    let coercion = result["errors"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["code"] == "coercion_failed")
        .expect("coercion warning recorded");
    assert_eq!(coercion["row"], 1);

    let (status, csv) = send(&app, "GET", &format!("/result/{}/download", id), String::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(csv).unwrap().lines().count(), 2);

    let (status, report) = send(&app, "GET", &format!("/errors/{}/download", id), String::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(report).unwrap().contains("coercion_failed"));

    let (status, summary) = send_json(&app, "GET", "/jobs/status/summary", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["completed"], 1);

    let (status, _) = send_json(&app, "DELETE", &format!("/jobs/{}", id), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send_json(&app, "GET", &format!("/jobs/{}", id), Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_cancel_pending_job_over_http() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let (_, receipt) = send(&app, "POST", "/ingest?filename=a.csv", "a\n1\n2\n".to_string()).await;
    let receipt: Value = serde_json::from_slice(&receipt).unwrap();
    let id = receipt["job_id"].as_str().unwrap();

    let (status, body) = send_json(&app, "POST", &format!("/jobs/{}/cancel", id), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = send_json(&app, "GET", &format!("/result/{}", id), Value::Null).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "not_ready");

    let (status, _) = send_json(&app, "POST", &format!("/process/{}", id), Value::Null).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unsupported_upload_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (status, body) = send_json(&app(&dir), "POST", "/ingest?filename=notes.pdf", Value::Null).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unsupported_format");
    assert!(body["message"].as_str().is_some());
}
