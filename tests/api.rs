mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;
use warp::http::StatusCode;
use lrqs::database::RecordStore;
use lrqs::error::{Error, Result};
use lrqs::models::{Job, JobKind, LogRecord};
use lrqs::result_store::ResultStore;
use lrqs::routes::logs::{ACCEPTED_STATUS, LogResponse};
use lrqs::routes::tasks::TaskStatusResponse;
use lrqs::routes::{AppState, routes};

use common::{assert_success, test_app, wait_for_terminal};

type Response = warp::http::Response<warp::hyper::body::Bytes>;

async fn post_log(state: &AppState, body: Value) -> Response {
  warp::test::request()
    .method("POST")
    .path("/logs")
    .json(&body)
    .reply(&routes(state.clone()))
    .await
}

async fn get(state: &AppState, path: &str) -> Response {
  warp::test::request()
    .method("GET")
    .path(path)
    .reply(&routes(state.clone()))
    .await
}

fn body_json(response: &Response) -> Value {
  serde_json::from_slice(response.body()).expect("response body is JSON")
}

#[tokio::test]
async fn root_reports_operational() {
  let app = test_app(false);
  let response = get(&app.state, "/").await;
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(body_json(&response), json!({"message": "API is operational"}));
}

#[tokio::test]
async fn object_log_is_stored_and_processed() {
  let app = test_app(true);
  let response = post_log(&app.state, json!({"log_data": {"a": 1}})).await;
  assert_eq!(response.status(), StatusCode::OK);

  let body: LogResponse = serde_json::from_slice(response.body()).unwrap();
  assert_eq!(body.status, ACCEPTED_STATUS);
  let log_id = body.log_id.expect("log_id");
  let task_id = body.task_id.expect("task_id");

  let record = app.records.get(log_id).await.unwrap().expect("record stored");
  assert_eq!(record.payload, json!({"a": 1}));

  let job = wait_for_terminal(&app.state.queue, task_id).await;
  assert_success(&job);

  let response = get(&app.state, &format!("/task/{}", task_id)).await;
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(
    body_json(&response),
    json!({
      "task_id": task_id.to_string(),
      "status": "SUCCESS",
      "result": {"a": 1, "_id": log_id.to_string()},
    })
  );
}

#[tokio::test]
async fn sensitive_fields_are_redacted_but_stored_record_is_not() {
  let app = test_app(true);
  let response = post_log(
    &app.state,
    json!({"log_data": {"msg": "contact me at a@b.com or 555-123-4567", "level": "info", "code": 5551234567u64}}),
  )
  .await;
  let body: LogResponse = serde_json::from_slice(response.body()).unwrap();
  let job = wait_for_terminal(&app.state.queue, body.task_id.unwrap()).await;
  assert_success(&job);

  let result = job.result.unwrap();
  assert_eq!(result["msg"], "contact me at [REDACTED_EMAIL] or [REDACTED_PHONE]");
  assert_eq!(result["level"], "info");
  assert_eq!(result["code"], json!(5551234567u64));
  assert_eq!(result["_id"], body.log_id.unwrap().to_string());

  let record = app.records.get(body.log_id.unwrap()).await.unwrap().unwrap();
  assert_eq!(record.payload["msg"], "contact me at a@b.com or 555-123-4567");
}

#[tokio::test]
async fn string_log_is_accepted_without_storage() {
  let app = test_app(false);
  let response = post_log(&app.state, json!({"log_data": "plain string"})).await;
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(
    body_json(&response),
    json!({"status": ACCEPTED_STATUS, "log_id": null, "task_id": null})
  );
  assert_eq!(app.records.len().await, 0);
  assert!(app.results.recent(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn other_log_types_are_rejected() {
  let app = test_app(false);
  for body in [
    json!({"log_data": 42}),
    json!({"log_data": null}),
    json!({"log_data": [1, 2]}),
    json!({"log_data": true}),
    json!({}),
  ] {
    let response = post_log(&app.state, body.clone()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {}", body);
    let detail = body_json(&response)["detail"].as_str().unwrap().to_string();
    assert!(detail.starts_with("Invalid log format"), "detail {}", detail);
  }
  assert_eq!(app.records.len().await, 0);
}

#[tokio::test]
async fn malformed_body_is_rejected() {
  let app = test_app(false);
  let response = warp::test::request()
    .method("POST")
    .path("/logs")
    .header("content-type", "application/json")
    .body("{not json")
    .reply(&routes(app.state.clone()))
    .await;
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_task_is_not_found() {
  let app = test_app(false);
  for path in ["/task/nonexistent-id".to_string(), format!("/task/{}", Uuid::new_v4())] {
    let response = get(&app.state, &path).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND, "path {}", path);
  }
}

#[tokio::test]
async fn pending_task_has_no_result() {
  let app = test_app(false);
  let response = post_log(&app.state, json!({"log_data": {"a": 1}})).await;
  let body: LogResponse = serde_json::from_slice(response.body()).unwrap();

  let response = get(&app.state, &format!("/task/{}", body.task_id.unwrap())).await;
  assert_eq!(response.status(), StatusCode::OK);
  let status: TaskStatusResponse = serde_json::from_slice(response.body()).unwrap();
  assert_eq!(status.status.as_str(), "PENDING");
  assert!(status.result.is_none());
  assert!(status.error.is_none());
}

#[tokio::test]
async fn failed_task_reports_error_without_result() {
  let app = test_app(false);
  let job = Job::pending(JobKind::ProcessLog, json!({"a": 1}));
  app.results.create(&job).await.unwrap();
  app.results.mark_started(job.id).await.unwrap();
  app.results.mark_failure(job.id, "boom").await.unwrap();

  let response = get(&app.state, &format!("/task/{}", job.id)).await;
  assert_eq!(
    body_json(&response),
    json!({"task_id": job.id.to_string(), "status": "FAILURE", "result": null, "error": "boom"})
  );
}

#[tokio::test]
async fn expired_task_is_not_found() {
  let app = test_app(false);
  let mut job = Job::pending(JobKind::ProcessLog, json!({}));
  job.created_at = chrono::Utc::now() - chrono::Duration::hours(2);
  app.results.create(&job).await.unwrap();

  let response = get(&app.state, &format!("/task/{}", job.id)).await;
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_method_and_unknown_path() {
  let app = test_app(false);
  assert_eq!(get(&app.state, "/logs").await.status(), StatusCode::METHOD_NOT_ALLOWED);
  assert_eq!(get(&app.state, "/nowhere").await.status(), StatusCode::NOT_FOUND);
}

struct BrokenRecords;

#[async_trait]
impl RecordStore for BrokenRecords {
  async fn insert(&self, _payload: Value) -> Result<LogRecord> {
    Err(Error::storage(anyhow::anyhow!("database is down")))
  }

  async fn get(&self, _id: Uuid) -> Result<Option<LogRecord>> {
    Ok(None)
  }

  async fn recent(&self, _limit: i64) -> Result<Vec<LogRecord>> {
    Ok(vec![])
  }
}

#[tokio::test]
async fn storage_failure_is_a_server_error() {
  let app = test_app(false);
  let state = AppState::new(Arc::new(BrokenRecords), app.state.queue.clone());
  let response = post_log(&state, json!({"log_data": {"a": 1}})).await;
  assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
  assert!(app.results.recent(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn sse_streams_until_terminal_status() {
  let app = test_app(true);
  let response = post_log(&app.state, json!({"log_data": {"user": "x@y.org"}})).await;
  let body: LogResponse = serde_json::from_slice(response.body()).unwrap();
  let task_id = body.task_id.unwrap();
  wait_for_terminal(&app.state.queue, task_id).await;

  let response = get(&app.state, &format!("/sse?task_id={}", task_id)).await;
  assert_eq!(response.status(), StatusCode::OK);
  let text = String::from_utf8(response.body().to_vec()).unwrap();
  assert!(text.contains("event:status"), "stream was {}", text);
  assert!(text.contains("SUCCESS"));
  assert!(text.contains("[REDACTED_EMAIL]"));
}

#[tokio::test]
async fn sse_requires_known_task() {
  let app = test_app(false);
  assert_eq!(get(&app.state, "/sse").await.status(), StatusCode::BAD_REQUEST);
  assert_eq!(
    get(&app.state, &format!("/sse?task_id={}", Uuid::new_v4())).await.status(),
    StatusCode::NOT_FOUND
  );
}

#[tokio::test]
async fn sse_reports_error_when_task_disappears() {
  let app = test_app(false);
  let response = post_log(&app.state, json!({"log_data": {"a": 1}})).await;
  let body: LogResponse = serde_json::from_slice(response.body()).unwrap();
  let task_id = body.task_id.unwrap();

  let sse_path = format!("/sse?task_id={}", task_id);
  let stream = get(&app.state, &sse_path);
  let purge = async {
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    app.results.purge_created_before(chrono::Utc::now() + chrono::Duration::hours(1)).await.unwrap()
  };
  let (response, purged) = tokio::join!(stream, purge);
  assert_eq!(purged, 1);

  assert_eq!(response.status(), StatusCode::OK);
  let text = String::from_utf8(response.body().to_vec()).unwrap();
  let status_at = text.find("event:status").expect("status event first");
  let error_at = text.find("event:error").expect("error event after purge");
  assert!(status_at < error_at, "stream was {}", text);
  assert!(text.contains("PENDING"));
  assert!(text.contains(&format!("task {} not found", task_id)), "stream was {}", text);
}
