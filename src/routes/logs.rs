use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;
use warp::Filter;

use crate::error::Error;
use crate::models::{JobKind, RECORD_ID_FIELD};
use crate::redactor::json_type_name;
use super::{AppState, with_state};

pub const ACCEPTED_STATUS: &str = "Log stored and processing...";

#[derive(Deserialize)]
pub struct LogSubmission {
  #[serde(default)]
  pub log_data: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogResponse {
  pub status: String,
  pub log_id: Option<Uuid>,
  pub task_id: Option<Uuid>,
}

pub fn submit_route(state: AppState) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("logs")
    .and(warp::path::end())
    .and(warp::post())
    .and(warp::body::json())
    .and(with_state(state))
    .and_then(handle_submit_log)
}

async fn handle_submit_log(submission: LogSubmission, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
  let response = match submission.log_data {
    Value::Object(mut payload) => {
      let record = state
        .records
        .insert(Value::Object(payload.clone()))
        .await
        .map_err(|e| {
          error!("Failed to store log record: {}", e);
          warp::reject::custom(e)
        })?;

      payload.insert(RECORD_ID_FIELD.to_string(), Value::String(record.id.to_string()));
      let task_id = state
        .queue
        .enqueue(JobKind::ProcessLog, Value::Object(payload))
        .await
        .map_err(|e| {
          error!("Failed to enqueue log {}: {}", record.id, e);
          warp::reject::custom(e)
        })?;

      info!("Log {} stored, redaction task {}", record.id, task_id);
      LogResponse {
        status: ACCEPTED_STATUS.into(),
        log_id: Some(record.id),
        task_id: Some(task_id),
      }
    }
    // Plain-text logs are accepted but neither stored nor processed.
    Value::String(_) => LogResponse {
      status: ACCEPTED_STATUS.into(),
      log_id: None,
      task_id: None,
    },
    other => {
      return Err(warp::reject::custom(Error::InvalidInput(format!(
        "Invalid log format: expected an object or a string, got {}",
        json_type_name(&other)
      ))));
    }
  };

  Ok(warp::reply::json(&response))
}
