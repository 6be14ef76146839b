use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use warp::Filter;

use crate::models::{Job, JobStatus};
use super::{AppState, with_state};

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
  pub task_id: Uuid,
  pub status: JobStatus,
  pub result: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl From<Job> for TaskStatusResponse {
  fn from(job: Job) -> Self {
    let result = match job.status {
      JobStatus::Success => job.result,
      _ => None,
    };
    Self {
      task_id: job.id,
      status: job.status,
      result,
      error: job.error,
    }
  }
}

pub fn status_route(state: AppState) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("task" / String)
    .and(warp::get())
    .and(with_state(state))
    .and_then(handle_task_status)
}

async fn handle_task_status(task_id: String, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
  let job = state.queue.status_of(&task_id).await.map_err(warp::reject::custom)?;
  Ok(warp::reply::json(&TaskStatusResponse::from(job)))
}
