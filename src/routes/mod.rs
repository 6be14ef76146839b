use std::convert::Infallible;
use std::sync::Arc;

use serde_json::json;
use tracing::error;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::database::RecordStore;
use crate::error::Error;
use crate::queue::JobQueue;

pub mod logs;
pub mod sse;
pub mod tasks;

/// Process-wide dependencies shared by every handler.
#[derive(Clone)]
pub struct AppState {
  pub records: Arc<dyn RecordStore>,
  pub queue: JobQueue,
}

impl AppState {
  pub fn new(records: Arc<dyn RecordStore>, queue: JobQueue) -> Self {
    Self { records, queue }
  }
}

pub(crate) fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
  warp::any().map(move || state.clone())
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
  health_route()
    .or(logs::submit_route(state.clone()))
    .or(tasks::status_route(state.clone()))
    .or(sse::sse_route(state))
    .recover(handle_rejection)
}

fn health_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path::end()
    .and(warp::get())
    .map(|| warp::reply::json(&json!({"message": "API is operational"})))
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
  let (code, detail) = if let Some(e) = err.find::<Error>() {
    match e {
      Error::InvalidInput(message) => (StatusCode::BAD_REQUEST, message.clone()),
      Error::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", capitalize(what))),
      Error::Processing(_) | Error::Storage(_) | Error::Broker(_) => {
        error!("Request failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
      }
    }
  } else if err.is_not_found() {
    (StatusCode::NOT_FOUND, "Not found".to_string())
  } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
    (StatusCode::BAD_REQUEST, "Invalid log format".to_string())
  } else if err.find::<warp::reject::InvalidQuery>().is_some() {
    (StatusCode::BAD_REQUEST, "Invalid query string".to_string())
  } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
    (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected a JSON body".to_string())
  } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
  } else {
    error!("Unhandled rejection: {:?}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
  };
  Ok(warp::reply::with_status(warp::reply::json(&json!({"detail": detail})), code))
}

fn capitalize(text: &str) -> String {
  let mut chars = text.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}
