use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use futures::{StreamExt, stream};
use serde_json::json;
use tokio_stream::wrappers::IntervalStream;
use warp::Filter;
use warp::sse::Event;

use crate::error::Error;
use crate::models::Job;
use super::{AppState, with_state};
use super::tasks::TaskStatusResponse;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub fn sse_route(state: AppState) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("sse")
    .and(warp::path::end())
    .and(warp::get())
    .and(warp::query::<HashMap<String, String>>())
    .and(with_state(state))
    .and_then(handle_sse)
}

fn status_event(job: Job) -> Event {
  Event::default()
    .event("status")
    .data(serde_json::to_string(&TaskStatusResponse::from(job)).unwrap_or_default())
}

/// Streams the job's status every poll interval and closes after the first
/// terminal status.
async fn handle_sse(query: HashMap<String, String>, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
  let task_id = query
    .get("task_id")
    .ok_or_else(|| warp::reject::custom(Error::InvalidInput("Missing task_id".into())))?;
  let first = state.queue.status_of(task_id).await.map_err(warp::reject::custom)?;
  let id = first.id;
  let queue = state.queue.clone();

  let ticks = IntervalStream::new(tokio::time::interval(POLL_INTERVAL));
  let events = stream::unfold(Some(ticks), move |ticks| {
    let queue = queue.clone();
    async move {
      let mut ticks = ticks?;
      ticks.next().await?;
      let (event, finished) = match queue.status(id).await {
        Ok(job) => {
          let finished = job.status.is_terminal();
          (status_event(job), finished)
        }
        Err(e) => {
          let detail = json!({"detail": e.to_string()}).to_string();
          (Event::default().event("error").data(detail), true)
        }
      };
      Some((Ok::<_, Infallible>(event), if finished { None } else { Some(ticks) }))
    }
  });

  Ok(warp::sse::reply(warp::sse::keep_alive().stream(events)))
}
