use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_retry::Retry;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::messaging::retry_strategy;
use crate::models::{JobKind, JobMessage, JobStatus};
use crate::queue::retention_cutoff;
use crate::redactor::redact_value;
use crate::result_store::ResultStore;

/// Synchronous job body: payload in, result mapping out.
pub type JobHandler = fn(&Value) -> Result<Value>;

pub fn process_log(payload: &Value) -> Result<Value> {
  redact_value(payload).map_err(|e| Error::Processing(e.to_string()))
}

/// Explicit mapping from job kind to the code that runs it.
#[derive(Clone)]
pub struct HandlerTable {
  handlers: HashMap<JobKind, JobHandler>,
}

impl HandlerTable {
  pub fn empty() -> Self {
    Self { handlers: HashMap::new() }
  }

  pub fn register(mut self, kind: JobKind, handler: JobHandler) -> Self {
    self.handlers.insert(kind, handler);
    self
  }

  pub fn get(&self, kind: JobKind) -> Option<JobHandler> {
    self.handlers.get(&kind).copied()
  }
}

impl Default for HandlerTable {
  fn default() -> Self {
    Self::empty().register(JobKind::ProcessLog, process_log)
  }
}

/// Drives one job at a time through PENDING -> STARTED -> SUCCESS | FAILURE.
/// Holds no per-job state, so one instance can be shared by a whole pool.
#[derive(Clone)]
pub struct Worker {
  id: String,
  results: Arc<dyn ResultStore>,
  handlers: HandlerTable,
  retention: Option<Duration>,
}

impl Worker {
  pub fn new(id: impl Into<String>, results: Arc<dyn ResultStore>, handlers: HandlerTable) -> Self {
    Self { id: id.into(), results, handlers, retention: None }
  }

  /// Skip jobs older than `retention` even if the purge has not removed them yet.
  pub fn with_retention(mut self, retention: Duration) -> Self {
    self.retention = Some(retention);
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// Runs one delivered job. `Ok(None)` means the job was skipped: it is
  /// unknown, expired, or already finished by an earlier delivery. An `Err`
  /// means the result store could not be updated.
  pub async fn process(&self, message: &JobMessage) -> Result<Option<JobStatus>> {
    let task_id = message.task_id;
    let current = with_retries(|| self.results.fetch(task_id)).await?;
    match current {
      None => {
        warn!("Worker {}: job {} is unknown or purged, skipping", self.id, task_id);
        return Ok(None);
      }
      Some(job) if self.is_expired(job.created_at) => {
        warn!("Worker {}: job {} is past retention, skipping", self.id, task_id);
        return Ok(None);
      }
      Some(job) if job.status.is_terminal() => {
        info!("Worker {}: job {} already {}, skipping redelivery", self.id, task_id, job.status);
        return Ok(None);
      }
      Some(_) => {}
    }

    with_retries(|| self.results.mark_started(task_id)).await?;
    info!("Worker {}: processing {} job {}", self.id, message.name, task_id);

    let outcome = match self.handlers.get(message.name) {
      Some(handler) => handler(&message.payload),
      None => Err(Error::Processing(format!("no handler registered for '{}'", message.name))),
    };

    match outcome {
      Ok(result) => {
        with_retries(|| self.results.mark_success(task_id, result.clone())).await?;
        info!("Worker {}: job {} succeeded", self.id, task_id);
        Ok(Some(JobStatus::Success))
      }
      Err(e) => {
        let reason = e.to_string();
        with_retries(|| self.results.mark_failure(task_id, &reason)).await?;
        error!("Worker {}: job {} failed: {}", self.id, task_id, reason);
        Ok(Some(JobStatus::Failure))
      }
    }
  }

  fn is_expired(&self, created_at: chrono::DateTime<Utc>) -> bool {
    self
      .retention
      .is_some_and(|retention| created_at < retention_cutoff(Utc::now(), retention))
  }

  /// Handles a broker message that did not decode. If its job id can be
  /// recovered the job is failed so pollers see an outcome.
  pub async fn reject_undecodable(&self, data: &[u8], reason: &Error) -> Result<()> {
    error!("Worker {}: dropping undecodable message: {}", self.id, reason);
    if let Some(task_id) = JobMessage::task_id_of(data) {
      let reason = reason.to_string();
      with_retries(|| self.results.mark_failure(task_id, &reason)).await?;
    }
    Ok(())
  }
}

/// What to tell the broker about a delivery once the worker is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
  Ack,
  /// Negative ack with requeue.
  Requeue,
  /// Negative ack without requeue.
  Drop,
}

/// Processed or skipped jobs are acked. When the outcome could not be
/// recorded the message goes back to the queue once; a redelivery is dropped.
pub fn settle(outcome: &Result<Option<JobStatus>>, redelivered: bool) -> Settlement {
  match outcome {
    Ok(_) => Settlement::Ack,
    Err(_) if redelivered => Settlement::Drop,
    Err(_) => Settlement::Requeue,
  }
}

async fn with_retries<T, F, Fut>(mut action: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  Retry::spawn(retry_strategy(), || {
    let attempt = action();
    async move {
      attempt.await.inspect_err(|e| warn!("Result store write failed, retrying: {}", e))
    }
  })
    .await
}

/// Runs a pool of up to `concurrency` jobs at once over an in-process queue,
/// until the queue closes or `shutdown` flips to true.
pub async fn run_local_pool(
  worker: Worker,
  mut jobs: mpsc::UnboundedReceiver<JobMessage>,
  concurrency: usize,
  mut shutdown: watch::Receiver<bool>,
) {
  let semaphore = Arc::new(Semaphore::new(concurrency));
  info!("Worker {}: local pool started with {} slots", worker.id(), concurrency);
  loop {
    let message = tokio::select! {
      message = jobs.recv() => match message {
        Some(message) => message,
        None => break,
      },
      changed = shutdown.changed() => {
        if changed.is_err() || *shutdown.borrow() {
          break;
        }
        continue;
      }
    };
    let Ok(permit) = semaphore.clone().acquire_owned().await else {
      break;
    };
    let worker = worker.clone();
    tokio::spawn(async move {
      if let Err(e) = worker.process(&message).await {
        error!("Worker {}: job {} abandoned: {}", worker.id(), message.task_id, e);
      }
      drop(permit);
    });
  }
  info!("Worker {}: local pool stopped", worker.id());
}
