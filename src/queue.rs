use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::messaging::Broker;
use crate::models::{Job, JobKind};
use crate::result_store::ResultStore;

/// Client side of the job queue: submits work and answers status lookups.
#[derive(Clone)]
pub struct JobQueue {
  broker: Arc<dyn Broker>,
  results: Arc<dyn ResultStore>,
  retention: Duration,
}

impl JobQueue {
  pub fn new(broker: Arc<dyn Broker>, results: Arc<dyn ResultStore>, retention: Duration) -> Self {
    Self { broker, results, retention }
  }

  /// Records the job as PENDING and publishes it. Returns as soon as the
  /// broker has accepted the message.
  pub async fn enqueue(&self, kind: JobKind, payload: Value) -> Result<Uuid> {
    let job = Job::pending(kind, payload);
    self.results.create(&job).await?;
    if let Err(e) = self.broker.publish(&job.message()).await {
      error!("Failed to publish job {}: {}", job.id, e);
      if let Err(store_err) = self.results.mark_failure(job.id, &format!("could not be queued: {}", e)).await {
        error!("Job {} left PENDING, failure could not be recorded: {}", job.id, store_err);
      }
      return Err(e);
    }
    info!("Job {} ({}) enqueued", job.id, kind);
    Ok(job.id)
  }

  /// Current state of a job. Unknown ids and jobs past the retention window
  /// are both `NotFound`.
  pub async fn status(&self, id: Uuid) -> Result<Job> {
    match self.results.fetch(id).await? {
      Some(job) if !self.is_expired(&job, Utc::now()) => Ok(job),
      _ => Err(Error::NotFound(format!("task {}", id))),
    }
  }

  /// Like [`JobQueue::status`], for an id that still has to be parsed.
  pub async fn status_of(&self, raw_id: &str) -> Result<Job> {
    let id = Uuid::parse_str(raw_id).map_err(|_| Error::NotFound(format!("task {}", raw_id)))?;
    self.status(id).await
  }

  pub async fn recent(&self, limit: i64) -> Result<Vec<Job>> {
    let now = Utc::now();
    let jobs = self.results.recent(limit).await?;
    Ok(jobs.into_iter().filter(|job| !self.is_expired(job, now)).collect())
  }

  pub async fn purge_expired(&self) -> Result<u64> {
    let purged = self.results.purge_created_before(self.cutoff(Utc::now())).await?;
    if purged > 0 {
      info!("Purged {} expired jobs", purged);
    }
    Ok(purged)
  }

  fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
    retention_cutoff(now, self.retention)
  }

  fn is_expired(&self, job: &Job, now: DateTime<Utc>) -> bool {
    job.created_at < self.cutoff(now)
  }
}

/// Jobs created before the returned instant are past `retention`.
pub(crate) fn retention_cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
  let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
  now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
