//! In-process record store, result store and broker.
//!
//! Backs `LRQS_BACKEND=memory`, where the API binary also runs the workers,
//! and the test suite. Nothing here survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::database::RecordStore;
use crate::error::{Error, Result};
use crate::messaging::Broker;
use crate::models::{Job, JobMessage, JobStatus, LogRecord};
use crate::result_store::ResultStore;

#[derive(Default)]
pub struct MemoryRecordStore {
  records: RwLock<HashMap<Uuid, LogRecord>>,
}

impl MemoryRecordStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn len(&self) -> usize {
    self.records.read().await.len()
  }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
  async fn insert(&self, payload: Value) -> Result<LogRecord> {
    let record = LogRecord::new(payload);
    self.records.write().await.insert(record.id, record.clone());
    Ok(record)
  }

  async fn get(&self, id: Uuid) -> Result<Option<LogRecord>> {
    Ok(self.records.read().await.get(&id).cloned())
  }

  async fn recent(&self, limit: i64) -> Result<Vec<LogRecord>> {
    let mut records: Vec<LogRecord> = self.records.read().await.values().cloned().collect();
    records.sort_by(|a, b| b.received_at.cmp(&a.received_at));
    records.truncate(limit.max(0) as usize);
    Ok(records)
  }
}

#[derive(Default)]
pub struct MemoryResultStore {
  jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryResultStore {
  pub fn new() -> Self {
    Self::default()
  }

  async fn transition(&self, id: Uuid, status: JobStatus, result: Option<Value>, error: Option<String>) -> bool {
    let mut jobs = self.jobs.write().await;
    match jobs.get_mut(&id) {
      Some(job) if !job.status.is_terminal() => {
        job.status = status;
        job.result = result;
        job.error = error;
        job.updated_at = Utc::now();
        true
      }
      _ => false,
    }
  }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
  async fn create(&self, job: &Job) -> Result<()> {
    let mut jobs = self.jobs.write().await;
    if jobs.contains_key(&job.id) {
      return Err(Error::storage(anyhow::anyhow!("job {} already exists", job.id)));
    }
    jobs.insert(job.id, job.clone());
    Ok(())
  }

  async fn mark_started(&self, id: Uuid) -> Result<bool> {
    Ok(self.transition(id, JobStatus::Started, None, None).await)
  }

  async fn mark_success(&self, id: Uuid, result: Value) -> Result<bool> {
    Ok(self.transition(id, JobStatus::Success, Some(result), None).await)
  }

  async fn mark_failure(&self, id: Uuid, error: &str) -> Result<bool> {
    Ok(self.transition(id, JobStatus::Failure, None, Some(error.to_string())).await)
  }

  async fn fetch(&self, id: Uuid) -> Result<Option<Job>> {
    Ok(self.jobs.read().await.get(&id).cloned())
  }

  async fn recent(&self, limit: i64) -> Result<Vec<Job>> {
    let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    jobs.truncate(limit.max(0) as usize);
    Ok(jobs)
  }

  async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    let mut jobs = self.jobs.write().await;
    let before = jobs.len();
    jobs.retain(|_, job| job.created_at >= cutoff);
    Ok((before - jobs.len()) as u64)
  }
}

/// Unbounded channel standing in for the message broker.
#[derive(Clone)]
pub struct MemoryBroker {
  tx: mpsc::UnboundedSender<JobMessage>,
}

impl MemoryBroker {
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<JobMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }
}

#[async_trait]
impl Broker for MemoryBroker {
  async fn publish(&self, message: &JobMessage) -> Result<()> {
    self
      .tx
      .send(message.clone())
      .map_err(|_| Error::broker(anyhow::anyhow!("in-memory queue is closed")))
  }
}
