//! Job state keyed by job id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Job, JobStatus};

/// Durable job state. Only the API creates entries and only workers move them
/// forward; a terminal entry is never rewritten.
#[async_trait]
pub trait ResultStore: Send + Sync {
  async fn create(&self, job: &Job) -> Result<()>;

  /// Moves a PENDING (or already STARTED) job to STARTED. Returns false when
  /// the job is unknown or terminal.
  async fn mark_started(&self, id: Uuid) -> Result<bool>;

  async fn mark_success(&self, id: Uuid, result: Value) -> Result<bool>;

  async fn mark_failure(&self, id: Uuid, error: &str) -> Result<bool>;

  async fn fetch(&self, id: Uuid) -> Result<Option<Job>>;

  async fn recent(&self, limit: i64) -> Result<Vec<Job>>;

  /// Deletes jobs created before `cutoff`, returning how many went away.
  async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[derive(FromRow)]
struct JobRow {
  id: Uuid,
  kind: String,
  status: String,
  input: Value,
  result: Option<Value>,
  error: Option<String>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
  type Error = Error;

  fn try_from(row: JobRow) -> Result<Self> {
    Ok(Job {
      id: row.id,
      kind: row.kind.parse().map_err(|e: Error| Error::storage(anyhow::anyhow!("{}", e)))?,
      status: row.status.parse()?,
      input: row.input,
      result: row.result,
      error: row.error,
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}

const JOB_COLUMNS: &str = "id, kind, status, input, result, error, created_at, updated_at";

#[derive(Clone)]
pub struct PgResultStore {
  pool: PgPool,
}

impl PgResultStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  async fn transition(&self, id: Uuid, status: JobStatus, result: Option<Value>, error: Option<&str>) -> Result<bool> {
    let done = sqlx::query(
      "UPDATE jobs SET status = $2, result = $3, error = $4, updated_at = $5
       WHERE id = $1 AND status IN ('PENDING', 'STARTED')",
    )
      .bind(id)
      .bind(status.as_str())
      .bind(result)
      .bind(error)
      .bind(Utc::now())
      .execute(&self.pool)
      .await
      .map_err(Error::storage)?;
    Ok(done.rows_affected() == 1)
  }
}

#[async_trait]
impl ResultStore for PgResultStore {
  async fn create(&self, job: &Job) -> Result<()> {
    sqlx::query(
      "INSERT INTO jobs (id, kind, status, input, result, error, created_at, updated_at)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
      .bind(job.id)
      .bind(job.kind.as_str())
      .bind(job.status.as_str())
      .bind(&job.input)
      .bind(&job.result)
      .bind(&job.error)
      .bind(job.created_at)
      .bind(job.updated_at)
      .execute(&self.pool)
      .await
      .map_err(Error::storage)?;
    Ok(())
  }

  async fn mark_started(&self, id: Uuid) -> Result<bool> {
    self.transition(id, JobStatus::Started, None, None).await
  }

  async fn mark_success(&self, id: Uuid, result: Value) -> Result<bool> {
    self.transition(id, JobStatus::Success, Some(result), None).await
  }

  async fn mark_failure(&self, id: Uuid, error: &str) -> Result<bool> {
    self.transition(id, JobStatus::Failure, None, Some(error)).await
  }

  async fn fetch(&self, id: Uuid) -> Result<Option<Job>> {
    let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
      .bind(id)
      .fetch_optional(&self.pool)
      .await
      .map_err(Error::storage)?;
    row.map(Job::try_from).transpose()
  }

  async fn recent(&self, limit: i64) -> Result<Vec<Job>> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
      "SELECT {} FROM jobs ORDER BY created_at DESC LIMIT $1",
      JOB_COLUMNS
    ))
      .bind(limit)
      .fetch_all(&self.pool)
      .await
      .map_err(Error::storage)?;
    rows.into_iter().map(Job::try_from).collect()
  }

  async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    let done = sqlx::query("DELETE FROM jobs WHERE created_at < $1")
      .bind(cutoff)
      .execute(&self.pool)
      .await
      .map_err(Error::storage)?;
    Ok(done.rows_affected())
  }
}
