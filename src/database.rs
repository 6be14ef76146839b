use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::migrate::Migrator;
use sqlx::{FromRow, PgPool, Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::LogRecord;

static MIGRATOR: Migrator = sqlx::migrate!();

pub async fn setup_database(database_url: &str) -> anyhow::Result<Pool<Postgres>> {
  let pool = Pool::<Postgres>::connect(database_url).await?;
  MIGRATOR.run(&pool).await?;
  info!("Database migrations complete");
  Ok(pool)
}

/// Persistence for inbound log records. Records are written once by the API
/// and never updated.
#[async_trait]
pub trait RecordStore: Send + Sync {
  async fn insert(&self, payload: Value) -> Result<LogRecord>;

  async fn get(&self, id: Uuid) -> Result<Option<LogRecord>>;

  /// Newest records first.
  async fn recent(&self, limit: i64) -> Result<Vec<LogRecord>>;
}

#[derive(FromRow)]
struct LogRecordRow {
  id: Uuid,
  payload: Value,
  received_at: DateTime<Utc>,
}

impl From<LogRecordRow> for LogRecord {
  fn from(row: LogRecordRow) -> Self {
    LogRecord {
      id: row.id,
      payload: row.payload,
      received_at: row.received_at,
    }
  }
}

#[derive(Clone)]
pub struct PgRecordStore {
  pool: PgPool,
}

impl PgRecordStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl RecordStore for PgRecordStore {
  async fn insert(&self, payload: Value) -> Result<LogRecord> {
    let record = LogRecord::new(payload);
    sqlx::query("INSERT INTO log_records (id, payload, received_at) VALUES ($1, $2, $3)")
      .bind(record.id)
      .bind(&record.payload)
      .bind(record.received_at)
      .execute(&self.pool)
      .await
      .map_err(Error::storage)?;
    Ok(record)
  }

  async fn get(&self, id: Uuid) -> Result<Option<LogRecord>> {
    let row = sqlx::query_as::<_, LogRecordRow>(
      "SELECT id, payload, received_at FROM log_records WHERE id = $1",
    )
      .bind(id)
      .fetch_optional(&self.pool)
      .await
      .map_err(Error::storage)?;
    Ok(row.map(LogRecord::from))
  }

  async fn recent(&self, limit: i64) -> Result<Vec<LogRecord>> {
    let rows = sqlx::query_as::<_, LogRecordRow>(
      "SELECT id, payload, received_at FROM log_records ORDER BY received_at DESC LIMIT $1",
    )
      .bind(limit)
      .fetch_all(&self.pool)
      .await
      .map_err(Error::storage)?;
    Ok(rows.into_iter().map(LogRecord::from).collect())
  }
}
