use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Field of a job payload carrying the id of the stored log record.
pub const RECORD_ID_FIELD: &str = "_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
  pub id: Uuid,
  pub payload: Value,
  pub received_at: DateTime<Utc>,
}

impl LogRecord {
  pub fn new(payload: Value) -> Self {
    Self {
      id: Uuid::new_v4(),
      payload,
      received_at: Utc::now(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
  ProcessLog,
}

impl JobKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      JobKind::ProcessLog => "process_log",
    }
  }
}

impl fmt::Display for JobKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for JobKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "process_log" => Ok(JobKind::ProcessLog),
      other => Err(Error::InvalidInput(format!("unknown job kind '{}'", other))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
  Pending,
  Started,
  Success,
  Failure,
}

impl JobStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      JobStatus::Pending => "PENDING",
      JobStatus::Started => "STARTED",
      JobStatus::Success => "SUCCESS",
      JobStatus::Failure => "FAILURE",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, JobStatus::Success | JobStatus::Failure)
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for JobStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "PENDING" => Ok(JobStatus::Pending),
      "STARTED" => Ok(JobStatus::Started),
      "SUCCESS" => Ok(JobStatus::Success),
      "FAILURE" => Ok(JobStatus::Failure),
      other => Err(Error::storage(anyhow::anyhow!("unknown job status '{}'", other))),
    }
  }
}

/// A unit of asynchronous work as seen through the result store.
///
/// `result` is set only in [`JobStatus::Success`] and `error` only in
/// [`JobStatus::Failure`]; the store operations keep it that way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
  pub id: Uuid,
  pub kind: JobKind,
  pub status: JobStatus,
  pub input: Value,
  pub result: Option<Value>,
  pub error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Job {
  pub fn pending(kind: JobKind, input: Value) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      kind,
      status: JobStatus::Pending,
      input,
      result: None,
      error: None,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn message(&self) -> JobMessage {
    JobMessage {
      task_id: self.id,
      name: self.kind,
      payload: self.input.clone(),
    }
  }
}

/// Envelope published to the broker for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
  pub task_id: Uuid,
  pub name: JobKind,
  pub payload: Value,
}

impl JobMessage {
  pub fn to_bytes(&self) -> Result<Vec<u8>> {
    serde_json::to_vec(self).map_err(Error::broker)
  }

  pub fn from_slice(data: &[u8]) -> Result<Self> {
    serde_json::from_slice(data)
      .map_err(|e| Error::InvalidInput(format!("undecodable job message: {}", e)))
  }

  /// Best-effort recovery of the job id from a message that failed to decode.
  pub fn task_id_of(data: &[u8]) -> Option<Uuid> {
    let value: Value = serde_json::from_slice(data).ok()?;
    value.get("task_id")?.as_str()?.parse().ok()
  }
}
