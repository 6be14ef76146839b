use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use uuid::Uuid;

/// Upper bound so the value fits the broker prefetch count.
pub const MAX_WORKER_CONCURRENCY: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
  Postgres,
  Memory,
}

impl FromStr for Backend {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "postgres" => Ok(Backend::Postgres),
      "memory" => Ok(Backend::Memory),
      other => bail!("unknown backend '{}', expected 'postgres' or 'memory'", other),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  pub backend: Backend,
  pub database_url: Option<String>,
  pub rabbitmq_url: Option<String>,
  pub server_port: u16,
  pub queue_name: String,
  pub worker_concurrency: usize,
  pub worker_id: String,
  pub result_expires: Duration,
  pub beat_interval: Duration,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let backend = match lookup("LRQS_BACKEND") {
      Some(value) => value.parse()?,
      None => Backend::Postgres,
    };
    let config = Self {
      backend,
      database_url: lookup("DATABASE_URL"),
      rabbitmq_url: lookup("RABBITMQ_URL"),
      server_port: parse_or(&lookup, "SERVER_PORT", 8080)?,
      queue_name: lookup("LOG_QUEUE").unwrap_or_else(|| "log_queue".into()),
      worker_concurrency: parse_or(&lookup, "WORKER_CONCURRENCY", 4)?,
      worker_id: lookup("WORKER_ID")
        .unwrap_or_else(|| format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8])),
      result_expires: Duration::from_secs(parse_or(&lookup, "RESULT_EXPIRES_SECS", 3600)?),
      beat_interval: Duration::from_secs(parse_or(&lookup, "BEAT_INTERVAL_SECS", 10)?),
    };
    if !(1..=MAX_WORKER_CONCURRENCY).contains(&config.worker_concurrency) {
      bail!("WORKER_CONCURRENCY must be between 1 and {}", MAX_WORKER_CONCURRENCY);
    }
    if config.backend == Backend::Postgres {
      config.database_url()?;
      config.rabbitmq_url()?;
    }
    Ok(config)
  }

  pub fn database_url(&self) -> Result<&str> {
    self.database_url.as_deref().ok_or_else(|| anyhow!("DATABASE_URL is not set"))
  }

  pub fn rabbitmq_url(&self) -> Result<&str> {
    self.rabbitmq_url.as_deref().ok_or_else(|| anyhow!("RABBITMQ_URL is not set"))
  }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match lookup(key) {
    Some(raw) => raw.trim().parse().with_context(|| format!("invalid {}: '{}'", key, raw)),
    None => Ok(default),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
    let vars: HashMap<String, String> =
      pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    Config::from_lookup(|key| vars.get(key).cloned())
  }

  #[test]
  fn memory_backend_needs_no_urls() {
    let config = config_from(&[("LRQS_BACKEND", "memory")]).unwrap();
    assert_eq!(config.backend, Backend::Memory);
    assert_eq!(config.server_port, 8080);
    assert_eq!(config.queue_name, "log_queue");
    assert_eq!(config.worker_concurrency, 4);
    assert_eq!(config.result_expires, Duration::from_secs(3600));
    assert_eq!(config.beat_interval, Duration::from_secs(10));
    assert!(config.worker_id.starts_with("worker-"));
  }

  #[test]
  fn postgres_backend_requires_urls() {
    let err = config_from(&[]).unwrap_err();
    assert!(err.to_string().contains("DATABASE_URL"));

    let config = config_from(&[
      ("DATABASE_URL", "postgres://localhost/logs"),
      ("RABBITMQ_URL", "amqp://localhost:5672"),
      ("SERVER_PORT", "9000"),
      ("WORKER_ID", "w1"),
    ])
    .unwrap();
    assert_eq!(config.backend, Backend::Postgres);
    assert_eq!(config.database_url().unwrap(), "postgres://localhost/logs");
    assert_eq!(config.server_port, 9000);
    assert_eq!(config.worker_id, "w1");
  }

  #[test]
  fn rejects_malformed_values() {
    assert!(config_from(&[("LRQS_BACKEND", "redis")]).is_err());
    assert!(config_from(&[("LRQS_BACKEND", "memory"), ("SERVER_PORT", "http")]).is_err());
    assert!(config_from(&[("LRQS_BACKEND", "memory"), ("WORKER_CONCURRENCY", "0")]).is_err());
  }

  #[test]
  fn worker_concurrency_is_bounded() {
    let max = MAX_WORKER_CONCURRENCY.to_string();
    let config = config_from(&[("LRQS_BACKEND", "memory"), ("WORKER_CONCURRENCY", &max)]).unwrap();
    assert_eq!(config.worker_concurrency, u16::MAX as usize);

    let over = (MAX_WORKER_CONCURRENCY + 1).to_string();
    let err = config_from(&[("LRQS_BACKEND", "memory"), ("WORKER_CONCURRENCY", &over)]).unwrap_err();
    assert!(err.to_string().contains("WORKER_CONCURRENCY"));
  }
}
