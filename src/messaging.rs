use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{info, warn};
use anyhow::Result;

use crate::error::Error;
use crate::models::JobMessage;

static MAX_RETRIES: usize = 5;
static BACKOFF_BASE: u64 = 2;
static BACKOFF_FACTOR: u64 = 50;
static MAX_DELAY: Duration = Duration::from_secs(2);

/// Delays of 100ms, 200ms, 400ms, 800ms and 1.6s between attempts.
///
/// tokio-retry raises the base to successive powers, so the base stays small
/// and the factor scales it to milliseconds.
pub fn retry_strategy() -> impl Iterator<Item = Duration> {
  ExponentialBackoff::from_millis(BACKOFF_BASE)
    .factor(BACKOFF_FACTOR)
    .max_delay(MAX_DELAY)
    .take(MAX_RETRIES)
}

pub async fn create_rabbit_channel(rabbitmq_url: &str) -> Result<Channel> {
  let conn = Retry::spawn(retry_strategy(), || {
    Connection::connect(rabbitmq_url, ConnectionProperties::default())
  })
    .await?;
  let channel = conn.create_channel().await?;
  info!("RabbitMQ channel created");
  Ok(channel)
}

pub async fn declare_queue(channel: &Channel, queue: &str) -> Result<u32> {
  let declared = channel
    .queue_declare(queue, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
    .await?;
  Ok(declared.message_count())
}

/// Number of messages waiting in `queue`, without creating it.
pub async fn queue_depth(channel: &Channel, queue: &str) -> Result<u32> {
  let declared = channel
    .queue_declare(queue, QueueDeclareOptions { passive: true, ..Default::default() }, FieldTable::default())
    .await?;
  Ok(declared.message_count())
}

pub async fn publish_message(channel: &Channel, queue: &str, payload: &[u8]) -> Result<()> {
  Retry::spawn(retry_strategy(), move || async move {
    let confirm = channel
      .basic_publish(
        "",
        queue,
        BasicPublishOptions::default(),
        payload,
        BasicProperties::default()
          .with_content_type("application/json".into())
          .with_delivery_mode(2),
      )
      .await;
    if let Err(e) = &confirm {
      warn!("Publish to {} failed, retrying: {}", queue, e);
    }
    confirm
  })
    .await?;
  Ok(())
}

/// Hands job messages to whatever runs the workers.
#[async_trait]
pub trait Broker: Send + Sync {
  async fn publish(&self, message: &JobMessage) -> crate::error::Result<()>;
}

#[derive(Clone)]
pub struct RabbitBroker {
  channel: Channel,
  queue: String,
}

impl RabbitBroker {
  pub async fn new(channel: Channel, queue: impl Into<String>) -> Result<Self> {
    let queue = queue.into();
    declare_queue(&channel, &queue).await?;
    Ok(Self { channel, queue })
  }
}

#[async_trait]
impl Broker for RabbitBroker {
  async fn publish(&self, message: &JobMessage) -> crate::error::Result<()> {
    let payload = message.to_bytes()?;
    publish_message(&self.channel, &self.queue, &payload)
      .await
      .map_err(Error::Broker)
  }
}
