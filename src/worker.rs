use std::sync::Arc;

use anyhow::bail;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use tokio::sync::{Semaphore, watch};
use tracing::{error, info, warn};
use lrqs::config::{Backend, Config};
use lrqs::database::setup_database;
use lrqs::messaging::{RabbitBroker, create_rabbit_channel};
use lrqs::models::JobMessage;
use lrqs::queue::JobQueue;
use lrqs::result_store::{PgResultStore, ResultStore};
use lrqs::worker_processing::{HandlerTable, Settlement, Worker, settle};
use lrqs::worker_scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();
  let config = Config::from_env()?;
  if config.backend != Backend::Postgres {
    bail!("lrqs_worker needs LRQS_BACKEND=postgres; with the memory backend lrqs_api runs the workers");
  }

  let db_pool = setup_database(config.database_url()?).await?;
  let rabbit_channel = create_rabbit_channel(config.rabbitmq_url()?).await?;
  let broker = RabbitBroker::new(rabbit_channel.clone(), config.queue_name.clone()).await?;
  rabbit_channel
    .basic_qos(config.worker_concurrency as u16, BasicQosOptions::default())
    .await?;
  let mut consumer = rabbit_channel
    .basic_consume(&config.queue_name, &config.worker_id, BasicConsumeOptions::default(), FieldTable::default())
    .await?;

  let results: Arc<dyn ResultStore> = Arc::new(PgResultStore::new(db_pool));
  let worker = Worker::new(config.worker_id.clone(), results.clone(), HandlerTable::default())
    .with_retention(config.result_expires);
  let queue = JobQueue::new(Arc::new(broker), results, config.result_expires);

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let scheduler = tokio::spawn(Scheduler::with_defaults(config.beat_interval).run(queue, shutdown_rx));

  let semaphore = Arc::new(Semaphore::new(config.worker_concurrency));
  let shutdown = tokio::signal::ctrl_c();
  tokio::pin!(shutdown);
  info!("Worker {} consuming {}", config.worker_id, config.queue_name);

  loop {
    let delivery = tokio::select! {
      delivery = consumer.next() => delivery,
      _ = &mut shutdown => {
        info!("Shutdown requested");
        break;
      }
    };
    let delivery = match delivery {
      Some(Ok(delivery)) => delivery,
      Some(Err(e)) => {
        error!("Consumer error: {:?}", e);
        continue;
      }
      None => {
        warn!("Consumer stream closed");
        break;
      }
    };
    let permit = semaphore.clone().acquire_owned().await?;
    let worker = worker.clone();
    tokio::spawn(async move {
      handle_delivery(&worker, delivery).await;
      drop(permit);
    });
  }

  let _ = shutdown_tx.send(true);
  let _ = semaphore.acquire_many(config.worker_concurrency as u32).await;
  let _ = scheduler.await;
  info!("Worker {} stopped", config.worker_id);
  Ok(())
}

async fn handle_delivery(worker: &Worker, delivery: Delivery) {
  let message = match JobMessage::from_slice(&delivery.data) {
    Ok(message) => message,
    Err(e) => {
      if let Err(store_err) = worker.reject_undecodable(&delivery.data, &e).await {
        error!("Failed to record undecodable message: {}", store_err);
      }
      let _ = delivery.ack(BasicAckOptions::default()).await;
      return;
    }
  };

  let outcome = worker.process(&message).await;
  let settled = match settle(&outcome, delivery.redelivered) {
    Settlement::Ack => delivery.ack(BasicAckOptions::default()).await,
    Settlement::Requeue => delivery.nack(BasicNackOptions { requeue: true, ..Default::default() }).await,
    Settlement::Drop => delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await,
  };
  if let Err(e) = &outcome {
    error!("Job {} could not be recorded: {}", message.task_id, e);
  }
  if let Err(e) = settled {
    error!("Failed to settle job {}: {:?}", message.task_id, e);
  }
}
