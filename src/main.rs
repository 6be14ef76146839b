use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;
use lrqs::config::{Backend, Config};
use lrqs::database::{PgRecordStore, setup_database};
use lrqs::memory::{MemoryBroker, MemoryRecordStore, MemoryResultStore};
use lrqs::messaging::{RabbitBroker, create_rabbit_channel};
use lrqs::queue::JobQueue;
use lrqs::result_store::PgResultStore;
use lrqs::routes::{AppState, routes};
use lrqs::worker_processing::{HandlerTable, Worker, run_local_pool};
use lrqs::worker_scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();
  let config = Config::from_env()?;
  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let mut background = Vec::new();

  let state = match config.backend {
    Backend::Postgres => {
      let db_pool = setup_database(config.database_url()?)
        .await
        .context("Failed to set up database")?;
      let rabbit_channel = create_rabbit_channel(config.rabbitmq_url()?)
        .await
        .context("Failed to create RabbitMQ channel")?;
      let broker = RabbitBroker::new(rabbit_channel, config.queue_name.clone()).await?;
      let queue = JobQueue::new(
        Arc::new(broker),
        Arc::new(PgResultStore::new(db_pool.clone())),
        config.result_expires,
      );
      AppState::new(Arc::new(PgRecordStore::new(db_pool)), queue)
    }
    Backend::Memory => {
      let (broker, jobs) = MemoryBroker::channel();
      let results = Arc::new(MemoryResultStore::new());
      let queue = JobQueue::new(Arc::new(broker), results.clone(), config.result_expires);
      let worker = Worker::new(config.worker_id.clone(), results, HandlerTable::default())
        .with_retention(config.result_expires);
      background.push(tokio::spawn(run_local_pool(
        worker,
        jobs,
        config.worker_concurrency,
        shutdown_rx.clone(),
      )));
      background.push(tokio::spawn(
        Scheduler::with_defaults(config.beat_interval).run(queue.clone(), shutdown_rx.clone()),
      ));
      info!("Using in-memory backend; workers run in this process");
      AppState::new(Arc::new(MemoryRecordStore::new()), queue)
    }
  };

  let (addr, server) = warp::serve(routes(state))
    .try_bind_with_graceful_shutdown(([0, 0, 0, 0], config.server_port), async move {
      let _ = tokio::signal::ctrl_c().await;
      info!("Shutdown requested");
      let _ = shutdown_tx.send(true);
    })
    .context("Failed to bind API port")?;
  info!("API listening on {}", addr);
  server.await;

  for handle in background {
    let _ = handle.await;
  }
  Ok(())
}
