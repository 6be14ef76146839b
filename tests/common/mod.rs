#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;
use lrqs::memory::{MemoryBroker, MemoryRecordStore, MemoryResultStore};
use lrqs::models::{Job, JobMessage, JobStatus};
use lrqs::queue::JobQueue;
use lrqs::routes::AppState;
use lrqs::worker_processing::{HandlerTable, Worker, run_local_pool};

pub struct TestApp {
  pub state: AppState,
  pub records: Arc<MemoryRecordStore>,
  pub results: Arc<MemoryResultStore>,
  pub shutdown: watch::Sender<bool>,
  /// Published jobs when no workers run.
  pub unconsumed: Option<mpsc::UnboundedReceiver<JobMessage>>,
}

/// In-memory stores wired like the single-process server. With `workers`
/// set, a local pool drains the queue in the background.
pub fn test_app(workers: bool) -> TestApp {
  let (broker, jobs) = MemoryBroker::channel();
  let records = Arc::new(MemoryRecordStore::new());
  let results = Arc::new(MemoryResultStore::new());
  let queue = JobQueue::new(Arc::new(broker), results.clone(), Duration::from_secs(3600));
  let (shutdown, shutdown_rx) = watch::channel(false);
  let unconsumed = if workers {
    let worker = Worker::new("test", results.clone(), HandlerTable::default()).with_retention(Duration::from_secs(3600));
    tokio::spawn(run_local_pool(worker, jobs, 2, shutdown_rx));
    None
  } else {
    Some(jobs)
  };
  TestApp {
    state: AppState::new(records.clone(), queue),
    records,
    results,
    shutdown,
    unconsumed,
  }
}

pub async fn wait_for_terminal(queue: &JobQueue, id: Uuid) -> Job {
  tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      let job = queue.status(id).await.expect("job should exist");
      if job.status.is_terminal() {
        return job;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .expect("job did not finish in time")
}

pub fn assert_success(job: &Job) {
  assert_eq!(job.status, JobStatus::Success, "job failed: {:?}", job.error);
}
