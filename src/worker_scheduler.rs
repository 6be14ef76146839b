//! Periodic jobs that run next to the workers.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use crate::queue::JobQueue;

pub const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatAction {
  /// Placeholder entry; fires and does nothing else.
  Noop,
  PurgeExpiredJobs,
}

#[derive(Debug, Clone)]
pub struct ScheduledJob {
  pub name: &'static str,
  pub every: Duration,
  pub action: BeatAction,
}

pub struct Scheduler {
  entries: Vec<ScheduledJob>,
}

impl Scheduler {
  pub fn new(entries: Vec<ScheduledJob>) -> Self {
    Self { entries }
  }

  pub fn with_defaults(beat_interval: Duration) -> Self {
    Self::new(vec![
      ScheduledJob { name: "sample_task", every: beat_interval, action: BeatAction::Noop },
      ScheduledJob { name: "purge_expired_jobs", every: PURGE_INTERVAL, action: BeatAction::PurgeExpiredJobs },
    ])
  }

  pub fn entries(&self) -> &[ScheduledJob] {
    &self.entries
  }

  /// Ticks every entry on its own interval until `shutdown` flips.
  pub async fn run(self, queue: JobQueue, shutdown: watch::Receiver<bool>) {
    let handles: Vec<_> = self
      .entries
      .into_iter()
      .map(|entry| tokio::spawn(run_entry(entry, queue.clone(), shutdown.clone())))
      .collect();
    for handle in handles {
      let _ = handle.await;
    }
    info!("Scheduler stopped");
  }
}

async fn run_entry(entry: ScheduledJob, queue: JobQueue, mut shutdown: watch::Receiver<bool>) {
  let mut ticker = interval(entry.every);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  info!("Scheduled {} every {:?}", entry.name, entry.every);
  loop {
    tokio::select! {
      _ = ticker.tick() => fire(&entry, &queue).await,
      changed = shutdown.changed() => {
        if changed.is_err() || *shutdown.borrow() {
          break;
        }
      }
    }
  }
}

pub async fn fire(entry: &ScheduledJob, queue: &JobQueue) {
  match entry.action {
    BeatAction::Noop => debug!("Beat {} fired", entry.name),
    BeatAction::PurgeExpiredJobs => {
      if let Err(e) = queue.purge_expired().await {
        error!("Beat {} failed: {}", entry.name, e);
      }
    }
  }
}
