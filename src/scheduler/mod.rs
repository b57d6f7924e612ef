//! Durable per-user task scheduler.
//!
//! Tasks live in a persisted map (see [`DurableTaskStore`]). A background
//! sweep runs every minute, hands each due task to the executor registered
//! under its name and drops the task whatever the outcome (at-most-once).

pub mod store;
pub mod task;

pub use store::DurableTaskStore;
pub use task::{ScheduledTask, TaskMap, TaskTypeDescriptor, TaskTypes};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A named callable invoked with the task's stored keyword arguments.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, kvargs: &Map<String, Value>) -> anyhow::Result<()>;
}

/// Outcome counters of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub executed: usize,
    pub failed: usize,
    pub unknown: usize,
}

pub struct TaskScheduler {
    store: Arc<DurableTaskStore>,
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl TaskScheduler {
    pub fn new(store: Arc<DurableTaskStore>) -> Self {
        Self {
            store,
            executors: HashMap::new(),
        }
    }

    /// Registers (or replaces) the executor for `name`.
    pub fn register(&mut self, name: &str, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(name.to_string(), executor);
    }

    pub fn store(&self) -> &Arc<DurableTaskStore> {
        &self.store
    }

    pub async fn add_task(&self, task: ScheduledTask) -> bool {
        self.store.add_task(task).await
    }

    /// Runs every task that is due now.
    ///
    /// Due tasks are removed from storage before their executors start, so an
    /// executor may schedule follow-up tasks. Each executor runs in its own
    /// tokio task: an error or a panic is logged and does not stop the sweep.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let due = self.store.take_due(Utc::now()).await;
        if due.is_empty() {
            return report;
        }
        log::info!("Scheduler sweep: {} due task(s)", due.len());

        for task in due {
            let Some(executor) = self.executors.get(&task.executor).cloned() else {
                log::warn!(
                    "No executor registered for '{}', dropping task of user {}",
                    task.executor,
                    task.user_id
                );
                report.unknown += 1;
                continue;
            };

            let name = task.executor.clone();
            let user_id = task.user_id;
            let outcome = tokio::spawn(async move { executor.execute(&task.kvargs).await }).await;
            match outcome {
                Ok(Ok(())) => {
                    log::debug!("Task '{}' for user {} done", name, user_id);
                    report.executed += 1;
                }
                Ok(Err(e)) => {
                    log::error!("Task '{}' for user {} failed: {:#}", name, user_id, e);
                    report.failed += 1;
                }
                Err(join_err) => {
                    log::error!("Task '{}' for user {} panicked: {}", name, user_id, join_err);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Sweeps every `period` until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("Task scheduler started (interval: {}s)", period.as_secs());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    log::info!("Task scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    if report != SweepReport::default() {
                        log::info!(
                            "Scheduler sweep finished: {} ok, {} failed, {} without executor",
                            report.executed,
                            report.failed,
                            report.unknown
                        );
                    }
                }
            }
        }
    }
}
