//! Persisted per-user task map.
//!
//! Every read-modify-write goes through one internal async mutex, so
//! `add_task` callers and the scheduler sweep never interleave.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::error::AppResult;
use crate::core::types::UserId;
use crate::scheduler::task::{ScheduledTask, TaskMap, TaskTypes};
use crate::storage::KeyValueStore;

pub struct DurableTaskStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    types: TaskTypes,
    gate: Mutex<()>,
}

impl DurableTaskStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, key: impl Into<String>, types: TaskTypes) -> Self {
        Self {
            kv,
            key: key.into(),
            types,
            gate: Mutex::new(()),
        }
    }

    pub fn task_types(&self) -> &TaskTypes {
        &self.types
    }

    async fn read_map(&self) -> AppResult<TaskMap> {
        match self.kv.get(&self.key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(TaskMap::new()),
        }
    }

    async fn write_map(&self, map: &TaskMap) -> AppResult<()> {
        let raw = serde_json::to_string(map)?;
        self.kv.set(&self.key, &raw).await
    }

    /// Snapshot of the whole map. Storage failures degrade to an empty map.
    pub async fn load(&self) -> TaskMap {
        let _gate = self.gate.lock().await;
        self.read_map().await.unwrap_or_else(|e| {
            log::error!("Failed to load scheduled tasks from '{}': {}", self.key, e);
            TaskMap::new()
        })
    }

    pub async fn tasks_for(&self, user_id: UserId) -> Vec<ScheduledTask> {
        self.load().await.remove(&user_id.to_string()).unwrap_or_default()
    }

    /// Appends a task, replacing the user's previous task of the same type
    /// when that type is one-per-user.
    ///
    /// Returns whether the updated map was persisted. Storage failures are
    /// logged; an unreadable map is never overwritten.
    pub async fn add_task(&self, task: ScheduledTask) -> bool {
        let _gate = self.gate.lock().await;

        let mut map = match self.read_map().await {
            Ok(map) => map,
            Err(e) => {
                log::error!("Failed to add '{}' task for user {}: {}", task.executor, task.user_id, e);
                return false;
            }
        };

        let user_tasks = map.entry(task.user_id.to_string()).or_default();
        if self.types.descriptor(&task.executor).one_per_user {
            let before = user_tasks.len();
            user_tasks.retain(|existing| existing.executor != task.executor);
            if user_tasks.len() != before {
                log::debug!("Replaced '{}' task for user {}", task.executor, task.user_id);
            }
        }
        log::info!(
            "Scheduling '{}' for user {} at {:?}",
            task.executor,
            task.user_id,
            task.execute_time
        );
        user_tasks.push(task);

        match self.write_map(&map).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to persist scheduled tasks: {}", e);
                false
            }
        }
    }

    /// Removes every task of `executor` for the user; returns how many went away.
    pub async fn remove_tasks(&self, user_id: UserId, executor: &str) -> usize {
        let _gate = self.gate.lock().await;

        let mut map = match self.read_map().await {
            Ok(map) => map,
            Err(e) => {
                log::error!("Failed to remove '{}' tasks for user {}: {}", executor, user_id, e);
                return 0;
            }
        };

        let key = user_id.to_string();
        let Some(user_tasks) = map.get_mut(&key) else {
            return 0;
        };
        let before = user_tasks.len();
        user_tasks.retain(|task| task.executor != executor);
        let removed = before - user_tasks.len();
        if user_tasks.is_empty() {
            map.remove(&key);
        }
        if removed == 0 {
            return 0;
        }

        match self.write_map(&map).await {
            Ok(()) => removed,
            Err(e) => {
                log::error!("Failed to persist scheduled tasks: {}", e);
                0
            }
        }
    }

    /// Detaches every task due at `now` and persists the remainder in one write.
    ///
    /// Returned tasks keep per-user sequence order. If the remainder cannot be
    /// persisted nothing is returned, so a task never runs twice.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        let _gate = self.gate.lock().await;

        let mut map = match self.read_map().await {
            Ok(map) => map,
            Err(e) => {
                log::error!("Scheduler sweep skipped, task map unavailable: {}", e);
                return Vec::new();
            }
        };

        let mut due = Vec::new();
        for tasks in map.values_mut() {
            let (ready, pending): (Vec<_>, Vec<_>) = tasks.drain(..).partition(|task| task.is_due(now));
            due.extend(ready);
            *tasks = pending;
        }
        map.retain(|_, tasks| !tasks.is_empty());

        if due.is_empty() {
            return due;
        }

        match self.write_map(&map).await {
            Ok(()) => due,
            Err(e) => {
                log::error!("Failed to persist task map after sweep, {} due task(s) deferred: {}", due.len(), e);
                Vec::new()
            }
        }
    }
}
