//! Idle sender workers available for pulled appeal jobs.

use std::collections::HashSet;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct WorkerAssignmentPool {
    idle: Mutex<HashSet<String>>,
}

impl WorkerAssignmentPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_worker(&self, name: &str) {
        if self.idle.lock().await.insert(name.to_string()) {
            log::debug!("Worker '{}' is idle", name);
        }
    }

    pub async fn delete_worker(&self, name: &str) {
        if self.idle.lock().await.remove(name) {
            log::debug!("Worker '{}' left the idle pool", name);
        }
    }

    /// Takes an arbitrary idle worker out of the pool.
    pub async fn pop_worker(&self) -> Option<String> {
        let mut idle = self.idle.lock().await;
        let name = idle.iter().next().cloned()?;
        idle.remove(&name);
        Some(name)
    }

    pub async fn len(&self) -> usize {
        self.idle.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.idle.lock().await.is_empty()
    }
}
