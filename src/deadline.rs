//! In-memory deadlines for idle work.
//!
//! Entries are keyed by `(user_id, appeal_id)` and live only in process
//! memory. A sweep fires the handler for every overdue entry on the sweep's
//! own task and removes the entry.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::types::{AppealId, UserId};

/// Payload stored with a deadline and handed back when it fires.
pub trait Deadline: Clone + Send + Sync + 'static {
    fn key(&self) -> (UserId, AppealId);
}

#[async_trait]
pub trait DeadlineHandler<D: Deadline>: Send + Sync {
    async fn on_deadline(&self, description: D);
}

/// Stand-in stop time for timers too long to represent.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

#[derive(Debug, Clone)]
struct DeadlineEntry<D> {
    description: D,
    stop_time: Instant,
}

pub struct DeadlineTimer<D: Deadline> {
    entries: Mutex<HashMap<(UserId, AppealId), DeadlineEntry<D>>>,
}

impl<D: Deadline> Default for DeadlineTimer<D> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<D: Deadline> DeadlineTimer<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts or refreshes the deadline of `description`'s key.
    pub async fn add_task(&self, description: D, timer_minutes: u64) {
        let key = description.key();
        let now = Instant::now();
        let delay = Duration::from_secs(timer_minutes.saturating_mul(60));
        let stop_time = now.checked_add(delay).unwrap_or(now + FAR_FUTURE);
        let previous = self
            .entries
            .lock()
            .await
            .insert(key, DeadlineEntry { description, stop_time });
        if previous.is_some() {
            log::debug!("Refreshed deadline for user {} appeal {}", key.0, key.1);
        } else {
            log::debug!("Deadline for user {} appeal {} in {} min", key.0, key.1, timer_minutes);
        }
    }

    /// Cancels the deadline; returns the stored description if there was one.
    pub async fn delete_task(&self, user_id: UserId, appeal_id: AppealId) -> Option<D> {
        self.entries
            .lock()
            .await
            .remove(&(user_id, appeal_id))
            .map(|entry| entry.description)
    }

    pub async fn get(&self, user_id: UserId, appeal_id: AppealId) -> Option<D> {
        self.entries
            .lock()
            .await
            .get(&(user_id, appeal_id))
            .map(|entry| entry.description.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Fires and removes every overdue entry. Returns how many fired.
    pub async fn sweep(&self, handler: &dyn DeadlineHandler<D>) -> usize {
        let now = Instant::now();
        let expired: Vec<D> = {
            let mut entries = self.entries.lock().await;
            let keys: Vec<_> = entries
                .iter()
                .filter(|(_, entry)| entry.stop_time <= now)
                .map(|(key, _)| *key)
                .collect();
            keys.into_iter()
                .filter_map(|key| entries.remove(&key))
                .map(|entry| entry.description)
                .collect()
        };

        let fired = expired.len();
        for description in expired {
            let (user_id, appeal_id) = description.key();
            log::info!("Deadline expired for user {} appeal {}", user_id, appeal_id);
            handler.on_deadline(description).await;
        }
        fired
    }

    pub async fn run(&self, handler: &dyn DeadlineHandler<D>, period: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("Deadline timer started (interval: {}s)", period.as_secs());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    log::info!("Deadline timer stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep(handler).await;
                }
            }
        }
    }
}
