//! Captcha round-trip between users and sender workers.
//!
//! Appeals wait in a shared broker queue and are pulled only when a sender
//! reports itself idle. A sender that hits a captcha sends its URL back; the
//! user then has a limited time to answer before the appeal is cancelled.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::broker::{BrokerClient, BrokerMessage, MessageHandler};
use crate::core::config;
use crate::core::config::broker::{APPEAL_EXCHANGE, APPEAL_QUEUE, WORKER_EXCHANGE};
use crate::core::error::AppResult;
use crate::core::types::{AppealId, UserId};
use crate::deadline::{Deadline, DeadlineHandler, DeadlineTimer};
use crate::workers::WorkerAssignmentPool;

/// A captcha waiting for the user's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaDeadline {
    pub user_id: UserId,
    pub appeal_id: AppealId,
    pub worker: String,
}

impl Deadline for CaptchaDeadline {
    fn key(&self) -> (UserId, AppealId) {
        (self.user_id, self.appeal_id)
    }
}

/// User-facing side of the relay.
#[async_trait]
pub trait UserNotifier: Send + Sync {
    async fn captcha_requested(&self, user_id: UserId, appeal_id: AppealId, captcha_url: &str);

    async fn captcha_expired(&self, user_id: UserId, appeal_id: AppealId);

    async fn sending_status(&self, user_id: UserId, appeal_id: AppealId, status: &str, details: Option<&str>);
}

/// Notifier that only writes to the log.
pub struct LogNotifier;

#[async_trait]
impl UserNotifier for LogNotifier {
    async fn captcha_requested(&self, user_id: UserId, appeal_id: AppealId, captcha_url: &str) {
        log::info!("User {} must solve captcha for appeal {}: {}", user_id, appeal_id, captcha_url);
    }

    async fn captcha_expired(&self, user_id: UserId, appeal_id: AppealId) {
        log::info!("Captcha for appeal {} of user {} expired", appeal_id, user_id);
    }

    async fn sending_status(&self, user_id: UserId, appeal_id: AppealId, status: &str, details: Option<&str>) {
        log::info!(
            "Appeal {} of user {}: {} {}",
            appeal_id,
            user_id,
            status,
            details.unwrap_or_default()
        );
    }
}

pub struct CaptchaRelay {
    broker: Arc<dyn BrokerClient>,
    workers: Arc<WorkerAssignmentPool>,
    deadlines: Arc<DeadlineTimer<CaptchaDeadline>>,
    notifier: Arc<dyn UserNotifier>,
    captcha_timeout_minutes: u64,
    assignments: Mutex<HashMap<(UserId, AppealId), String>>,
}

impl CaptchaRelay {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        workers: Arc<WorkerAssignmentPool>,
        deadlines: Arc<DeadlineTimer<CaptchaDeadline>>,
        notifier: Arc<dyn UserNotifier>,
    ) -> Self {
        Self {
            broker,
            workers,
            deadlines,
            notifier,
            captcha_timeout_minutes: *config::CAPTCHA_TIMEOUT_MINUTES,
            assignments: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_captcha_timeout(mut self, minutes: u64) -> Self {
        self.captcha_timeout_minutes = minutes;
        self
    }

    pub fn deadlines(&self) -> &Arc<DeadlineTimer<CaptchaDeadline>> {
        &self.deadlines
    }

    /// Sender currently holding the appeal, if known.
    pub async fn assigned_worker(&self, user_id: UserId, appeal_id: AppealId) -> Option<String> {
        self.assignments.lock().await.get(&(user_id, appeal_id)).cloned()
    }

    async fn release_worker(&self, worker: &str) {
        self.assignments.lock().await.retain(|_, holder| holder != worker);
    }

    /// Queues a finalized appeal and hands it out if a sender is idle.
    pub async fn submit_appeal(&self, user_id: UserId, appeal_id: AppealId, payload: Value) -> AppResult<()> {
        let message = BrokerMessage::Appeal {
            user_id,
            appeal_id,
            payload,
        };
        self.broker.publish(APPEAL_EXCHANGE, APPEAL_QUEUE, &message).await?;
        log::info!("Queued appeal {} of user {}", appeal_id, user_id);
        self.dispatch_pending().await?;
        Ok(())
    }

    /// Matches idle senders with queued appeals. Returns how many were handed out.
    pub async fn dispatch_pending(&self) -> AppResult<usize> {
        let mut dispatched = 0;

        while let Some(worker) = self.workers.pop_worker().await {
            let message = match self.broker.pull(APPEAL_QUEUE).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    self.workers.add_worker(&worker).await;
                    break;
                }
                Err(e) => {
                    self.workers.add_worker(&worker).await;
                    return Err(e);
                }
            };

            if let Err(e) = self.broker.publish(WORKER_EXCHANGE, &worker, &message).await {
                log::error!("Failed to hand '{}' to worker '{}': {}", message.kind(), worker, e);
                if let Err(requeue) = self.broker.publish(APPEAL_EXCHANGE, APPEAL_QUEUE, &message).await {
                    log::error!("Pulled message lost, requeue failed: {}", requeue);
                }
                self.workers.add_worker(&worker).await;
                return Err(e);
            }

            if let Some(key) = message.appeal_key() {
                log::info!("Appeal {} of user {} assigned to '{}'", key.1, key.0, worker);
                self.assignments.lock().await.insert(key, worker);
            }
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Reacts to a message coming back from the senders.
    pub async fn handle_message(&self, message: BrokerMessage) -> AppResult<()> {
        match message {
            BrokerMessage::WorkerIdle { worker } => {
                self.release_worker(&worker).await;
                self.workers.add_worker(&worker).await;
                self.dispatch_pending().await?;
            }
            BrokerMessage::WorkerGone { worker } => {
                self.workers.delete_worker(&worker).await;
                self.release_worker(&worker).await;
            }
            BrokerMessage::CaptchaUrl {
                user_id,
                appeal_id,
                captcha_url,
                worker,
            } => {
                self.assignments
                    .lock()
                    .await
                    .insert((user_id, appeal_id), worker.clone());
                let deadline = CaptchaDeadline {
                    user_id,
                    appeal_id,
                    worker,
                };
                self.deadlines.add_task(deadline, self.captcha_timeout_minutes).await;
                self.notifier.captcha_requested(user_id, appeal_id, &captcha_url).await;
            }
            BrokerMessage::CaptchaAck { user_id, appeal_id } => {
                self.deadlines.delete_task(user_id, appeal_id).await;
            }
            BrokerMessage::SendingStatus {
                user_id,
                appeal_id,
                status,
                details,
            } => {
                self.deadlines.delete_task(user_id, appeal_id).await;
                self.notifier
                    .sending_status(user_id, appeal_id, &status, details.as_deref())
                    .await;
            }
            outbound => {
                log::warn!("Ignoring outbound '{}' message on the status queue", outbound.kind());
            }
        }
        Ok(())
    }

    /// Forwards the user's captcha answer. `false` if no captcha is pending.
    pub async fn submit_captcha(&self, user_id: UserId, appeal_id: AppealId, captcha_text: &str) -> AppResult<bool> {
        let Some(deadline) = self.deadlines.delete_task(user_id, appeal_id).await else {
            log::info!("No pending captcha for appeal {} of user {}", appeal_id, user_id);
            return Ok(false);
        };

        let message = BrokerMessage::CaptchaText {
            user_id,
            appeal_id,
            captcha_text: captcha_text.to_string(),
        };
        self.broker.publish(WORKER_EXCHANGE, &deadline.worker, &message).await?;
        Ok(true)
    }

    /// Tells the sender holding the appeal to drop it. `false` if nobody holds it.
    pub async fn cancel_appeal(&self, user_id: UserId, appeal_id: AppealId) -> AppResult<bool> {
        let pending = self.deadlines.delete_task(user_id, appeal_id).await;
        let assigned = self.assignments.lock().await.remove(&(user_id, appeal_id));
        let Some(worker) = pending.map(|deadline| deadline.worker).or(assigned) else {
            log::info!("Appeal {} of user {} is not assigned, nothing to cancel", appeal_id, user_id);
            return Ok(false);
        };

        self.broker
            .publish(WORKER_EXCHANGE, &worker, &BrokerMessage::Cancel { user_id, appeal_id })
            .await?;
        log::info!("Cancelled appeal {} of user {} on '{}'", appeal_id, user_id, worker);
        Ok(true)
    }
}

#[async_trait]
impl DeadlineHandler<CaptchaDeadline> for CaptchaRelay {
    async fn on_deadline(&self, deadline: CaptchaDeadline) {
        let CaptchaDeadline {
            user_id,
            appeal_id,
            worker,
        } = deadline;
        self.assignments.lock().await.remove(&(user_id, appeal_id));

        let cancel = BrokerMessage::Cancel { user_id, appeal_id };
        if let Err(e) = self.broker.publish(WORKER_EXCHANGE, &worker, &cancel).await {
            log::error!("Failed to cancel appeal {} on '{}': {}", appeal_id, worker, e);
        }
        self.notifier.captcha_expired(user_id, appeal_id).await;
    }
}

#[async_trait]
impl MessageHandler for CaptchaRelay {
    async fn handle(&self, body: String) -> anyhow::Result<()> {
        let message = match BrokerMessage::from_json(&body) {
            Ok(message) => message,
            Err(e) => {
                // Redelivery cannot fix a malformed body
                log::warn!("Dropping malformed broker message: {} ({})", e, body);
                return Ok(());
            }
        };
        self.handle_message(message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AppError;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Routes appeal publishes into one in-memory queue and records the rest.
    #[derive(Default)]
    struct FakeBroker {
        queue: Mutex<VecDeque<BrokerMessage>>,
        sent: Mutex<Vec<(String, BrokerMessage)>>,
        refuse_workers: bool,
    }

    #[async_trait]
    impl BrokerClient for FakeBroker {
        async fn publish(&self, exchange: &str, routing_key: &str, message: &BrokerMessage) -> AppResult<()> {
            if exchange == APPEAL_EXCHANGE {
                self.queue.lock().await.push_back(message.clone());
                return Ok(());
            }
            if self.refuse_workers {
                return Err(AppError::Broker("unrouted".to_string()));
            }
            self.sent.lock().await.push((routing_key.to_string(), message.clone()));
            Ok(())
        }

        async fn pull(&self, _queue: &str) -> AppResult<Option<BrokerMessage>> {
            Ok(self.queue.lock().await.pop_front())
        }
    }

    #[derive(Default)]
    struct Inbox {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UserNotifier for Inbox {
        async fn captcha_requested(&self, user_id: UserId, appeal_id: AppealId, captcha_url: &str) {
            self.events.lock().await.push(format!("captcha {} {} {}", user_id, appeal_id, captcha_url));
        }

        async fn captcha_expired(&self, user_id: UserId, appeal_id: AppealId) {
            self.events.lock().await.push(format!("expired {} {}", user_id, appeal_id));
        }

        async fn sending_status(&self, user_id: UserId, appeal_id: AppealId, status: &str, _details: Option<&str>) {
            self.events.lock().await.push(format!("status {} {} {}", user_id, appeal_id, status));
        }
    }

    struct Fixture {
        relay: CaptchaRelay,
        broker: Arc<FakeBroker>,
        workers: Arc<WorkerAssignmentPool>,
        inbox: Arc<Inbox>,
    }

    fn fixture_with(broker: FakeBroker) -> Fixture {
        let broker = Arc::new(broker);
        let workers = Arc::new(WorkerAssignmentPool::new());
        let inbox = Arc::new(Inbox::default());
        let relay = CaptchaRelay::new(
            broker.clone(),
            workers.clone(),
            Arc::new(DeadlineTimer::new()),
            inbox.clone(),
        )
        .with_captcha_timeout(1);
        Fixture {
            relay,
            broker,
            workers,
            inbox,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeBroker::default())
    }

    fn captcha_url(worker: &str) -> BrokerMessage {
        BrokerMessage::CaptchaUrl {
            user_id: 1,
            appeal_id: 2,
            captcha_url: "http://captcha/1.png".to_string(),
            worker: worker.to_string(),
        }
    }

    #[tokio::test]
    async fn test_idle_worker_returns_to_pool_without_jobs() {
        let f = fixture();
        f.relay
            .handle_message(BrokerMessage::WorkerIdle {
                worker: "sender-1".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(f.workers.len().await, 1);
        assert!(f.broker.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_appeal_goes_to_idle_worker() {
        let f = fixture();
        f.workers.add_worker("sender-1").await;

        f.relay.submit_appeal(1, 2, json!({"plate": "A123BC"})).await.unwrap();

        let sent = f.broker.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "sender-1");
        assert_eq!(sent[0].1.appeal_key(), Some((1, 2)));
        assert!(f.workers.is_empty().await);
        assert_eq!(f.relay.assigned_worker(1, 2).await.as_deref(), Some("sender-1"));
    }

    #[tokio::test]
    async fn test_appeal_waits_for_worker() {
        let f = fixture();
        f.relay.submit_appeal(1, 2, Value::Null).await.unwrap();
        assert!(f.broker.sent.lock().await.is_empty());

        f.relay
            .handle_message(BrokerMessage::WorkerIdle {
                worker: "sender-2".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(f.broker.sent.lock().await.len(), 1);
        assert!(f.broker.queue.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_hand_off_requeues_and_keeps_worker() {
        let f = fixture_with(FakeBroker {
            refuse_workers: true,
            ..FakeBroker::default()
        });
        f.workers.add_worker("sender-1").await;

        assert!(f.relay.submit_appeal(1, 2, Value::Null).await.is_err());
        assert_eq!(f.broker.queue.lock().await.len(), 1);
        assert_eq!(f.workers.len().await, 1);
    }

    #[tokio::test]
    async fn test_captcha_answer_is_forwarded_once() {
        let f = fixture();
        f.relay.handle_message(captcha_url("sender-1")).await.unwrap();
        assert_eq!(f.relay.deadlines().len().await, 1);
        assert_eq!(
            *f.inbox.events.lock().await,
            vec!["captcha 1 2 http://captcha/1.png"]
        );

        assert!(f.relay.submit_captcha(1, 2, "x7k2").await.unwrap());
        assert!(!f.relay.submit_captcha(1, 2, "x7k2").await.unwrap());

        let sent = f.broker.sent.lock().await;
        assert_eq!(
            *sent,
            vec![(
                "sender-1".to_string(),
                BrokerMessage::CaptchaText {
                    user_id: 1,
                    appeal_id: 2,
                    captcha_text: "x7k2".to_string(),
                }
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_captcha_cancels_appeal() {
        let f = fixture();
        f.relay.handle_message(captcha_url("sender-1")).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(f.relay.deadlines().sweep(&f.relay).await, 1);

        let sent = f.broker.sent.lock().await;
        assert_eq!(
            *sent,
            vec![("sender-1".to_string(), BrokerMessage::Cancel { user_id: 1, appeal_id: 2 })]
        );
        assert_eq!(f.inbox.events.lock().await.last().map(String::as_str), Some("expired 1 2"));
        assert_eq!(f.relay.assigned_worker(1, 2).await, None);
    }

    #[tokio::test]
    async fn test_status_clears_deadline() {
        let f = fixture();
        f.relay.handle_message(captcha_url("sender-1")).await.unwrap();
        f.relay
            .handle_message(BrokerMessage::SendingStatus {
                user_id: 1,
                appeal_id: 2,
                status: "sent".to_string(),
                details: None,
            })
            .await
            .unwrap();

        assert!(f.relay.deadlines().is_empty().await);
        assert_eq!(f.inbox.events.lock().await.last().map(String::as_str), Some("status 1 2 sent"));
    }

    #[tokio::test]
    async fn test_cancel_assigned_appeal() {
        let f = fixture();
        f.workers.add_worker("sender-3").await;
        f.relay.submit_appeal(4, 5, Value::Null).await.unwrap();

        assert!(f.relay.cancel_appeal(4, 5).await.unwrap());
        assert!(!f.relay.cancel_appeal(4, 5).await.unwrap());

        let sent = f.broker.sent.lock().await;
        assert_eq!(sent.last(), Some(&("sender-3".to_string(), BrokerMessage::Cancel { user_id: 4, appeal_id: 5 })));
    }

    #[tokio::test]
    async fn test_gone_worker_leaves_pool() {
        let f = fixture();
        f.workers.add_worker("sender-1").await;
        f.relay
            .handle_message(BrokerMessage::WorkerGone {
                worker: "sender-1".to_string(),
            })
            .await
            .unwrap();
        assert!(f.workers.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_body_is_acknowledged() {
        let f = fixture();
        assert!(f.relay.handle("{oops".to_string()).await.is_ok());
        assert!(f
            .relay
            .handle(r#"{"type":"worker_idle","worker":"sender-9"}"#.to_string())
            .await
            .is_ok());
        assert_eq!(f.workers.len().await, 1);
    }
}
