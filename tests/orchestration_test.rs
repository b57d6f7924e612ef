//! End-to-end tests of the orchestration core with in-memory storage and
//! mocked HTTP collaborators.
//!
//! Run with: cargo test --test orchestration_test

mod common;

use appealbot::core::retry::RetryConfig;
use appealbot::core::StashId;
use appealbot::deadline::{Deadline, DeadlineHandler, DeadlineTimer};
use appealbot::executors;
use appealbot::photos::{PhotoStagingPipeline, TelegraphClient};
use appealbot::relay::{CaptchaRelay, LogNotifier};
use appealbot::scheduler::task::{CANCEL_APPEAL, CLEAR_CURRENT_PHOTOS, CLEAR_PHOTO_STORAGE};
use appealbot::scheduler::{DurableTaskStore, ScheduledTask, TaskScheduler, TaskTypes};
use appealbot::storage::MemoryStore;
use appealbot::{BrokerMessage, WorkerAssignmentPool};
use async_trait::async_trait;
use common::RecordingBroker;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

fn pipeline(root: &std::path::Path, server: &wiremock::MockServer) -> PhotoStagingPipeline {
    let telegraph = Arc::new(TelegraphClient::new(&server.uri(), &server.uri(), "token").unwrap());
    PhotoStagingPipeline::new(root, telegraph.clone(), telegraph, RetryConfig::upload()).unwrap()
}

fn relay(broker: Arc<RecordingBroker>) -> Arc<CaptchaRelay> {
    Arc::new(CaptchaRelay::new(
        broker,
        Arc::new(WorkerAssignmentPool::new()),
        Arc::new(DeadlineTimer::new()),
        Arc::new(LogNotifier),
    ))
}

// ============================================================================
// Photo staging
// ============================================================================

#[tokio::test]
async fn test_stash_page_and_promote() {
    let server = common::telegraph_and_cdn().await;
    let dir = tempfile::tempdir().unwrap();
    let photos = pipeline(dir.path(), &server);

    photos.stash_photo(42, &format!("{}/photos/a.jpg", server.uri())).await;
    photos.stash_page(42, "Evidence").await;
    photos.set_id_to_current_photos(42, 777).await.unwrap();

    let data = photos.get_photo_data(42, 777).await;
    assert_eq!(data.file_paths.len(), 1);
    assert_eq!(data.urls, vec![format!("{}/file/evidence.jpg", server.uri())]);
    assert_eq!(data.page_url.as_deref(), Some("https://telegra.ph/Evidence-10-19"));

    let expected_dir = dir.path().join("42").join("777");
    assert!(data.file_paths[0].starts_with(&expected_dir));
    assert!(data.file_paths[0].exists());
    assert!(!dir.path().join("42").join("current").exists());
}

// ============================================================================
// Scheduler with built-in executors
// ============================================================================

#[tokio::test]
async fn test_scheduled_cleanup_removes_staged_photos() {
    let server = common::telegraph_and_cdn().await;
    let dir = tempfile::tempdir().unwrap();
    let photos = pipeline(dir.path(), &server);
    let broker = Arc::new(RecordingBroker::default());
    let relay = relay(broker);

    let store = Arc::new(DurableTaskStore::new(
        Arc::new(MemoryStore::new()),
        "appealbot:test",
        TaskTypes::builtin(),
    ));
    let mut scheduler = TaskScheduler::new(store);
    executors::register_builtin(&mut scheduler, &photos, &relay);

    photos.stash_photo(5, &format!("{}/photos/a.jpg", server.uri())).await;
    photos.set_id_to_current_photos(5, 50).await.unwrap();
    photos.stash_photo(5, &format!("{}/photos/b.jpg", server.uri())).await;
    assert_eq!(photos.get_current_photo_data(5).await.file_paths.len(), 1);

    // Re-arming the idle cleanup keeps a single task
    let cleanup = ScheduledTask::new(5, CLEAR_CURRENT_PHOTOS).with_arg("user_id", 5);
    scheduler.add_task(cleanup.clone()).await;
    scheduler.add_task(cleanup).await;
    scheduler
        .add_task(
            ScheduledTask::new(5, CLEAR_PHOTO_STORAGE)
                .with_arg("user_id", 5)
                .with_arg("appeal_id", 50)
                .after(chrono::Duration::days(1)),
        )
        .await;
    assert_eq!(scheduler.store().tasks_for(5).await.len(), 2);

    let report = scheduler.sweep().await;
    assert_eq!(report.executed, 1);
    assert_eq!(report.failed, 0);

    assert!(photos.get_current_photo_data(5).await.is_empty());
    assert!(!photos.stash_dir(5, StashId::Current).exists());
    assert_eq!(photos.get_photo_data(5, 50).await.file_paths.len(), 1);
    assert_eq!(photos.stash_ids(5).await, vec![StashId::Appeal(50)]);

    let remaining = scheduler.store().tasks_for(5).await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].executor, CLEAR_PHOTO_STORAGE);
}

#[tokio::test]
async fn test_scheduled_cancel_reaches_worker() {
    let server = common::telegraph_and_cdn().await;
    let dir = tempfile::tempdir().unwrap();
    let photos = pipeline(dir.path(), &server);
    let broker = Arc::new(RecordingBroker::default());
    let relay = relay(broker.clone());

    relay
        .handle_message(BrokerMessage::WorkerIdle {
            worker: "sender-1".to_string(),
        })
        .await
        .unwrap();
    relay.submit_appeal(8, 80, json!({"plate": "A123BC"})).await.unwrap();

    let store = Arc::new(DurableTaskStore::new(
        Arc::new(MemoryStore::new()),
        "appealbot:test",
        TaskTypes::builtin(),
    ));
    let mut scheduler = TaskScheduler::new(store);
    executors::register_builtin(&mut scheduler, &photos, &relay);
    scheduler
        .add_task(
            ScheduledTask::new(8, CANCEL_APPEAL)
                .with_arg("user_id", 8)
                .with_arg("appeal_id", 80),
        )
        .await;

    let report = scheduler.sweep().await;
    assert_eq!(report.executed, 1);

    let sent = broker.sent.lock().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[1],
        (
            "worker".to_string(),
            "sender-1".to_string(),
            BrokerMessage::Cancel {
                user_id: 8,
                appeal_id: 80
            }
        )
    );
}

// ============================================================================
// Deadline timer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct JsonDeadline(Value);

impl Deadline for JsonDeadline {
    fn key(&self) -> (i64, i64) {
        (
            self.0["user_id"].as_i64().unwrap_or_default(),
            self.0["appeal_id"].as_i64().unwrap_or_default(),
        )
    }
}

#[derive(Default)]
struct Fired(Mutex<Vec<JsonDeadline>>);

#[async_trait]
impl DeadlineHandler<JsonDeadline> for Fired {
    async fn on_deadline(&self, description: JsonDeadline) {
        self.0.lock().await.push(description);
    }
}

#[tokio::test]
async fn test_zero_minute_deadline_fires_exactly_once() {
    let timer = DeadlineTimer::new();
    let fired = Fired::default();
    let description = JsonDeadline(json!({"user_id": 1, "appeal_id": 2}));

    timer.add_task(description.clone(), 0).await;
    timer.sweep(&fired).await;
    timer.sweep(&fired).await;

    assert_eq!(*fired.0.lock().await, vec![description]);
}
