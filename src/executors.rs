//! Executors registered with the scheduler at startup.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::core::types::{AppealId, StashId, UserId};
use crate::photos::PhotoStagingPipeline;
use crate::relay::CaptchaRelay;
use crate::scheduler::task::{CANCEL_APPEAL, CLEAR_CURRENT_PHOTOS, CLEAR_PHOTO_STORAGE};
use crate::scheduler::{TaskExecutor, TaskScheduler};

fn int_arg(kvargs: &Map<String, Value>, name: &str) -> anyhow::Result<i64> {
    kvargs
        .get(name)
        .and_then(Value::as_i64)
        .with_context(|| format!("missing integer argument '{}'", name))
}

fn user_id(kvargs: &Map<String, Value>) -> anyhow::Result<UserId> {
    int_arg(kvargs, "user_id")
}

fn appeal_id(kvargs: &Map<String, Value>) -> anyhow::Result<AppealId> {
    int_arg(kvargs, "appeal_id")
}

/// Drops the photos of an appeal that was never finalized.
pub struct ClearCurrentPhotos {
    photos: PhotoStagingPipeline,
}

#[async_trait]
impl TaskExecutor for ClearCurrentPhotos {
    async fn execute(&self, kvargs: &Map<String, Value>) -> anyhow::Result<()> {
        self.photos.clear_storage(user_id(kvargs)?, StashId::Current, true).await;
        Ok(())
    }
}

/// Drops the photos of a finalized appeal.
pub struct ClearPhotoStorage {
    photos: PhotoStagingPipeline,
}

#[async_trait]
impl TaskExecutor for ClearPhotoStorage {
    async fn execute(&self, kvargs: &Map<String, Value>) -> anyhow::Result<()> {
        let stash = StashId::Appeal(appeal_id(kvargs)?);
        self.photos.clear_storage(user_id(kvargs)?, stash, true).await;
        Ok(())
    }
}

pub struct CancelAppeal {
    relay: Arc<CaptchaRelay>,
}

#[async_trait]
impl TaskExecutor for CancelAppeal {
    async fn execute(&self, kvargs: &Map<String, Value>) -> anyhow::Result<()> {
        let (user_id, appeal_id) = (user_id(kvargs)?, appeal_id(kvargs)?);
        self.relay
            .cancel_appeal(user_id, appeal_id)
            .await
            .with_context(|| format!("cancel appeal {} of user {}", appeal_id, user_id))?;
        Ok(())
    }
}

/// Registers every built-in executor.
pub fn register_builtin(scheduler: &mut TaskScheduler, photos: &PhotoStagingPipeline, relay: &Arc<CaptchaRelay>) {
    scheduler.register(
        CLEAR_CURRENT_PHOTOS,
        Arc::new(ClearCurrentPhotos { photos: photos.clone() }),
    );
    scheduler.register(
        CLEAR_PHOTO_STORAGE,
        Arc::new(ClearPhotoStorage { photos: photos.clone() }),
    );
    scheduler.register(CANCEL_APPEAL, Arc::new(CancelAppeal { relay: Arc::clone(relay) }));
}
