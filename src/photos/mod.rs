//! Ephemeral per-user photo staging.
//!
//! Photos attached while an appeal is being composed go to the user's
//! `current` stash. Every photo is downloaded and re-uploaded in a background
//! job; a page job waits for the photo jobs and publishes a shareable page.
//! When the appeal is finalized the `current` stash is promoted to the appeal
//! id, both in memory and on disk.
//!
//! Stash operations for one user must be serialized by the caller: stashing
//! new photos while the same user's stash is being promoted is not supported.

pub mod stash;
pub mod telegraph;

pub use stash::{JobHandle, PhotoData, PhotoStash, StashKey};
pub use telegraph::{PageBuilder, PhotoUploader, TelegraphClient};

use reqwest::Client;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::retry::{retry, RetryConfig};
use crate::core::types::{AppealId, StashId, UserId};

struct Inner {
    root: PathBuf,
    http: Client,
    uploader: Arc<dyn PhotoUploader>,
    pages: Arc<dyn PageBuilder>,
    upload_retry: RetryConfig,
    stashes: Mutex<HashMap<StashKey, PhotoStash>>,
}

/// Cheap to clone; clones share the same stash table.
#[derive(Clone)]
pub struct PhotoStagingPipeline {
    inner: Arc<Inner>,
}

impl PhotoStagingPipeline {
    /// # Arguments
    ///
    /// * `root` - Directory holding `<user_id>/<stash_id>/` folders
    /// * `uploader` - Permanent storage for staged photos
    /// * `pages` - Builder of shareable pages
    /// * `upload_retry` - Policy for permanent uploads, normally [`RetryConfig::upload`]
    pub fn new(
        root: impl Into<PathBuf>,
        uploader: Arc<dyn PhotoUploader>,
        pages: Arc<dyn PageBuilder>,
        upload_retry: RetryConfig,
    ) -> AppResult<Self> {
        let http = Client::builder()
            .connect_timeout(config::network::connect_timeout())
            .timeout(config::network::timeout())
            .build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                root: root.into(),
                http,
                uploader,
                pages,
                upload_retry,
                stashes: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn stash_dir(&self, user_id: UserId, stash_id: StashId) -> PathBuf {
        self.inner.stash_dir(user_id, stash_id)
    }

    /// Starts downloading and re-uploading a photo; returns without waiting.
    pub async fn stash_photo(&self, user_id: UserId, temp_url: &str) {
        let inner = Arc::clone(&self.inner);
        let temp_url = temp_url.to_string();
        let job = JobHandle::spawn(async move { inner.stage_photo(user_id, temp_url).await });

        let mut stashes = self.inner.stashes.lock().await;
        stashes
            .entry((user_id, StashId::Current))
            .or_default()
            .photo_jobs
            .push(job);
    }

    /// Starts building the shareable page once the photos registered so far
    /// are uploaded; returns without waiting.
    pub async fn stash_page(&self, user_id: UserId, title: &str) {
        let key = (user_id, StashId::Current);
        let mut stashes = self.inner.stashes.lock().await;
        let stash = stashes.entry(key).or_default();
        let photo_jobs = stash.photo_jobs.clone();

        let inner = Arc::clone(&self.inner);
        let title = title.to_string();
        let job = JobHandle::spawn(async move {
            stash::join_all(photo_jobs).await;
            inner.build_page(key, &title).await;
        });
        stash.page_jobs.push(job);
    }

    /// Promotes the `current` stash to `appeal_id`.
    ///
    /// Any stale stash already stored under `appeal_id` is dropped with its
    /// files first. Outstanding jobs are awaited and the directory renamed;
    /// the entry is re-keyed with rewritten paths only once the move
    /// succeeded. On failure the `current` stash is left as it was.
    pub async fn set_id_to_current_photos(&self, user_id: UserId, appeal_id: AppealId) -> AppResult<()> {
        let target = StashId::Appeal(appeal_id);
        self.clear_storage(user_id, target, true).await;
        self.join_outstanding((user_id, StashId::Current)).await;

        let old_dir = self.stash_dir(user_id, StashId::Current);
        let new_dir = self.stash_dir(user_id, target);
        match tokio::fs::rename(&old_dir, &new_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("User {} has no staged files to promote", user_id);
            }
            Err(e) => {
                log::error!(
                    "Failed to move {} to {}: {}",
                    old_dir.display(),
                    new_dir.display(),
                    e
                );
                return Err(e.into());
            }
        }

        // Files are in place; only now re-key the entry
        let mut stashes = self.inner.stashes.lock().await;
        let mut stash = stashes.remove(&(user_id, StashId::Current)).unwrap_or_default();
        stash.file_paths = stash
            .file_paths
            .into_iter()
            .map(|path| match path.strip_prefix(&old_dir) {
                Ok(relative) => new_dir.join(relative),
                Err(_) => path,
            })
            .collect();
        stashes.insert((user_id, target), stash);
        drop(stashes);

        log::info!("Promoted current photos of user {} to appeal {}", user_id, appeal_id);
        Ok(())
    }

    /// Settled photo data of a finalized appeal (empty if unknown).
    pub async fn get_photo_data(&self, user_id: UserId, appeal_id: AppealId) -> PhotoData {
        self.photo_data((user_id, StashId::Appeal(appeal_id))).await
    }

    /// Settled photo data of the appeal being composed.
    pub async fn get_current_photo_data(&self, user_id: UserId) -> PhotoData {
        self.photo_data((user_id, StashId::Current)).await
    }

    async fn photo_data(&self, key: StashKey) -> PhotoData {
        self.join_outstanding(key).await;
        let stashes = self.inner.stashes.lock().await;
        stashes.get(&key).map(PhotoStash::snapshot).unwrap_or_default()
    }

    /// Awaits outstanding jobs, then forgets the stash and optionally deletes
    /// its directory. The user directory goes away with its last stash.
    pub async fn clear_storage(&self, user_id: UserId, stash_id: StashId, with_files: bool) {
        let key = (user_id, stash_id);
        self.join_outstanding(key).await;
        let removed = self.inner.stashes.lock().await.remove(&key).is_some();

        if with_files {
            let dir = self.stash_dir(user_id, stash_id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => log::debug!("Removed {}", dir.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => log::error!("Failed to remove {}: {}", dir.display(), e),
            }
            // Fails while other stashes of the user remain on disk
            let _ = tokio::fs::remove_dir(self.inner.user_dir(user_id)).await;
        }

        if removed {
            log::info!("Cleared {} photo stash of user {}", stash_id, user_id);
        }
    }

    /// Stashes currently held in memory for the user.
    pub async fn stash_ids(&self, user_id: UserId) -> Vec<StashId> {
        let stashes = self.inner.stashes.lock().await;
        let mut ids: Vec<StashId> = stashes.keys().filter(|(uid, _)| *uid == user_id).map(|(_, id)| *id).collect();
        ids.sort();
        ids
    }

    async fn join_outstanding(&self, key: StashKey) {
        let jobs = {
            let stashes = self.inner.stashes.lock().await;
            match stashes.get(&key) {
                Some(stash) => stash.outstanding_jobs(),
                None => return,
            }
        };
        if jobs.is_empty() {
            return;
        }
        stash::join_all(jobs).await;
        if let Some(stash) = self.inner.stashes.lock().await.get_mut(&key) {
            stash.prune_finished_jobs();
        }
    }
}

impl Inner {
    fn user_dir(&self, user_id: UserId) -> PathBuf {
        self.root.join(user_id.to_string())
    }

    fn stash_dir(&self, user_id: UserId, stash_id: StashId) -> PathBuf {
        self.user_dir(user_id).join(stash_id.dir_name())
    }

    async fn stage_photo(&self, user_id: UserId, temp_url: String) {
        let dir = self.stash_dir(user_id, StashId::Current);
        let path = match self.download(&temp_url, &dir).await {
            Ok(path) => path,
            Err(e) => {
                log::error!("Failed to download photo {} for user {}: {}", temp_url, user_id, e);
                return;
            }
        };

        let uploaded = retry(&self.upload_retry, || self.uploader.upload(&path)).await;
        let attempts = uploaded.attempts;
        let url = match uploaded.into_result() {
            Ok(url) => url,
            Err(e) => {
                log::warn!(
                    "Permanent upload of {} failed after {} attempt(s), keeping temporary URL: {}",
                    path.display(),
                    attempts,
                    e
                );
                temp_url
            }
        };

        let mut stashes = self.stashes.lock().await;
        let stash = stashes.entry((user_id, StashId::Current)).or_default();
        stash.file_paths.push(path);
        stash.urls.push(url);
    }

    async fn download(&self, url: &str, dir: &Path) -> AppResult<PathBuf> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::HttpStatus(response.status()));
        }
        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.{}", uuid::Uuid::new_v4(), file_extension(url)));
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }

    async fn build_page(&self, key: StashKey, title: &str) {
        let urls = {
            let stashes = self.stashes.lock().await;
            stashes.get(&key).map(|stash| stash.urls.clone()).unwrap_or_default()
        };

        match self.pages.create_page(title, &urls).await {
            Ok(page_url) => {
                if let Some(stash) = self.stashes.lock().await.get_mut(&key) {
                    stash.page_url = Some(page_url);
                }
            }
            Err(e) => log::error!("Failed to create photo page for user {}: {}", key.0, e),
        }
    }
}

/// Extension of the last path segment, `jpg` when there is none.
fn file_extension(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .and_then(|name| {
            Path::new(&name)
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
        })
        .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        .unwrap_or_else(|| "jpg".to_string())
}
