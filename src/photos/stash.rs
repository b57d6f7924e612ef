use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;

use crate::core::types::{StashId, UserId};

/// Composite key of the stash table.
pub type StashKey = (UserId, StashId);

/// Handle of a background photo job.
///
/// Cloneable and joinable any number of times; every clone resolves once the
/// underlying tokio task has finished (or panicked, which is logged).
#[derive(Clone)]
pub struct JobHandle(Shared<BoxFuture<'static, ()>>);

impl JobHandle {
    pub fn spawn<F>(job: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(job);
        let joined = async move {
            if let Err(e) = handle.await {
                log::error!("Background photo job did not complete: {}", e);
            }
        };
        Self(joined.boxed().shared())
    }

    pub async fn join(self) {
        self.0.await
    }

    /// True once some clone has observed completion.
    pub fn is_finished(&self) -> bool {
        self.0.peek().is_some()
    }
}

/// Awaits every handle, in any order.
pub async fn join_all(jobs: Vec<JobHandle>) {
    futures_util::future::join_all(jobs.into_iter().map(JobHandle::join)).await;
}

/// Staging record of one `(user, stash)` pair.
#[derive(Default)]
pub struct PhotoStash {
    pub file_paths: Vec<PathBuf>,
    pub urls: Vec<String>,
    pub page_url: Option<String>,
    pub(crate) photo_jobs: Vec<JobHandle>,
    pub(crate) page_jobs: Vec<JobHandle>,
}

impl PhotoStash {
    pub(crate) fn outstanding_jobs(&self) -> Vec<JobHandle> {
        self.photo_jobs.iter().chain(self.page_jobs.iter()).cloned().collect()
    }

    pub(crate) fn prune_finished_jobs(&mut self) {
        self.photo_jobs.retain(|job| !job.is_finished());
        self.page_jobs.retain(|job| !job.is_finished());
    }

    pub fn snapshot(&self) -> PhotoData {
        PhotoData {
            file_paths: self.file_paths.clone(),
            urls: self.urls.clone(),
            page_url: self.page_url.clone(),
        }
    }
}

/// What callers get back once a stash has settled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhotoData {
    pub file_paths: Vec<PathBuf>,
    pub urls: Vec<String>,
    pub page_url: Option<String>,
}

impl PhotoData {
    pub fn is_empty(&self) -> bool {
        self.file_paths.is_empty() && self.urls.is_empty() && self.page_url.is_none()
    }
}
