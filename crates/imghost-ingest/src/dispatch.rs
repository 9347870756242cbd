//! Batch upload with bounded fan-out
//!
//! One failed item never aborts its batch; it only bumps the failure counter.

use futures::stream::{self, StreamExt};
use imghost_common::types::UploadOptions;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::extract::ExtractedItem;
use crate::progress::{UploadProgress, UploadTracker};
use crate::uploader::ImageUploader;

/// Uploads in flight at once within a batch
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Outcome counts for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct UploadDispatcher {
    uploader: Arc<dyn ImageUploader>,
    concurrency: usize,
}

impl UploadDispatcher {
    pub fn new(uploader: Arc<dyn ImageUploader>) -> Self {
        Self {
            uploader,
            concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Upload every item of `batch`, updating `tracker` as each one settles
    ///
    /// `on_progress` sees the counters after every item. Items are dropped as soon as
    /// their upload settles.
    pub async fn dispatch<F>(
        &self,
        batch: Vec<ExtractedItem>,
        options: &UploadOptions,
        tracker: &UploadTracker,
        on_progress: F,
    ) -> BatchOutcome
    where
        F: Fn(UploadProgress) + Sync,
    {
        let size = batch.len();
        let on_progress = &on_progress;

        let outcomes: Vec<bool> = stream::iter(batch)
            .map(|item| async move {
                let succeeded = match self.uploader.upload(&item, options).await {
                    Ok(uploaded) => {
                        debug!(path = %item.original_path, image_id = %uploaded.id, "Uploaded");
                        true
                    },
                    Err(e) => {
                        warn!(path = %item.original_path, error = %e, "Upload failed");
                        false
                    },
                };

                let progress = if succeeded {
                    tracker.record_success().await
                } else {
                    tracker.record_failure().await
                };
                on_progress(progress);
                succeeded
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        let outcome = BatchOutcome {
            succeeded,
            failed: size - succeeded,
        };
        debug!(succeeded = outcome.succeeded, failed = outcome.failed, "Batch dispatched");
        outcome
    }
}
