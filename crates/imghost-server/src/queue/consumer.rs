use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{DeletionMessage, Delivery, QueueBackend, QueueError, RetryOutcome};
use crate::config::QueueConfig;
use crate::storage::{BlobError, BlobStore};

/// Why a message could not be fully processed
#[derive(Debug, Error)]
pub enum DeletionError {
    #[error("Blob deletion failed: {0}")]
    Storage(#[from] BlobError),

    #[error("Failed to delete blobs for {failed} of {total} images tagged '{tag_name}': {first}")]
    Partial {
        tag_name: String,
        failed: usize,
        total: usize,
        first: BlobError,
    },
}

/// Counts for one receive/process/settle cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub acked: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

/// Drains the deletion queue into the blob store
#[derive(Clone)]
pub struct DeletionConsumer {
    queue: Arc<dyn QueueBackend>,
    blobs: Arc<dyn BlobStore>,
    batch_size: usize,
    concurrency: usize,
    poll_interval: Duration,
}

impl DeletionConsumer {
    pub fn new(queue: Arc<dyn QueueBackend>, blobs: Arc<dyn BlobStore>, config: &QueueConfig) -> Self {
        Self {
            queue,
            blobs,
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            poll_interval: config.poll_interval(),
        }
    }

    /// Remove every blob a message names
    ///
    /// Safe to replay: blob deletion treats missing keys as success.
    #[instrument(skip(self, message), fields(kind = message.kind()))]
    pub async fn process(&self, message: &DeletionMessage) -> Result<(), DeletionError> {
        match message {
            DeletionMessage::DeleteImage { image_id, paths } => {
                let keys = paths.keys();
                self.blobs.delete_many(&keys).await?;
                debug!(%image_id, keys = keys.len(), "Deleted image blobs");
                Ok(())
            },
            DeletionMessage::DeleteTagImages {
                tag_name,
                image_paths,
            } => {
                let results = join_all(image_paths.iter().map(|image| async move {
                    let keys = image.paths.keys();
                    self.blobs
                        .delete_many(&keys)
                        .await
                        .map_err(|e| (image.id, e))
                }))
                .await;

                let total = results.len();
                let mut failures = results.into_iter().filter_map(Result::err);
                let Some((image_id, first)) = failures.next() else {
                    debug!(tag = %tag_name, images = total, "Deleted tag image blobs");
                    return Ok(());
                };
                let failed = 1 + failures.count();

                warn!(tag = %tag_name, %image_id, failed, total, "Tag image deletion partially failed");
                Err(DeletionError::Partial {
                    tag_name: tag_name.clone(),
                    failed,
                    total,
                    first,
                })
            },
        }
    }

    async fn settle(&self, delivery: &Delivery, result: Result<(), DeletionError>) -> Settled {
        match result {
            Ok(()) => match self.queue.ack(delivery.id).await {
                Ok(()) => Settled::Acked,
                Err(e) => {
                    // Unacked work comes back once the lease lapses.
                    warn!(message_id = %delivery.id, error = %e, "Failed to ack deletion message");
                    Settled::Unsettled
                },
            },
            Err(failure) => match self.queue.retry(delivery.id, &failure.to_string()).await {
                Ok(RetryOutcome::Scheduled { .. }) => Settled::Retried,
                Ok(RetryOutcome::DeadLettered { .. }) => Settled::DeadLettered,
                Err(e) => {
                    warn!(message_id = %delivery.id, error = %e, "Failed to reschedule deletion message");
                    Settled::Unsettled
                },
            },
        }
    }

    /// Receive one batch, process it with bounded concurrency, then ack or retry each message
    pub async fn handle_batch(&self) -> Result<BatchReport, QueueError> {
        let deliveries = self.queue.receive(self.batch_size).await?;
        let mut report = BatchReport {
            received: deliveries.len(),
            ..Default::default()
        };
        if deliveries.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<Settled> = stream::iter(deliveries)
            .map(|delivery| async move {
                let result = self.process(&delivery.message).await;
                self.settle(&delivery, result).await
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Settled::Acked => report.acked += 1,
                Settled::Retried => report.retried += 1,
                Settled::DeadLettered => report.dead_lettered += 1,
                Settled::Unsettled => {},
            }
        }

        info!(
            received = report.received,
            acked = report.acked,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            "Processed deletion batch"
        );
        Ok(report)
    }

    /// Poll until cancelled. A batch in progress is finished before returning.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            batch_size = self.batch_size,
            concurrency = self.concurrency,
            "Deletion consumer started"
        );

        while !shutdown.is_cancelled() {
            let idle = match self.handle_batch().await {
                Ok(report) => report.received == 0,
                Err(e) => {
                    error!(error = %e, "Failed to receive deletion messages");
                    true
                },
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {},
                }
            }
        }

        info!("Deletion consumer stopped");
    }
}

enum Settled {
    Acked,
    Retried,
    DeadLettered,
    Unsettled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ImageRef, InMemoryQueue};
    use crate::storage::{InMemoryBlobStore, StoredBlob};
    use async_trait::async_trait;
    use bytes::Bytes;
    use imghost_common::types::ImagePaths;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Records every delete_many call and fails the first `failures` of them
    #[derive(Default)]
    struct FlakyBlobStore {
        inner: InMemoryBlobStore,
        failures: AtomicUsize,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FlakyBlobStore {
        fn failing(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BlobStore for FlakyBlobStore {
        async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), BlobError> {
            self.inner.put(key, data, content_type).await
        }

        async fn get(&self, key: &str) -> Result<Option<StoredBlob>, BlobError> {
            self.inner.get(key).await
        }

        async fn delete_many(&self, keys: &[String]) -> Result<(), BlobError> {
            self.calls.lock().unwrap().push(keys.to_vec());
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(BlobError::Delete {
                    requested: keys.len(),
                    failed: keys.len(),
                    message: "injected".into(),
                });
            }
            self.inner.delete_many(keys).await
        }
    }

    fn config() -> QueueConfig {
        QueueConfig {
            max_attempts: 3,
            batch_size: 10,
            concurrency: 2,
            retry_backoff_secs: 1,
            ..Default::default()
        }
    }

    fn paths(stem: &str) -> ImagePaths {
        ImagePaths {
            original: format!("original/{}.jpg", stem),
            webp: Some(format!("webp/{}.webp", stem)),
            avif: None,
        }
    }

    async fn seed(blobs: &FlakyBlobStore, paths: &ImagePaths) {
        for key in paths.keys() {
            blobs.put(&key, Bytes::from_static(b"x"), "image/jpeg").await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_delete_image_calls_delete_many_once() {
        let blobs = Arc::new(FlakyBlobStore::default());
        let queue = Arc::new(InMemoryQueue::new(config()));
        let consumer = DeletionConsumer::new(queue.clone(), blobs.clone(), &config());

        let p = paths("a");
        seed(&blobs, &p).await;
        queue
            .send(&DeletionMessage::DeleteImage {
                image_id: Uuid::new_v4(),
                paths: p.clone(),
            })
            .await
            .unwrap();

        let report = consumer.handle_batch().await.unwrap();
        assert_eq!(report.received, 1);
        assert_eq!(report.acked, 1);
        assert_eq!(blobs.calls(), vec![p.keys()]);
        assert!(blobs.inner.is_empty().await);
        assert!(queue.outstanding().await.is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let blobs = Arc::new(FlakyBlobStore::default());
        let consumer = DeletionConsumer::new(
            Arc::new(InMemoryQueue::new(config())),
            blobs.clone(),
            &config(),
        );
        let message = DeletionMessage::DeleteImage {
            image_id: Uuid::new_v4(),
            paths: paths("b"),
        };
        seed(&blobs, &paths("b")).await;

        consumer.process(&message).await.unwrap();
        // The keys are already gone the second time.
        consumer.process(&message).await.unwrap();
        assert_eq!(blobs.calls().len(), 2);
        assert!(blobs.inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_tag_deletion_fails_whole_message_on_any_failure() {
        let blobs = Arc::new(FlakyBlobStore::failing(1));
        let consumer = DeletionConsumer::new(
            Arc::new(InMemoryQueue::new(config())),
            blobs.clone(),
            &config(),
        );
        let message = DeletionMessage::DeleteTagImages {
            tag_name: "cats".into(),
            image_paths: vec![
                ImageRef {
                    id: Uuid::new_v4(),
                    paths: paths("c1"),
                },
                ImageRef {
                    id: Uuid::new_v4(),
                    paths: paths("c2"),
                },
            ],
        };

        match consumer.process(&message).await {
            Err(DeletionError::Partial { failed, total, .. }) => {
                assert_eq!(failed, 1);
                assert_eq!(total, 2);
            },
            other => panic!("expected partial failure, got {:?}", other),
        }
        assert_eq!(blobs.calls().len(), 2);

        // Second attempt succeeds for both.
        consumer.process(&message).await.unwrap();
        assert_eq!(blobs.calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_retried_then_dead_lettered() {
        let blobs = Arc::new(FlakyBlobStore::failing(usize::MAX));
        let queue = Arc::new(InMemoryQueue::new(config()));
        let consumer = DeletionConsumer::new(queue.clone(), blobs.clone(), &config());

        queue
            .send(&DeletionMessage::DeleteImage {
                image_id: Uuid::new_v4(),
                paths: paths("d"),
            })
            .await
            .unwrap();

        let first = consumer.handle_batch().await.unwrap();
        assert_eq!(first.retried, 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let second = consumer.handle_batch().await.unwrap();
        assert_eq!(second.retried, 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        let third = consumer.handle_batch().await.unwrap();
        assert_eq!(third.dead_lettered, 1);

        assert_eq!(blobs.calls().len(), 3);
        assert_eq!(queue.dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let queue = Arc::new(InMemoryQueue::new(config()));
        let blobs = Arc::new(InMemoryBlobStore::new());
        let consumer = DeletionConsumer::new(queue.clone(), blobs, &config());
        let token = CancellationToken::new();

        queue
            .send(&DeletionMessage::DeleteImage {
                image_id: Uuid::new_v4(),
                paths: paths("e"),
            })
            .await
            .unwrap();

        let handle = tokio::spawn({
            let token = token.clone();
            async move { consumer.run(token).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        handle.await.unwrap();

        assert!(queue.outstanding().await.is_empty());
    }
}
