//! Deferred blob deletion
//!
//! Deleting an image removes its metadata on the request path and enqueues a
//! [`DeletionMessage`]; the [`DeletionConsumer`] removes the blobs later. Delivery is
//! at-least-once: a message is redelivered until it is acknowledged, with growing
//! backoff, and dead-lettered once it has been delivered `max_attempts` times.
//!
//! Wire format (JSON, tagged by `type`):
//!
//! ```json
//! {"type": "delete_image", "imageId": "…", "paths": {"original": "…", "webp": "…"}}
//! {"type": "delete_tag_images", "tagName": "cats", "imagePaths": [{"id": "…", "paths": {…}}]}
//! ```

use async_trait::async_trait;
use imghost_common::types::ImagePaths;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod consumer;
pub mod memory;
pub mod postgres;

pub use consumer::{BatchReport, DeletionConsumer, DeletionError};
pub use memory::InMemoryQueue;
pub use postgres::PgQueue;

/// An image id with the blob keys to remove
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: Uuid,
    pub paths: ImagePaths,
}

/// Work item for the deletion consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DeletionMessage {
    DeleteImage {
        image_id: Uuid,
        paths: ImagePaths,
    },
    DeleteTagImages {
        tag_name: String,
        image_paths: Vec<ImageRef>,
    },
}

impl DeletionMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            DeletionMessage::DeleteImage { .. } => "delete_image",
            DeletionMessage::DeleteTagImages { .. } => "delete_tag_images",
        }
    }

    /// Every blob key the message removes
    pub fn keys(&self) -> Vec<String> {
        match self {
            DeletionMessage::DeleteImage { paths, .. } => paths.keys(),
            DeletionMessage::DeleteTagImages { image_paths, .. } => {
                image_paths.iter().flat_map(|image| image.paths.keys()).collect()
            },
        }
    }
}

/// Errors raised by queue backends
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown message {0}")]
    UnknownMessage(Uuid),
}

/// A claimed message; invisible to other receivers until acked, retried or its lease lapses
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub message: DeletionMessage,
    /// Deliveries so far, this one included
    pub attempts: u32,
}

/// What happened to a message handed back with `retry`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Scheduled { attempts: u32 },
    DeadLettered { attempts: u32 },
}

/// A message that exhausted its attempts
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: Uuid,
    pub message: Option<DeletionMessage>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: u64,
    pub in_flight: u64,
    pub dead: u64,
}

/// At-least-once channel for deletion messages
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn send(&self, message: &DeletionMessage) -> Result<Uuid, QueueError>;

    /// Claim up to `max` ready messages
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError>;

    /// Remove a processed message
    async fn ack(&self, id: Uuid) -> Result<(), QueueError>;

    /// Hand a failed message back for redelivery after backoff, or dead-letter it
    async fn retry(&self, id: Uuid, error: &str) -> Result<RetryOutcome, QueueError>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}
