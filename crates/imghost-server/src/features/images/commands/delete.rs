//! Delete image command
//!
//! Removes the metadata record on the request path and defers blob removal to the
//! deletion queue. The response never waits for the blob store.

use serde::Serialize;
use uuid::Uuid;

use crate::db::StoreError;
use crate::error::AppError;
use crate::features::shared::parse_image_id;
use crate::features::FeatureState;
use crate::queue::{DeletionMessage, QueueError};

#[derive(Debug, Clone)]
pub struct DeleteImageCommand {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteImageResponse {
    pub id: Uuid,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteImageError {
    #[error("Invalid image id: '{0}'")]
    InvalidId(String),

    #[error("Image {0} not found")]
    NotFound(Uuid),

    #[error("Failed to delete image: {0}")]
    Store(#[from] StoreError),

    #[error("Image {id} deleted but blob cleanup could not be scheduled: {source}")]
    Enqueue {
        id: Uuid,
        #[source]
        source: QueueError,
    },
}

impl From<DeleteImageError> for AppError {
    fn from(err: DeleteImageError) -> Self {
        match err {
            DeleteImageError::InvalidId(_) => AppError::InvalidIdentifier(err.to_string()),
            DeleteImageError::NotFound(_) => AppError::NotFound(err.to_string()),
            DeleteImageError::Store(_) | DeleteImageError::Enqueue { .. } => {
                AppError::Internal(err.to_string())
            },
        }
    }
}

impl DeleteImageCommand {
    pub fn validate(&self) -> Result<Uuid, DeleteImageError> {
        parse_image_id(&self.id).map_err(|e| DeleteImageError::InvalidId(e.0))
    }
}

/// Metadata delete, then one `DeleteImage` message, then cache invalidation
///
/// Invalidation runs even when the enqueue fails, since the record is already gone.
#[tracing::instrument(skip(state), fields(image_id = %command.id))]
pub async fn handle(
    state: &FeatureState,
    command: DeleteImageCommand,
) -> Result<DeleteImageResponse, DeleteImageError> {
    let id = command.validate()?;

    let record = state
        .metadata
        .delete_image(id)
        .await?
        .ok_or(DeleteImageError::NotFound(id))?;

    let message = DeletionMessage::DeleteImage {
        image_id: id,
        paths: record.paths.clone(),
    };
    let enqueued = state.queue.send(&message).await;

    if record.tags.is_empty() {
        state.cache.invalidate_after_image_change(Some(id)).await;
    } else {
        tokio::join!(
            state.cache.invalidate_after_image_change(Some(id)),
            state.cache.invalidate_tags_list()
        );
    }

    match enqueued {
        Ok(message_id) => {
            tracing::info!(image_id = %id, %message_id, "Image deleted, blob removal queued");
            Ok(DeleteImageResponse {
                id,
                message: "Image deleted".to_string(),
            })
        },
        Err(source) => {
            tracing::error!(
                image_id = %id,
                orphaned_keys = ?message.keys(),
                error = %source,
                "Failed to enqueue blob deletion, blobs are orphaned"
            );
            Err(DeleteImageError::Enqueue { id, source })
        },
    }
}
