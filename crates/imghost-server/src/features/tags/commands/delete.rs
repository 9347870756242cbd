//! Delete tag command
//!
//! Removes every image carrying the tag. All their blobs are cleaned up by a single
//! `DeleteTagImages` message.

use serde::Serialize;

use crate::db::StoreError;
use crate::error::AppError;
use crate::features::shared::validation::{validate_tag_name, TagValidationError};
use crate::features::FeatureState;
use crate::queue::{DeletionMessage, ImageRef, QueueError};

#[derive(Debug, Clone)]
pub struct DeleteTagCommand {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTagResponse {
    pub tag: String,
    pub deleted_images: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteTagError {
    #[error(transparent)]
    InvalidName(#[from] TagValidationError),

    #[error("Tag '{0}' not found")]
    NotFound(String),

    #[error("Failed to delete tag: {0}")]
    Store(#[from] StoreError),

    #[error("Tag '{tag}' deleted but blob cleanup could not be scheduled: {source}")]
    Enqueue {
        tag: String,
        #[source]
        source: QueueError,
    },
}

impl From<DeleteTagError> for AppError {
    fn from(err: DeleteTagError) -> Self {
        match err {
            DeleteTagError::InvalidName(_) => AppError::Validation(err.to_string()),
            DeleteTagError::NotFound(_) => AppError::NotFound(err.to_string()),
            DeleteTagError::Store(_) | DeleteTagError::Enqueue { .. } => {
                AppError::Internal(err.to_string())
            },
        }
    }
}

impl DeleteTagCommand {
    pub fn validate(&self) -> Result<String, DeleteTagError> {
        validate_tag_name(&self.name)?;
        Ok(self.name.trim().to_string())
    }
}

#[tracing::instrument(skip(state), fields(tag = %command.name))]
pub async fn handle(
    state: &FeatureState,
    command: DeleteTagCommand,
) -> Result<DeleteTagResponse, DeleteTagError> {
    let tag = command.validate()?;

    let removed = state.metadata.delete_tag(&tag).await?;
    if removed.is_empty() {
        return Err(DeleteTagError::NotFound(tag));
    }

    let message = DeletionMessage::DeleteTagImages {
        tag_name: tag.clone(),
        image_paths: removed
            .iter()
            .map(|record| ImageRef {
                id: record.id,
                paths: record.paths.clone(),
            })
            .collect(),
    };
    let enqueued = state.queue.send(&message).await;

    let detail_invalidations = removed
        .iter()
        .map(|record| state.cache.invalidate_image_detail(record.id));
    tokio::join!(
        state.cache.invalidate_after_tag_change(),
        futures::future::join_all(detail_invalidations)
    );

    if let Err(source) = enqueued {
        tracing::error!(
            tag = %tag,
            orphaned_keys = ?message.keys(),
            error = %source,
            "Failed to enqueue blob deletion for tag, blobs are orphaned"
        );
        return Err(DeleteTagError::Enqueue { tag, source });
    }

    tracing::info!(tag = %tag, images = removed.len(), "Tag deleted, blob removal queued");

    Ok(DeleteTagResponse {
        tag,
        deleted_images: removed.len(),
    })
}
