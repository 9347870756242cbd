//! List tags query, cached under `tags:list`

use serde::{Deserialize, Serialize};

use crate::cache::{CacheKeys, CacheTtl};
use crate::db::{StoreError, TagCount};
use crate::error::AppError;
use crate::features::FeatureState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTagsResponse {
    pub tags: Vec<TagCount>,
}

#[derive(Debug, thiserror::Error)]
pub enum ListTagsError {
    #[error("Failed to list tags: {0}")]
    Store(#[from] StoreError),
}

impl From<ListTagsError> for AppError {
    fn from(err: ListTagsError) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[tracing::instrument(skip(state))]
pub async fn handle(state: &FeatureState) -> Result<ListTagsResponse, ListTagsError> {
    state
        .cache
        .read_through(CacheKeys::TAGS_LIST, CacheTtl::TAGS_LIST, move || async move {
            Ok(ListTagsResponse {
                tags: state.metadata.list_tags().await?,
            })
        })
        .await
}
