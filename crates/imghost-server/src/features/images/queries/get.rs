//! Get image query

use uuid::Uuid;

use crate::cache::{CacheKeys, CacheTtl};
use crate::db::StoreError;
use crate::error::AppError;
use crate::features::images::types::ImageView;
use crate::features::shared::parse_image_id;
use crate::features::FeatureState;

#[derive(Debug, Clone)]
pub struct GetImageQuery {
    pub id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GetImageError {
    #[error("Invalid image id: '{0}'")]
    InvalidId(String),

    #[error("Image {0} not found")]
    NotFound(Uuid),

    #[error("Failed to load image: {0}")]
    Store(#[from] StoreError),
}

impl From<GetImageError> for AppError {
    fn from(err: GetImageError) -> Self {
        match err {
            GetImageError::InvalidId(_) => AppError::InvalidIdentifier(err.to_string()),
            GetImageError::NotFound(_) => AppError::NotFound(err.to_string()),
            GetImageError::Store(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl GetImageQuery {
    pub fn validate(&self) -> Result<Uuid, GetImageError> {
        parse_image_id(&self.id).map_err(|e| GetImageError::InvalidId(e.0))
    }
}

/// Invalid ids are rejected before the cache or the store is touched; misses are not cached.
#[tracing::instrument(skip(state), fields(image_id = %query.id))]
pub async fn handle(state: &FeatureState, query: GetImageQuery) -> Result<ImageView, GetImageError> {
    let id = query.validate()?;

    state
        .cache
        .read_through(&CacheKeys::image_detail(id), CacheTtl::IMAGE_DETAIL, move || async move {
            let record = state
                .metadata
                .get_image(id)
                .await?
                .ok_or(GetImageError::NotFound(id))?;
            Ok(ImageView::from_record(record, state))
        })
        .await
}
