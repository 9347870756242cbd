//! List images query
//!
//! Served through the read-through cache under
//! `images:list:{page}:{limit}:{tag|all}:{orientation|all}`.

use imghost_common::types::Orientation;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKeys, CacheTtl};
use crate::db::{ImageQuery, StoreError};
use crate::error::AppError;
use crate::features::images::types::{ImageListPage, ImageView};
use crate::features::shared::{parse_orientation_filter, PaginationMetadata, PaginationParams};
use crate::features::FeatureState;

/// Query string of `GET /images`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListImagesParams {
    #[serde(flatten)]
    pub pagination: PaginationParams,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub orientation: Option<String>,
}

/// Normalized listing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListImagesQuery {
    pub page: u32,
    pub limit: u32,
    pub tag: Option<String>,
    pub orientation: Option<Orientation>,
}

#[derive(Debug, thiserror::Error)]
pub enum ListImagesError {
    #[error("Failed to list images: {0}")]
    Store(#[from] StoreError),
}

impl From<ListImagesError> for AppError {
    fn from(err: ListImagesError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<ListImagesParams> for ListImagesQuery {
    fn from(params: ListImagesParams) -> Self {
        Self {
            page: params.pagination.page(),
            limit: params.pagination.limit(),
            tag: params
                .tag
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty()),
            orientation: parse_orientation_filter(params.orientation.as_deref()),
        }
    }
}

impl ListImagesQuery {
    pub fn cache_key(&self) -> String {
        CacheKeys::images_list(self.page, self.limit, self.tag.as_deref(), self.orientation)
    }
}

#[tracing::instrument(skip(state))]
pub async fn handle(
    state: &FeatureState,
    query: ListImagesQuery,
) -> Result<ImageListPage, ListImagesError> {
    let key = query.cache_key();
    state
        .cache
        .read_through(&key, CacheTtl::IMAGES_LIST, move || async move {
            let page = state
                .metadata
                .get_images(&ImageQuery {
                    page: query.page,
                    limit: query.limit,
                    tag: query.tag,
                    orientation: query.orientation,
                })
                .await?;

            Ok(ImageListPage {
                pagination: PaginationMetadata::new(query.page, query.limit, page.total),
                images: page
                    .images
                    .into_iter()
                    .map(|record| ImageView::from_record(record, state))
                    .collect(),
            })
        })
        .await
}
