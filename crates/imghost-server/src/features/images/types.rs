use chrono::{DateTime, Utc};
use imghost_common::types::{ImagePaths, Orientation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::ImageRecord;
use crate::features::shared::PaginationMetadata;
use crate::features::FeatureState;

/// Public URLs of an image's blobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrls {
    pub original: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avif: Option<String>,
}

/// An image as returned by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageView {
    pub id: Uuid,
    pub original_name: String,
    pub paths: ImagePaths,
    pub urls: ImageUrls,
    pub tags: Vec<String>,
    pub orientation: Orientation,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ImageView {
    pub fn from_record(record: ImageRecord, state: &FeatureState) -> Self {
        let urls = ImageUrls {
            original: state.url_for(&record.paths.original),
            webp: record.paths.webp.as_deref().map(|key| state.url_for(key)),
            avif: record.paths.avif.as_deref().map(|key| state.url_for(key)),
        };

        Self {
            id: record.id,
            original_name: record.original_name,
            paths: record.paths,
            urls,
            tags: record.tags,
            orientation: record.orientation,
            width: record.width,
            height: record.height,
            format: record.format,
            size_bytes: record.size_bytes,
            expiry_time: record.expiry_time,
            created_at: record.created_at,
        }
    }
}

/// One page of images; cached as a whole under the listing key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageListPage {
    pub images: Vec<ImageView>,
    pub pagination: PaginationMetadata,
}
