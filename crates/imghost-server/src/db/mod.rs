//! Image metadata store
//!
//! The authoritative record of every hosted image. Handlers reach it through
//! [`MetadataStore`] so the Postgres implementation and the in-memory one are
//! interchangeable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use imghost_common::types::{ImagePaths, Orientation};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::DatabaseConfig;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryMetadataStore;
pub use postgres::PgMetadataStore;

/// Errors raised by metadata stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Image {0} already exists")]
    Duplicate(Uuid),

    #[error("Stored record is invalid: {0}")]
    Corrupt(String),
}

/// One hosted image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: Uuid,
    pub original_name: String,
    pub paths: ImagePaths,
    pub tags: Vec<String>,
    pub orientation: Orientation,
    pub width: u32,
    pub height: u32,
    /// Stored format of the original, e.g. "jpg"
    pub format: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_time.map(|expiry| expiry <= now).unwrap_or(false)
    }
}

/// Filters and page for a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageQuery {
    /// 1-based page number
    pub page: u32,
    pub limit: u32,
    pub tag: Option<String>,
    pub orientation: Option<Orientation>,
}

impl ImageQuery {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// One page of a listing plus the unpaged total
#[derive(Debug, Clone)]
pub struct ImagePage {
    pub images: Vec<ImageRecord>,
    pub total: u64,
}

/// Requested change to an image's expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryChange {
    Set(DateTime<Utc>),
    Clear,
}

/// Partial update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageUpdate {
    pub tags: Option<Vec<String>>,
    pub expiry: Option<ExpiryChange>,
}

impl ImageUpdate {
    pub fn is_empty(&self) -> bool {
        self.tags.is_none() && self.expiry.is_none()
    }
}

/// A tag and how many live images carry it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub name: String,
    pub count: u64,
}

/// CRUD surface of the metadata collaborator
///
/// Expired images are treated as absent by every read.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Newest first, filtered by tag and orientation
    async fn get_images(&self, query: &ImageQuery) -> Result<ImagePage, StoreError>;

    async fn get_image(&self, id: Uuid) -> Result<Option<ImageRecord>, StoreError>;

    async fn create_image(&self, record: &ImageRecord) -> Result<ImageRecord, StoreError>;

    /// Apply an update; `None` when the image does not exist
    async fn update_image(
        &self,
        id: Uuid,
        update: &ImageUpdate,
    ) -> Result<Option<ImageRecord>, StoreError>;

    /// Remove the record, expired or not, and return it
    async fn delete_image(&self, id: Uuid) -> Result<Option<ImageRecord>, StoreError>;

    /// Every tag in use, most used first
    async fn list_tags(&self) -> Result<Vec<TagCount>, StoreError>;

    /// Remove every image carrying `name` and return the removed records
    async fn delete_tag(&self, name: &str) -> Result<Vec<ImageRecord>, StoreError>;
}

/// Create the shared Postgres pool
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await
}
