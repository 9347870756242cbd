//! Feature modules implementing the imghost API
//!
//! Each feature is a vertical slice:
//! - `commands/` - write operations (upload, update, delete)
//! - `queries/` - read operations (list, get)
//! - `routes.rs` - HTTP route definitions
//!
//! # Features
//!
//! - **images**: listing, detail, update, delete and single-image upload
//! - **tags**: tag listing and tag-wide deletion
//! - **config**: public upload limits and defaults
//! - **files**: blob serving

pub mod config;
pub mod files;
pub mod images;
pub mod shared;
pub mod tags;

use axum::Router;
use std::sync::Arc;

use crate::cache::CacheService;
use crate::config::UploadConfig;
use crate::db::MetadataStore;
use crate::encoder::ImageEncoder;
use crate::queue::QueueBackend;
use crate::storage::BlobStore;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub metadata: Arc<dyn MetadataStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub cache: CacheService,
    pub queue: Arc<dyn QueueBackend>,
    pub encoder: Arc<dyn ImageEncoder>,
    pub upload: UploadConfig,
    /// Prefix for public blob URLs, without a trailing slash
    pub public_base_url: Arc<str>,
}

impl FeatureState {
    /// Public URL of a blob key
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), key)
    }
}

/// Creates the API router with all feature routes mounted
///
/// - `/images` - listing, detail, update, delete
/// - `/upload` - single-image upload
/// - `/tags` - tag listing and deletion
/// - `/config` - public configuration
/// - `/files` - blob serving
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .nest("/images", images::images_routes())
        .merge(images::upload_routes(&state.upload))
        .nest("/tags", tags::tags_routes())
        .nest("/config", config::config_routes())
        .nest("/files", files::files_routes())
        .with_state(state)
}
