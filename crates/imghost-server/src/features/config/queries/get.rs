//! Public configuration query, cached under `config`

use imghost_common::media::IMAGE_EXTENSIONS;
use imghost_common::types::{OutputFormat, DEFAULT_MAX_WIDTH, DEFAULT_QUALITY};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

use crate::cache::{CacheKeys, CacheTtl};
use crate::features::shared::pagination::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::features::FeatureState;

/// Limits and defaults a client needs before uploading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicConfig {
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub default_quality: u8,
    pub default_max_width: u32,
    pub output_formats: Vec<OutputFormat>,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl PublicConfig {
    pub fn from_state(state: &FeatureState) -> Self {
        Self {
            max_upload_bytes: state.upload.max_bytes,
            allowed_extensions: IMAGE_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            default_quality: DEFAULT_QUALITY,
            default_max_width: DEFAULT_MAX_WIDTH,
            output_formats: vec![OutputFormat::Webp, OutputFormat::Avif, OutputFormat::Both],
            default_page_size: DEFAULT_LIMIT,
            max_page_size: MAX_LIMIT,
        }
    }
}

#[tracing::instrument(skip(state))]
pub async fn handle(state: &FeatureState) -> PublicConfig {
    let result: Result<PublicConfig, Infallible> = state
        .cache
        .read_through(CacheKeys::CONFIG, CacheTtl::CONFIG, move || async move {
            Ok(PublicConfig::from_state(state))
        })
        .await;

    match result {
        Ok(config) => config,
        Err(never) => match never {},
    }
}
