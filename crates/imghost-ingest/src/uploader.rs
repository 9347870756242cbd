//! Write path used by the dispatcher
//!
//! [`HttpUploader`] posts each item to the server's `POST /api/v1/upload` endpoint.

use async_trait::async_trait;
use imghost_common::types::{UploadOptions, UploadedImage};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::extract::ExtractedItem;

// ============================================================================
// Uploader Constants
// ============================================================================

/// Default timeout for one upload request in seconds.
/// Can be overridden via IMGHOST_UPLOAD_TIMEOUT_SECS.
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 120;

/// Default server URL when not given on the command line or via IMGHOST_SERVER_URL.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected upload ({status} {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Unexpected upload response: {0}")]
    InvalidResponse(String),
}

/// Uploads one extracted item with the run's options
#[async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload(
        &self,
        item: &ExtractedItem,
        options: &UploadOptions,
    ) -> Result<UploadedImage, UploadError>;
}

#[derive(Debug, Deserialize)]
struct SuccessBody<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct HttpUploader {
    client: Client,
    upload_url: String,
}

impl HttpUploader {
    pub fn new(base_url: &str) -> Result<Self, UploadError> {
        let timeout_secs = std::env::var("IMGHOST_UPLOAD_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            upload_url: format!("{}/api/v1/upload", base_url.trim_end_matches('/')),
        })
    }

    fn form(item: &ExtractedItem, options: &UploadOptions) -> Result<Form, UploadError> {
        let file = Part::stream_with_length(item.bytes.clone(), item.bytes.len() as u64)
            .file_name(item.name.clone())
            .mime_str(item.mime_type)?;

        let mut form = Form::new()
            .part("file", file)
            .text("expiryMinutes", options.expiry_minutes.to_string())
            .text("quality", options.quality.to_string())
            .text("maxWidth", options.max_width.to_string())
            .text("preserveAnimation", options.preserve_animation.to_string())
            .text("format", options.output_format.as_str());
        if !options.tags.is_empty() {
            form = form.text("tags", options.tags.join(","));
        }

        Ok(form)
    }
}

#[async_trait]
impl ImageUploader for HttpUploader {
    #[tracing::instrument(skip_all, fields(item = %item.original_path))]
    async fn upload(
        &self,
        item: &ExtractedItem,
        options: &UploadOptions,
    ) -> Result<UploadedImage, UploadError> {
        let response = self
            .client
            .post(&self.upload_url)
            .multipart(Self::form(item, options)?)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            let parsed: SuccessBody<UploadedImage> = serde_json::from_slice(&body)
                .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;
            return Ok(parsed.data);
        }

        Err(match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(parsed) => UploadError::Rejected {
                status: status.as_u16(),
                code: parsed.error.code,
                message: parsed.error.message,
            },
            Err(_) => UploadError::Rejected {
                status: status.as_u16(),
                code: "UNKNOWN".to_string(),
                message: String::from_utf8_lossy(&body).into_owned(),
            },
        })
    }
}
