//! Blob download query

use bytes::Bytes;
use imghost_common::media::mime_type_for;

use crate::error::AppError;
use crate::features::FeatureState;
use crate::storage::BlobError;

#[derive(Debug, Clone)]
pub struct DownloadFileQuery {
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct DownloadFileResponse {
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadFileError {
    #[error("Invalid file key: '{0}'")]
    InvalidKey(String),

    #[error("File '{0}' not found")]
    NotFound(String),

    #[error("Failed to read file: {0}")]
    Storage(#[from] BlobError),
}

impl From<DownloadFileError> for AppError {
    fn from(err: DownloadFileError) -> Self {
        match err {
            DownloadFileError::InvalidKey(_) => AppError::Validation(err.to_string()),
            DownloadFileError::NotFound(_) => AppError::NotFound(err.to_string()),
            DownloadFileError::Storage(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl DownloadFileQuery {
    pub fn validate(&self) -> Result<&str, DownloadFileError> {
        let key = self.key.trim_start_matches('/');
        let traversal = key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
        if key.is_empty() || traversal {
            return Err(DownloadFileError::InvalidKey(self.key.clone()));
        }
        Ok(key)
    }
}

#[tracing::instrument(skip(state))]
pub async fn handle(
    state: &FeatureState,
    query: DownloadFileQuery,
) -> Result<DownloadFileResponse, DownloadFileError> {
    let key = query.validate()?;

    let blob = state
        .blobs
        .get(key)
        .await?
        .ok_or_else(|| DownloadFileError::NotFound(key.to_string()))?;

    Ok(DownloadFileResponse {
        content_type: blob
            .content_type
            .unwrap_or_else(|| mime_type_for(key).to_string()),
        data: blob.data,
    })
}
