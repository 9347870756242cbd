//! Blob storage
//!
//! Originals and derived variants are immutable objects addressed by key. Deletion is
//! modelled as "ensure absent": removing a key that does not exist succeeds, so a
//! redelivered deletion message can always be replayed.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod config;
pub mod memory;
pub mod s3;

pub use memory::InMemoryBlobStore;
pub use s3::S3Storage;

/// Errors raised by blob stores
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Failed to write '{key}': {message}")]
    Put { key: String, message: String },

    #[error("Failed to read '{key}': {message}")]
    Get { key: String, message: String },

    #[error("Failed to delete {failed} of {requested} objects: {message}")]
    Delete {
        requested: usize,
        failed: usize,
        message: String,
    },

    #[error("Storage client error: {0}")]
    Client(String),
}

/// An object read back from the store
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// Key to bytes store holding image originals and variants
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write an object, replacing any previous value
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), BlobError>;

    /// Read an object; `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<StoredBlob>, BlobError>;

    /// Ensure every key is absent. Missing keys are not errors.
    async fn delete_many(&self, keys: &[String]) -> Result<(), BlobError>;
}
