//! Batch extraction
//!
//! [`BatchExtractor`] is a plain [`Iterator`] over batches. The caller pulls one batch
//! at a time and decides between pulls whether to continue, so cancellation happens at
//! batch boundaries. A single entry that cannot be decoded is logged and skipped.

use bytes::Bytes;
use imghost_common::media::{mime_type_for, MAX_IMAGE_BYTES};
use serde::Serialize;
use std::io::{Read, Seek};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::archive::ArchiveEntry;

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Failure to decode one entry; never fatal to the run
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Entry '{0}' is not in the archive")]
    Missing(String),

    #[error("Entry '{path}' is {size} bytes, the limit is {limit}")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("Failed to read entry '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open entry '{path}': {source}")]
    Archive {
        path: String,
        #[source]
        source: ZipError,
    },
}

/// A decoded entry ready for upload
#[derive(Debug, Clone)]
pub struct ExtractedItem {
    pub id: Uuid,
    pub name: String,
    pub bytes: Bytes,
    pub mime_type: &'static str,
    pub original_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractProgress {
    /// 1-based position across the whole run
    pub current: usize,
    pub total: usize,
    pub current_item_name: String,
}

type ProgressCallback = Box<dyn FnMut(&ExtractProgress) + Send>;

pub struct BatchExtractor<R> {
    archive: ZipArchive<R>,
    entries: Vec<ArchiveEntry>,
    position: usize,
    batch_size: usize,
    max_item_bytes: u64,
    skipped: usize,
    on_progress: Option<ProgressCallback>,
}

impl<R: Read + Seek> BatchExtractor<R> {
    pub fn new(archive: ZipArchive<R>, entries: Vec<ArchiveEntry>) -> Self {
        Self {
            archive,
            entries,
            position: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            max_item_bytes: MAX_IMAGE_BYTES,
            skipped: 0,
            on_progress: None,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn max_item_bytes(mut self, max_item_bytes: u64) -> Self {
        self.max_item_bytes = max_item_bytes;
        self
    }

    /// Called once per attempted entry, decoded or skipped
    pub fn on_progress(mut self, callback: impl FnMut(&ExtractProgress) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    /// Entries attempted so far
    pub fn attempted(&self) -> usize {
        self.position
    }

    /// Entries that failed to decode so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn extract_one(&mut self, entry: &ArchiveEntry) -> Result<ExtractedItem, ExtractError> {
        let file = match self.archive.by_name(&entry.path) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Err(ExtractError::Missing(entry.path.clone())),
            Err(source) => {
                return Err(ExtractError::Archive {
                    path: entry.path.clone(),
                    source,
                })
            },
        };

        let declared = file.size();
        if declared > self.max_item_bytes {
            return Err(ExtractError::TooLarge {
                path: entry.path.clone(),
                size: declared,
                limit: self.max_item_bytes,
            });
        }

        // The declared size can lie; never read more than one byte past the limit
        let capacity = usize::try_from(declared).unwrap_or(0);
        let mut data = Vec::with_capacity(capacity);
        file.take(self.max_item_bytes.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(|source| ExtractError::Read {
                path: entry.path.clone(),
                source,
            })?;

        let size = data.len() as u64;
        if size > self.max_item_bytes {
            return Err(ExtractError::TooLarge {
                path: entry.path.clone(),
                size,
                limit: self.max_item_bytes,
            });
        }

        Ok(ExtractedItem {
            id: Uuid::new_v4(),
            name: entry.name.clone(),
            bytes: Bytes::from(data),
            mime_type: mime_type_for(&entry.name),
            original_path: entry.path.clone(),
        })
    }
}

impl<R: Read + Seek> Iterator for BatchExtractor<R> {
    type Item = Vec<ExtractedItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.entries.len() {
            return None;
        }

        let end = (self.position + self.batch_size).min(self.entries.len());
        let mut batch = Vec::with_capacity(end - self.position);

        while self.position < end {
            let entry = self.entries[self.position].clone();
            self.position += 1;

            if let Some(callback) = self.on_progress.as_mut() {
                callback(&ExtractProgress {
                    current: self.position,
                    total: self.entries.len(),
                    current_item_name: entry.name.clone(),
                });
            }

            match self.extract_one(&entry) {
                Ok(item) => batch.push(item),
                Err(e) => {
                    self.skipped += 1;
                    warn!(path = %entry.path, error = %e, "Skipping entry that failed to extract");
                },
            }
        }

        debug!(
            batch = batch.len(),
            attempted = self.position,
            total = self.entries.len(),
            "Batch extracted"
        );

        Some(batch)
    }
}
