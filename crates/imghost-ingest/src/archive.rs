//! Archive analysis
//!
//! Lists the image entries of a ZIP archive using only its central directory:
//! names, directory flags and declared uncompressed sizes. No entry is decompressed.

use bytes::Bytes;
use imghost_common::media::{basename, is_image_file, MAX_IMAGE_BYTES};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use zip::ZipArchive;

/// Byte source an archive can be read from
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// An opened archive, backed by memory or a file handle
pub type Archive = ZipArchive<Box<dyn ReadSeek>>;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("Cannot open archive '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt archive: {0}")]
    CorruptArchive(#[from] zip::result::ZipError),
}

/// Where an archive comes from
#[derive(Debug, Clone)]
pub enum ArchiveSource {
    Bytes(Bytes),
    /// Opened lazily; the file is never read whole
    Path(PathBuf),
}

impl ArchiveSource {
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        ArchiveSource::Bytes(data.into())
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        ArchiveSource::Path(path.into())
    }

    /// Open the archive and read its central directory
    pub fn open(self) -> Result<Archive, AnalyzeError> {
        let reader: Box<dyn ReadSeek> = match self {
            ArchiveSource::Bytes(data) => Box::new(Cursor::new(data)),
            ArchiveSource::Path(path) => {
                let file = File::open(&path).map_err(|source| AnalyzeError::Open { path, source })?;
                Box::new(BufReader::new(file))
            },
        };

        Ok(ZipArchive::new(reader)?)
    }
}

impl fmt::Display for ArchiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveSource::Bytes(data) => write!(f, "<{} bytes in memory>", data.len()),
            ArchiveSource::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One image entry of an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    /// Full path inside the archive; unique within one archive
    pub path: String,
    /// Basename, used as the upload file name
    pub name: String,
    /// Declared uncompressed size
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotImage,
    TooLarge,
    /// Kept for wire compatibility; the analyzer skips directories without a record
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub images: Vec<ArchiveEntry>,
    pub skipped: Vec<SkipRecord>,
    /// Always `images.len()`
    pub total_images: usize,
    /// Sum of the declared sizes of `images`
    pub total_size_bytes: u64,
}

impl AnalysisResult {
    pub fn skipped_count(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|skip| skip.reason == reason).count()
    }
}

/// Hidden files and macOS resource forks
fn is_ignored(path: &str) -> bool {
    basename(path).starts_with('.') || path.split('/').any(|component| component == "__MACOSX")
}

#[derive(Debug, Clone, Copy)]
pub struct ArchiveAnalyzer {
    max_item_bytes: u64,
}

impl Default for ArchiveAnalyzer {
    fn default() -> Self {
        Self {
            max_item_bytes: MAX_IMAGE_BYTES,
        }
    }
}

impl ArchiveAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries declaring more than `max_item_bytes` are skipped as too large
    pub fn with_max_item_bytes(max_item_bytes: u64) -> Self {
        Self { max_item_bytes }
    }

    #[tracing::instrument(skip_all, fields(entries = archive.len()))]
    pub fn analyze<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
    ) -> Result<AnalysisResult, AnalyzeError> {
        let mut result = AnalysisResult::default();

        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index)?;
            let path = entry.name().to_string();

            if entry.is_dir() || is_ignored(&path) {
                continue;
            }

            if !is_image_file(&path) {
                result.skipped.push(SkipRecord {
                    path,
                    reason: SkipReason::NotImage,
                });
                continue;
            }

            let size_bytes = entry.size();
            if size_bytes > self.max_item_bytes {
                debug!(path = %path, size_bytes, "Entry exceeds the per-item limit");
                result.skipped.push(SkipRecord {
                    path,
                    reason: SkipReason::TooLarge,
                });
                continue;
            }

            result.total_size_bytes = result.total_size_bytes.saturating_add(size_bytes);
            result.images.push(ArchiveEntry {
                name: basename(&path).to_string(),
                path,
                size_bytes,
            });
        }

        result.total_images = result.images.len();

        info!(
            images = result.total_images,
            skipped = result.skipped.len(),
            total_size_bytes = result.total_size_bytes,
            "Archive analyzed"
        );

        Ok(result)
    }
}
