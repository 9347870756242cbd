//! imghost Ingest Library
//!
//! Bulk upload of image archives to an imghost server.
//!
//! # Pipeline
//!
//! 1. [`archive::ArchiveAnalyzer`] lists the image entries of a ZIP archive from its
//!    central directory, without decompressing anything
//! 2. [`extract::BatchExtractor`] decodes those entries lazily, in bounded batches
//! 3. [`dispatch::UploadDispatcher`] uploads each batch with bounded fan-out through an
//!    [`uploader::ImageUploader`]
//! 4. [`session::IngestSession`] drives the phases, owns the open archive and exposes
//!    cancel and reset
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use imghost_common::types::UploadOptions;
//! use imghost_ingest::{
//!     archive::ArchiveSource,
//!     session::{IngestSession, SessionConfig},
//!     uploader::HttpUploader,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let uploader = Arc::new(HttpUploader::new("http://127.0.0.1:8000")?);
//!     let session = IngestSession::new(uploader, SessionConfig::default());
//!
//!     let analysis = session.select_archive(ArchiveSource::path("photos.zip")).await?;
//!     println!("{} images found", analysis.total_images);
//!
//!     let report = session.confirm(UploadOptions::default()).await?;
//!     println!("{} uploaded, {} failed", report.completed, report.failed);
//!     Ok(())
//! }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod archive;
pub mod dispatch;
pub mod extract;
pub mod progress;
pub mod session;
pub mod uploader;

#[cfg(test)]
mod test_support;

pub use archive::{AnalysisResult, ArchiveAnalyzer, ArchiveEntry, ArchiveSource};
pub use session::{IngestError, IngestSession, IngestionReport, Phase, SessionSnapshot};
