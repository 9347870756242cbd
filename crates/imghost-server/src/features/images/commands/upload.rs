//! Upload image command
//!
//! Pipeline: validate, probe, encode variants, store the original and every variant,
//! then create the metadata record. Blobs written before a failure are handed to the
//! deletion queue so nothing is left behind without a record.

use bytes::Bytes;
use chrono::{Duration, Utc};
use imghost_common::media::{
    canonical_mime_type, extension, extension_for_mime, is_allowed_mime, mime_type_for,
};
use imghost_common::types::{split_tags, ImagePaths, Orientation, UploadOptions, UploadedImage};
use imghost_common::ImghostError;
use uuid::Uuid;

use crate::db::{ImageRecord, StoreError};
use crate::encoder::{EncodeError, EncodedVariant, VariantKind};
use crate::error::AppError;
use crate::features::shared::validation::{validate_tags, TagValidationError};
use crate::features::FeatureState;
use crate::queue::DeletionMessage;
use crate::storage::BlobError;

#[derive(Debug, Clone)]
pub struct UploadImageCommand {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
    pub options: UploadOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadImageError {
    #[error("A non-empty file is required")]
    FileRequired,

    #[error("File is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Unsupported file type '{0}'")]
    UnsupportedType(String),

    #[error(transparent)]
    InvalidOptions(#[from] ImghostError),

    #[error(transparent)]
    InvalidTags(#[from] TagValidationError),

    #[error("Failed to process image: {0}")]
    Encode(#[from] EncodeError),

    #[error("Failed to store image: {0}")]
    Storage(#[from] BlobError),

    #[error("Failed to record image: {0}")]
    Store(#[from] StoreError),
}

impl From<UploadImageError> for AppError {
    fn from(err: UploadImageError) -> Self {
        match err {
            UploadImageError::FileRequired
            | UploadImageError::UnsupportedType(_)
            | UploadImageError::InvalidOptions(_)
            | UploadImageError::InvalidTags(_) => AppError::Validation(err.to_string()),
            UploadImageError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            UploadImageError::Encode(ref e) if e.is_invalid_input() => {
                AppError::Validation(err.to_string())
            },
            UploadImageError::Encode(_)
            | UploadImageError::Storage(_)
            | UploadImageError::Store(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl UploadImageCommand {
    /// Validates the upload and resolves its MIME type
    pub fn validate(&self, max_bytes: u64) -> Result<&'static str, UploadImageError> {
        if self.data.is_empty() {
            return Err(UploadImageError::FileRequired);
        }

        let size = self.data.len() as u64;
        if size > max_bytes {
            return Err(UploadImageError::TooLarge {
                size,
                limit: max_bytes,
            });
        }

        let mime = self.resolve_mime().ok_or_else(|| {
            UploadImageError::UnsupportedType(
                self.content_type.clone().unwrap_or_else(|| self.filename.clone()),
            )
        })?;

        self.options.validate()?;
        validate_tags(&self.options.tags)?;

        Ok(mime)
    }

    /// Declared content type when it is an image type we store, otherwise inferred from the name
    fn resolve_mime(&self) -> Option<&'static str> {
        self.content_type
            .as_deref()
            .and_then(canonical_mime_type)
            .or_else(|| Some(mime_type_for(&self.filename)).filter(|mime| is_allowed_mime(mime)))
    }
}

fn variant_key(id: Uuid, kind: VariantKind) -> String {
    format!("{}/{}.{}", kind.extension(), id, kind.extension())
}

/// Blob keys successfully written so far
#[derive(Default)]
struct Written {
    original: Option<String>,
    webp: Option<String>,
    avif: Option<String>,
}

impl Written {
    fn paths(&self) -> Option<ImagePaths> {
        Some(ImagePaths {
            original: self.original.clone()?,
            webp: self.webp.clone(),
            avif: self.avif.clone(),
        })
    }
}

async fn store_blobs(
    state: &FeatureState,
    id: Uuid,
    original_key: &str,
    mime: &str,
    data: Bytes,
    variants: Vec<EncodedVariant>,
    written: &mut Written,
) -> Result<(), BlobError> {
    state.blobs.put(original_key, data, mime).await?;
    written.original = Some(original_key.to_string());

    for variant in variants {
        let key = variant_key(id, variant.kind);
        state
            .blobs
            .put(&key, variant.data, variant.kind.content_type())
            .await?;
        match variant.kind {
            VariantKind::Webp => written.webp = Some(key),
            VariantKind::Avif => written.avif = Some(key),
        }
    }

    Ok(())
}

/// Hand partially written blobs to the deletion queue
async fn discard(state: &FeatureState, id: Uuid, written: &Written) {
    let Some(paths) = written.paths() else {
        return;
    };

    let message = DeletionMessage::DeleteImage {
        image_id: id,
        paths,
    };
    if let Err(e) = state.queue.send(&message).await {
        tracing::error!(
            image_id = %id,
            orphaned_keys = ?message.keys(),
            error = %e,
            "Failed to enqueue cleanup of partially stored upload"
        );
    }
}

#[tracing::instrument(
    skip(state, command),
    fields(filename = %command.filename, bytes = command.data.len())
)]
pub async fn handle(
    state: &FeatureState,
    command: UploadImageCommand,
) -> Result<UploadedImage, UploadImageError> {
    let mime = command.validate(state.upload.max_bytes)?;
    let UploadImageCommand {
        filename,
        data,
        mut options,
        ..
    } = command;
    options.tags = split_tags(&options.tags.join(","));

    let id = Uuid::new_v4();
    let ext = extension_for_mime(mime)
        .map(str::to_string)
        .or_else(|| extension(&filename))
        .unwrap_or_else(|| "bin".to_string());
    let original_key = format!("original/{}.{}", id, ext);

    let info = state.encoder.probe(data.clone()).await?;
    let variants = match &info {
        Some(info) => state.encoder.encode(data.clone(), info, &options).await?,
        None => {
            tracing::warn!(mime, "Cannot decode upload, storing original only");
            Vec::new()
        },
    };

    let (width, height, format) = match info {
        Some(info) => (info.width, info.height, info.format),
        None => (0, 0, ext.clone()),
    };

    let mut written = Written::default();
    if let Err(e) = store_blobs(state, id, &original_key, mime, data.clone(), variants, &mut written).await {
        discard(state, id, &written).await;
        return Err(e.into());
    }

    let now = Utc::now();
    let record = ImageRecord {
        id,
        original_name: filename,
        paths: written.paths().unwrap_or_else(|| ImagePaths::original_only(original_key)),
        tags: options.tags.clone(),
        orientation: Orientation::from_dimensions(width, height),
        width,
        height,
        format,
        size_bytes: data.len() as u64,
        expiry_time: (options.expiry_minutes > 0)
            .then(|| now + Duration::minutes(i64::from(options.expiry_minutes))),
        created_at: now,
    };

    let record = match state.metadata.create_image(&record).await {
        Ok(record) => record,
        Err(e) => {
            discard(state, id, &written).await;
            return Err(e.into());
        },
    };

    if record.tags.is_empty() {
        state.cache.invalidate_images_list().await;
    } else {
        state.cache.invalidate_after_tag_change().await;
    }

    tracing::info!(
        image_id = %record.id,
        orientation = %record.orientation,
        variants = record.paths.keys().len() - 1,
        "Image uploaded"
    );

    Ok(UploadedImage {
        id: record.id,
        paths: record.paths,
        tags: record.tags,
        expiry_time: record.expiry_time,
    })
}
