//! Image probing and variant encoding
//!
//! Decoding and encoding are CPU-bound and run on the blocking pool.

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::gif::GifDecoder;
use image::codecs::webp::{WebPDecoder, WebPEncoder};
use image::imageops::FilterType;
use image::{AnimationDecoder, ExtendedColorType, ImageFormat, ImageReader};
use image::ImageEncoder as _;
use imghost_common::types::UploadOptions;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoder task failed: {0}")]
    Task(String),
}

impl EncodeError {
    /// Failures caused by the uploaded bytes themselves, such as a truncated or corrupt body
    pub fn is_invalid_input(&self) -> bool {
        match self {
            EncodeError::Decode(
                image::ImageError::Decoding(_)
                | image::ImageError::IoError(_)
                | image::ImageError::Unsupported(_),
            )
            | EncodeError::Io(_) => true,
            EncodeError::Decode(_) | EncodeError::Task(_) => false,
        }
    }
}

/// What a probe learned about an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Short format name, e.g. `jpeg`, `png`
    pub format: String,
    pub animated: bool,
}

/// A derived variant ready to be stored
#[derive(Debug, Clone)]
pub struct EncodedVariant {
    pub kind: VariantKind,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Webp,
    Avif,
}

impl VariantKind {
    pub fn extension(self) -> &'static str {
        match self {
            VariantKind::Webp => "webp",
            VariantKind::Avif => "avif",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            VariantKind::Webp => "image/webp",
            VariantKind::Avif => "image/avif",
        }
    }
}

#[async_trait]
pub trait ImageEncoder: Send + Sync {
    /// Dimensions and format of an upload, or `None` when this encoder cannot decode it
    async fn probe(&self, data: Bytes) -> Result<Option<ImageInfo>, EncodeError>;

    /// Derive the variants `options` ask for
    async fn encode(
        &self,
        data: Bytes,
        info: &ImageInfo,
        options: &UploadOptions,
    ) -> Result<Vec<EncodedVariant>, EncodeError>;
}

/// Encoder backed by the `image` crate
///
/// Emits lossless WebP; AVIF output is not available and is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateEncoder;

impl ImageCrateEncoder {
    pub fn new() -> Self {
        Self
    }
}

fn format_name(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| format!("{:?}", format).to_lowercase())
}

fn is_animated(data: &[u8], format: ImageFormat) -> Result<bool, EncodeError> {
    match format {
        ImageFormat::Gif => {
            let decoder = GifDecoder::new(Cursor::new(data))?;
            Ok(decoder.into_frames().take(2).count() > 1)
        },
        ImageFormat::WebP => Ok(WebPDecoder::new(Cursor::new(data))?.has_animation()),
        _ => Ok(false),
    }
}

fn probe_blocking(data: &[u8]) -> Result<Option<ImageInfo>, EncodeError> {
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    let Some(format) = reader.format() else {
        return Ok(None);
    };
    if !format.reading_enabled() {
        debug!(?format, "No decoder for format");
        return Ok(None);
    }

    let (width, height) = reader.into_dimensions()?;
    let animated = is_animated(data, format)?;

    Ok(Some(ImageInfo {
        width,
        height,
        format: format_name(format),
        animated,
    }))
}

fn encode_webp_blocking(data: &[u8], max_width: u32) -> Result<Bytes, EncodeError> {
    let mut image = image::load_from_memory(data)?;

    if max_width > 0 && image.width() > max_width {
        let height = ((image.height() as u64 * max_width as u64) / image.width() as u64).max(1) as u32;
        image = image.resize_exact(max_width, height, FilterType::Lanczos3);
    }

    let rgba = image.to_rgba8();
    let mut buffer = Vec::new();
    WebPEncoder::new_lossless(&mut buffer).write_image(
        rgba.as_raw(),
        rgba.width(),
        rgba.height(),
        ExtendedColorType::Rgba8,
    )?;

    Ok(Bytes::from(buffer))
}

#[async_trait]
impl ImageEncoder for ImageCrateEncoder {
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn probe(&self, data: Bytes) -> Result<Option<ImageInfo>, EncodeError> {
        tokio::task::spawn_blocking(move || probe_blocking(&data))
            .await
            .map_err(|e| EncodeError::Task(e.to_string()))?
    }

    #[instrument(skip(self, data, options), fields(format = %info.format, width = info.width))]
    async fn encode(
        &self,
        data: Bytes,
        info: &ImageInfo,
        options: &UploadOptions,
    ) -> Result<Vec<EncodedVariant>, EncodeError> {
        if info.animated && options.preserve_animation {
            debug!("Animated upload kept as original only");
            return Ok(Vec::new());
        }

        if options.output_format.wants_avif() {
            warn!("AVIF output is not supported by this encoder, skipping");
        }
        if !options.output_format.wants_webp() {
            return Ok(Vec::new());
        }

        // Lossless output ignores the requested quality.
        debug!(quality = options.quality, max_width = options.max_width, "Encoding WebP variant");

        let max_width = options.max_width;
        let webp = tokio::task::spawn_blocking(move || encode_webp_blocking(&data, max_width))
            .await
            .map_err(|e| EncodeError::Task(e.to_string()))??;

        Ok(vec![EncodedVariant {
            kind: VariantKind::Webp,
            data: webp,
        }])
    }
}
