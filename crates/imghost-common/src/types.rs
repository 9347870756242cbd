//! Wire types shared by the server and the ingest client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ImghostError, Result};

/// Default encoder quality when the caller does not pick one
pub const DEFAULT_QUALITY: u8 = 80;

/// Default maximum width of derived variants
pub const DEFAULT_MAX_WIDTH: u32 = 1920;

/// Blob keys of an image and its derived variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePaths {
    pub original: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avif: Option<String>,
}

impl ImagePaths {
    pub fn original_only(original: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            webp: None,
            avif: None,
        }
    }

    /// Every blob key, original first
    pub fn keys(&self) -> Vec<String> {
        let mut keys = vec![self.original.clone()];
        keys.extend(self.webp.iter().cloned());
        keys.extend(self.avif.iter().cloned());
        keys
    }
}

/// Which derived variants the encoder should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Webp,
    Avif,
    Both,
}

impl OutputFormat {
    pub fn wants_webp(self) -> bool {
        matches!(self, OutputFormat::Webp | OutputFormat::Both)
    }

    pub fn wants_avif(self) -> bool {
        matches!(self, OutputFormat::Avif | OutputFormat::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Both => "both",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = ImghostError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "webp" => Ok(OutputFormat::Webp),
            "avif" => Ok(OutputFormat::Avif),
            "both" => Ok(OutputFormat::Both),
            other => Err(ImghostError::InvalidOutputFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image orientation derived from its pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
    Square,
}

impl Orientation {
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        match width.cmp(&height) {
            std::cmp::Ordering::Greater => Orientation::Landscape,
            std::cmp::Ordering::Less => Orientation::Portrait,
            std::cmp::Ordering::Equal => Orientation::Square,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
            Orientation::Square => "square",
        }
    }
}

impl std::str::FromStr for Orientation {
    type Err = ImghostError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "landscape" => Ok(Orientation::Landscape),
            "portrait" => Ok(Orientation::Portrait),
            "square" => Ok(Orientation::Square),
            other => Err(ImghostError::InvalidOrientation(other.to_string())),
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options applied to every upload of a run
///
/// A bulk run forwards one value unchanged to each item; there is no per-item override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    #[serde(default)]
    pub tags: Vec<String>,
    /// Minutes until the image expires; 0 keeps it forever
    #[serde(default)]
    pub expiry_minutes: u32,
    pub quality: u8,
    /// Widest a derived variant may be; 0 keeps the original width
    pub max_width: u32,
    #[serde(default)]
    pub preserve_animation: bool,
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            expiry_minutes: 0,
            quality: DEFAULT_QUALITY,
            max_width: DEFAULT_MAX_WIDTH,
            preserve_animation: true,
            output_format: OutputFormat::Webp,
        }
    }
}

impl UploadOptions {
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(ImghostError::InvalidOptions(format!(
                "quality must be between 1 and 100, got {}",
                self.quality
            )));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(ImghostError::InvalidOptions("tags cannot be blank".to_string()));
        }
        Ok(())
    }
}

/// Split a comma separated tag list, dropping blanks and duplicates
pub fn split_tags(raw: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|existing| existing == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Body returned by the upload endpoint for one stored image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub id: Uuid,
    pub paths: ImagePaths,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<DateTime<Utc>>,
}
