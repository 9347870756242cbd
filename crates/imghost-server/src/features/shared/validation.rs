//! Shared validation utilities

use imghost_common::types::{split_tags, Orientation};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

pub const MAX_TAG_LENGTH: usize = 64;
pub const MAX_TAGS: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid image id: '{0}'")]
pub struct InvalidImageId(pub String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagValidationError {
    #[error("Tag name is required")]
    Required,

    #[error("Tag '{0}' is longer than {MAX_TAG_LENGTH} characters")]
    TooLong(String),

    #[error("At most {MAX_TAGS} tags are allowed")]
    TooMany,
}

/// Parse a path segment as an image id
pub fn parse_image_id(raw: &str) -> Result<Uuid, InvalidImageId> {
    Uuid::parse_str(raw.trim()).map_err(|_| InvalidImageId(raw.to_string()))
}

/// Orientation filter from a query string; unknown values mean no filter
pub fn parse_orientation_filter(raw: Option<&str>) -> Option<Orientation> {
    raw.and_then(|value| value.trim().parse().ok())
}

/// Tags as either a JSON array or a comma separated string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    List(Vec<String>),
    Csv(String),
}

impl TagsInput {
    /// Trimmed, de-duplicated, blanks dropped, first occurrence order kept
    pub fn normalize(&self) -> Vec<String> {
        match self {
            TagsInput::List(tags) => split_tags(&tags.join(",")),
            TagsInput::Csv(raw) => split_tags(raw),
        }
    }
}

pub fn validate_tags(tags: &[String]) -> Result<(), TagValidationError> {
    if tags.len() > MAX_TAGS {
        return Err(TagValidationError::TooMany);
    }
    for tag in tags {
        validate_tag_name(tag)?;
    }
    Ok(())
}

pub fn validate_tag_name(tag: &str) -> Result<(), TagValidationError> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(TagValidationError::Required);
    }
    if tag.chars().count() > MAX_TAG_LENGTH {
        return Err(TagValidationError::TooLong(tag.to_string()));
    }
    Ok(())
}
