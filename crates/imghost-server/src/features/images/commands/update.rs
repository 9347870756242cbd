//! Update image command
//!
//! Partially updates tags and expiry. `expiryMinutes > 0` sets the expiry to
//! now plus that many minutes, `0` clears it.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{ExpiryChange, ImageUpdate, StoreError};
use crate::error::AppError;
use crate::features::images::types::ImageView;
use crate::features::shared::validation::{validate_tags, TagValidationError};
use crate::features::shared::{parse_image_id, TagsInput};
use crate::features::FeatureState;

/// JSON body of `PUT /images/:id`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateImageBody {
    #[serde(default)]
    pub tags: Option<TagsInput>,
    #[serde(default)]
    pub expiry_minutes: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct UpdateImageCommand {
    pub id: String,
    pub tags: Option<TagsInput>,
    pub expiry_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateImageResponse {
    pub image: ImageView,
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateImageError {
    #[error("Invalid image id: '{0}'")]
    InvalidId(String),

    #[error("At least one of tags or expiryMinutes must be provided")]
    NoFieldsToUpdate,

    #[error("expiryMinutes cannot be negative")]
    NegativeExpiry,

    #[error(transparent)]
    InvalidTags(#[from] TagValidationError),

    #[error("Image {0} not found")]
    NotFound(Uuid),

    #[error("Failed to update image: {0}")]
    Store(#[from] StoreError),
}

impl From<UpdateImageError> for AppError {
    fn from(err: UpdateImageError) -> Self {
        match err {
            UpdateImageError::InvalidId(_) => AppError::InvalidIdentifier(err.to_string()),
            UpdateImageError::NoFieldsToUpdate
            | UpdateImageError::NegativeExpiry
            | UpdateImageError::InvalidTags(_) => AppError::Validation(err.to_string()),
            UpdateImageError::NotFound(_) => AppError::NotFound(err.to_string()),
            UpdateImageError::Store(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl UpdateImageCommand {
    pub fn new(id: String, body: UpdateImageBody) -> Self {
        Self {
            id,
            tags: body.tags,
            expiry_minutes: body.expiry_minutes,
        }
    }

    /// Validates the command and resolves it into a store update
    pub fn validate(&self) -> Result<(Uuid, ImageUpdate), UpdateImageError> {
        let id = parse_image_id(&self.id).map_err(|e| UpdateImageError::InvalidId(e.0))?;

        if self.tags.is_none() && self.expiry_minutes.is_none() {
            return Err(UpdateImageError::NoFieldsToUpdate);
        }

        let tags = self.tags.as_ref().map(TagsInput::normalize);
        if let Some(tags) = &tags {
            validate_tags(tags)?;
        }

        let expiry = match self.expiry_minutes {
            None => None,
            Some(minutes) if minutes < 0 => return Err(UpdateImageError::NegativeExpiry),
            Some(0) => Some(ExpiryChange::Clear),
            Some(minutes) => Some(ExpiryChange::Set(Utc::now() + Duration::minutes(minutes))),
        };

        Ok((id, ImageUpdate { tags, expiry }))
    }
}

/// Applies the update, then invalidates listing and detail keys (and the tag list when
/// tags changed) before returning.
#[tracing::instrument(skip(state), fields(image_id = %command.id))]
pub async fn handle(
    state: &FeatureState,
    command: UpdateImageCommand,
) -> Result<UpdateImageResponse, UpdateImageError> {
    let (id, update) = command.validate()?;
    let tags_changed = update.tags.is_some();

    let record = state
        .metadata
        .update_image(id, &update)
        .await?
        .ok_or(UpdateImageError::NotFound(id))?;

    if tags_changed {
        tokio::join!(
            state.cache.invalidate_after_image_change(Some(id)),
            state.cache.invalidate_tags_list()
        );
    } else {
        state.cache.invalidate_after_image_change(Some(id)).await;
    }

    tracing::info!(image_id = %id, tags_changed, "Image updated");

    Ok(UpdateImageResponse {
        image: ImageView::from_record(record, state),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(tags: Option<TagsInput>, expiry_minutes: Option<i64>) -> UpdateImageCommand {
        UpdateImageCommand {
            id: Uuid::new_v4().to_string(),
            tags,
            expiry_minutes,
        }
    }

    #[test]
    fn test_validate_rejects_bad_id() {
        let mut cmd = command(None, Some(5));
        cmd.id = "nope".into();
        assert!(matches!(cmd.validate(), Err(UpdateImageError::InvalidId(_))));
    }

    #[test]
    fn test_validate_requires_a_field() {
        assert!(matches!(
            command(None, None).validate(),
            Err(UpdateImageError::NoFieldsToUpdate)
        ));
    }

    #[test]
    fn test_expiry_semantics() {
        let (_, update) = command(None, Some(0)).validate().unwrap();
        assert_eq!(update.expiry, Some(ExpiryChange::Clear));

        let before = Utc::now();
        let (_, update) = command(None, Some(30)).validate().unwrap();
        match update.expiry {
            Some(ExpiryChange::Set(at)) => {
                assert!(at >= before + Duration::minutes(30));
                assert!(at <= Utc::now() + Duration::minutes(30));
            },
            other => panic!("expected Set, got {:?}", other),
        }

        assert!(matches!(
            command(None, Some(-1)).validate(),
            Err(UpdateImageError::NegativeExpiry)
        ));
    }

    #[test]
    fn test_tags_are_normalized() {
        let (_, update) = command(Some(TagsInput::Csv("a, b, a".into())), None)
            .validate()
            .unwrap();
        assert_eq!(update.tags, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(update.expiry, None);
    }
}
