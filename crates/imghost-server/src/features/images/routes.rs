//! Image API routes
//!
//! - `GET /api/v1/images` - List images (`page`, `limit`, `tag`, `orientation`)
//! - `GET /api/v1/images/:id` - Get one image
//! - `PUT /api/v1/images/:id` - Update tags and expiry
//! - `DELETE /api/v1/images/:id` - Delete an image; blobs are removed asynchronously
//! - `POST /api/v1/upload` - Upload a single image (multipart)

use axum::{
    extract::{multipart::Field, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use imghost_common::types::{OutputFormat, UploadOptions};
use serde_json::json;

use crate::api::response::ApiResponse;
use crate::config::UploadConfig;
use crate::error::{ApiResult, AppError};
use crate::features::shared::TagsInput;
use crate::features::FeatureState;

use super::{
    commands::{DeleteImageCommand, UpdateImageBody, UpdateImageCommand, UploadImageCommand},
    queries::{GetImageQuery, ListImagesParams, ListImagesQuery},
};

/// Headroom for multipart framing and the non-file fields
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn images_routes() -> Router<FeatureState> {
    Router::new()
        .route("/", get(list_images))
        .route("/:id", get(get_image).put(update_image).delete(delete_image))
}

pub fn upload_routes(config: &UploadConfig) -> Router<FeatureState> {
    let limit = usize::try_from(config.max_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/upload", post(upload_image))
        .layer(DefaultBodyLimit::max(limit))
}

// ============================================================================
// Query Handlers (Read Operations)
// ============================================================================

#[tracing::instrument(skip(state))]
async fn list_images(
    State(state): State<FeatureState>,
    Query(params): Query<ListImagesParams>,
) -> ApiResult<Response> {
    let page = super::queries::list::handle(&state, ListImagesQuery::from(params)).await?;

    Ok(ApiResponse::success_with_meta(page.images, json!({ "pagination": page.pagination }))
        .into_response())
}

#[tracing::instrument(skip(state))]
async fn get_image(State(state): State<FeatureState>, Path(id): Path<String>) -> ApiResult<Response> {
    let image = super::queries::get::handle(&state, GetImageQuery { id }).await?;
    Ok(ApiResponse::success(json!({ "image": image })).into_response())
}

// ============================================================================
// Command Handlers (Write Operations)
// ============================================================================

#[tracing::instrument(skip(state, body))]
async fn update_image(
    State(state): State<FeatureState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateImageBody>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(body) = body.map_err(json_error)?;
    let response =
        super::commands::update::handle(&state, UpdateImageCommand::new(id, body)).await?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state))]
async fn delete_image(State(state): State<FeatureState>, Path(id): Path<String>) -> ApiResult<Response> {
    let response = super::commands::delete::handle(&state, DeleteImageCommand { id }).await?;
    Ok(ApiResponse::success(response).into_response())
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::Validation(format!("Invalid multipart body: {}", e.body_text()))
    }
}

fn json_error(e: JsonRejection) -> AppError {
    AppError::Validation(format!("Invalid JSON body: {}", e.body_text()))
}

async fn text_field(field: Field<'_>) -> ApiResult<String> {
    field.text().await.map_err(multipart_error)
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> ApiResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("Invalid value for {}: '{}'", name, value)))
}

fn parse_bool(name: &str, value: &str) -> ApiResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(AppError::Validation(format!("Invalid value for {}: '{}'", name, value))),
    }
}

/// Multipart fields: `file`, `tags`, `expiryMinutes`, `quality`, `maxWidth`,
/// `preserveAnimation`, `format`
#[tracing::instrument(skip(state, multipart))]
async fn upload_image(State(state): State<FeatureState>, mut multipart: Multipart) -> ApiResult<Response> {
    let mut file: Option<(String, Option<String>, Bytes)> = None;
    let mut options = UploadOptions::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(multipart_error)?;
                file = Some((filename, content_type, data));
            },
            "tags" => options.tags = TagsInput::Csv(text_field(field).await?).normalize(),
            "expiryMinutes" => {
                options.expiry_minutes = parse_field("expiryMinutes", &text_field(field).await?)?
            },
            "quality" => options.quality = parse_field("quality", &text_field(field).await?)?,
            "maxWidth" => options.max_width = parse_field("maxWidth", &text_field(field).await?)?,
            "preserveAnimation" => {
                options.preserve_animation = parse_bool("preserveAnimation", &text_field(field).await?)?
            },
            "format" => {
                options.output_format =
                    parse_field::<OutputFormat>("format", &text_field(field).await?)?
            },
            other => tracing::debug!(field = %other, "Ignoring unknown multipart field"),
        }
    }

    let (filename, content_type, data) =
        file.ok_or_else(|| AppError::Validation("Missing 'file' field".to_string()))?;

    let uploaded = super::commands::upload::handle(
        &state,
        UploadImageCommand {
            filename,
            content_type,
            data,
            options,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(uploaded))).into_response())
}
