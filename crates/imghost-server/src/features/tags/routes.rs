//! Tag API routes
//!
//! - `GET /api/v1/tags` - Tags in use with image counts
//! - `DELETE /api/v1/tags/:name` - Delete a tag and every image carrying it

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Router,
};

use crate::api::response::ApiResponse;
use crate::error::ApiResult;
use crate::features::FeatureState;

use super::commands::DeleteTagCommand;

pub fn tags_routes() -> Router<FeatureState> {
    Router::new()
        .route("/", get(list_tags))
        .route("/:name", delete(delete_tag))
}

#[tracing::instrument(skip(state))]
async fn list_tags(State(state): State<FeatureState>) -> ApiResult<Response> {
    let response = super::queries::list::handle(&state).await?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state))]
async fn delete_tag(State(state): State<FeatureState>, Path(name): Path<String>) -> ApiResult<Response> {
    let response = super::commands::delete::handle(&state, DeleteTagCommand { name }).await?;
    Ok(ApiResponse::success(response).into_response())
}
