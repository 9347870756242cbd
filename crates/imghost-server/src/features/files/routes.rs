//! - `GET /api/v1/files/*key` - Stream a stored blob

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::error::ApiResult;
use crate::features::FeatureState;

use super::queries::DownloadFileQuery;

const IMMUTABLE: &str = "public, max-age=31536000, immutable";

pub fn files_routes() -> Router<FeatureState> {
    Router::new().route("/*key", get(download_file))
}

#[tracing::instrument(skip(state))]
async fn download_file(State(state): State<FeatureState>, Path(key): Path<String>) -> ApiResult<Response> {
    let file = super::queries::download::handle(&state, DownloadFileQuery { key }).await?;

    Ok((
        [
            (header::CONTENT_TYPE, file.content_type),
            (header::CACHE_CONTROL, IMMUTABLE.to_string()),
        ],
        file.data,
    )
        .into_response())
}
