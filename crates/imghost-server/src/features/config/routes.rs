//! - `GET /api/v1/config` - Upload limits and defaults

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::api::response::ApiResponse;
use crate::features::FeatureState;

pub fn config_routes() -> Router<FeatureState> {
    Router::new().route("/", get(get_config))
}

async fn get_config(State(state): State<FeatureState>) -> Response {
    let config = super::queries::get::handle(&state).await;
    ApiResponse::success(config).into_response()
}
