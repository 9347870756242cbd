pub mod response;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tracing::info;

use crate::cache::{CacheBackend, CacheService, InMemoryCache, PgCache};
use crate::config::{BackendKind, Config, StorageBackendKind};
use crate::db::{self, InMemoryMetadataStore, MetadataStore, PgMetadataStore};
use crate::encoder::ImageCrateEncoder;
use crate::features::{self, FeatureState};
use crate::middleware;
use crate::queue::{InMemoryQueue, PgQueue, QueueBackend};
use crate::storage::{config::StorageConfig, BlobStore, InMemoryBlobStore, S3Storage};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub features: FeatureState,
    /// Present when any backend lives in Postgres
    pub db: Option<PgPool>,
}

impl AppState {
    /// Connect and assemble every backend `config` selects
    ///
    /// Migrations run only when a database pool is needed.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let db = if config.backends.needs_database() {
            let pool = db::create_pool(&config.database).await?;
            info!("Database connection pool established");

            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
            info!("Database migrations completed");

            Some(pool)
        } else {
            None
        };

        let pool = || {
            db.clone()
                .ok_or_else(|| anyhow::anyhow!("A Postgres backend was selected without a pool"))
        };

        let metadata: Arc<dyn MetadataStore> = match config.backends.metadata {
            BackendKind::Postgres => Arc::new(PgMetadataStore::new(pool()?)),
            BackendKind::Memory => Arc::new(InMemoryMetadataStore::new()),
        };

        let cache: Arc<dyn CacheBackend> = match config.backends.cache {
            BackendKind::Postgres => Arc::new(PgCache::new(pool()?)),
            BackendKind::Memory => Arc::new(InMemoryCache::new()),
        };

        let queue: Arc<dyn QueueBackend> = match config.backends.queue {
            BackendKind::Postgres => Arc::new(PgQueue::new(pool()?, config.queue.clone())),
            BackendKind::Memory => Arc::new(InMemoryQueue::new(config.queue.clone())),
        };

        let blobs: Arc<dyn BlobStore> = match config.backends.storage {
            StorageBackendKind::S3 => {
                let storage = S3Storage::new(StorageConfig::from_env()?);
                info!(bucket = %storage.bucket(), "Storage client initialized");
                Arc::new(storage)
            },
            StorageBackendKind::Memory => Arc::new(InMemoryBlobStore::new()),
        };

        info!(
            metadata = ?config.backends.metadata,
            cache = ?config.backends.cache,
            queue = ?config.backends.queue,
            storage = ?config.backends.storage,
            "Backends selected"
        );

        Ok(Self {
            features: FeatureState {
                metadata,
                blobs,
                cache: CacheService::new(cache),
                queue,
                encoder: Arc::new(ImageCrateEncoder::new()),
                upload: config.upload.clone(),
                public_base_url: Arc::from(config.public_base_url.as_str()),
            },
            db,
        })
    }
}

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState, config: &Config) -> Router {
    let feature_routes = features::router(state.features.clone());

    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1", feature_routes)
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Health check: database connectivity (when used) and deletion queue depth
async fn health_check(State(state): State<AppState>) -> Response {
    let database = match &state.db {
        Some(pool) => match sqlx::query("SELECT 1").fetch_one(pool).await {
            Ok(_) => "connected",
            Err(e) => {
                tracing::error!("Database health check failed: {:?}", e);
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "status": "unhealthy", "database": "unreachable" })),
                )
                    .into_response();
            },
        },
        None => "not configured",
    };

    let queue = match state.features.queue.stats().await {
        Ok(stats) => json!(stats),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read deletion queue stats");
            json!(null)
        },
    };

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "database": database,
            "deletionQueue": queue,
        })),
    )
        .into_response()
}
