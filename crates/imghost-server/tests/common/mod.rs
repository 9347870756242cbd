//! Shared helpers for API tests
//!
//! Builds the full router on in-memory backends and keeps concrete handles so
//! tests can seed records and inspect the queue and blob store directly.

#![allow(dead_code, clippy::unwrap_used)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use chrono::{Duration, Utc};
use imghost_common::types::{ImagePaths, Orientation};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use imghost_server::{
    api::{self, AppState},
    cache::{CacheService, InMemoryCache},
    config::{BackendConfig, BackendKind, Config, QueueConfig, StorageBackendKind},
    db::{ImageRecord, InMemoryMetadataStore, MetadataStore},
    encoder::ImageCrateEncoder,
    features::FeatureState,
    queue::{DeletionConsumer, InMemoryQueue},
    storage::{BlobStore, InMemoryBlobStore},
};

pub const BASE_URL: &str = "http://img.test/files";

pub struct TestApp {
    pub router: Router,
    pub metadata: Arc<InMemoryMetadataStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub queue: Arc<InMemoryQueue>,
    pub cache: Arc<InMemoryCache>,
}

pub fn memory_config() -> Config {
    Config {
        backends: BackendConfig {
            metadata: BackendKind::Memory,
            storage: StorageBackendKind::Memory,
            cache: BackendKind::Memory,
            queue: BackendKind::Memory,
        },
        public_base_url: BASE_URL.to_string(),
        ..Config::default()
    }
}

impl TestApp {
    pub fn new() -> Self {
        let config = memory_config();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let queue = Arc::new(InMemoryQueue::new(QueueConfig::default()));
        let cache = Arc::new(InMemoryCache::new());

        let state = AppState {
            features: FeatureState {
                metadata: metadata.clone(),
                blobs: blobs.clone(),
                cache: CacheService::new(cache.clone()),
                queue: queue.clone(),
                encoder: Arc::new(ImageCrateEncoder::new()),
                upload: config.upload.clone(),
                public_base_url: Arc::from(BASE_URL),
            },
            db: None,
        };

        Self {
            router: api::create_router(state, &config),
            metadata,
            blobs,
            queue,
            cache,
        }
    }

    /// Insert a record and its original blob without going through the API
    pub async fn seed(&self, name: &str, tags: &[&str], width: u32, height: u32) -> ImageRecord {
        let id = Uuid::new_v4();
        let original = format!("original/{}.png", id);
        self.blobs
            .put(&original, Bytes::from_static(b"png-bytes"), "image/png")
            .await
            .unwrap();

        let record = ImageRecord {
            id,
            original_name: name.to_string(),
            paths: ImagePaths::original_only(original),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            orientation: Orientation::from_dimensions(width, height),
            width,
            height,
            format: "png".to_string(),
            size_bytes: 9,
            expiry_time: None,
            created_at: Utc::now() - Duration::seconds(60),
        };
        self.metadata.create_image(&record).await.unwrap()
    }

    /// Consumer wired to this app's queue and blob store
    pub fn consumer(&self) -> DeletionConsumer {
        DeletionConsumer::new(self.queue.clone(), self.blobs.clone(), &QueueConfig::default())
    }

    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn put_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method(Method::PUT)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

pub const BOUNDARY: &str = "imghost-test-boundary";

/// One part of a multipart body
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        filename: &'a str,
        content_type: &'a str,
        data: &'a [u8],
    },
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            },
            Part::File {
                name,
                filename,
                content_type,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        name, filename, content_type
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            },
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

/// A small solid-colour PNG
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}
