//! API tests over the full router on in-memory backends
//!
//! These tests verify:
//! - Listing is served from cache until a write invalidates it
//! - Deletes publish exactly one deletion message and the consumer removes the blobs
//! - Error bodies carry the documented codes
//! - Uploads store the original and a WebP variant

#![allow(clippy::unwrap_used)]

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;

use common::{memory_config, multipart_request, png_bytes, Part, TestApp, BASE_URL};
use imghost_server::api::{self, AppState};
use imghost_server::db::{ImageUpdate, MetadataStore};
use imghost_server::queue::DeletionMessage;

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_without_database() {
    let app = TestApp::new();

    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "not configured");
    assert_eq!(body["deletionQueue"]["pending"], 0);
}

#[tokio::test]
async fn test_state_from_memory_config_needs_no_database() {
    let config = memory_config();
    let state = AppState::from_config(&config).await.unwrap();
    assert!(state.db.is_none());

    let response = api::create_router(state, &config)
        .oneshot(Request::builder().uri("/api/v1/images").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// Images: queries
// ============================================================================

#[tokio::test]
async fn test_list_images_paginates_newest_first() {
    let app = TestApp::new();
    for name in ["a.png", "b.png", "c.png"] {
        app.seed(name, &[], 10, 10).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let (status, body) = app.get("/api/v1/images?limit=2").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let pagination = &body["meta"]["pagination"];
    assert_eq!(pagination["page"], 1);
    assert_eq!(pagination["limit"], 2);
    assert_eq!(pagination["total"], 3);
    assert_eq!(pagination["totalPages"], 2);
    assert_eq!(pagination["hasNext"], true);
    assert_eq!(pagination["hasPrev"], false);
}

#[tokio::test]
async fn test_list_images_filters_by_tag_and_orientation() {
    let app = TestApp::new();
    app.seed("wide.png", &["cats"], 200, 100).await;
    app.seed("tall.png", &["cats"], 100, 200).await;
    app.seed("dog.png", &["dogs"], 200, 100).await;

    let (_, body) = app.get("/api/v1/images?tag=cats&orientation=landscape").await;

    let images = body["data"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["originalName"], "wide.png");
    assert_eq!(images[0]["orientation"], "landscape");
}

#[tokio::test]
async fn test_list_is_cached_until_update_invalidates() {
    let app = TestApp::new();
    let first = app.seed("first.png", &["cats"], 10, 10).await;

    let (_, body) = app.get("/api/v1/images").await;
    assert_eq!(body["meta"]["pagination"]["total"], 1);

    // Written behind the API's back, so the cached page stays stale
    app.seed("second.png", &[], 10, 10).await;
    let (_, body) = app.get("/api/v1/images").await;
    assert_eq!(body["meta"]["pagination"]["total"], 1);

    let (status, body) = app
        .put_json(&format!("/api/v1/images/{}", first.id), json!({ "tags": ["dogs"] }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["image"]["tags"], json!(["dogs"]));

    let (_, body) = app.get("/api/v1/images").await;
    assert_eq!(body["meta"]["pagination"]["total"], 2);

    let (_, body) = app.get("/api/v1/tags").await;
    assert_eq!(body["data"]["tags"], json!([{ "name": "dogs", "count": 1 }]));
}

#[tokio::test]
async fn test_update_invalidates_only_the_updated_detail() {
    let app = TestApp::new();
    let a = app.seed("a.png", &["cats"], 10, 10).await;
    let b = app.seed("b.png", &["cats"], 10, 10).await;

    app.get(&format!("/api/v1/images/{}", a.id)).await;
    app.get(&format!("/api/v1/images/{}", b.id)).await;
    let (_, body) = app.get("/api/v1/tags").await;
    assert_eq!(body["data"]["tags"], json!([{ "name": "cats", "count": 2 }]));

    // B changes behind the API's back; its cached detail must survive A's update
    app.metadata
        .update_image(
            b.id,
            &ImageUpdate {
                tags: Some(vec!["birds".to_string()]),
                expiry: None,
            },
        )
        .await
        .unwrap();

    let (status, _) = app
        .put_json(&format!("/api/v1/images/{}", a.id), json!({ "tags": ["dogs"] }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.get(&format!("/api/v1/images/{}", a.id)).await;
    assert_eq!(body["data"]["image"]["tags"], json!(["dogs"]));

    let (_, body) = app.get("/api/v1/tags").await;
    let tags = body["data"]["tags"].as_array().unwrap();
    assert_eq!(tags.len(), 2);
    assert!(tags.contains(&json!({ "name": "dogs", "count": 1 })));
    assert!(tags.contains(&json!({ "name": "birds", "count": 1 })));

    let (_, body) = app.get(&format!("/api/v1/images/{}", b.id)).await;
    assert_eq!(body["data"]["image"]["tags"], json!(["cats"]));
}

#[tokio::test]
async fn test_update_rejects_malformed_json() {
    let app = TestApp::new();
    let record = app.seed("a.png", &[], 10, 10).await;

    let (status, body) = app
        .request(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/v1/images/{}", record.id))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"tags\": [\"dogs\""))
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(app.metadata.get_image(record.id).await.unwrap().unwrap().tags.is_empty());
}

#[tokio::test]
async fn test_get_image_returns_public_urls() {
    let app = TestApp::new();
    let record = app.seed("photo.png", &["x"], 30, 20).await;

    let (status, body) = app.get(&format!("/api/v1/images/{}", record.id)).await;

    assert_eq!(status, StatusCode::OK);
    let image = &body["data"]["image"];
    assert_eq!(image["id"], record.id.to_string());
    assert_eq!(
        image["urls"]["original"],
        format!("{}/{}", BASE_URL, record.paths.original)
    );
    assert_eq!(image["width"], 30);
}

#[tokio::test]
async fn test_get_image_rejects_malformed_id() {
    let app = TestApp::new();

    let (status, body) = app.get("/api/v1/images/not-a-uuid").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "INVALID_IDENTIFIER");
}

#[tokio::test]
async fn test_get_unknown_image_is_not_found() {
    let app = TestApp::new();

    let (status, body) = app.get(&format!("/api/v1/images/{}", uuid::Uuid::new_v4())).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

// ============================================================================
// Images: commands
// ============================================================================

#[tokio::test]
async fn test_update_with_no_fields_is_rejected() {
    let app = TestApp::new();
    let record = app.seed("a.png", &[], 10, 10).await;

    let (status, body) = app
        .put_json(&format!("/api/v1/images/{}", record.id), json!({}))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_update_sets_and_clears_expiry() {
    let app = TestApp::new();
    let record = app.seed("a.png", &[], 10, 10).await;
    let uri = format!("/api/v1/images/{}", record.id);

    let (_, body) = app.put_json(&uri, json!({ "expiryMinutes": 30 })).await;
    assert!(body["data"]["image"]["expiryTime"].is_string());

    let (_, body) = app.put_json(&uri, json!({ "expiryMinutes": 0 })).await;
    assert!(body["data"]["image"].get("expiryTime").is_none());
}

#[tokio::test]
async fn test_delete_image_enqueues_one_message_then_consumer_removes_blobs() {
    let app = TestApp::new();
    let record = app.seed("a.png", &[], 10, 10).await;
    let uri = format!("/api/v1/images/{}", record.id);

    // Warm the detail cache so the delete has something to invalidate
    let (status, _) = app.get(&uri).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.delete(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], record.id.to_string());

    let outstanding = app.queue.outstanding().await;
    assert_eq!(
        outstanding,
        vec![DeletionMessage::DeleteImage {
            image_id: record.id,
            paths: record.paths.clone(),
        }]
    );

    // Metadata is gone immediately; the blob waits for the consumer
    let (status, _) = app.get(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.blobs.contains(&record.paths.original).await);

    let report = app.consumer().handle_batch().await.unwrap();
    assert_eq!(report.acked, 1);
    assert!(!app.blobs.contains(&record.paths.original).await);
    assert!(app.queue.outstanding().await.is_empty());

    let (status, _) = app.delete(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Upload
// ============================================================================

#[tokio::test]
async fn test_upload_truncated_image_is_rejected() {
    let app = TestApp::new();
    let png = png_bytes(40, 20);
    let truncated = &png[..png.len() / 2];

    let (status, body) = app
        .request(multipart_request(
            "/api/v1/upload",
            &[Part::File {
                name: "file",
                filename: "broken.png",
                content_type: "image/png",
                data: truncated,
            }],
        ))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(app.blobs.len().await, 0);
    assert!(app.queue.outstanding().await.is_empty());
}

#[tokio::test]
async fn test_upload_png_stores_original_and_webp() {
    let app = TestApp::new();
    let png = png_bytes(40, 20);

    let (status, body) = app
        .request(multipart_request(
            "/api/v1/upload",
            &[
                Part::File {
                    name: "file",
                    filename: "banner.png",
                    content_type: "image/png",
                    data: &png,
                },
                Part::Text("tags", "cats, banners ,cats"),
            ],
        ))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let uploaded = &body["data"];
    assert_eq!(uploaded["tags"], json!(["cats", "banners"]));

    let original = uploaded["paths"]["original"].as_str().unwrap();
    let webp = uploaded["paths"]["webp"].as_str().unwrap();
    assert!(original.starts_with("original/") && original.ends_with(".png"));
    assert!(webp.starts_with("webp/") && webp.ends_with(".webp"));
    assert!(app.blobs.contains(original).await);
    assert!(app.blobs.contains(webp).await);

    let id = uploaded["id"].as_str().unwrap();
    let (_, body) = app.get(&format!("/api/v1/images/{}", id)).await;
    let image = &body["data"]["image"];
    assert_eq!(image["originalName"], "banner.png");
    assert_eq!(image["width"], 40);
    assert_eq!(image["height"], 20);
    assert_eq!(image["orientation"], "landscape");
    assert_eq!(image["format"], "png");
}

#[tokio::test]
async fn test_upload_invalidates_cached_listing() {
    let app = TestApp::new();
    let (_, body) = app.get("/api/v1/images").await;
    assert_eq!(body["meta"]["pagination"]["total"], 0);

    let png = png_bytes(8, 8);
    let (status, _) = app
        .request(multipart_request(
            "/api/v1/upload",
            &[Part::File {
                name: "file",
                filename: "a.png",
                content_type: "image/png",
                data: &png,
            }],
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = app.get("/api/v1/images").await;
    assert_eq!(body["meta"]["pagination"]["total"], 1);
}

#[tokio::test]
async fn test_upload_rejects_unsupported_type() {
    let app = TestApp::new();

    let (status, body) = app
        .request(multipart_request(
            "/api/v1/upload",
            &[Part::File {
                name: "file",
                filename: "notes.txt",
                content_type: "text/plain",
                data: b"hello",
            }],
        ))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(app.blobs.len().await, 0);
}

#[tokio::test]
async fn test_upload_requires_file_field() {
    let app = TestApp::new();

    let (status, _) = app
        .request(multipart_request("/api/v1/upload", &[Part::Text("tags", "cats")]))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Tags
// ============================================================================

#[tokio::test]
async fn test_delete_tag_removes_images_with_one_message() {
    let app = TestApp::new();
    let a = app.seed("a.png", &["holiday"], 10, 10).await;
    let b = app.seed("b.png", &["holiday", "beach"], 10, 10).await;
    let keep = app.seed("c.png", &["beach"], 10, 10).await;

    let (status, body) = app.delete("/api/v1/tags/holiday").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({ "tag": "holiday", "deletedImages": 2 }));

    let outstanding = app.queue.outstanding().await;
    assert_eq!(outstanding.len(), 1);
    let mut keys = outstanding[0].keys();
    keys.sort();
    let mut expected = vec![a.paths.original.clone(), b.paths.original.clone()];
    expected.sort();
    assert_eq!(keys, expected);

    assert!(app.metadata.get_image(keep.id).await.unwrap().is_some());
    let (_, body) = app.get("/api/v1/tags").await;
    assert_eq!(body["data"]["tags"], json!([{ "name": "beach", "count": 1 }]));
}

#[tokio::test]
async fn test_delete_tag_invalidates_cached_details() {
    let app = TestApp::new();
    let a = app.seed("a.png", &["holiday"], 10, 10).await;
    let b = app.seed("b.png", &["holiday", "beach"], 10, 10).await;
    let keep = app.seed("c.png", &["beach"], 10, 10).await;

    for record in [&a, &b, &keep] {
        let (status, _) = app.get(&format!("/api/v1/images/{}", record.id)).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, body) = app.get("/api/v1/tags").await;
    assert_eq!(body["data"]["tags"].as_array().unwrap().len(), 2);

    let (status, _) = app.delete("/api/v1/tags/holiday").await;
    assert_eq!(status, StatusCode::OK);

    for record in [&a, &b] {
        let (status, body) = app.get(&format!("/api/v1/images/{}", record.id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
    let (status, _) = app.get(&format!("/api/v1/images/{}", keep.id)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.get("/api/v1/tags").await;
    assert_eq!(body["data"]["tags"], json!([{ "name": "beach", "count": 1 }]));
}

#[tokio::test]
async fn test_delete_unknown_tag_is_not_found() {
    let app = TestApp::new();

    let (status, _) = app.delete("/api/v1/tags/nothing").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.queue.outstanding().await.is_empty());
}

// ============================================================================
// Config and files
// ============================================================================

#[tokio::test]
async fn test_public_config() {
    let app = TestApp::new();

    let (status, body) = app.get("/api/v1/config").await;

    assert_eq!(status, StatusCode::OK);
    let config = &body["data"];
    assert_eq!(config["defaultPageSize"], 12);
    assert_eq!(config["maxPageSize"], 100);
    assert!(config["allowedExtensions"]
        .as_array()
        .unwrap()
        .contains(&json!("png")));
}

#[tokio::test]
async fn test_files_serves_blob_with_cache_headers() {
    let app = TestApp::new();
    let record = app.seed("a.png", &[], 10, 10).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/files/{}", record.paths.original))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert!(response.headers()[header::CACHE_CONTROL]
        .to_str()
        .unwrap()
        .contains("immutable"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"png-bytes");
}

#[tokio::test]
async fn test_files_missing_blob_is_not_found() {
    let app = TestApp::new();

    let (status, _) = app.get("/api/v1/files/original/missing.png").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
