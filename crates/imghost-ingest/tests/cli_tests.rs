//! End-to-end tests for the imghost-ingest binary

mod common;

use assert_cmd::Command;
use common::{uploaded_response, write_zip};
use predicates::prelude::*;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn ingest() -> Command {
    let mut cmd = Command::cargo_bin("imghost-ingest").unwrap();
    cmd.env_remove("IMGHOST_SERVER_URL").env("LOG_LEVEL", "error");
    cmd
}

// ============================================================================
// Analyze
// ============================================================================

#[test]
fn test_analyze_prints_preview() {
    let (_dir, zip) = write_zip(&[
        ("a.png", "aaaa"),
        ("b.JPG", "bbbb"),
        ("readme.md", "docs"),
    ]);

    ingest()
        .arg("analyze")
        .arg(&zip)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 images, 8 B total"))
        .stdout(predicate::str::contains("Skipped: 1 not images, 0 too large"));
}

#[test]
fn test_analyze_lists_skipped_entries() {
    let (_dir, zip) = write_zip(&[("a.png", "aaaa"), ("notes.txt", "text")]);

    ingest()
        .args(["analyze", "--show-skipped"])
        .arg(&zip)
        .assert()
        .success()
        .stdout(predicate::str::contains("notes.txt"));
}

#[test]
fn test_analyze_missing_archive_fails() {
    ingest()
        .args(["analyze", "/definitely/not/here.zip"])
        .assert()
        .failure();
}

// ============================================================================
// Upload
// ============================================================================

#[tokio::test]
async fn test_upload_reports_counts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/upload"))
        .respond_with(ResponseTemplate::new(201).set_body_json(uploaded_response(&["trip"])))
        .expect(3)
        .mount(&server)
        .await;

    let (_dir, zip) = write_zip(&[
        ("one.png", "1"),
        ("two.gif", "2"),
        ("three.webp", "3"),
    ]);

    ingest()
        .arg("upload")
        .arg(&zip)
        .args(["--server", &server.uri(), "--tags", "trip", "--batch-size", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "3 uploaded, 0 failed, 0 could not be extracted (of 3)",
        ));
}

#[tokio::test]
async fn test_upload_empty_archive_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let (_dir, zip) = write_zip(&[("notes.txt", "text")]);

    ingest()
        .arg("upload")
        .arg(&zip)
        .args(["--server", &server.uri()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to upload"));
}

#[test]
fn test_upload_rejects_invalid_quality() {
    let (_dir, zip) = write_zip(&[("one.png", "1")]);

    ingest()
        .arg("upload")
        .arg(&zip)
        .args(["--server", "http://127.0.0.1:9", "--quality", "0"])
        .assert()
        .failure();
}

#[test]
fn test_upload_rejects_unknown_format() {
    let (_dir, zip) = write_zip(&[("one.png", "1")]);

    ingest()
        .arg("upload")
        .arg(&zip)
        .args(["--format", "tiff"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("tiff"));
}
