//! Shared fixtures for ingest integration tests

#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{Cursor, Write};
use std::path::PathBuf;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Build a ZIP from `(path, contents)` pairs
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for (path, contents) in entries {
        if path.ends_with('/') {
            writer.add_directory(*path, options).unwrap();
        } else {
            writer.start_file(*path, options).unwrap();
            writer.write_all(contents).unwrap();
        }
    }

    writer.finish().unwrap().into_inner()
}

/// Write a ZIP of text entries into a fresh temp dir; keep the dir alive for the test's duration
pub fn write_zip(entries: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let entries: Vec<(&str, &[u8])> = entries
        .iter()
        .map(|(path, contents)| (*path, contents.as_bytes()))
        .collect();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("photos.zip");
    std::fs::write(&path, build_zip(&entries)).unwrap();
    (dir, path)
}

/// Body the server sends back for a stored image
pub fn uploaded_response(tags: &[&str]) -> Value {
    let id = uuid::Uuid::new_v4();
    json!({
        "success": true,
        "data": {
            "id": id,
            "paths": {
                "original": format!("original/{}.png", id),
                "webp": format!("webp/{}.webp", id)
            },
            "tags": tags
        }
    })
}

pub fn error_response(code: &str, message: &str) -> Value {
    json!({
        "success": false,
        "error": {
            "code": code,
            "message": message
        }
    })
}
