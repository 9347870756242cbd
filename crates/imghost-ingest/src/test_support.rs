//! In-memory ZIP fixtures

#![allow(clippy::unwrap_used)]

use bytes::Bytes;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Build a ZIP from `(path, contents)` pairs; paths ending in `/` become directories
pub fn build_zip(entries: &[(&str, &[u8])]) -> Bytes {
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

    Bytes::from(writer.finish().unwrap().into_inner())
}

/// Flip one byte of a stored entry's contents so reading it fails the CRC check
pub fn corrupt(zip: Bytes, marker: &[u8]) -> Bytes {
    let mut data = zip.to_vec();
    let offset = data
        .windows(marker.len())
        .position(|window| window == marker)
        .unwrap();
    data[offset] ^= 0xff;
    Bytes::from(data)
}

/// `count` tiny image entries named `photos/img-NNN.png`
pub fn image_entries(count: usize) -> Vec<(String, Vec<u8>)> {
    (0..count)
        .map(|i| {
            (
                format!("photos/img-{:03}.png", i),
                format!("png-data-{:03}", i).into_bytes(),
            )
        })
        .collect()
}

pub fn as_refs(entries: &[(String, Vec<u8>)]) -> Vec<(&str, &[u8])> {
    entries
        .iter()
        .map(|(path, data)| (path.as_str(), data.as_slice()))
        .collect()
}
