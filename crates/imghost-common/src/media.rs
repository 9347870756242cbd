//! Image type detection by file name
//!
//! The archive analyzer, the batch extractor and the upload endpoint all agree on
//! the same extension allowlist, so it lives here.

/// Extensions accepted as images (lowercase, without the dot)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif"];

/// MIME type used when the extension is not in the table
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Largest single image accepted by the service (70 MiB)
pub const MAX_IMAGE_BYTES: u64 = 70 * 1024 * 1024;

const MIME_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
];

/// Final path component of a `/`-separated archive path
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Lowercased extension of the file name, if it has one
pub fn extension(filename: &str) -> Option<String> {
    let name = basename(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() && ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Whether the name carries one of the allowed image extensions
pub fn is_image_file(filename: &str) -> bool {
    extension(filename)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// MIME type inferred from the extension
pub fn mime_type_for(filename: &str) -> &'static str {
    extension(filename)
        .and_then(|ext| {
            MIME_TYPES
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, mime)| *mime)
        })
        .unwrap_or(FALLBACK_MIME_TYPE)
}

/// Canonical extension for an allowed MIME type
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/avif" => Some("avif"),
        _ => None,
    }
}

/// Whether the MIME type is one the service stores
pub fn is_allowed_mime(mime: &str) -> bool {
    extension_for_mime(mime).is_some()
}

/// Normalize a declared `Content-Type` to a stored image type, ignoring parameters and case
pub fn canonical_mime_type(declared: &str) -> Option<&'static str> {
    let essence = declared.split(';').next().unwrap_or(declared).trim();
    MIME_TYPES
        .iter()
        .map(|(_, mime)| *mime)
        .find(|mime| mime.eq_ignore_ascii_case(essence))
}
