//! Blob serving
//!
//! Keys are immutable (`original/{id}.{ext}`, `webp/{id}.webp`, `avif/{id}.avif`), so
//! responses are cacheable forever.

pub mod queries;
pub mod routes;

pub use routes::files_routes;
