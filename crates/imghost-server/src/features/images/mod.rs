//! Images feature
//!
//! Reads go through the read-through cache; writes invalidate it before responding.
//! Deletes defer blob removal to the deletion queue.

pub mod commands;
pub mod queries;
pub mod routes;
pub mod types;

pub use routes::{images_routes, upload_routes};
pub use types::{ImageListPage, ImageUrls, ImageView};
