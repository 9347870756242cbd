//! imghost Common Library
//!
//! Shared types, utilities, and error handling for the imghost workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`ImghostError`] and the [`Result`] alias
//! - **Logging**: centralized `tracing` setup used by every binary
//! - **Media**: the image extension allowlist and MIME table
//! - **Types**: wire types shared by the server and the ingest client
//!
//! # Example
//!
//! ```no_run
//! use imghost_common::media;
//!
//! assert!(media::is_image_file("holiday/IMG_0001.JPG"));
//! assert_eq!(media::mime_type_for("logo.png"), "image/png");
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod error;
pub mod logging;
pub mod media;
pub mod types;

// Re-export commonly used types
pub use error::{ImghostError, Result};
