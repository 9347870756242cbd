//! imghost server library
//!
//! HTTP service for uploading, browsing and deleting images.
//!
//! # Architecture
//!
//! Features follow a command/query split:
//!
//! - **Queries** (`GET`) read through a TTL cache keyed by query shape
//! - **Commands** (`POST`, `PUT`, `DELETE`) write metadata, then invalidate the
//!   cache keys they affect before responding
//!
//! Blob removal never happens inline. Deletes publish a [`queue::DeletionMessage`]
//! and the [`queue::DeletionConsumer`] removes the blobs in the background, retrying
//! with backoff and dead-lettering messages that keep failing.
//!
//! Every collaborator sits behind a trait with a Postgres (or S3) implementation and
//! an in-memory one, selected per backend in [`config::BackendConfig`].
//!
//! # Example
//!
//! ```no_run
//! use imghost_server::{api, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let state = api::AppState::from_config(&config).await?;
//!     let app = api::create_router(state, &config);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod encoder;
pub mod error;
pub mod features;
pub mod middleware;
pub mod queue;
pub mod storage;

pub use error::{ApiResult, AppError};
