//! Shared utilities and types for feature modules
//!
//! - **pagination**: page/limit parsing and response metadata
//! - **validation**: identifier, tag and filter parsing

pub mod pagination;
pub mod validation;

pub use pagination::{PaginationMetadata, PaginationParams};
pub use validation::{parse_image_id, parse_orientation_filter, TagsInput};
