pub mod delete;
pub mod update;
pub mod upload;

pub use delete::{DeleteImageCommand, DeleteImageError, DeleteImageResponse};
pub use update::{UpdateImageBody, UpdateImageCommand, UpdateImageError, UpdateImageResponse};
pub use upload::{UploadImageCommand, UploadImageError};
