pub mod get;
pub mod list;

pub use get::{GetImageError, GetImageQuery};
pub use list::{ListImagesError, ListImagesParams, ListImagesQuery};
