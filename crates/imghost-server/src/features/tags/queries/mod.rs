pub mod list;

pub use list::{ListTagsError, ListTagsResponse};
