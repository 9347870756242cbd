pub mod delete;

pub use delete::{DeleteTagCommand, DeleteTagError, DeleteTagResponse};
