//! Tags feature

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::tags_routes;
