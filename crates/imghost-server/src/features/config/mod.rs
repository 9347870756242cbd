//! Public configuration feature

pub mod queries;
pub mod routes;

pub use routes::config_routes;
