pub mod get;

pub use get::PublicConfig;
