// Public API for integration tests and potential library usage

pub mod client;
pub mod config;
pub mod error;
pub mod exam;
pub mod host;
pub mod records;
pub mod scoring;
pub mod store;
pub mod types;
