pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod sources;
pub mod store;
pub mod utils;
