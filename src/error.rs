use miette::{Diagnostic, Result};
use thiserror::Error;

/// Main error type for the application
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Environment error: {0}")]
    #[diagnostic(code(daysched::environment))]
    Environment(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(daysched::config))]
    Config(String),

    #[error("Calendar source error: {0}")]
    #[diagnostic(code(daysched::source))]
    Source(String),

    #[error("Store error: {0}")]
    #[diagnostic(code(daysched::store))]
    Store(String),

    #[error("Enrichment error: {0}")]
    #[diagnostic(code(daysched::enrichment))]
    Enrichment(String),

    #[error(transparent)]
    #[diagnostic(code(daysched::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(daysched::serialization))]
    Serialization(String),

    #[error("Other error: {0}")]
    #[diagnostic(code(daysched::other))]
    Other(String),
}

// Implement From for JSON serialization errors
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

// Implement From for TOML deserialization errors
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Type alias for Result with our Error type
pub type AppResult<T> = Result<T, Error>;

/// Helper to create environment errors
pub fn env_error(var: &str) -> Error {
    Error::Environment(format!("Missing environment variable: {}", var))
}

/// Helper to create configuration errors
pub fn config_error(message: &str) -> Error {
    Error::Config(message.to_string())
}

/// Helper to create calendar source errors
pub fn source_error(message: &str) -> Error {
    Error::Source(message.to_string())
}

/// Helper to create store errors
pub fn store_error(message: &str) -> Error {
    Error::Store(message.to_string())
}

/// Helper to create enrichment errors
pub fn enrichment_error(message: &str) -> Error {
    Error::Enrichment(message.to_string())
}
