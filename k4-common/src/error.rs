//! Common error types for the K4 engine

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for K4 operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the K4 crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Static resource (n-gram table, wordlist) missing or malformed
    #[error("Resource error in {path}: {details}")]
    Resource { path: PathBuf, details: String },

    /// Serialization or parse failure of a structured record
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a resource error for `path`
    pub fn resource(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        Self::Resource {
            path: path.into(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("TOML parse failed: {}", err))
    }
}
