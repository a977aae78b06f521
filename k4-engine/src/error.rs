//! Error types for k4-engine
//!
//! Only two things are fatal for a run: invalid configuration (reported before
//! any search starts) and unusable static resources (reported at load time,
//! surfaced here through [`k4_common::Error::Resource`]). Empty searches and
//! budget truncation are ordinary results, and per-trial failures are recorded
//! as rejected attempts.

use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid stage parameters, crib bounds, or unknown stage type
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Artifact store write failure
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Internal failure (worker pool construction, poisoned state)
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// k4-common error (resources, bootstrap config)
    #[error("Common error: {0}")]
    Common(#[from] k4_common::Error),
}

impl EngineError {
    /// Stable code for logs and artifact manifests
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "CONFIGURATION_ERROR",
            EngineError::Artifact(_) => "ARTIFACT_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
            EngineError::Io(_) => "IO_ERROR",
            EngineError::Common(k4_common::Error::Resource { .. }) => "RESOURCE_ERROR",
            EngineError::Common(k4_common::Error::Config(_)) => "CONFIGURATION_ERROR",
            EngineError::Common(_) => "COMMON_ERROR",
        }
    }

    /// True for errors caused by the run configuration
    pub fn is_configuration(&self) -> bool {
        self.code() == "CONFIGURATION_ERROR"
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Common(k4_common::Error::from(err))
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
