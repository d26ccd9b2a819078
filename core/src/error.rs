use std::path::PathBuf;

use thiserror::Error;

/// Packages layer builder error types
#[derive(Error, Debug)]
pub enum LayerError {
    /// Caller asked for something that cannot be built
    #[error("Usage error: {0}")]
    Usage(String),

    /// Image catalog unreachable or returned an error
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Missing or unreadable file while walking package directories
    #[error("Filesystem error: {} - {message}", path.display())]
    Filesystem { path: PathBuf, message: String },

    /// Malformed template or rendered build script
    #[error("Template error: {0}")]
    Template(String),

    /// Failure writing the build context stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LayerError {
    /// Build a filesystem error for `path` from any displayable cause.
    pub fn filesystem(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        LayerError::Filesystem {
            path: path.into(),
            message: cause.to_string(),
        }
    }
}

impl From<serde_json::Error> for LayerError {
    fn from(err: serde_json::Error) -> Self {
        LayerError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for LayerError {
    fn from(err: serde_yaml::Error) -> Self {
        LayerError::Serialization(err.to_string())
    }
}

/// Result type alias for packages layer operations
pub type Result<T> = std::result::Result<T, LayerError>;
