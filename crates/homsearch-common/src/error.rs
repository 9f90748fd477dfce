//! Error types shared across homsearch crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared types and utilities
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown query format: {0}")]
    UnknownFormat(String),

    #[error("Unknown method: {0}. Expected 'comer' or 'cother'")]
    UnknownMethod(String),

    #[error("Unknown artifact kind: {0}")]
    UnknownArtifact(String),
}
