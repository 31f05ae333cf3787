//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid source kind: {0}")]
    InvalidSourceKind(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
