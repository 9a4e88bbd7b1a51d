//! Error types for player operations

use thiserror::Error;

/// Error types for player operations
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for player operations
pub type PlayerResult<T> = Result<T, PlayerError>;
