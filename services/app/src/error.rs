//! services/app/src/error.rs
//!
//! Defines the primary error type for the whole application service.

use crate::config::ConfigError;
use tubestudy_core::chat::ChatError;
use tubestudy_core::ports::{GatewayError, StoreError};
use tubestudy_core::quiz::QuizError;
use tubestudy_core::sessions::SessionError;

/// The primary error type for the `tubestudy` service.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A generative backend call failed.
    #[error("Generation failed: {0}")]
    Gateway(#[from] GatewayError),

    /// Represents an error from the document store.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Quiz error: {0}")]
    Quiz(#[from] QuizError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Represents a standard Input/Output error (e.g., reading a transcript file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
