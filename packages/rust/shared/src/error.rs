//! Error types for OpenCraft.
//!
//! Library crates use [`OpenCraftError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Only [`OpenCraftError::StoreUnavailable`] and invalid input ever reach a
//! caller of `craft`; generation failures are folded into an empty result
//! and enrichment failures are logged and dropped.

use std::path::PathBuf;

/// Top-level error type for all OpenCraft operations.
#[derive(Debug, thiserror::Error)]
pub enum OpenCraftError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The persistent store could not be reached or rejected a statement.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Network/HTTP error talking to the generation or embedding service.
    #[error("network error: {0}")]
    Network(String),

    /// The generator produced no acceptable candidate.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// A generated candidate was rejected by validation.
    #[error("candidate rejected: {0}")]
    ValidationRejected(String),

    /// A material with this name is already registered.
    #[error("material already exists: {0}")]
    DuplicateMaterial(String),

    /// A background enrichment step failed.
    #[error("enrichment failed: {0}")]
    EnrichmentFailed(String),

    /// The material is unknown or has no embedding yet.
    #[error("material not found: {0}")]
    MaterialNotFound(String),

    /// Embedding provider error (transport, shape, or dimension mismatch).
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Caller-supplied input is unusable (e.g. an empty operand).
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, OpenCraftError>;

impl OpenCraftError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an invalid-input error from any displayable message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Store errors are the only ones that abort the synchronous craft path.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
