//! Error types for Kiln.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Kiln operations.
pub type Result<T> = std::result::Result<T, KilnError>;

/// Main error type for Kiln.
#[derive(Error, Debug)]
pub enum KilnError {
    // Configuration errors, reported before any engine work starts
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Incompatible .dockerignore: {reason}")]
    IncompatibleIgnoreFile { reason: String },

    // Instruction generation errors
    #[error("Failed to generate build instructions: {reason}")]
    GenerationFailed { reason: String },

    // Build engine errors
    #[error("Failed to build image {image}: {reason}")]
    BuildFailed { image: String, reason: String },

    #[error("Failed to attach labels to image {image}: {reason}")]
    LabelAttachFailed { image: String, reason: String },

    // Weights cache errors
    #[error("Failed to persist weights manifest at {path:?}: {reason}")]
    ManifestPersistFailed { path: PathBuf, reason: String },

    // Schema errors carry the offending document for diagnosis
    #[error("Model schema is invalid: {reason}\n\n{document}")]
    SchemaInvalid { reason: String, document: String },

    #[error("Failed to resolve model schema: {reason}")]
    SchemaUnavailable { reason: String },

    // Remote base image errors
    #[error("Base image {image} has no layers")]
    BaseImageEmpty { image: String },

    #[error("Failed to inspect base image {image}: {reason}")]
    BaseImageInspectFailed { image: String, reason: String },

    // File system errors
    #[error("File read error: {path:?}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KilnError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }
}
