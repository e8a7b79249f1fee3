//! Error Handling Module
//!
//! Defines the library error type for the retinopathy grading pipeline.
//! Uses thiserror for ergonomic error definitions; orchestration code
//! wraps these in `anyhow` with extra context.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for retina grading operations
#[derive(Error, Debug)]
pub enum GradingError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unreadable CSV manifest
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    Image(PathBuf, String),

    /// A manifest lacks a column the pipeline needs
    #[error("Missing column '{column}' in table '{table}'")]
    MissingColumn { table: String, column: String },

    /// Error with dataset contents (labels, row shapes, splits)
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model construction or weight import
    #[error("Model error: {0}")]
    Model(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// Error with inference or blending
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Path not found, with a hint on where the file should come from
    #[error("Path not found: '{0}' ({1})")]
    PathNotFound(PathBuf, String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GradingError {
    fn from(err: serde_json::Error) -> Self {
        GradingError::Serialization(err.to_string())
    }
}

/// Convenience Result type for retina grading operations
pub type Result<T> = std::result::Result<T, GradingError>;

/// Extension trait for turning foreign errors into dataset errors with context
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| GradingError::Dataset(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| GradingError::Dataset(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| GradingError::Dataset(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| GradingError::Dataset(f()))
    }
}
