//! Error Handling Module
//!
//! Defines the error types for the gesture classifier.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for gesture classifier operations
#[derive(Error, Debug)]
pub enum GestureError {
    /// A construction parameter named something this crate does not support
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Error with model construction or weight loading
    #[error("Model error: {0}")]
    Model(String),

    /// Error during a training or validation step
    #[error("Training error: {0}")]
    Training(String),

    /// Error reading tensor values back for metric bookkeeping
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Pretrained weights file is missing
    #[error("Weights not found: {0}")]
    WeightsNotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GestureError {
    fn from(err: serde_json::Error) -> Self {
        GestureError::Serialization(err.to_string())
    }
}

/// Convenience Result type for gesture classifier operations
pub type Result<T> = std::result::Result<T, GestureError>;

/// Extension trait for adding context to foreign errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| GestureError::Model(format!("{}: {:?}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| GestureError::Model(format!("{}: {:?}", f(), e)))
    }
}

/// Build an `InvalidConfiguration` error naming the rejected value and the accepted set
pub fn invalid_choice(what: &str, got: &str, accepted: &[&str]) -> GestureError {
    GestureError::InvalidConfiguration(format!(
        "unsupported {} '{}', expected one of: {}",
        what,
        got,
        accepted.join(", ")
    ))
}
