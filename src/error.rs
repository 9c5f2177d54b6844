//! Error handling for the status updater
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the update pipeline. Most of these errors never escape a
//! run: per-item failures are recorded in the run report and the item is
//! skipped (see [`crate::pipeline`]).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for updater operations
#[derive(Error, Debug)]
pub enum OnionooError {
    /// A malformed snapshot, record or sample
    #[error("Input error: {0}")]
    Input(String),

    /// A document could not be written, read or removed
    #[error("Storage error at {path:?}: {message}")]
    Storage { path: PathBuf, message: String },

    /// The advisory lock could not be inspected or changed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Stored state broke a structural invariant (e.g. overlapping buckets)
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Errors related to configuration loading/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<OnionooError>,
    },
}

impl OnionooError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        OnionooError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a storage error for the given path
    pub fn storage(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        OnionooError::Storage {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error only affects a single input item
    pub fn is_input(&self) -> bool {
        match self {
            OnionooError::Input(_) => true,
            OnionooError::WithContext { source, .. } => source.is_input(),
            _ => false,
        }
    }

    /// Whether stored state was found structurally broken
    pub fn is_invariant(&self) -> bool {
        match self {
            OnionooError::Invariant(_) => true,
            OnionooError::WithContext { source, .. } => source.is_invariant(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for OnionooError {
    fn from(err: serde_json::Error) -> Self {
        OnionooError::Serialization(err.to_string())
    }
}

/// Result type alias for updater operations
pub type Result<T> = std::result::Result<T, OnionooError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
