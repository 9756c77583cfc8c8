//! Error types for the experiment data store.
//!
//! This module defines `StoreError`, the single error type returned by every
//! store, container, and configuration operation. It uses `thiserror` so that
//! lower-level failures (I/O, encoding, configuration parsing) convert into it
//! with the `?` operator.
//!
//! ## Error Hierarchy
//!
//! - **`Access`**: a mutation was attempted through a read-only handle.
//! - **`Dims`**: caller-supplied data has inconsistent lengths, a record does not
//!   match the declared record type, or a write falls outside a fixed shape or
//!   outside the crossbar.
//! - **`Format`**: the container is missing required structure or version
//!   metadata. The file is treated as foreign and the open fails.
//! - **`Lookup`**: a path does not exist, has the wrong node kind, or an
//!   experiment parent is anchored under the wrong namespace.
//! - **`AlreadyExists`**: a table (or other node) is created at an occupied path.
//! - **`Io`** / **`Encoding`**: failures of the underlying file. These are fatal
//!   to the operation in progress and are never recovered in place.
//! - **`Config`**: configuration loading failed.

use thiserror::Error;

/// Convenience alias for results using the store error type.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Access error: {0}")]
    Access(String),

    #[error("Dimension error: {0}")]
    Dims(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Node already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl From<figment::Error> for StoreError {
    fn from(value: figment::Error) -> Self {
        StoreError::Config(Box::new(value))
    }
}

impl StoreError {
    /// Returns true for the errors a caller could avoid by changing its input,
    /// as opposed to a broken or inaccessible file.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            StoreError::Dims(_) | StoreError::Lookup(_) | StoreError::AlreadyExists(_)
        )
    }
}
