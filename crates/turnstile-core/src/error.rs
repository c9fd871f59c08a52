//! Error types for the core data model.

use thiserror::Error;

/// Result type alias using [`AttributeError`].
pub type AttributeResult<T> = Result<T, AttributeError>;

/// Errors raised by [`AttributeBag`](crate::AttributeBag) lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    /// No attribute with the requested name.
    #[error("attribute not found: {name}")]
    NotFound {
        /// The name that was looked up.
        name: String,
    },
}

impl AttributeError {
    /// Creates a not-found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }
}
