//! Cache error types.

use thiserror::Error;

/// Result type for cache writes.
pub type CacheResult<T> = Result<T, CacheError>;

/// Reasons a value could not be cached.
///
/// Writes are best-effort: the read-through path logs these and carries on
/// with the freshly fetched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The cache was configured with zero capacity.
    #[error("cache disabled")]
    Disabled,

    /// No room was left after eviction.
    #[error("cache full ({max_entries} entries)")]
    Capacity {
        /// Configured capacity.
        max_entries: usize,
    },
}
