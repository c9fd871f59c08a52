//! Error types for the Turnstile server.

use std::net::SocketAddr;

use thiserror::Error;
use turnstile_config::ConfigError;
use turnstile_store::FixtureError;

/// Server startup and runtime errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The fixture file could not seed the database.
    #[error("fixture error: {0}")]
    Fixture(#[from] FixtureError),

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Create a new bind error.
    pub fn bind(addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Bind { addr, source }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
