//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while initializing telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize metrics.
    #[error("failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// Failed to initialize tracing.
    #[error("failed to initialize tracing: {0}")]
    TracingInit(String),

    /// Failed to initialize logging.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Invalid configuration.
    #[error("invalid telemetry configuration: {0}")]
    InvalidConfig(String),
}
