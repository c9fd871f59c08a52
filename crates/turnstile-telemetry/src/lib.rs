//! Observability for Turnstile.
//!
//! - **Logging**: `tracing-subscriber` with JSON or pretty output
//! - **Metrics**: Prometheus text format via the `metrics` facade
//! - **Tracing**: OpenTelemetry spans exported over OTLP, continuing the
//!   W3C trace context Envoy sends with each check
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    turnstile-telemetry                    │
//! │                                                           │
//! │  ┌─────────────┐   ┌───────────────┐   ┌─────────────┐    │
//! │  │   Metrics   │   │    Tracing    │   │   Logging   │    │
//! │  │ (Prometheus)│   │(OpenTelemetry)│   │(JSON/pretty)│    │
//! │  └──────┬──────┘   └───────┬───────┘   └──────┬──────┘    │
//! └─────────┼──────────────────┼──────────────────┼───────────┘
//!           ▼                  ▼                  ▼
//!   /_turnstile/metrics   OTLP collector        stdout
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use turnstile_telemetry::{init_telemetry, ServiceIdentity, TelemetryConfig};
//!
//! let mut config = TelemetryConfig::default();
//! config.service = ServiceIdentity::new("production");
//! config.tracing.enabled = true;
//! config.tracing.otlp_endpoint = "http://collector:4317".to_string();
//!
//! let _guard = init_telemetry(&config)?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use config::{ServiceIdentity, TelemetryConfig};
pub use error::TelemetryError;
pub use logging::{init_logging, log_filter, LogConfig, LogOutput};
pub use metrics::{init_metrics, render_metrics, InFlightGuard, MetricsConfig};
pub use tracing::{check_span, init_tracing, TracingConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Guard that flushes and shuts down the tracer provider on drop.
///
/// Keep it alive for the lifetime of the process.
pub struct TelemetryGuard {
    tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl TelemetryGuard {
    /// Creates a new telemetry guard.
    #[must_use]
    pub fn new(tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>) -> Self {
        Self { tracer_provider }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            for result in provider.force_flush() {
                if let Err(e) = result {
                    eprintln!("error flushing tracer provider: {e}");
                }
            }
            if let Err(e) = provider.shutdown() {
                eprintln!("error shutting down tracer provider: {e}");
            }
        }
    }
}

/// Initializes logging, metrics and tracing, in that order.
///
/// # Errors
///
/// Returns `TelemetryError` if any subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<TelemetryGuard> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    let tracer_provider = init_tracing(&config.tracing, &config.service)?;

    ::tracing::info!(
        service = %config.service.name,
        version = %config.service.version,
        environment = %config.service.environment,
        metrics = config.metrics.enabled,
        span_export = tracer_provider.is_some(),
        "telemetry initialized"
    );
    Ok(TelemetryGuard::new(tracer_provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_disabled_telemetry() {
        let guard = init_telemetry(&TelemetryConfig::disabled()).unwrap();
        assert!(guard.tracer_provider.is_none());
    }

    #[test]
    fn test_telemetry_guard_without_provider() {
        let guard = TelemetryGuard::new(None);
        drop(guard);
    }
}
