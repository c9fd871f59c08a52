//! Settings consumed by [`crate::init_telemetry`].
//!
//! The service resolves these from its `[telemetry]` configuration section;
//! this crate never reads files or the environment itself.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use crate::tracing::TracingConfig;

/// Who is reporting. Attached to exported spans and the startup log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Service name, `turnstile` unless a deployment runs several instances
    /// under different names.
    pub name: String,
    /// Build version.
    pub version: String,
    /// Deployment environment, e.g. `production`.
    pub environment: String,
}

impl ServiceIdentity {
    /// The `turnstile` service at this build's version, deployed to
    /// `environment`.
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            name: "turnstile".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: environment.into(),
        }
    }

    /// Replaces the service name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the reported version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self::new("development")
    }
}

/// Everything [`crate::init_telemetry`] installs.
///
/// Defaults to JSON logs and Prometheus metrics, with span export off.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Reporting identity.
    pub service: ServiceIdentity,
    /// Log output.
    pub logging: LogConfig,
    /// Prometheus recorder.
    pub metrics: MetricsConfig,
    /// OTLP span export.
    pub tracing: TracingConfig,
}

impl TelemetryConfig {
    /// Installs nothing. For embedders that own the global subscriber and
    /// recorder.
    pub fn disabled() -> Self {
        let mut config = Self::default();
        config.logging.enabled = false;
        config.metrics.enabled = false;
        config.tracing.enabled = false;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogOutput;

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::default();

        assert_eq!(config.service.name, "turnstile");
        assert_eq!(config.service.environment, "development");
        assert_eq!(config.logging.output, LogOutput::Json);
        assert!(config.metrics.enabled);
        assert!(!config.tracing.enabled);
    }

    #[test]
    fn test_disabled() {
        let config = TelemetryConfig::disabled();
        assert!(!config.logging.enabled);
        assert!(!config.metrics.enabled);
        assert!(!config.tracing.enabled);
    }

    #[test]
    fn test_service_identity() {
        let service = ServiceIdentity::new("production")
            .with_name("edge-authz")
            .with_version("2.0.0");

        assert_eq!(service.name, "edge-authz");
        assert_eq!(service.version, "2.0.0");
        assert_eq!(service.environment, "production");
        assert_eq!(ServiceIdentity::default().version, env!("CARGO_PKG_VERSION"));
    }
}
