//! Log output.
//!
//! One JSON object per event by default, carrying the fields of the current
//! span, so the `request_id` and `peer` recorded on each check span show up
//! on every line logged while deciding it. The pretty output is meant for a
//! terminal.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// How events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty {
        /// Color the output.
        ansi: bool,
    },
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Install a subscriber at all.
    pub enabled: bool,
    /// [`EnvFilter`] directive, e.g. `info,turnstile_cache=debug`.
    pub filter: String,
    /// Rendering.
    pub output: LogOutput,
    /// Add source file and line to each event.
    pub with_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: "info".to_string(),
            output: LogOutput::Json,
            with_location: false,
        }
    }
}

impl LogConfig {
    /// Colored debug output with source locations, for local runs.
    pub fn terminal() -> Self {
        Self {
            enabled: true,
            filter: "debug".to_string(),
            output: LogOutput::Pretty { ansi: true },
            with_location: true,
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidConfig` for a bad filter directive and
/// `TelemetryError::LoggingInit` if a global subscriber is already set.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = log_filter(&config.filter)?;
    let location = config.with_location;
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.output {
        LogOutput::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_file(location)
            .with_line_number(location)
            .boxed(),
        LogOutput::Pretty { ansi } => fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_file(location)
            .with_line_number(location)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Parses an [`EnvFilter`] directive.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidConfig` naming the rejected directive.
pub fn log_filter(directive: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| TelemetryError::InvalidConfig(format!("log filter `{directive}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_json_info() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert_eq!(config.filter, "info");
        assert_eq!(config.output, LogOutput::Json);
        assert!(!config.with_location);
    }

    #[test]
    fn test_terminal() {
        let config = LogConfig::terminal();
        assert_eq!(config.output, LogOutput::Pretty { ansi: true });
        assert_eq!(config.filter, "debug");
        assert!(config.with_location);
    }

    #[test]
    fn test_log_filter() {
        assert!(log_filter("info,turnstile_cache=debug").is_ok());

        let err = log_filter("turnstile_authz=loudly").unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidConfig(_)));
        assert!(err.to_string().contains("turnstile_authz=loudly"));
    }

    #[test]
    fn test_disabled_installs_nothing() {
        let config = LogConfig {
            enabled: false,
            filter: "not a directive =".to_string(),
            ..LogConfig::default()
        };
        assert!(init_logging(&config).is_ok());
    }
}
