//! Top-level configuration type.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use turnstile_cache::CacheConfig;
use turnstile_telemetry::{LogConfig, LogOutput, ServiceIdentity, TelemetryConfig};

use crate::{
    CacheSettings, ConfigError, ConfigResult, DatabaseConfig, LogFormat, ServerConfig,
    SnapshotConfig, TelemetryConfigSection,
};

/// Smallest accepted snapshot poll interval.
pub const MIN_REFRESH_INTERVAL_MS: u64 = 100;

/// Complete Turnstile configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use turnstile_config::TurnstileConfig;
///
/// let config = TurnstileConfig::default();
/// assert_eq!(config.server.listen_addr, "0.0.0.0:7778");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct TurnstileConfig {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Entity cache configuration.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Entity store configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Virtual-host snapshot configuration.
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Telemetry configuration (metrics, tracing, logging).
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,
}

impl TurnstileConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        let listen_addr = self.listen_addr()?;
        if self.admin_addr()? == listen_addr {
            return Err(ConfigError::invalid_value(
                "server.admin_addr",
                "must differ from server.listen_addr",
            ));
        }

        if !self.server.path_prefix.is_empty() && !self.server.path_prefix.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "server.path_prefix",
                "must start with '/'",
            ));
        }

        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::invalid_value(
                "cache.ttl_secs",
                "must be greater than zero",
            ));
        }
        if self.cache.negative_ttl_secs > self.cache.ttl_secs {
            return Err(ConfigError::invalid_value(
                "cache.negative_ttl_secs",
                "must not exceed cache.ttl_secs",
            ));
        }

        if self.database.query_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "database.query_timeout_ms",
                "must be greater than zero",
            ));
        }

        if self.snapshot.refresh_interval_ms < MIN_REFRESH_INTERVAL_MS {
            return Err(ConfigError::invalid_value(
                "snapshot.refresh_interval_ms",
                format!("must be at least {MIN_REFRESH_INTERVAL_MS}"),
            ));
        }

        if let Err(e) = turnstile_telemetry::log_filter(&self.telemetry.logging.level) {
            return Err(ConfigError::invalid_value(
                "telemetry.logging.level",
                e.to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.telemetry.tracing.sampling_ratio) {
            return Err(ConfigError::invalid_value(
                "telemetry.tracing.sampling_ratio",
                "must be between 0.0 and 1.0",
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Pretty debug logs and short cache lifetimes, so fixture edits show up
    /// quickly.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_config::TurnstileConfig;
    ///
    /// let config = TurnstileConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;
        config.telemetry.logging.include_location = true;
        config.telemetry.environment = "development".to_string();

        config.cache.ttl_secs = 5;
        config.cache.negative_ttl_secs = 1;

        config
    }

    /// Create a production configuration preset.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_config::TurnstileConfig;
    ///
    /// let config = TurnstileConfig::production();
    /// assert_eq!(config.telemetry.logging.format, turnstile_config::LogFormat::Json);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.logging.ansi_enabled = false;
        config.telemetry.environment = "production".to_string();

        config.cache.max_entries = 100_000;

        config
    }

    /// The parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if it is not a socket address.
    pub fn listen_addr(&self) -> ConfigResult<SocketAddr> {
        self.server.listen_addr.parse().map_err(|_| {
            ConfigError::invalid_value(
                "server.listen_addr",
                format!("invalid socket address: {}", self.server.listen_addr),
            )
        })
    }

    /// The parsed admin address.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if it is not a socket address.
    pub fn admin_addr(&self) -> ConfigResult<SocketAddr> {
        self.server.admin_addr.parse().map_err(|_| {
            ConfigError::invalid_value(
                "server.admin_addr",
                format!("invalid socket address: {}", self.server.admin_addr),
            )
        })
    }

    /// Poll interval of the virtual-host snapshot refresher.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot.refresh_interval_ms)
    }

    /// Graceful shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Entity cache settings, with the database query timeout as the fetch
    /// bound.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_max_entries(self.cache.max_entries)
            .with_ttl(Duration::from_secs(self.cache.ttl_secs))
            .with_negative_ttl(Duration::from_secs(self.cache.negative_ttl_secs))
            .with_fetch_timeout(Duration::from_millis(self.database.query_timeout_ms))
    }

    /// Telemetry settings for [`turnstile_telemetry::init_telemetry`].
    pub fn telemetry_config(&self) -> TelemetryConfig {
        let section = &self.telemetry;

        let mut service =
            ServiceIdentity::new(&section.environment).with_name(&section.service_name);
        if let Some(version) = &section.service_version {
            service = service.with_version(version);
        }

        let output = match section.logging.format {
            LogFormat::Json => LogOutput::Json,
            LogFormat::Pretty => LogOutput::Pretty {
                ansi: section.logging.ansi_enabled,
            },
        };
        let logging = LogConfig {
            enabled: section.logging.enabled,
            filter: section.logging.level.clone(),
            output,
            with_location: section.logging.include_location,
        };

        let metrics = turnstile_telemetry::MetricsConfig {
            enabled: section.metrics.enabled,
            duration_buckets: section.metrics.histogram_buckets.clone(),
        };

        let mut tracing = turnstile_telemetry::TracingConfig {
            enabled: section.tracing.enabled,
            sample_ratio: section.tracing.sampling_ratio,
            ..Default::default()
        };
        if let Some(endpoint) = &section.tracing.otlp_endpoint {
            tracing.otlp_endpoint = endpoint.clone();
        }

        TelemetryConfig {
            service,
            logging,
            metrics,
            tracing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        TurnstileConfig::default().validate().unwrap();
        TurnstileConfig::development().validate().unwrap();
        TurnstileConfig::production().validate().unwrap();
    }

    #[test]
    fn test_invalid_listen_addr() {
        let mut config = TurnstileConfig::default();
        config.server.listen_addr = "not-an-address".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.listen_addr"));
    }

    #[test]
    fn test_admin_addr_must_be_separate() {
        let mut config = TurnstileConfig::default();
        config.server.admin_addr = config.server.listen_addr.clone();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.admin_addr"));

        config.server.admin_addr = "nowhere".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = TurnstileConfig::default();
        config.telemetry.logging.level = "turnstile_authz=loudly".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("telemetry.logging.level"));
    }

    #[test]
    fn test_path_prefix_must_be_absolute() {
        let mut config = TurnstileConfig::default();
        config.server.path_prefix = "authz".to_string();
        assert!(config.validate().is_err());

        config.server.path_prefix = "/authz".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn test_cache_ttl_rules() {
        let mut config = TurnstileConfig::default();
        config.cache.ttl_secs = 0;
        assert!(config.validate().unwrap_err().to_string().contains("cache.ttl_secs"));

        config.cache.ttl_secs = 5;
        config.cache.negative_ttl_secs = 6;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("cache.negative_ttl_secs"));

        config.cache.negative_ttl_secs = 5;
        config.validate().unwrap();
    }

    #[test]
    fn test_query_timeout_and_refresh_interval() {
        let mut config = TurnstileConfig::default();
        config.database.query_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = TurnstileConfig::default();
        config.snapshot.refresh_interval_ms = 99;
        assert!(config.validate().is_err());
        config.snapshot.refresh_interval_ms = 100;
        config.validate().unwrap();
    }

    #[test]
    fn test_sampling_ratio_range() {
        let mut config = TurnstileConfig::default();
        config.telemetry.tracing.sampling_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_config_conversion() {
        let mut config = TurnstileConfig::default();
        config.cache.max_entries = 42;
        config.cache.ttl_secs = 30;
        config.cache.negative_ttl_secs = 3;
        config.database.query_timeout_ms = 250;

        let cache = config.cache_config();
        assert_eq!(cache.max_entries, 42);
        assert_eq!(cache.ttl, Duration::from_secs(30));
        assert_eq!(cache.negative_ttl, Duration::from_secs(3));
        assert_eq!(cache.fetch_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_telemetry_config_conversion() {
        let mut config = TurnstileConfig::development();
        config.telemetry.service_name = "edge-authz".to_string();
        config.telemetry.service_version = Some("9.9.9".to_string());
        config.telemetry.tracing.enabled = true;
        config.telemetry.tracing.otlp_endpoint = Some("http://collector:4317".to_string());
        config.telemetry.tracing.sampling_ratio = 0.25;

        let telemetry = config.telemetry_config();

        assert_eq!(telemetry.service.name, "edge-authz");
        assert_eq!(telemetry.service.version, "9.9.9");
        assert_eq!(telemetry.service.environment, "development");
        assert_eq!(telemetry.logging.output, LogOutput::Pretty { ansi: true });
        assert_eq!(telemetry.logging.filter, "debug");
        assert!(telemetry.tracing.enabled);
        assert_eq!(telemetry.tracing.otlp_endpoint, "http://collector:4317");
        assert!((telemetry.tracing.sample_ratio - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_durations() {
        let config = TurnstileConfig::default();
        assert_eq!(config.refresh_interval(), Duration::from_secs(2));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
    }
}
