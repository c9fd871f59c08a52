//! Configuration schema types.
//!
//! Every section rejects unknown fields and fills omitted ones with defaults.

use serde::{Deserialize, Serialize};

/// `[server]`: the ext_authz listener.
///
/// # Example
///
/// ```
/// use turnstile_config::ServerConfig;
///
/// let config = ServerConfig {
///     listen_addr: "127.0.0.1:7778".to_string(),
///     admin_addr: "127.0.0.1:7779".to_string(),
///     path_prefix: "/authz".to_string(),
///     shutdown_timeout_secs: 10,
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address for check requests. Every request received here is a
    /// check.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Bind address for health, readiness, metrics and version.
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,

    /// Prefix stripped from incoming check paths, as configured in Envoy's
    /// `path_prefix`. Empty means none.
    #[serde(default)]
    pub path_prefix: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_addr: default_admin_addr(),
            path_prefix: String::new(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:7778".to_string()
}

fn default_admin_addr() -> String {
    "0.0.0.0:7779".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// `[cache]`: the entity cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// Maximum cached entries, positive and negative combined. Zero disables
    /// the cache.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Lifetime of a cached entity in seconds.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Lifetime of a remembered miss in seconds.
    #[serde(default = "default_negative_ttl")]
    pub negative_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: default_ttl(),
            negative_ttl_secs: default_negative_ttl(),
        }
    }
}

fn default_max_entries() -> usize {
    10_000
}

fn default_ttl() -> u64 {
    60
}

fn default_negative_ttl() -> u64 {
    10
}

/// `[database]`: the entity store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// JSON fixture file seeding the in-memory database.
    #[serde(default)]
    pub fixtures_path: Option<String>,

    /// Bound on a single entity query in milliseconds.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            fixtures_path: None,
            query_timeout_ms: default_query_timeout(),
        }
    }
}

fn default_query_timeout() -> u64 {
    1000
}

/// `[snapshot]`: virtual-host polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfig {
    /// Poll interval in milliseconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    2000
}

/// `[telemetry.metrics]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Histogram buckets for check and query durations, in seconds.
    #[serde(default = "default_histogram_buckets")]
    pub histogram_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            histogram_buckets: default_histogram_buckets(),
        }
    }
}

fn default_histogram_buckets() -> Vec<f64> {
    vec![
        0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
    ]
}

/// `[telemetry.tracing]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TracingConfig {
    /// Export spans over OTLP.
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint. The exporter default is used when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Sampling ratio (0.0 to 1.0).
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: None,
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

fn default_sampling_ratio() -> f64 {
    1.0
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// `[telemetry.logging]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive, e.g. `info` or `turnstile_authz=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI color codes in output.
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `[telemetry]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Service name for telemetry identification.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Service version. Defaults to the crate version.
    #[serde(default)]
    pub service_version: Option<String>,

    /// Deployment environment.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Tracing configuration.
    #[serde(default)]
    pub tracing: TracingConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_version: None,
            environment: default_environment(),
            metrics: MetricsConfig::default(),
            tracing: TracingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "turnstile".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:7778");
        assert_eq!(config.admin_addr, "0.0.0.0:7779");
        assert_eq!(config.path_prefix, "");
        assert_eq!(config.shutdown_timeout_secs, 30);
    }

    #[test]
    fn test_server_config_deserialize() {
        let toml = r#"
            listen_addr = "127.0.0.1:9000"
            path_prefix = "/authz"
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.path_prefix, "/authz");
        assert_eq!(config.shutdown_timeout_secs, 30);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
            ttl_secs = 30
            ttl_seconds = 30
        "#;
        let result: Result<CacheSettings, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_cache_settings_default() {
        let config = CacheSettings::default();
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.ttl_secs, 60);
        assert_eq!(config.negative_ttl_secs, 10);
    }

    #[test]
    fn test_database_and_snapshot_defaults() {
        assert_eq!(DatabaseConfig::default().query_timeout_ms, 1000);
        assert!(DatabaseConfig::default().fixtures_path.is_none());
        assert_eq!(SnapshotConfig::default().refresh_interval_ms, 2000);
    }

    #[test]
    fn test_log_format_deserialize() {
        let format: LogFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(format, LogFormat::Pretty);
        assert!(serde_json::from_str::<LogFormat>("\"xml\"").is_err());
    }

    #[test]
    fn test_telemetry_section_default() {
        let config = TelemetryConfigSection::default();
        assert_eq!(config.service_name, "turnstile");
        assert!(config.metrics.enabled);
        assert!(!config.tracing.enabled);
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
