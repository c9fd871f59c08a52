//! Layered configuration loading.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::{ConfigError, ConfigResult, LogFormat, TurnstileConfig};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "TURNSTILE";

/// Configuration loader.
///
/// Layers apply in order, later ones overriding earlier ones:
/// 1. Defaults or a preset
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables (`PREFIX__SECTION__KEY`)
///
/// # Example
///
/// ```no_run
/// use turnstile_config::ConfigLoader;
///
/// # fn main() -> Result<(), turnstile_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("turnstile.toml")?
///     .with_env_prefix("TURNSTILE")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: TurnstileConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: TurnstileConfig::default(),
            env_prefix: None,
        }
    }

    /// Start from default values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = TurnstileConfig::default();
        self
    }

    /// Start from the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = TurnstileConfig::development();
        self
    }

    /// Start from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = TurnstileConfig::production();
        self
    }

    /// Load a `.toml` or `.json` file.
    ///
    /// Sections present in the file replace the current ones; omitted
    /// sections keep their current values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or unreadable, has an
    /// unknown extension, fails to parse, or contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ConfigError::unsupported_format(path.display().to_string()))?;

        self.with_string(&content, format)
    }

    /// Load a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> ConfigResult<Self> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in `format` (`toml` or `json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the format is unknown or parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [server]
    ///     listen_addr = "127.0.0.1:9000"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> ConfigResult<Self> {
        let layer: PartialConfig = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            other => return Err(ConfigError::unsupported_format(other)),
        };

        layer.apply_to(&mut self.config);
        Ok(self)
    }

    /// Set the environment variable prefix for overrides.
    ///
    /// With prefix `TURNSTILE`, `TURNSTILE__CACHE__TTL_SECS=30` sets
    /// `cache.ttl_secs`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load variables from a `.env` file in the working directory, if any.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        self
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed or the result
    /// fails validation.
    pub fn load(mut self) -> ConfigResult<TurnstileConfig> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Finalize without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> TurnstileConfig {
        self.config
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> ConfigResult<()> {
        let mut vars: Vec<(String, String)> = env::vars()
            .filter(|(key, _)| key.starts_with(prefix))
            .collect();
        vars.sort();

        for (key, value) in vars {
            self.apply_env_var(&key, &value, prefix)?;
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> ConfigResult<()> {
        let Some(path) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            // Some other variable sharing the prefix, e.g. TURNSTILE_HOME.
            return Ok(());
        };
        let parts: Vec<&str> = path.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["SERVER", "LISTEN_ADDR"] => config.server.listen_addr = value.to_string(),
            ["SERVER", "ADMIN_ADDR"] => config.server.admin_addr = value.to_string(),
            ["SERVER", "PATH_PREFIX"] => config.server.path_prefix = value.to_string(),
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = parse_number(key, value)?;
            }

            ["CACHE", "MAX_ENTRIES"] => config.cache.max_entries = parse_number(key, value)?,
            ["CACHE", "TTL_SECS"] => config.cache.ttl_secs = parse_number(key, value)?,
            ["CACHE", "NEGATIVE_TTL_SECS"] => {
                config.cache.negative_ttl_secs = parse_number(key, value)?;
            }

            ["DATABASE", "FIXTURES_PATH"] => config.database.fixtures_path = non_empty(value),
            ["DATABASE", "QUERY_TIMEOUT_MS"] => {
                config.database.query_timeout_ms = parse_number(key, value)?;
            }

            ["SNAPSHOT", "REFRESH_INTERVAL_MS"] => {
                config.snapshot.refresh_interval_ms = parse_number(key, value)?;
            }

            ["TELEMETRY", "SERVICE_NAME"] => config.telemetry.service_name = value.to_string(),
            ["TELEMETRY", "SERVICE_VERSION"] => config.telemetry.service_version = non_empty(value),
            ["TELEMETRY", "ENVIRONMENT"] => config.telemetry.environment = value.to_string(),

            ["TELEMETRY", "METRICS", "ENABLED"] => {
                config.telemetry.metrics.enabled = parse_flag(key, value)?;
            }

            ["TELEMETRY", "TRACING", "ENABLED"] => {
                config.telemetry.tracing.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "TRACING", "OTLP_ENDPOINT"] => {
                config.telemetry.tracing.otlp_endpoint = non_empty(value);
            }
            ["TELEMETRY", "TRACING", "SAMPLING_RATIO"] => {
                config.telemetry.tracing.sampling_ratio = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected float"))?;
            }

            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                config.telemetry.logging.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => config.telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                config.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "ANSI_ENABLED"] => {
                config.telemetry.logging.ansi_enabled = parse_flag(key, value)?;
            }

            _ => return Err(ConfigError::env_parse_error(key, "unknown configuration key")),
        }

        Ok(())
    }
}

/// One file or string layer. Only the sections it names are applied.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    server: Option<crate::ServerConfig>,
    cache: Option<crate::CacheSettings>,
    database: Option<crate::DatabaseConfig>,
    snapshot: Option<crate::SnapshotConfig>,
    telemetry: Option<crate::TelemetryConfigSection>,
}

impl PartialConfig {
    fn apply_to(self, config: &mut TurnstileConfig) {
        if let Some(server) = self.server {
            config.server = server;
        }
        if let Some(cache) = self.cache {
            config.cache = cache;
        }
        if let Some(database) = self.database {
            config.database = database;
        }
        if let Some(snapshot) = self.snapshot {
            config.snapshot = snapshot;
        }
        if let Some(telemetry) = self.telemetry {
            config.telemetry = telemetry;
        }
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn parse_flag(key: &str, value: &str) -> ConfigResult<bool> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
