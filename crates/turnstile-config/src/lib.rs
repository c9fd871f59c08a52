//! Typed configuration for Turnstile.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict parsing (unknown fields are errors)
//! - Layered loading (defaults → file → env), validated at the end
//!
//! # Example
//!
//! ```no_run
//! use turnstile_config::ConfigLoader;
//!
//! # fn main() -> Result<(), turnstile_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_file("turnstile.toml")?
//!     .with_env_prefix("TURNSTILE")
//!     .load()?;
//!
//! println!("listening on {}", config.server.listen_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:7778"
//! admin_addr = "0.0.0.0:7779"
//! path_prefix = ""
//! shutdown_timeout_secs = 30
//!
//! [cache]
//! max_entries = 10000
//! ttl_secs = 60
//! negative_ttl_secs = 10
//!
//! [database]
//! fixtures_path = "/etc/turnstile/fixtures.json"
//! query_timeout_ms = 1000
//!
//! [snapshot]
//! refresh_interval_ms = 2000
//!
//! [telemetry]
//! service_name = "turnstile"
//! environment = "production"
//!
//! [telemetry.tracing]
//! enabled = true
//! otlp_endpoint = "http://localhost:4317"
//! sampling_ratio = 0.1
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! `PREFIX__SECTION__KEY`, for example:
//!
//! - `TURNSTILE__SERVER__LISTEN_ADDR=0.0.0.0:9000`
//! - `TURNSTILE__CACHE__TTL_SECS=30`
//! - `TURNSTILE__TELEMETRY__LOGGING__LEVEL=debug`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{TurnstileConfig, MIN_REFRESH_INTERVAL_MS};
pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{
    CacheSettings, DatabaseConfig, LogFormat, LoggingConfig, MetricsConfig, ServerConfig,
    SnapshotConfig, TelemetryConfigSection, TracingConfig,
};
