//! Turnstile entry point.

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;
use turnstile_config::{ConfigLoader, DEFAULT_ENV_PREFIX};
use turnstile_server::{ShutdownSignal, Turnstile};
use turnstile_telemetry::init_telemetry;

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("turnstile {}", turnstile_server::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Turnstile - Envoy ext_authz service for API keys and OAuth2 tokens

USAGE:
    turnstile [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    Any setting can be overridden as TURNSTILE__<SECTION>__<KEY>, e.g.
    TURNSTILE__SERVER__LISTEN_ADDR        Check listener (default: 0.0.0.0:7778)
    TURNSTILE__SERVER__ADMIN_ADDR         Health and metrics listener (default: 0.0.0.0:7779)
    TURNSTILE__DATABASE__FIXTURES_PATH    JSON fixtures seeding the database
    TURNSTILE__CACHE__TTL_SECS            Entity cache TTL (default: 60)
    TURNSTILE__TELEMETRY__LOGGING__LEVEL  Log level (default: info)

    A .env file in the working directory is read first.

EXAMPLES:
    turnstile --config /etc/turnstile/turnstile.toml
    TURNSTILE__DATABASE__FIXTURES_PATH=fixtures.json turnstile
"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new().with_dotenv();
    if let Some(path) = &args.config {
        loader = loader
            .with_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
    }
    let config = loader
        .with_env_prefix(DEFAULT_ENV_PREFIX)
        .load()
        .context("invalid configuration")?;

    let _telemetry = init_telemetry(&config.telemetry_config()).context("telemetry setup")?;

    info!(
        version = turnstile_server::VERSION,
        listen_addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_addr,
        environment = %config.telemetry.environment,
        "starting turnstile"
    );

    let turnstile = Turnstile::from_config(&config)?;
    turnstile.run(ShutdownSignal::with_os_signals()).await?;
    Ok(())
}
