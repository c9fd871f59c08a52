//! Wiring of the authorization pipeline from configuration.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use turnstile_authz::{AuthorizationHandler, EntitlementResolver, OAuthTokenStore, PolicyRegistry};
use turnstile_cache::EntityCache;
use turnstile_config::TurnstileConfig;
use turnstile_core::{SharedClock, SystemClock};
use turnstile_store::{Database, MemoryDatabase, SnapshotRefresher, SnapshotStore};

use crate::error::{ServerError, ServerResult};
use crate::health::HealthChecker;
use crate::server::{AuthzServer, Listener};
use crate::shutdown::ShutdownSignal;

/// A fully wired Turnstile instance.
pub struct Turnstile {
    listen_addr: SocketAddr,
    admin_addr: SocketAddr,
    database: Arc<MemoryDatabase>,
    cache: Arc<EntityCache>,
    refresher: Arc<SnapshotRefresher>,
    server: AuthzServer,
}

impl fmt::Debug for Turnstile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Turnstile")
            .field("listen_addr", &self.listen_addr)
            .field("admin_addr", &self.admin_addr)
            .field("cache_entries", &self.cache.len())
            .field("refreshing", &self.refresher.is_running())
            .finish_non_exhaustive()
    }
}

impl Turnstile {
    /// Builds every component from `config` using the system clock.
    ///
    /// # Errors
    ///
    /// Fails on an invalid listen address or an unreadable fixture file.
    pub fn from_config(config: &TurnstileConfig) -> ServerResult<Self> {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Builds every component from `config` with an explicit clock.
    ///
    /// # Errors
    ///
    /// Fails on an invalid listen address or an unreadable fixture file.
    pub fn with_clock(config: &TurnstileConfig, clock: SharedClock) -> ServerResult<Self> {
        let listen_addr = config.listen_addr()?;
        let admin_addr = config.admin_addr()?;

        let database = Arc::new(match &config.database.fixtures_path {
            Some(path) => MemoryDatabase::from_fixture_file(path)?,
            None => {
                warn!("no fixtures configured, starting with an empty database");
                MemoryDatabase::new()
            }
        });
        let db: Arc<dyn Database> = database.clone();

        let cache = Arc::new(EntityCache::with_clock(config.cache_config(), clock.clone()));
        let resolver = Arc::new(EntitlementResolver::new(cache.clone(), db.clone(), clock));
        let tokens = Arc::new(OAuthTokenStore::new(cache.clone(), db.clone()));
        let registry = Arc::new(PolicyRegistry::standard(resolver, tokens));
        info!(policies = ?registry.names(), "policy registry ready");

        let snapshots = Arc::new(SnapshotStore::new());
        let refresher = Arc::new(SnapshotRefresher::new(
            db,
            snapshots.clone(),
            config.refresh_interval(),
        ));

        let handler = AuthorizationHandler::new(snapshots.clone(), registry);
        let health = Arc::new(HealthChecker::new(snapshots));
        let server = AuthzServer::new(
            handler,
            health,
            &config.server.path_prefix,
            config.shutdown_timeout(),
        );

        Ok(Self {
            listen_addr,
            admin_addr,
            database,
            cache,
            refresher,
            server,
        })
    }

    /// The configured check listener address.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// The configured admin listener address.
    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    /// The backing database.
    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    /// The entity cache.
    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    /// The HTTP server.
    pub fn server(&self) -> &AuthzServer {
        &self.server
    }

    /// Binds the check and admin addresses and serves until `shutdown`
    /// fires.
    ///
    /// # Errors
    ///
    /// Fails if either address cannot be bound.
    pub async fn run(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| ServerError::bind(self.listen_addr, e))?;
        let admin = TcpListener::bind(self.admin_addr)
            .await
            .map_err(|e| ServerError::bind(self.admin_addr, e))?;
        self.run_on(listener, admin, shutdown).await
    }

    /// Serves checks on `listener` and the admin endpoints on `admin` until
    /// `shutdown` fires.
    ///
    /// Virtual hosts are loaded once before the first connection is accepted;
    /// a failed load leaves the service unready until the refresher succeeds.
    ///
    /// # Errors
    ///
    /// Fails on listener I/O errors.
    pub async fn run_on(
        self,
        listener: TcpListener,
        admin: TcpListener,
        shutdown: ShutdownSignal,
    ) -> ServerResult<()> {
        if let Err(e) = self.refresher.refresh_once().await {
            warn!(error = %e, "initial virtual host load failed, not ready yet");
        }
        self.refresher.start();

        let (checks, admin) = tokio::join!(
            self.server.clone().run(listener, Listener::Check, shutdown.clone()),
            self.server.clone().run(admin, Listener::Admin, shutdown),
        );

        self.refresher.stop().await;
        checks.and(admin)
    }
}
