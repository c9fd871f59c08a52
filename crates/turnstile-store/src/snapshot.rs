//! Virtual-host snapshots.
//!
//! Request handlers resolve the listener for each check from an immutable
//! [`VirtualHostSnapshot`]. A background [`SnapshotRefresher`] polls the
//! database and swaps a new snapshot into the [`SnapshotStore`] when the
//! listing changed; readers holding the old `Arc` keep a consistent view.
//!
//! ```text
//!   Database ──poll──▶ SnapshotRefresher ──replace──▶ SnapshotStore
//!                                                        │ load()
//!                                        check handlers ◀┘ Arc<VirtualHostSnapshot>
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use turnstile_core::VirtualHost;
use turnstile_telemetry::metrics::{record_database_query, record_snapshot_load};

use crate::database::{Database, EntityKind};
use crate::error::StoreResult;

const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;

/// Immutable index of virtual hosts by `(hostname, port)`.
#[derive(Debug, Default)]
pub struct VirtualHostSnapshot {
    vhosts: Vec<VirtualHost>,
    index: HashMap<(String, u16), usize>,
}

impl VirtualHostSnapshot {
    /// Builds a snapshot. Hostnames are matched case-insensitively; when two
    /// virtual hosts claim the same hostname and port, the first one listed
    /// wins.
    pub fn new(vhosts: Vec<VirtualHost>) -> Self {
        let mut index = HashMap::new();
        for (position, vhost) in vhosts.iter().enumerate() {
            for host in &vhost.virtual_hosts {
                let key = (host.trim().to_ascii_lowercase(), vhost.port);
                if let Some(&existing) = index.get(&key) {
                    let winner: &VirtualHost = &vhosts[existing];
                    warn!(
                        host = %key.0,
                        port = key.1,
                        kept = %winner.name,
                        ignored = %vhost.name,
                        "duplicate virtual host binding"
                    );
                    continue;
                }
                index.insert(key, position);
            }
        }
        Self { vhosts, index }
    }

    /// Resolves the virtual host serving a request.
    ///
    /// The port comes from an explicit `:port` in the `Host` header, else
    /// from `x-forwarded-proto`, else from the request scheme.
    pub fn lookup(
        &self,
        host_header: &str,
        forwarded_proto: Option<&str>,
        scheme: &str,
    ) -> Option<&VirtualHost> {
        let (host, port) = split_host_port(host_header, forwarded_proto, scheme)?;
        self.index
            .get(&(host.to_ascii_lowercase(), port))
            .map(|&i| &self.vhosts[i])
    }

    /// All virtual hosts in listing order.
    pub fn virtual_hosts(&self) -> &[VirtualHost] {
        &self.vhosts
    }

    /// Number of virtual hosts.
    pub fn len(&self) -> usize {
        self.vhosts.len()
    }

    /// Returns `true` if the snapshot holds no virtual hosts.
    pub fn is_empty(&self) -> bool {
        self.vhosts.is_empty()
    }
}

fn default_port(proto: &str) -> Option<u16> {
    match proto.trim().to_ascii_lowercase().as_str() {
        "https" => Some(HTTPS_PORT),
        "http" => Some(HTTP_PORT),
        _ => None,
    }
}

/// Splits a `Host` header into hostname and port.
///
/// Returns `None` for an empty host or an unparsable port.
fn split_host_port<'a>(
    host_header: &'a str,
    forwarded_proto: Option<&str>,
    scheme: &str,
) -> Option<(&'a str, u16)> {
    let host_header = host_header.trim();

    let (host, explicit_port) = if let Some(rest) = host_header.strip_prefix('[') {
        // [v6-address]:port
        let (addr, after) = rest.split_once(']')?;
        match after.strip_prefix(':') {
            Some(port) => (addr, Some(port)),
            None if after.is_empty() => (addr, None),
            None => return None,
        }
    } else {
        match host_header.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_header, None),
        }
    };

    if host.is_empty() {
        return None;
    }

    let port = match explicit_port {
        Some(port) => port.parse().ok()?,
        None => forwarded_proto
            .and_then(default_port)
            .or_else(|| default_port(scheme))
            .unwrap_or(HTTP_PORT),
    };

    Some((host, port))
}

/// Holder of the current snapshot.
///
/// Replacement is a single pointer swap under a write lock; readers clone
/// the `Arc` and never observe a partially built snapshot.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Arc<VirtualHostSnapshot>>,
    loaded: AtomicBool,
    generation: AtomicU64,
}

impl SnapshotStore {
    /// Creates a store holding an empty, not-yet-loaded snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `vhosts`.
    pub fn with_virtual_hosts(vhosts: Vec<VirtualHost>) -> Self {
        let store = Self::new();
        store.replace(VirtualHostSnapshot::new(vhosts));
        store
    }

    /// Returns the current snapshot.
    pub fn load(&self) -> Arc<VirtualHostSnapshot> {
        self.current.read().clone()
    }

    /// Swaps in a new snapshot.
    pub fn replace(&self, snapshot: VirtualHostSnapshot) {
        let snapshot = Arc::new(snapshot);
        *self.current.write() = snapshot;
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.loaded.store(true, Ordering::Release);
    }

    /// Returns `true` once a snapshot has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Number of snapshots swapped in so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Periodically reloads virtual hosts from the database.
pub struct SnapshotRefresher {
    db: Arc<dyn Database>,
    store: Arc<SnapshotStore>,
    interval: Duration,
    running: AtomicBool,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
    loop_handle: RwLock<Option<JoinHandle<()>>>,
}

impl SnapshotRefresher {
    /// Creates a refresher polling `db` every `interval`.
    pub fn new(db: Arc<dyn Database>, store: Arc<SnapshotStore>, interval: Duration) -> Self {
        Self {
            db,
            store,
            interval,
            running: AtomicBool::new(false),
            shutdown_tx: RwLock::new(None),
            loop_handle: RwLock::new(None),
        }
    }

    /// Returns `true` while the polling loop runs.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Polls once. Returns `true` if a new snapshot was swapped in.
    ///
    /// # Errors
    ///
    /// Returns the database error; the current snapshot is left in place.
    pub async fn refresh_once(&self) -> StoreResult<bool> {
        let started = Instant::now();
        let result = self.db.virtual_hosts().await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.category(),
        };
        record_database_query(EntityKind::VirtualHost.as_str(), outcome, started.elapsed());

        let vhosts = result?;
        let current = self.store.load();
        if self.store.is_loaded() && current.virtual_hosts() == vhosts.as_slice() {
            debug!("virtual hosts unchanged");
            return Ok(false);
        }

        let initial = !self.store.is_loaded();
        let count = vhosts.len();
        self.store.replace(VirtualHostSnapshot::new(vhosts));
        record_snapshot_load("virtualhosts");

        if initial {
            info!(count, "initial load of virtual hosts");
        } else {
            info!(count, "virtual hosts reloaded");
        }
        Ok(true)
    }

    /// Starts the polling loop. The first poll happens immediately.
    ///
    /// Returns `false` if the loop is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.write() = Some(shutdown_tx);

        let refresher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresher.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = refresher.refresh_once().await {
                            warn!(
                                error = %e,
                                "could not retrieve virtual hosts, keeping current snapshot"
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("snapshot refresher received shutdown signal");
                        break;
                    }
                }
            }
        });

        *self.loop_handle.write() = Some(handle);
        info!(interval_ms = self.interval.as_millis() as u64, "snapshot refresher started");
        true
    }

    /// Stops the polling loop and waits for it to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let tx = self.shutdown_tx.write().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }

        let handle = self.loop_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        info!("snapshot refresher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vhost(name: &str, hosts: &[&str], port: u16) -> VirtualHost {
        VirtualHost {
            name: name.to_string(),
            virtual_hosts: hosts.iter().map(ToString::to_string).collect(),
            port,
            ..Default::default()
        }
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("api.example.com", None, "http"), Some(("api.example.com", 80)));
        assert_eq!(
            split_host_port("api.example.com", Some("https"), "http"),
            Some(("api.example.com", 443))
        );
        assert_eq!(
            split_host_port("api.example.com:8443", Some("http"), "http"),
            Some(("api.example.com", 8443))
        );
        assert_eq!(split_host_port("[::1]:9000", None, "http"), Some(("::1", 9000)));
        assert_eq!(split_host_port("[::1]", None, "https"), Some(("::1", 443)));
        assert_eq!(split_host_port("host:notaport", None, "http"), None);
        assert_eq!(split_host_port("", None, "http"), None);
    }

    #[test]
    fn test_lookup_case_insensitive_and_port_aware() {
        let snapshot = VirtualHostSnapshot::new(vec![
            vhost("public", &["API.example.com"], 443),
            vhost("plain", &["api.example.com"], 80),
        ]);

        let hit = snapshot.lookup("api.EXAMPLE.com", Some("https"), "http").unwrap();
        assert_eq!(hit.name, "public");

        let hit = snapshot.lookup("api.example.com", None, "http").unwrap();
        assert_eq!(hit.name, "plain");

        assert!(snapshot.lookup("api.example.com:8080", None, "http").is_none());
        assert!(snapshot.lookup("other.example.com", Some("https"), "http").is_none());
    }

    #[test]
    fn test_first_binding_wins() {
        let snapshot = VirtualHostSnapshot::new(vec![
            vhost("first", &["a.example.com"], 80),
            vhost("second", &["a.example.com", "b.example.com"], 80),
        ]);

        assert_eq!(snapshot.lookup("a.example.com", None, "http").unwrap().name, "first");
        assert_eq!(snapshot.lookup("b.example.com", None, "http").unwrap().name, "second");
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_store_swap_keeps_old_readers_consistent() {
        let store = SnapshotStore::new();
        assert!(!store.is_loaded());

        store.replace(VirtualHostSnapshot::new(vec![vhost("v1", &["a"], 80)]));
        let old = store.load();

        store.replace(VirtualHostSnapshot::new(vec![vhost("v2", &["a"], 80)]));
        assert_eq!(old.virtual_hosts()[0].name, "v1");
        assert_eq!(store.load().virtual_hosts()[0].name, "v2");
        assert_eq!(store.generation(), 2);
        assert!(store.is_loaded());
    }
}
