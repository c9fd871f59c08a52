//! Snapshot refresher behavior against the in-memory database.

use std::sync::Arc;
use std::time::Duration;

use turnstile_core::VirtualHost;
use turnstile_store::{Database, EntityKind, MemoryDatabase, SnapshotRefresher, SnapshotStore};

fn vhost(name: &str, host: &str, policies: &str) -> VirtualHost {
    VirtualHost {
        name: name.to_string(),
        organization_name: "acme".to_string(),
        virtual_hosts: vec![host.to_string()],
        port: 443,
        policies: policies.to_string(),
        ..Default::default()
    }
}

fn setup() -> (Arc<MemoryDatabase>, Arc<SnapshotStore>, Arc<SnapshotRefresher>) {
    let db = Arc::new(MemoryDatabase::new());
    let store = Arc::new(SnapshotStore::new());
    let dyn_db: Arc<dyn Database> = db.clone();
    let refresher = Arc::new(SnapshotRefresher::new(
        dyn_db,
        store.clone(),
        Duration::from_secs(2),
    ));
    (db, store, refresher)
}

#[tokio::test]
async fn test_refresh_once_swaps_only_on_change() {
    let (db, store, refresher) = setup();
    db.upsert_virtual_host(vhost("public", "api.example.com", "apikey"));

    assert!(refresher.refresh_once().await.unwrap());
    assert!(store.is_loaded());
    assert_eq!(store.generation(), 1);

    assert!(!refresher.refresh_once().await.unwrap());
    assert_eq!(store.generation(), 1);

    db.upsert_virtual_host(vhost("public", "api.example.com", "apikey,qps"));
    assert!(refresher.refresh_once().await.unwrap());
    assert_eq!(store.generation(), 2);

    let snapshot = store.load();
    let found = snapshot
        .lookup("api.example.com", Some("https"), "http")
        .unwrap();
    assert_eq!(found.policies, "apikey,qps");
}

#[tokio::test]
async fn test_initial_empty_listing_marks_loaded() {
    let (_db, store, refresher) = setup();

    assert!(refresher.refresh_once().await.unwrap());
    assert!(store.is_loaded());
    assert!(store.load().is_empty());
}

#[tokio::test]
async fn test_failed_refresh_keeps_snapshot() {
    let (db, store, refresher) = setup();
    db.upsert_virtual_host(vhost("public", "api.example.com", "apikey"));
    refresher.refresh_once().await.unwrap();

    db.set_unavailable(true);
    assert!(refresher.refresh_once().await.is_err());

    assert_eq!(store.generation(), 1);
    assert_eq!(store.load().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_loop_picks_up_changes() {
    let (db, store, refresher) = setup();
    db.upsert_virtual_host(vhost("public", "api.example.com", "apikey"));

    assert!(refresher.start());
    assert!(!refresher.start());

    // First tick fires immediately.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.generation(), 1);

    db.upsert_virtual_host(vhost("partner", "partner.example.com", "oauth2"));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.generation(), 2);
    assert!(store
        .load()
        .lookup("partner.example.com", Some("https"), "http")
        .is_some());

    refresher.stop().await;
    assert!(!refresher.is_running());

    let polls = db.query_count(EntityKind::VirtualHost);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(db.query_count(EntityKind::VirtualHost), polls);
}
