//! Turnstile Store - database collaborator and configuration snapshots.
//!
//! - [`Database`] - read contract every entity lookup falls back to
//! - [`MemoryDatabase`] - in-memory implementation seeded from JSON fixtures
//! - [`SnapshotStore`] / [`SnapshotRefresher`] - atomically swapped
//!   virtual-host snapshot kept fresh by a polling task
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use turnstile_store::{MemoryDatabase, SnapshotRefresher, SnapshotStore};
//!
//! let db = Arc::new(MemoryDatabase::from_fixture_file("fixtures.json")?);
//! let store = Arc::new(SnapshotStore::new());
//! let refresher = Arc::new(SnapshotRefresher::new(db, store.clone(), Duration::from_secs(2)));
//! refresher.start();
//!
//! let snapshot = store.load();
//! let vhost = snapshot.lookup("api.example.com", Some("https"), "http");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod database;
pub mod error;
pub mod memory;
pub mod snapshot;

pub use database::{BoxFuture, Database, EntityKind};
pub use error::{FixtureError, StoreError, StoreResult};
pub use memory::{Fixtures, MemoryDatabase};
pub use snapshot::{SnapshotRefresher, SnapshotStore, VirtualHostSnapshot};
