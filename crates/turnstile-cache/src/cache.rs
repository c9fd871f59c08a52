//! Read-through entity cache.
//!
//! One process-wide [`EntityCache`] sits in front of the database for every
//! per-request lookup. Entries live for the configured TTL; recorded misses
//! live for the negative TTL. The map is sharded, so requests touching
//! different keys do not contend on a single lock.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};
use turnstile_core::{SharedClock, SystemClock};
use turnstile_store::{StoreError, StoreResult};
use turnstile_telemetry::metrics::{record_cache_lookup, record_database_query};

use crate::config::CacheConfig;
use crate::entry::{CacheKey, Cacheable, CachedEntity};
use crate::error::{CacheError, CacheResult};

/// Outcome of [`EntityCache::get`].
///
/// A recorded miss is reported as [`CacheLookup::Miss`], the same as a key
/// that was never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<T> {
    /// A live entry.
    Hit(T),
    /// Nothing usable cached.
    Miss,
}

impl<T> CacheLookup<T> {
    /// Returns `true` on a hit.
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Converts into an `Option`.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss => None,
        }
    }
}

#[derive(Debug)]
enum Found<T> {
    Hit(T),
    Negative,
    Miss,
}

#[derive(Debug, Clone)]
enum SlotValue {
    Present(CachedEntity),
    Absent,
}

#[derive(Debug, Clone)]
struct Slot {
    value: SlotValue,
    expires_at: i64,
    sequence: u64,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered with a live entity.
    pub hits: u64,
    /// Lookups that found nothing live.
    pub misses: u64,
    /// Lookups that found a live recorded miss.
    pub negative_hits: u64,
    /// Entries removed to make room or because they expired.
    pub evictions: u64,
    /// Writes rejected.
    pub store_failures: u64,
    /// Entries currently held, expired ones included until evicted.
    pub size: usize,
}

/// Process-wide entity cache.
#[derive(Debug)]
pub struct EntityCache {
    config: CacheConfig,
    clock: SharedClock,
    entries: DashMap<CacheKey, Slot>,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    negative_hits: AtomicU64,
    evictions: AtomicU64,
    store_failures: AtomicU64,
}

impl EntityCache {
    /// Creates a cache using the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Creates a cache reading time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            entries: DashMap::new(),
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            negative_hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
        }
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Looks up `key`, returning an independent copy on a hit.
    pub fn get<T: Cacheable>(&self, key: &CacheKey) -> CacheLookup<T> {
        match self.find(key) {
            Found::Hit(value) => CacheLookup::Hit(value),
            Found::Negative | Found::Miss => CacheLookup::Miss,
        }
    }

    /// Caches a copy of `value` under `key` for the entity TTL.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if caching is disabled or no room is left.
    pub fn store<T: Cacheable>(&self, key: CacheKey, value: &T) -> CacheResult<()> {
        let entry = value.clone().into_entry();
        self.insert(key, SlotValue::Present(entry), self.config.ttl)
    }

    /// Records that `key` does not exist, for the negative TTL.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if caching is disabled or no room is left.
    pub fn store_negative(&self, key: CacheKey) -> CacheResult<()> {
        self.insert(key, SlotValue::Absent, self.config.negative_ttl)
    }

    /// Removes `key`. Returns `true` if an entry existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }

    /// Cache-or-fetch.
    ///
    /// On a hit returns the cached copy. On a live recorded miss returns
    /// `NotFound` without touching the database. Otherwise awaits `fetch`
    /// bounded by the configured timeout: a found entity is cached
    /// (best-effort) and returned, `NotFound` is recorded as a miss, and any
    /// other failure is returned without caching.
    ///
    /// Dropping the returned future abandons the fetch and leaves the cache
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns the database error, or `StoreError::Timeout` when the fetch
    /// exceeds the configured bound.
    pub async fn get_or_fetch<T, F>(&self, key: CacheKey, fetch: F) -> StoreResult<T>
    where
        T: Cacheable,
        F: Future<Output = StoreResult<T>>,
    {
        match self.find::<T>(&key) {
            Found::Hit(value) => return Ok(value),
            Found::Negative => return Err(StoreError::not_found(key.kind(), key.display_id())),
            Found::Miss => {}
        }

        let kind = key.kind();
        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.fetch_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::timeout(kind, self.config.fetch_timeout)),
        };
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.category(),
        };
        record_database_query(kind.as_str(), outcome, started.elapsed());

        match result {
            Ok(value) => {
                if let Err(e) = self.store(key.clone(), &value) {
                    debug!(kind = %kind, key = ?key, error = %e, "could not cache entity");
                }
                Ok(value)
            }
            Err(e) if e.is_not_found() => {
                if let Err(store_err) = self.store_negative(key.clone()) {
                    debug!(kind = %kind, key = ?key, error = %store_err, "could not cache miss");
                }
                Err(e)
            }
            Err(e) => {
                warn!(kind = %kind, key = ?key, error = %e, "database fetch failed");
                Err(e)
            }
        }
    }

    fn find<T: Cacheable>(&self, key: &CacheKey) -> Found<T> {
        let now = self.clock.now_millis();
        let kind = key.kind().as_str();

        let (found, expired) = match self.entries.get(key) {
            None => (Found::Miss, false),
            Some(slot) if slot.expires_at <= now => (Found::Miss, true),
            Some(slot) => match &slot.value {
                // A different type under the same key is treated as absent.
                SlotValue::Present(entry) => {
                    (T::from_entry(entry).map_or(Found::Miss, Found::Hit), false)
                }
                SlotValue::Absent => (Found::Negative, false),
            },
        };

        if expired && self
            .entries
            .remove_if(key, |_, slot| slot.expires_at <= now)
            .is_some()
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        match &found {
            Found::Hit(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                record_cache_lookup(kind, "hit");
            }
            Found::Negative => {
                self.negative_hits.fetch_add(1, Ordering::Relaxed);
                record_cache_lookup(kind, "negative_hit");
            }
            Found::Miss => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                record_cache_lookup(kind, "miss");
            }
        }
        found
    }

    fn insert(&self, key: CacheKey, value: SlotValue, ttl: Duration) -> CacheResult<()> {
        let max_entries = self.config.max_entries;
        if max_entries == 0 {
            return Err(CacheError::Disabled);
        }

        let now = self.clock.now_millis();

        if !self.entries.contains_key(&key) && self.entries.len() >= max_entries {
            self.make_room(now);
            if self.entries.len() >= max_entries {
                self.store_failures.fetch_add(1, Ordering::Relaxed);
                return Err(CacheError::Capacity { max_entries });
            }
        }

        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let slot = Slot {
            value,
            expires_at: now.saturating_add(ttl_millis),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.entries.insert(key, slot);
        Ok(())
    }

    // Drops expired entries, then the oldest ones until one slot is free.
    fn make_room(&self, now: i64) {
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.expires_at > now);
        let expired = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(expired as u64, Ordering::Relaxed);

        while self.entries.len() >= self.config.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().sequence)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    if self.entries.remove(&key).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }
}
