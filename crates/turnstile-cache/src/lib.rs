//! # Turnstile Cache
//!
//! Read-through cache for the entities consulted on every authorization
//! check: credentials, developer apps, developers, API products and OAuth
//! tokens.
//!
//! ## Behavior
//!
//! - Entities are cached for a TTL and returned by copy
//! - Misses reported by the database are remembered for a shorter TTL, so a
//!   flood of bad keys does not reach the database
//! - Backend failures and timeouts are never cached
//! - Capacity is bounded; expired entries go first, then the oldest
//!
//! ## Example
//!
//! ```rust,ignore
//! use turnstile_cache::{CacheConfig, CacheKey, EntityCache};
//! use turnstile_store::EntityKind;
//!
//! let cache = EntityCache::new(CacheConfig::production());
//! let key = CacheKey::new(EntityKind::Developer, "dev-1");
//! let developer = cache
//!     .get_or_fetch(key, db.developer("dev-1"))
//!     .await?;
//! ```

#![doc(html_root_url = "https://docs.rs/turnstile-cache/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod cache;
mod config;
mod entry;
mod error;

pub use cache::{CacheLookup, CacheStats, EntityCache};
pub use config::CacheConfig;
pub use entry::{CacheKey, Cacheable, CachedEntity};
pub use error::{CacheError, CacheResult};
