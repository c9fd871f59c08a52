//! Cache configuration.

use std::time::Duration;

/// Configuration for the entity cache.
///
/// Fixed at construction for the lifetime of the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries, positive and negative combined.
    /// Zero disables caching.
    pub max_entries: usize,
    /// Lifetime of a cached entity.
    pub ttl: Duration,
    /// Lifetime of a recorded miss.
    pub negative_ttl: Duration,
    /// Bound on a single database fetch.
    pub fetch_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(60),
            negative_ttl: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(1),
        }
    }
}

impl CacheConfig {
    /// Create a production cache configuration.
    pub fn production() -> Self {
        Self {
            max_entries: 100_000,
            ttl: Duration::from_secs(60),
            negative_ttl: Duration::from_secs(10),
            fetch_timeout: Duration::from_millis(500),
        }
    }

    /// Create a development cache configuration.
    pub fn development() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Duration::from_secs(5),
            negative_ttl: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(5),
        }
    }

    /// Disable caching. Every lookup goes to the database.
    pub fn disabled() -> Self {
        Self {
            max_entries: 0,
            ttl: Duration::ZERO,
            negative_ttl: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Set the maximum number of entries.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the entity TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the negative TTL.
    pub fn with_negative_ttl(mut self, negative_ttl: Duration) -> Self {
        self.negative_ttl = negative_ttl;
        self
    }

    /// Set the database fetch timeout.
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Returns `true` if caching is enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_entries > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert!(CacheConfig::default().is_enabled());
        assert!(!CacheConfig::disabled().is_enabled());
        assert!(CacheConfig::production().max_entries > CacheConfig::development().max_entries);
    }

    #[test]
    fn test_builders() {
        let config = CacheConfig::default()
            .with_max_entries(3)
            .with_ttl(Duration::from_secs(2))
            .with_negative_ttl(Duration::from_secs(1))
            .with_fetch_timeout(Duration::from_millis(50));

        assert_eq!(config.max_entries, 3);
        assert_eq!(config.ttl, Duration::from_secs(2));
        assert_eq!(config.negative_ttl, Duration::from_secs(1));
        assert_eq!(config.fetch_timeout, Duration::from_millis(50));
    }
}
