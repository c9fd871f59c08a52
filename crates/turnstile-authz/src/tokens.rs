//! OAuth token lookups through the entity cache.

use std::sync::Arc;

use tracing::debug;
use turnstile_cache::{CacheKey, EntityCache};
use turnstile_core::{redact, OAuthToken};
use turnstile_store::{Database, EntityKind, StoreError, StoreResult};

/// Read side of the OAuth token store.
///
/// Each of the three lookups caches under its own kind, so a token row
/// fetched by access token is not reused for a refresh-token lookup.
#[derive(Clone)]
pub struct OAuthTokenStore {
    cache: Arc<EntityCache>,
    db: Arc<dyn Database>,
}

impl std::fmt::Debug for OAuthTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenStore").finish_non_exhaustive()
    }
}

impl OAuthTokenStore {
    /// Creates a store reading through `cache` into `db`.
    pub fn new(cache: Arc<EntityCache>, db: Arc<dyn Database>) -> Self {
        Self { cache, db }
    }

    /// Token row by access token.
    pub async fn by_access(&self, access: &str) -> StoreResult<OAuthToken> {
        self.lookup(EntityKind::OAuthAccessToken, access).await
    }

    /// Token row by refresh token.
    pub async fn by_refresh(&self, refresh: &str) -> StoreResult<OAuthToken> {
        self.lookup(EntityKind::OAuthRefreshToken, refresh).await
    }

    /// Token row by authorization code.
    pub async fn by_code(&self, code: &str) -> StoreResult<OAuthToken> {
        self.lookup(EntityKind::OAuthCode, code).await
    }

    async fn lookup(&self, kind: EntityKind, token: &str) -> StoreResult<OAuthToken> {
        if token.is_empty() {
            return Err(StoreError::not_found(kind, ""));
        }
        debug!(kind = %kind, token = %redact(token), "oauth token lookup");

        let key = CacheKey::new(kind, token);
        let fetch = match kind {
            EntityKind::OAuthRefreshToken => self.db.oauth_token_by_refresh(token),
            EntityKind::OAuthCode => self.db.oauth_token_by_code(token),
            _ => self.db.oauth_token_by_access(token),
        };
        self.cache.get_or_fetch(key, fetch).await
    }
}
