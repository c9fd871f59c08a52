//! In-memory [`Database`] implementation.
//!
//! Backs the server when no external database is configured and every test
//! that needs a collaborator. Seeded from a JSON fixture file or through
//! typed upserts; counts queries per kind and can simulate slow or failing
//! backends.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use turnstile_core::{
    redact, ApiProduct, Credential, Developer, DeveloperApp, OAuthToken, VirtualHost,
};

use crate::database::{BoxFuture, Database, EntityKind};
use crate::error::{FixtureError, StoreError, StoreResult};

/// Seed data for a [`MemoryDatabase`].
///
/// ```json
/// {
///   "credentials": [{"consumerKey": "KEY1", "appId": "app-1", "organizationName": "acme",
///                    "status": "approved", "expiresAt": -1}],
///   "developerApps": [{"appId": "app-1", "developerId": "dev-1", "name": "widgets"}],
///   "developers": [{"developerId": "dev-1", "email": "dev@example.com"}],
///   "apiProducts": [{"name": "WidgetAPI", "organizationName": "acme", "paths": ["/v1/*"]}],
///   "oauthTokens": [],
///   "virtualHosts": [{"name": "public", "virtualHosts": ["api.example.com"], "port": 443}]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Fixtures {
    /// API key credentials.
    pub credentials: Vec<Credential>,
    /// Developer apps.
    pub developer_apps: Vec<DeveloperApp>,
    /// Developers.
    pub developers: Vec<Developer>,
    /// API products.
    pub api_products: Vec<ApiProduct>,
    /// OAuth token rows.
    pub oauth_tokens: Vec<OAuthToken>,
    /// Virtual hosts.
    pub virtual_hosts: Vec<VirtualHost>,
}

impl Fixtures {
    /// Reads fixtures from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `FixtureError` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| FixtureError::read(path, e))?;
        serde_json::from_str(&content).map_err(|e| FixtureError::parse(path, e))
    }
}

/// Thread-safe in-memory database.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    credentials: RwLock<HashMap<(String, String), Credential>>,
    developer_apps: RwLock<HashMap<String, DeveloperApp>>,
    developers: RwLock<HashMap<String, Developer>>,
    api_products: RwLock<HashMap<(String, String), ApiProduct>>,
    oauth_tokens: RwLock<Vec<OAuthToken>>,
    virtual_hosts: RwLock<Vec<VirtualHost>>,
    queries: DashMap<EntityKind, u64>,
    latency: RwLock<Duration>,
    unavailable: AtomicBool,
}

impl MemoryDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a database seeded with `fixtures`.
    pub fn from_fixtures(fixtures: Fixtures) -> Self {
        let db = Self::new();
        db.load(fixtures);
        db
    }

    /// Creates a database seeded from a JSON fixture file.
    ///
    /// # Errors
    ///
    /// Returns `FixtureError` if the file cannot be read or parsed.
    pub fn from_fixture_file(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let path = path.as_ref();
        let fixtures = Fixtures::from_file(path)?;
        info!(
            path = %path.display(),
            credentials = fixtures.credentials.len(),
            developers = fixtures.developers.len(),
            api_products = fixtures.api_products.len(),
            virtual_hosts = fixtures.virtual_hosts.len(),
            "loaded database fixtures"
        );
        Ok(Self::from_fixtures(fixtures))
    }

    /// Upserts every entity in `fixtures`.
    pub fn load(&self, fixtures: Fixtures) {
        for credential in fixtures.credentials {
            self.upsert_credential(credential);
        }
        for app in fixtures.developer_apps {
            self.upsert_developer_app(app);
        }
        for developer in fixtures.developers {
            self.upsert_developer(developer);
        }
        for product in fixtures.api_products {
            self.upsert_api_product(product);
        }
        for token in fixtures.oauth_tokens {
            self.upsert_oauth_token(token);
        }
        for vhost in fixtures.virtual_hosts {
            self.upsert_virtual_host(vhost);
        }
    }

    /// Inserts or replaces a credential, keyed by organization and API key.
    pub fn upsert_credential(&self, credential: Credential) {
        let key = (
            credential.organization_name.clone(),
            credential.consumer_key.clone(),
        );
        self.credentials.write().insert(key, credential);
    }

    /// Removes a credential. Returns `true` if it existed.
    pub fn remove_credential(&self, organization: &str, api_key: &str) -> bool {
        self.credentials
            .write()
            .remove(&(organization.to_string(), api_key.to_string()))
            .is_some()
    }

    /// Inserts or replaces a developer app, keyed by app id.
    pub fn upsert_developer_app(&self, app: DeveloperApp) {
        self.developer_apps.write().insert(app.app_id.clone(), app);
    }

    /// Removes a developer app. Returns `true` if it existed.
    pub fn remove_developer_app(&self, app_id: &str) -> bool {
        self.developer_apps.write().remove(app_id).is_some()
    }

    /// Inserts or replaces a developer, keyed by developer id.
    pub fn upsert_developer(&self, developer: Developer) {
        self.developers
            .write()
            .insert(developer.developer_id.clone(), developer);
    }

    /// Removes a developer. Returns `true` if it existed.
    pub fn remove_developer(&self, developer_id: &str) -> bool {
        self.developers.write().remove(developer_id).is_some()
    }

    /// Inserts or replaces an API product, keyed by organization and name.
    pub fn upsert_api_product(&self, product: ApiProduct) {
        let key = (product.organization_name.clone(), product.name.clone());
        self.api_products.write().insert(key, product);
    }

    /// Inserts or replaces an OAuth token row, matched on access token.
    pub fn upsert_oauth_token(&self, token: OAuthToken) {
        let mut tokens = self.oauth_tokens.write();
        match tokens.iter_mut().find(|t| t.access == token.access) {
            Some(existing) => *existing = token,
            None => tokens.push(token),
        }
    }

    /// Inserts or replaces a virtual host, matched on name. Order of first
    /// insertion is kept.
    pub fn upsert_virtual_host(&self, vhost: VirtualHost) {
        let mut vhosts = self.virtual_hosts.write();
        match vhosts.iter_mut().find(|v| v.name == vhost.name) {
            Some(existing) => *existing = vhost,
            None => vhosts.push(vhost),
        }
    }

    /// Removes a virtual host by name. Returns `true` if it existed.
    pub fn remove_virtual_host(&self, name: &str) -> bool {
        let mut vhosts = self.virtual_hosts.write();
        let before = vhosts.len();
        vhosts.retain(|v| v.name != name);
        vhosts.len() != before
    }

    /// Number of queries served for `kind`, failed ones included.
    pub fn query_count(&self, kind: EntityKind) -> u64 {
        self.queries.get(&kind).map_or(0, |c| *c)
    }

    /// Number of queries served across all kinds.
    pub fn total_queries(&self) -> u64 {
        self.queries.iter().map(|entry| *entry.value()).sum()
    }

    /// Delays every subsequent query by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Makes every subsequent query fail with a backend error while `true`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    async fn begin_query(&self, kind: EntityKind) -> StoreResult<()> {
        *self.queries.entry(kind).or_insert(0) += 1;

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::backend(kind, "database unavailable"));
        }
        Ok(())
    }

    fn missing(kind: EntityKind, key: &str) -> StoreError {
        let key = if kind.key_is_secret() {
            redact(key)
        } else {
            key.to_string()
        };
        debug!(kind = %kind, key = %key, "entity not found");
        StoreError::not_found(kind, key)
    }

    fn find_token(
        &self,
        kind: EntityKind,
        needle: &str,
        field: impl Fn(&OAuthToken) -> &str,
    ) -> StoreResult<OAuthToken> {
        let found = self
            .oauth_tokens
            .read()
            .iter()
            .find(|t| !needle.is_empty() && field(t) == needle)
            .cloned();
        found.ok_or_else(|| Self::missing(kind, needle))
    }
}

impl Database for MemoryDatabase {
    fn credential<'a>(
        &'a self,
        organization: &'a str,
        api_key: &'a str,
    ) -> BoxFuture<'a, StoreResult<Credential>> {
        Box::pin(async move {
            self.begin_query(EntityKind::Credential).await?;
            let found = self
                .credentials
                .read()
                .get(&(organization.to_string(), api_key.to_string()))
                .cloned();
            found.ok_or_else(|| Self::missing(EntityKind::Credential, api_key))
        })
    }

    fn developer_app<'a>(&'a self, app_id: &'a str) -> BoxFuture<'a, StoreResult<DeveloperApp>> {
        Box::pin(async move {
            self.begin_query(EntityKind::DeveloperApp).await?;
            let found = self.developer_apps.read().get(app_id).cloned();
            found.ok_or_else(|| Self::missing(EntityKind::DeveloperApp, app_id))
        })
    }

    fn developer<'a>(&'a self, developer_id: &'a str) -> BoxFuture<'a, StoreResult<Developer>> {
        Box::pin(async move {
            self.begin_query(EntityKind::Developer).await?;
            let found = self.developers.read().get(developer_id).cloned();
            found.ok_or_else(|| Self::missing(EntityKind::Developer, developer_id))
        })
    }

    fn api_product<'a>(
        &'a self,
        organization: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, StoreResult<ApiProduct>> {
        Box::pin(async move {
            self.begin_query(EntityKind::ApiProduct).await?;
            let found = self
                .api_products
                .read()
                .get(&(organization.to_string(), name.to_string()))
                .cloned();
            found.ok_or_else(|| Self::missing(EntityKind::ApiProduct, name))
        })
    }

    fn oauth_token_by_access<'a>(
        &'a self,
        access: &'a str,
    ) -> BoxFuture<'a, StoreResult<OAuthToken>> {
        Box::pin(async move {
            self.begin_query(EntityKind::OAuthAccessToken).await?;
            self.find_token(EntityKind::OAuthAccessToken, access, |t| t.access.as_str())
        })
    }

    fn oauth_token_by_refresh<'a>(
        &'a self,
        refresh: &'a str,
    ) -> BoxFuture<'a, StoreResult<OAuthToken>> {
        Box::pin(async move {
            self.begin_query(EntityKind::OAuthRefreshToken).await?;
            self.find_token(EntityKind::OAuthRefreshToken, refresh, |t| t.refresh.as_str())
        })
    }

    fn oauth_token_by_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, StoreResult<OAuthToken>> {
        Box::pin(async move {
            self.begin_query(EntityKind::OAuthCode).await?;
            self.find_token(EntityKind::OAuthCode, code, |t| t.code.as_str())
        })
    }

    fn virtual_hosts(&self) -> BoxFuture<'_, StoreResult<Vec<VirtualHost>>> {
        Box::pin(async move {
            self.begin_query(EntityKind::VirtualHost).await?;
            Ok(self.virtual_hosts.read().clone())
        })
    }
}
