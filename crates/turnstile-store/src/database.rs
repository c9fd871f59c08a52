//! Database collaborator contract.
//!
//! The authorization path never talks to a concrete backend. Per-request
//! lookups go through the entity cache, which falls back to a [`Database`]
//! on miss; only the snapshot refresher calls [`Database::virtual_hosts`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use turnstile_core::{ApiProduct, Credential, Developer, DeveloperApp, OAuthToken, VirtualHost};

use crate::error::StoreResult;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Kinds of stored entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// API key credential.
    Credential,
    /// Developer application.
    DeveloperApp,
    /// Developer.
    Developer,
    /// API product.
    ApiProduct,
    /// OAuth token looked up by access token.
    OAuthAccessToken,
    /// OAuth token looked up by refresh token.
    OAuthRefreshToken,
    /// OAuth token looked up by authorization code.
    OAuthCode,
    /// Virtual host listing.
    VirtualHost,
}

impl EntityKind {
    /// Every entity kind, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Credential,
        Self::DeveloperApp,
        Self::Developer,
        Self::ApiProduct,
        Self::OAuthAccessToken,
        Self::OAuthRefreshToken,
        Self::OAuthCode,
        Self::VirtualHost,
    ];

    /// Stable label used in cache keys, logs and metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::DeveloperApp => "developer_app",
            Self::Developer => "developer",
            Self::ApiProduct => "api_product",
            Self::OAuthAccessToken => "oauth_access",
            Self::OAuthRefreshToken => "oauth_refresh",
            Self::OAuthCode => "oauth_code",
            Self::VirtualHost => "virtual_host",
        }
    }

    /// Returns `true` if the lookup key of this kind is a secret.
    pub const fn key_is_secret(&self) -> bool {
        matches!(
            self,
            Self::Credential | Self::OAuthAccessToken | Self::OAuthRefreshToken | Self::OAuthCode
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read contract of the configuration database.
///
/// Every single-entity lookup fails with
/// [`StoreError::NotFound`](crate::StoreError::NotFound) when the entity does
/// not exist, and with another variant on transport or backend failure.
/// Implementations perform no retries of their own that would outlive the
/// caller's timeout; dropping a returned future abandons the query.
pub trait Database: Send + Sync + 'static {
    /// Looks up an API key credential within an organization.
    fn credential<'a>(
        &'a self,
        organization: &'a str,
        api_key: &'a str,
    ) -> BoxFuture<'a, StoreResult<Credential>>;

    /// Looks up a developer app by app id.
    fn developer_app<'a>(&'a self, app_id: &'a str) -> BoxFuture<'a, StoreResult<DeveloperApp>>;

    /// Looks up a developer by developer id.
    fn developer<'a>(&'a self, developer_id: &'a str) -> BoxFuture<'a, StoreResult<Developer>>;

    /// Looks up an API product by name within an organization.
    fn api_product<'a>(
        &'a self,
        organization: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, StoreResult<ApiProduct>>;

    /// Looks up an OAuth token row by its access token.
    fn oauth_token_by_access<'a>(&'a self, access: &'a str)
        -> BoxFuture<'a, StoreResult<OAuthToken>>;

    /// Looks up an OAuth token row by its refresh token.
    fn oauth_token_by_refresh<'a>(
        &'a self,
        refresh: &'a str,
    ) -> BoxFuture<'a, StoreResult<OAuthToken>>;

    /// Looks up an OAuth token row by its authorization code.
    fn oauth_token_by_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, StoreResult<OAuthToken>>;

    /// Lists every virtual host. Used by the snapshot refresher only.
    fn virtual_hosts(&self) -> BoxFuture<'_, StoreResult<Vec<VirtualHost>>>;
}
