//! Error types for the authorization crate.

use thiserror::Error;
use turnstile_store::StoreError;

use crate::outcome::DenyStatus;

/// Result type for entitlement resolution.
pub type EntitlementResult<T> = Result<T, EntitlementError>;

/// Errors raised while building a request context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The request path is not a valid origin-form or absolute URI.
    #[error("cannot parse url")]
    MalformedPath,

    /// The query string contains an invalid percent escape.
    #[error("cannot parse query parameters")]
    MalformedQuery,
}

impl ContextError {
    /// Label used for the rejected-request counter.
    pub const fn category(&self) -> &'static str {
        "malformed_request"
    }
}

/// Reasons an API key does not grant access to the requested path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntitlementError {
    /// No credential exists for the key.
    #[error("api key not found")]
    UnknownApiKey,

    /// The credential points at a developer app that does not exist.
    #[error("credential references missing developer app {app_id}")]
    OrphanedCredential {
        /// App id carried by the credential.
        app_id: String,
    },

    /// The developer app points at a developer that does not exist.
    #[error("developer app {app_id} references missing developer {developer_id}")]
    OrphanedApp {
        /// The app.
        app_id: String,
        /// Developer id carried by the app.
        developer_id: String,
    },

    /// The owning developer is suspended.
    #[error("developer {developer_id} suspended until {until}")]
    DeveloperSuspended {
        /// The developer.
        developer_id: String,
        /// End of the suspension, epoch milliseconds.
        until: i64,
    },

    /// The credential status is not `approved`.
    #[error("credential not approved (status {status:?})")]
    CredentialNotApproved {
        /// Stored status.
        status: String,
    },

    /// The credential is past its expiry.
    #[error("credential expired at {expires_at}")]
    CredentialExpired {
        /// Expiry, epoch milliseconds.
        expires_at: i64,
    },

    /// No approved product has a path pattern matching the request.
    #[error("no authorized api product for path {path}")]
    NoAuthorizedPath {
        /// Request path.
        path: String,
    },

    /// The database failed or timed out.
    #[error("backend error: {0}")]
    Backend(#[from] StoreError),
}

impl EntitlementError {
    /// Message safe to return to the client.
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::UnknownApiKey => "Unknown API key",
            Self::OrphanedCredential { .. } | Self::OrphanedApp { .. } => "API key not usable",
            Self::DeveloperSuspended { .. } => "Developer suspended",
            Self::CredentialNotApproved { .. } => "Unapproved API key",
            Self::CredentialExpired { .. } => "Expired API key",
            Self::NoAuthorizedPath { .. } => "Not authorized for requested path",
            Self::Backend(_) => "Authorization backend unavailable",
        }
    }

    /// Status to deny with.
    pub const fn deny_status(&self) -> DenyStatus {
        match self {
            Self::Backend(_) => DenyStatus::ServiceUnavailable,
            _ => DenyStatus::Forbidden,
        }
    }

    /// Metric label.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::UnknownApiKey => "unknown_api_key",
            Self::OrphanedCredential { .. } => "orphaned_credential",
            Self::OrphanedApp { .. } => "orphaned_app",
            Self::DeveloperSuspended { .. } => "developer_suspended",
            Self::CredentialNotApproved { .. } => "credential_not_approved",
            Self::CredentialExpired { .. } => "credential_expired",
            Self::NoAuthorizedPath { .. } => "no_authorized_path",
            Self::Backend(_) => "backend",
        }
    }

    /// Returns `true` for stored data that contradicts itself.
    pub const fn is_data_integrity(&self) -> bool {
        matches!(self, Self::OrphanedCredential { .. } | Self::OrphanedApp { .. })
    }
}

/// A policy list named a policy the registry does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown policy: {name}")]
pub struct UnknownPolicy {
    /// The name as written in the policy list, trimmed.
    pub name: String,
}
