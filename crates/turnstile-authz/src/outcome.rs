//! Policy and chain outcomes.

use std::fmt;

use http::StatusCode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Message of a chain that never saw a credential.
pub const NO_CREDENTIALS: &str = "No credentials provided";

/// Headers or dynamic metadata, in insertion order.
pub type Fields = IndexMap<String, String>;

/// Status codes a denial may carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", from = "u16")]
pub enum DenyStatus {
    /// 401.
    Unauthorized,
    /// 403.
    #[default]
    Forbidden,
    /// 503.
    ServiceUnavailable,
}

impl DenyStatus {
    /// Maps any code onto the fixed set; unsupported codes become 403.
    pub const fn from_code(code: u16) -> Self {
        match code {
            401 => Self::Unauthorized,
            503 => Self::ServiceUnavailable,
            _ => Self::Forbidden,
        }
    }

    /// Numeric status code.
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::ServiceUnavailable => 503,
        }
    }

    /// HTTP status code.
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<u16> for DenyStatus {
    fn from(code: u16) -> Self {
        Self::from_code(code)
    }
}

impl From<DenyStatus> for u16 {
    fn from(status: DenyStatus) -> Self {
        status.as_u16()
    }
}

impl fmt::Display for DenyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// What a single policy decided.
///
/// The neutral outcome (the default) neither authenticates nor denies and
/// adds nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyOutcome {
    /// The policy established who the caller is.
    pub authenticated: bool,
    /// The policy rejects the request; the chain stops here.
    pub denied: bool,
    /// Status to deny with.
    pub status: DenyStatus,
    /// Message to deny with.
    pub message: String,
    /// Headers to add upstream.
    pub headers: Fields,
    /// Dynamic metadata for later filters.
    pub metadata: Fields,
}

impl PolicyOutcome {
    /// Neither authenticated nor denied.
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Authenticated.
    pub fn authenticated() -> Self {
        Self {
            authenticated: true,
            ..Self::default()
        }
    }

    /// Denied with `status` and `message`.
    pub fn deny(status: DenyStatus, message: impl Into<String>) -> Self {
        Self {
            denied: true,
            status,
            message: message.into(),
            ..Self::default()
        }
    }

    /// Adds an upstream header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a dynamic metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Accumulated result of one policy chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainResult {
    /// Some policy authenticated the request. Never reset once set.
    pub authenticated: bool,
    /// Starts `true`; only a denying policy writes it.
    pub denied: bool,
    /// Status to deny with.
    pub status: DenyStatus,
    /// Message to deny with.
    pub message: String,
    /// Merged upstream headers.
    pub headers: Fields,
    /// Merged dynamic metadata.
    pub metadata: Fields,
}

impl Default for ChainResult {
    fn default() -> Self {
        Self {
            authenticated: false,
            denied: true,
            status: DenyStatus::Forbidden,
            message: NO_CREDENTIALS.to_string(),
            headers: Fields::new(),
            metadata: Fields::new(),
        }
    }
}

impl ChainResult {
    /// Folds one policy outcome in. Returns `true` if the chain must stop.
    pub fn absorb(&mut self, outcome: PolicyOutcome) -> bool {
        self.headers.extend(outcome.headers);
        self.metadata.extend(outcome.metadata);
        if outcome.authenticated {
            self.authenticated = true;
        }
        if outcome.denied {
            self.denied = true;
            self.status = outcome.status;
            self.message = outcome.message;
            return true;
        }
        false
    }
}
