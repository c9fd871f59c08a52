//! Entity data model.
//!
//! These are the records the authorization path reads: the entitlement chain
//! (credential → app → developer → product), OAuth tokens and virtual hosts.
//! All types are plain values; cloning one yields an independent copy.

use serde::{Deserialize, Serialize};

use crate::attribute::AttributeBag;

/// Status value marking a credential or entitlement as usable.
pub const STATUS_APPROVED: &str = "approved";

/// Timestamp sentinel for "not set" (no expiry, not suspended).
pub const NEVER: i64 = -1;

/// A `(product, status)` pair recorded on a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductEntitlement {
    /// Name of the API product.
    pub api_product: String,
    /// Entitlement status; only `approved` entries are matched.
    pub status: String,
}

impl ProductEntitlement {
    /// Creates an entitlement.
    pub fn new(api_product: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            api_product: api_product.into(),
            status: status.into(),
        }
    }

    /// Creates an approved entitlement.
    pub fn approved(api_product: impl Into<String>) -> Self {
        Self::new(api_product, STATUS_APPROVED)
    }

    /// Returns `true` if this entitlement is approved.
    pub fn is_approved(&self) -> bool {
        self.status == STATUS_APPROVED
    }
}

/// An API key issued to a developer app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credential {
    /// The API key itself.
    pub consumer_key: String,
    /// Secret paired with the key (never forwarded upstream).
    pub consumer_secret: String,
    /// Owning developer app.
    pub app_id: String,
    /// Organization the key belongs to.
    pub organization_name: String,
    /// Approval status. Absent means not approved.
    pub status: String,
    /// Expiry in epoch milliseconds, [`NEVER`] if it does not expire.
    /// Absent reads as `0`, which has already passed.
    pub expires_at: i64,
    /// Issue time in epoch milliseconds.
    pub issued_at: i64,
    /// Product entitlements in stored order.
    pub api_products: Vec<ProductEntitlement>,
    /// Extra attributes.
    pub attributes: AttributeBag,
}

impl Credential {
    /// Returns `true` if the credential status is `approved`.
    pub fn is_approved(&self) -> bool {
        self.status == STATUS_APPROVED
    }

    /// Returns `true` if the credential has an expiry that lies before `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at != NEVER && now > self.expires_at
    }
}

/// An application registered by a developer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeveloperApp {
    /// Primary key.
    pub app_id: String,
    /// Owning developer.
    pub developer_id: String,
    /// Application name.
    pub name: String,
    /// Friendly name.
    pub display_name: String,
    /// Organization the app belongs to.
    pub organization_name: String,
    /// App status.
    pub status: String,
    /// Extra attributes (`IPAccessList`, `Referers`, ..).
    pub attributes: AttributeBag,
}

/// A developer owning one or more apps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Developer {
    /// Primary key.
    pub developer_id: String,
    /// Contact email.
    pub email: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Login name.
    pub user_name: String,
    /// Organization the developer belongs to.
    pub organization_name: String,
    /// Developer status.
    pub status: String,
    /// Suspension end in epoch milliseconds, [`NEVER`] if not suspended.
    pub suspended_till: i64,
    /// Extra attributes.
    pub attributes: AttributeBag,
}

impl Default for Developer {
    fn default() -> Self {
        Self {
            developer_id: String::new(),
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            user_name: String::new(),
            organization_name: String::new(),
            status: "active".to_string(),
            suspended_till: NEVER,
            attributes: AttributeBag::new(),
        }
    }
}

impl Developer {
    /// Returns `true` if the developer is suspended at `now`.
    pub fn is_suspended_at(&self, now: i64) -> bool {
        self.suspended_till != NEVER && now < self.suspended_till
    }
}

/// A bundle of path patterns and policies a credential can be entitled to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiProduct {
    /// Product name, unique within an organization.
    pub name: String,
    /// Friendly name.
    pub display_name: String,
    /// Organization the product belongs to.
    pub organization_name: String,
    /// Route group the product applies to.
    pub route_group: String,
    /// Glob path patterns, matched in order.
    pub paths: Vec<String>,
    /// Comma-separated policy list for the product scope.
    pub policies: String,
    /// Extra attributes (`qps`, ..).
    pub attributes: AttributeBag,
}

/// Stored OAuth2 token triple.
///
/// A token row carries the authorization code, the access token and the
/// refresh token issued for one grant. Each part has its own creation time
/// and lifetime in seconds; a lifetime of `0` never expires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OAuthToken {
    /// Client id, equal to the app's API key.
    pub client_id: String,
    /// Resource owner, if any.
    pub user_id: String,
    /// Redirect URI of the grant.
    pub redirect_uri: String,
    /// Granted scope.
    pub scope: String,
    /// Authorization code.
    pub code: String,
    /// Code creation time in epoch milliseconds.
    pub code_created_at: i64,
    /// Code lifetime in seconds.
    pub code_expires_in: i64,
    /// Access token.
    pub access: String,
    /// Access token creation time in epoch milliseconds.
    pub access_created_at: i64,
    /// Access token lifetime in seconds.
    pub access_expires_in: i64,
    /// Refresh token.
    pub refresh: String,
    /// Refresh token creation time in epoch milliseconds.
    pub refresh_created_at: i64,
    /// Refresh token lifetime in seconds.
    pub refresh_expires_in: i64,
}

impl OAuthToken {
    /// Returns `true` if the access token is still valid at `now`.
    pub fn access_valid_at(&self, now: i64) -> bool {
        still_valid(self.access_created_at, self.access_expires_in, now)
    }

    /// Returns `true` if the refresh token is still valid at `now`.
    pub fn refresh_valid_at(&self, now: i64) -> bool {
        still_valid(self.refresh_created_at, self.refresh_expires_in, now)
    }

    /// Returns `true` if the authorization code is still valid at `now`.
    pub fn code_valid_at(&self, now: i64) -> bool {
        still_valid(self.code_created_at, self.code_expires_in, now)
    }
}

fn still_valid(created_at: i64, expires_in_secs: i64, now: i64) -> bool {
    expires_in_secs == 0 || created_at.saturating_add(expires_in_secs.saturating_mul(1000)) > now
}

/// A listener: hostnames plus port, with the policy list for the vhost scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualHost {
    /// Unique name.
    pub name: String,
    /// Friendly name.
    pub display_name: String,
    /// Organization owning this listener; scopes every entity lookup.
    pub organization_name: String,
    /// Hostnames served, matched case-insensitively.
    pub virtual_hosts: Vec<String>,
    /// TCP port the listener accepts traffic on.
    pub port: u16,
    /// Route group traffic is forwarded to.
    pub route_group: String,
    /// Comma-separated policy list for the vhost scope.
    pub policies: String,
    /// Extra attributes.
    pub attributes: AttributeBag,
    /// Last change in epoch milliseconds.
    pub last_modified_at: i64,
}

impl Default for VirtualHost {
    fn default() -> Self {
        Self {
            name: String::new(),
            display_name: String::new(),
            organization_name: String::new(),
            virtual_hosts: Vec::new(),
            port: 80,
            route_group: String::new(),
            policies: String::new(),
            attributes: AttributeBag::new(),
            last_modified_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_expiry() {
        let mut cred = Credential {
            expires_at: NEVER,
            ..Default::default()
        };
        assert!(!cred.is_expired_at(i64::MAX));

        cred.expires_at = 1_000;
        assert!(!cred.is_expired_at(1_000));
        assert!(cred.is_expired_at(1_001));
    }

    #[test]
    fn test_developer_suspension() {
        let mut dev = Developer::default();
        assert!(!dev.is_suspended_at(0));

        dev.suspended_till = 5_000;
        assert!(dev.is_suspended_at(4_999));
        assert!(!dev.is_suspended_at(5_000));
    }

    #[test]
    fn test_token_validity() {
        let token = OAuthToken {
            access_created_at: 10_000,
            access_expires_in: 60,
            refresh_created_at: 10_000,
            refresh_expires_in: 0,
            ..Default::default()
        };

        assert!(token.access_valid_at(69_999));
        assert!(!token.access_valid_at(70_000));
        assert!(token.refresh_valid_at(i64::MAX));
    }

    #[test]
    fn test_entitlement_status() {
        assert!(ProductEntitlement::approved("p").is_approved());
        assert!(!ProductEntitlement::new("p", "revoked").is_approved());
    }

    #[test]
    fn test_credential_json_defaults_fail_closed() {
        let cred: Credential = serde_json::from_str(
            r#"{"consumerKey":"k1","appId":"a1","apiProducts":[{"apiProduct":"p","status":"approved"}]}"#,
        )
        .unwrap();

        assert_eq!(cred.consumer_key, "k1");
        assert_eq!(cred.api_products.len(), 1);
        assert!(!cred.is_approved());
        assert!(cred.is_expired_at(1));
    }

    #[test]
    fn test_credential_json_explicit() {
        let cred: Credential = serde_json::from_str(
            r#"{"consumerKey":"k1","status":"approved","expiresAt":-1}"#,
        )
        .unwrap();

        assert!(cred.is_approved());
        assert!(!cred.is_expired_at(i64::MAX));
    }
}
