//! Per-request authorization entry point.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};
use turnstile_store::SnapshotStore;
use turnstile_telemetry::metrics::{record_check, InFlightGuard};

use crate::chain::{PolicyChain, PolicyScope};
use crate::context::{CheckRequest, RequestContext};
use crate::outcome::{ChainResult, DenyStatus, Fields};
use crate::policy::{rate_limit_override, PolicyRegistry, RL_OVERRIDE};

/// Message for requests whose host matches no virtual host.
pub const UNKNOWN_VHOST: &str = "unknown vhost";

/// The decision returned to the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResponse {
    /// Forward the request upstream with extra headers and metadata.
    Allow {
        /// Headers to add to the upstream request.
        headers: Fields,
        /// Dynamic metadata for later filters.
        metadata: Fields,
    },
    /// Answer the client directly.
    Deny {
        /// Response status.
        status: DenyStatus,
        /// Client-facing message.
        message: String,
        /// Headers gathered before the denial.
        headers: Fields,
        /// Metadata gathered before the denial.
        metadata: Fields,
    },
}

impl CheckResponse {
    /// A denial carrying nothing but `status` and `message`.
    pub fn deny(status: DenyStatus, message: impl Into<String>) -> Self {
        Self::Deny {
            status,
            message: message.into(),
            headers: Fields::new(),
            metadata: Fields::new(),
        }
    }

    /// Returns `true` for [`CheckResponse::Allow`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// HTTP status to answer with: 200 on allow.
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            Self::Allow { .. } => http::StatusCode::OK,
            Self::Deny { status, .. } => status.status_code(),
        }
    }

    /// Denial message, `None` on allow.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Allow { .. } => None,
            Self::Deny { message, .. } => Some(message),
        }
    }

    /// Headers of either variant.
    pub fn headers(&self) -> &Fields {
        match self {
            Self::Allow { headers, .. } | Self::Deny { headers, .. } => headers,
        }
    }

    /// Metadata of either variant.
    pub fn metadata(&self) -> &Fields {
        match self {
            Self::Allow { metadata, .. } | Self::Deny { metadata, .. } => metadata,
        }
    }

    /// `{"message": ...}` body of a denial.
    pub fn json_body(&self) -> Option<String> {
        self.message()
            .map(|message| serde_json::json!({ "message": message }).to_string())
    }
}

/// Authorizes requests against the current virtual-host snapshot.
#[derive(Debug, Clone)]
pub struct AuthorizationHandler {
    snapshots: Arc<SnapshotStore>,
    registry: Arc<PolicyRegistry>,
}

impl AuthorizationHandler {
    /// Creates a handler.
    pub fn new(snapshots: Arc<SnapshotStore>, registry: Arc<PolicyRegistry>) -> Self {
        Self {
            snapshots,
            registry,
        }
    }

    /// The virtual-host snapshot store.
    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    /// Decides one request. Records exactly one accepted or rejected count.
    #[instrument(skip_all, fields(method = %request.method, host = %request.host()))]
    pub async fn check(&self, request: CheckRequest) -> CheckResponse {
        let started = Instant::now();
        let _in_flight = InFlightGuard::new();

        let (response, category) = self.decide(request).await;

        debug!(
            allowed = response.is_allowed(),
            status = response.status_code().as_u16(),
            category,
            "check decided"
        );
        record_check(response.is_allowed(), category, started.elapsed());
        response
    }

    async fn decide(&self, request: CheckRequest) -> (CheckResponse, &'static str) {
        let host = request.host().to_string();
        let scheme = request.scheme.clone();
        let forwarded_proto = request
            .headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut ctx = match RequestContext::from_request(request) {
            Ok(ctx) => ctx,
            Err(e) => {
                debug!(error = %e, "malformed request");
                return (
                    CheckResponse::deny(DenyStatus::Forbidden, e.to_string()),
                    e.category(),
                );
            }
        };

        let vhost = self
            .snapshots
            .load()
            .lookup(&host, forwarded_proto.as_deref(), &scheme)
            .cloned();
        let Some(vhost) = vhost else {
            debug!(host, "no virtual host matches");
            return (
                CheckResponse::deny(DenyStatus::Forbidden, UNKNOWN_VHOST),
                "unknown_vhost",
            );
        };
        let vhost_policies = vhost.policies.clone();
        ctx.vhost = Some(vhost);

        let vhost_result = PolicyChain::new(&self.registry, PolicyScope::VirtualHost)
            .evaluate(&vhost_policies, &mut ctx)
            .await;

        let product_policies = ctx
            .api_product
            .as_ref()
            .map(|product| product.policies.clone())
            .unwrap_or_default();
        let product_result = if product_policies.trim().is_empty() {
            ChainResult::default()
        } else {
            PolicyChain::new(&self.registry, PolicyScope::ApiProduct)
                .evaluate(&product_policies, &mut ctx)
                .await
        };

        Self::merge(vhost_result, product_result)
    }

    // Either chain authenticating allows. A denial always reports the vhost
    // chain's status and message. Allows also carry the folded rate limit.
    fn merge(vhost: ChainResult, product: ChainResult) -> (CheckResponse, &'static str) {
        let authenticated = vhost.authenticated || product.authenticated;

        let mut headers = vhost.headers;
        headers.extend(product.headers);
        let mut metadata = vhost.metadata;
        metadata.extend(product.metadata);

        if authenticated {
            if let Some(limit) = rate_limit_override(&metadata) {
                metadata.insert(RL_OVERRIDE.to_string(), limit);
            }
            (CheckResponse::Allow { headers, metadata }, "authenticated")
        } else {
            if product.denied && product.message != vhost.message {
                debug!(
                    status = %product.status,
                    message = %product.message,
                    "product chain denial superseded by vhost chain"
                );
            }
            (
                CheckResponse::Deny {
                    status: vhost.status,
                    message: vhost.message,
                    headers,
                    metadata,
                },
                "unauthenticated",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{PolicyOutcome, NO_CREDENTIALS};

    #[test]
    fn test_json_body() {
        let response = CheckResponse::deny(DenyStatus::Unauthorized, "say \"please\"");
        assert_eq!(
            response.json_body().unwrap(),
            r#"{"message":"say \"please\""}"#
        );
        assert_eq!(response.status_code(), http::StatusCode::UNAUTHORIZED);

        let allow = CheckResponse::Allow {
            headers: Fields::new(),
            metadata: Fields::new(),
        };
        assert_eq!(allow.json_body(), None);
        assert_eq!(allow.status_code(), http::StatusCode::OK);
    }

    #[test]
    fn test_merge_product_overrides_vhost() {
        let mut vhost = ChainResult::default();
        vhost.absorb(
            PolicyOutcome::authenticated()
                .with_header("x-a", "vhost")
                .with_header("x-b", "vhost"),
        );
        let mut product = ChainResult::default();
        product.absorb(PolicyOutcome::neutral().with_header("x-b", "product"));

        let (response, category) = AuthorizationHandler::merge(vhost, product);

        assert!(response.is_allowed());
        assert_eq!(category, "authenticated");
        assert_eq!(response.headers()["x-a"], "vhost");
        assert_eq!(response.headers()["x-b"], "product");
        let order: Vec<_> = response.headers().keys().collect();
        assert_eq!(order, vec!["x-a", "x-b"]);
    }

    #[test]
    fn test_merge_product_authentication_is_enough() {
        let mut product = ChainResult::default();
        product.absorb(PolicyOutcome::authenticated());

        let (response, _) = AuthorizationHandler::merge(ChainResult::default(), product);
        assert!(response.is_allowed());
    }

    #[test]
    fn test_merge_vhost_denial_takes_precedence() {
        let mut vhost = ChainResult::default();
        vhost.absorb(PolicyOutcome::deny(DenyStatus::Unauthorized, "vhost says no"));
        let mut product = ChainResult::default();
        product.absorb(PolicyOutcome::deny(DenyStatus::ServiceUnavailable, "product says no"));

        let (response, category) = AuthorizationHandler::merge(vhost, product);

        assert_eq!(category, "unauthenticated");
        assert_eq!(response.status_code(), http::StatusCode::UNAUTHORIZED);
        assert_eq!(response.message(), Some("vhost says no"));
    }

    #[test]
    fn test_merge_builds_rate_limit_override_on_allow() {
        let mut vhost = ChainResult::default();
        vhost.absorb(PolicyOutcome::authenticated());
        let mut product = ChainResult::default();
        product.absorb(
            PolicyOutcome::neutral()
                .with_metadata("rl.requests_per_unit", "10")
                .with_metadata("rl.unit", "second"),
        );

        let (response, _) = AuthorizationHandler::merge(vhost, product);

        assert_eq!(
            response.metadata()[RL_OVERRIDE],
            r#"{"requests_per_unit":10,"unit":"second"}"#
        );
    }

    #[test]
    fn test_merge_no_rate_limit_override_on_deny() {
        let mut vhost = ChainResult::default();
        vhost.absorb(PolicyOutcome::deny(DenyStatus::Forbidden, "no"));
        let mut product = ChainResult::default();
        product.absorb(
            PolicyOutcome::neutral()
                .with_metadata("rl.requests_per_unit", "10")
                .with_metadata("rl.unit", "second"),
        );

        let (response, _) = AuthorizationHandler::merge(vhost, product);
        assert!(!response.metadata().contains_key(RL_OVERRIDE));
    }

    #[test]
    fn test_merge_nothing_ran() {
        let (response, _) =
            AuthorizationHandler::merge(ChainResult::default(), ChainResult::default());
        assert_eq!(response.status_code(), http::StatusCode::FORBIDDEN);
        assert_eq!(response.message(), Some(NO_CREDENTIALS));
    }
}
