//! Credential policies: API key and OAuth2 bearer token.

use std::sync::Arc;

use tracing::debug;
use turnstile_core::redact;
use turnstile_store::BoxFuture;

use super::{entitled, Policy};
use crate::context::RequestContext;
use crate::entitlement::EntitlementResolver;
use crate::outcome::{DenyStatus, PolicyOutcome};
use crate::tokens::OAuthTokenStore;

/// Query parameter and header carrying the API key.
const API_KEY_PARAM: &str = "apikey";
/// Alternative header carrying the API key.
const API_KEY_HEADER: &str = "x-api-key";

/// Authenticates by API key.
///
/// The key is read from the `apikey` query parameter, else the `apikey`
/// header, else `x-api-key`. Without a key the outcome is neutral.
#[derive(Debug, Clone)]
pub struct ApiKeyPolicy {
    resolver: Arc<EntitlementResolver>,
}

impl ApiKeyPolicy {
    /// Creates the policy.
    pub fn new(resolver: Arc<EntitlementResolver>) -> Self {
        Self { resolver }
    }
}

fn api_key(ctx: &RequestContext) -> Option<String> {
    ctx.query_param(API_KEY_PARAM)
        .or_else(|| ctx.header(API_KEY_PARAM))
        .or_else(|| ctx.header(API_KEY_HEADER))
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

impl Policy for ApiKeyPolicy {
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, PolicyOutcome> {
        Box::pin(async move {
            let Some(key) = api_key(ctx) else {
                return PolicyOutcome::neutral();
            };
            ctx.api_key = Some(key);

            let organization = ctx.organization().to_string();
            match self
                .resolver
                .check_product_entitlement(&organization, ctx)
                .await
            {
                Ok(()) => entitled(ctx),
                Err(e) => PolicyOutcome::deny(e.deny_status(), e.public_message()),
            }
        })
    }
}

/// Authenticates by OAuth2 bearer token.
///
/// The token's client id is treated as the API key for entitlement checks.
#[derive(Debug, Clone)]
pub struct OAuth2Policy {
    resolver: Arc<EntitlementResolver>,
    tokens: Arc<OAuthTokenStore>,
}

impl OAuth2Policy {
    /// Creates the policy.
    pub fn new(resolver: Arc<EntitlementResolver>, tokens: Arc<OAuthTokenStore>) -> Self {
        Self { resolver, tokens }
    }
}

fn bearer_token(ctx: &RequestContext) -> Option<String> {
    let value = ctx.header(http::header::AUTHORIZATION.as_str())?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

impl Policy for OAuth2Policy {
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, PolicyOutcome> {
        Box::pin(async move {
            let Some(access) = bearer_token(ctx) else {
                return PolicyOutcome::neutral();
            };
            ctx.oauth2_token = Some(access.clone());

            let token = match self.tokens.by_access(&access).await {
                Ok(token) => token,
                Err(e) if e.is_not_found() => {
                    debug!(token = %redact(&access), "unknown access token");
                    return PolicyOutcome::deny(DenyStatus::Unauthorized, "Invalid access token");
                }
                Err(_) => {
                    return PolicyOutcome::deny(
                        DenyStatus::ServiceUnavailable,
                        "Authorization backend unavailable",
                    );
                }
            };

            if !token.access_valid_at(self.resolver.clock().now_millis()) {
                debug!(token = %redact(&access), "expired access token");
                return PolicyOutcome::deny(DenyStatus::Unauthorized, "Access token expired");
            }

            ctx.api_key = Some(token.client_id.clone());
            let organization = ctx.organization().to_string();
            match self
                .resolver
                .check_product_entitlement(&organization, ctx)
                .await
            {
                Ok(()) => entitled(ctx).with_metadata("oauth2.scope", token.scope),
                Err(e) => PolicyOutcome::deny(e.deny_status(), e.public_message()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use turnstile_cache::{CacheConfig, EntityCache};
    use turnstile_core::{
        ApiProduct, Credential, Developer, DeveloperApp, ManualClock, OAuthToken,
        ProductEntitlement, NEVER, STATUS_APPROVED,
    };
    use turnstile_store::MemoryDatabase;

    use crate::context::CheckRequest;
    use crate::policy::testing::request_context;

    const NOW: i64 = 1_700_000_000_000;

    fn seeded() -> (Arc<EntitlementResolver>, Arc<OAuthTokenStore>, Arc<MemoryDatabase>) {
        let db = Arc::new(MemoryDatabase::new());
        db.upsert_credential(Credential {
            consumer_key: "KEY1".into(),
            app_id: "app-1".into(),
            organization_name: "acme".into(),
            status: STATUS_APPROVED.into(),
            expires_at: NEVER,
            api_products: vec![ProductEntitlement::approved("WidgetAPI")],
            ..Default::default()
        });
        db.upsert_developer_app(DeveloperApp {
            app_id: "app-1".into(),
            developer_id: "dev-1".into(),
            name: "widget-app".into(),
            ..Default::default()
        });
        db.upsert_developer(Developer {
            developer_id: "dev-1".into(),
            email: "dev@example.com".into(),
            ..Default::default()
        });
        db.upsert_api_product(ApiProduct {
            name: "WidgetAPI".into(),
            organization_name: "acme".into(),
            paths: vec!["/v1/**".into()],
            ..Default::default()
        });
        db.upsert_oauth_token(OAuthToken {
            client_id: "KEY1".into(),
            scope: "read".into(),
            access: "good-token".into(),
            access_created_at: NOW - 1_000,
            access_expires_in: 3_600,
            ..Default::default()
        });
        db.upsert_oauth_token(OAuthToken {
            client_id: "KEY1".into(),
            access: "old-token".into(),
            access_created_at: NOW - 7_200_000,
            access_expires_in: 3_600,
            ..Default::default()
        });

        let clock = Arc::new(ManualClock::new(NOW));
        let cache = Arc::new(EntityCache::with_clock(CacheConfig::default(), clock.clone()));
        let resolver = Arc::new(EntitlementResolver::new(cache.clone(), db.clone(), clock));
        let tokens = Arc::new(OAuthTokenStore::new(cache, db.clone()));
        (resolver, tokens, db)
    }

    #[tokio::test]
    async fn test_apikey_from_query_header_and_alt_header() {
        let (resolver, _, _) = seeded();
        let policy = ApiKeyPolicy::new(resolver);

        let requests = [
            CheckRequest::new(Method::GET, "/v1/widgets?apikey=KEY1"),
            CheckRequest::new(Method::GET, "/v1/widgets").with_header("apikey", "KEY1"),
            CheckRequest::new(Method::GET, "/v1/widgets").with_header("x-api-key", "KEY1"),
        ];
        for request in requests {
            let mut ctx = request_context(request);
            let outcome = policy.evaluate(&mut ctx).await;
            assert!(outcome.authenticated);
            assert_eq!(outcome.headers["x-api-product"], "WidgetAPI");
            assert_eq!(ctx.api_key.as_deref(), Some("KEY1"));
        }
    }

    #[tokio::test]
    async fn test_apikey_absent_is_neutral() {
        let (resolver, _, db) = seeded();
        let policy = ApiKeyPolicy::new(resolver);
        let mut ctx = request_context(CheckRequest::new(Method::GET, "/v1/widgets"));

        assert_eq!(policy.evaluate(&mut ctx).await, PolicyOutcome::neutral());
        assert_eq!(db.total_queries(), 0);
    }

    #[tokio::test]
    async fn test_apikey_unknown_denies() {
        let (resolver, _, _) = seeded();
        let policy = ApiKeyPolicy::new(resolver);
        let mut ctx = request_context(CheckRequest::new(Method::GET, "/v1/widgets?apikey=NOPE"));

        let outcome = policy.evaluate(&mut ctx).await;
        assert!(outcome.denied);
        assert!(!outcome.authenticated);
        assert_eq!(outcome.status, DenyStatus::Forbidden);
        assert!(outcome.headers.is_empty());
    }

    #[tokio::test]
    async fn test_apikey_backend_down_is_unavailable() {
        let (resolver, _, db) = seeded();
        db.set_unavailable(true);
        let policy = ApiKeyPolicy::new(resolver);
        let mut ctx = request_context(CheckRequest::new(Method::GET, "/v1/widgets?apikey=KEY1"));

        let outcome = policy.evaluate(&mut ctx).await;
        assert!(outcome.denied);
        assert_eq!(outcome.status, DenyStatus::ServiceUnavailable);
        assert_eq!(outcome.message, "Authorization backend unavailable");
    }

    #[tokio::test]
    async fn test_oauth2_valid_token() {
        let (resolver, tokens, _) = seeded();
        let policy = OAuth2Policy::new(resolver, tokens);
        let mut ctx = request_context(
            CheckRequest::new(Method::GET, "/v1/widgets")
                .with_header("authorization", "Bearer good-token"),
        );

        let outcome = policy.evaluate(&mut ctx).await;
        assert!(outcome.authenticated);
        assert_eq!(outcome.metadata["oauth2.scope"], "read");
        assert_eq!(outcome.metadata["developer.id"], "dev-1");
        assert_eq!(ctx.oauth2_token.as_deref(), Some("good-token"));
    }

    #[tokio::test]
    async fn test_oauth2_unknown_and_expired() {
        let (resolver, tokens, _) = seeded();
        let policy = OAuth2Policy::new(resolver, tokens);

        let mut ctx = request_context(
            CheckRequest::new(Method::GET, "/v1/widgets")
                .with_header("authorization", "Bearer nope"),
        );
        let outcome = policy.evaluate(&mut ctx).await;
        assert_eq!(
            outcome,
            PolicyOutcome::deny(DenyStatus::Unauthorized, "Invalid access token")
        );

        let mut ctx = request_context(
            CheckRequest::new(Method::GET, "/v1/widgets")
                .with_header("authorization", "bearer old-token"),
        );
        let outcome = policy.evaluate(&mut ctx).await;
        assert_eq!(
            outcome,
            PolicyOutcome::deny(DenyStatus::Unauthorized, "Access token expired")
        );
    }

    #[tokio::test]
    async fn test_oauth2_without_bearer_is_neutral() {
        let (resolver, tokens, _) = seeded();
        let policy = OAuth2Policy::new(resolver, tokens);

        for value in ["Basic dXNlcjpwYXNz", "Bearer ", "Bearer"] {
            let mut ctx = request_context(
                CheckRequest::new(Method::GET, "/v1/widgets").with_header("authorization", value),
            );
            assert_eq!(policy.evaluate(&mut ctx).await, PolicyOutcome::neutral());
        }
    }
}
