//! Named request policies.
//!
//! Virtual hosts and API products list policies by name in a comma-separated
//! string. Names are resolved against a [`PolicyRegistry`] built once at
//! startup; a name the registry does not know resolves to
//! [`UnknownPolicy`] and the chain skips it.

mod access;
mod apikey;
mod headers;
mod ratelimit;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use turnstile_store::BoxFuture;

use crate::context::RequestContext;
use crate::entitlement::EntitlementResolver;
use crate::error::UnknownPolicy;
use crate::outcome::PolicyOutcome;
use crate::tokens::OAuthTokenStore;

pub use access::{
    IpAccessListPolicy, RefererPolicy, IP_ACCESS_LIST_ATTRIBUTE, REFERERS_ATTRIBUTE,
};
pub use apikey::{ApiKeyPolicy, OAuth2Policy};
pub use headers::{HeaderPolicy, RemoveApiKeyFromQueryPolicy};
pub use ratelimit::{
    rate_limit_override, QpsPolicy, QPS_ATTRIBUTE, RL_DESCRIPTOR, RL_OVERRIDE,
    RL_REQUESTS_PER_UNIT, RL_UNIT,
};

/// A per-request evaluator.
///
/// Policies may read and fill in the shared [`RequestContext`]. Failures are
/// expressed through the returned outcome, never as errors, so one failing
/// policy cannot abort the chain.
pub trait Policy: Send + Sync {
    /// Evaluates the policy against `ctx`.
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, PolicyOutcome>;
}

/// Name to policy mapping.
#[derive(Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, Arc<dyn Policy>>,
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("policies", &self.names())
            .finish()
    }
}

impl PolicyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in policy.
    pub fn standard(resolver: Arc<EntitlementResolver>, tokens: Arc<OAuthTokenStore>) -> Self {
        let apikey = Arc::new(ApiKeyPolicy::new(resolver.clone()));
        let oauth2 = Arc::new(OAuth2Policy::new(resolver, tokens));

        Self::new()
            .with_shared("apikey", apikey.clone())
            .with_shared("checkapikey", apikey)
            .with_shared("oauth2", oauth2.clone())
            .with_shared("checkoauth2", oauth2)
            .with_policy("removeapikeyfromqs", RemoveApiKeyFromQueryPolicy)
            .with_policy("sendapikey", HeaderPolicy::api_key())
            .with_policy("senddeveloperemail", HeaderPolicy::developer_email())
            .with_policy("senddeveloperid", HeaderPolicy::developer_id())
            .with_policy("senddeveloperappname", HeaderPolicy::developer_app_name())
            .with_policy("senddeveloperappid", HeaderPolicy::developer_app_id())
            .with_policy("checkipaccesslist", IpAccessListPolicy)
            .with_policy("checkreferer", RefererPolicy::default())
            .with_policy("qps", QpsPolicy)
    }

    /// Registers `policy` under `name`, replacing any previous entry.
    pub fn with_policy(self, name: impl Into<String>, policy: impl Policy + 'static) -> Self {
        self.with_shared(name, Arc::new(policy))
    }

    /// Registers an already shared policy under `name`.
    pub fn with_shared(mut self, name: impl Into<String>, policy: Arc<dyn Policy>) -> Self {
        self.policies.insert(name.into(), policy);
        self
    }

    /// Looks up `name`, matched exactly.
    pub fn resolve(&self, name: &str) -> Result<&dyn Policy, UnknownPolicy> {
        self.policies
            .get(name)
            .map(|policy| policy.as_ref())
            .ok_or_else(|| UnknownPolicy {
                name: name.to_string(),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Outcome for a request whose key resolved to an entitled product.
fn entitled(ctx: &RequestContext) -> PolicyOutcome {
    let mut outcome = PolicyOutcome::authenticated();

    if let Some(product) = &ctx.api_product {
        outcome = outcome
            .with_header("x-api-product", product.name.as_str())
            .with_metadata("apiproduct.name", product.name.as_str());
    }
    if let Some(developer) = &ctx.developer {
        outcome = outcome
            .with_header("x-developer-id", developer.developer_id.as_str())
            .with_metadata("developer.id", developer.developer_id.as_str())
            .with_metadata("developer.email", developer.email.as_str());
    }
    if let Some(app) = &ctx.developer_app {
        outcome = outcome
            .with_metadata("app.id", app.app_id.as_str())
            .with_metadata("app.name", app.name.as_str());
    }
    outcome
}
