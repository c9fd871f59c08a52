//! Ordered, short-circuiting policy evaluation.

use std::fmt;

use tracing::debug;
use turnstile_telemetry::metrics::{record_policy_evaluation, record_unknown_policy};

use crate::context::RequestContext;
use crate::outcome::ChainResult;
use crate::policy::PolicyRegistry;

/// Which configuration entity a policy list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyScope {
    /// The matched virtual host.
    VirtualHost,
    /// The API product the request was authorized under.
    ApiProduct,
}

impl PolicyScope {
    /// Metric and log label.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::VirtualHost => "listener",
            Self::ApiProduct => "apiproduct",
        }
    }
}

impl fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Splits a policy list into trimmed, non-empty names.
pub fn policy_names(policies: &str) -> impl Iterator<Item = &str> {
    policies.split(',').map(str::trim).filter(|name| !name.is_empty())
}

/// Evaluates one scope's policy list.
#[derive(Debug, Clone, Copy)]
pub struct PolicyChain<'r> {
    registry: &'r PolicyRegistry,
    scope: PolicyScope,
}

impl<'r> PolicyChain<'r> {
    /// Creates a chain for `scope` resolving names in `registry`.
    pub fn new(registry: &'r PolicyRegistry, scope: PolicyScope) -> Self {
        Self { registry, scope }
    }

    /// Runs `policies` in order against `ctx`.
    ///
    /// Unknown names are counted and skipped. Headers and metadata merge
    /// last-write-wins. The first denying policy ends the chain.
    pub async fn evaluate(&self, policies: &str, ctx: &mut RequestContext) -> ChainResult {
        let scope = self.scope.as_str();
        let mut result = ChainResult::default();
        debug!(scope, policies, "evaluating policy chain");

        for name in policy_names(policies) {
            let policy = match self.registry.resolve(name) {
                Ok(policy) => policy,
                Err(unknown) => {
                    debug!(scope, policy = %unknown.name, "skipping unknown policy");
                    record_unknown_policy(scope, name);
                    continue;
                }
            };

            let outcome = policy.evaluate(ctx).await;
            record_policy_evaluation(scope, name);
            debug!(
                scope,
                policy = name,
                authenticated = outcome.authenticated,
                denied = outcome.denied,
                "policy evaluated"
            );

            if result.absorb(outcome) {
                debug!(scope, policy = name, status = %result.status, "policy chain denied");
                break;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use http::Method;
    use turnstile_store::BoxFuture;

    use crate::context::CheckRequest;
    use crate::outcome::{DenyStatus, PolicyOutcome, NO_CREDENTIALS};
    use crate::policy::Policy;

    struct Counting {
        outcome: PolicyOutcome,
        calls: Arc<AtomicUsize>,
    }

    impl Counting {
        fn new(outcome: PolicyOutcome) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    outcome,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl Policy for Counting {
        fn evaluate<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, PolicyOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(std::future::ready(self.outcome.clone()))
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::from_request(CheckRequest::new(Method::GET, "/")).unwrap()
    }

    #[test]
    fn test_policy_names() {
        let names: Vec<_> = policy_names(" apikey, qps,,sendapikey ,").collect();
        assert_eq!(names, vec!["apikey", "qps", "sendapikey"]);
        assert_eq!(policy_names("").count(), 0);
    }

    #[test]
    fn test_scope_labels() {
        assert_eq!(PolicyScope::VirtualHost.to_string(), "listener");
        assert_eq!(PolicyScope::ApiProduct.as_str(), "apiproduct");
    }

    #[tokio::test]
    async fn test_empty_list_yields_initial_result() {
        let registry = PolicyRegistry::new();
        let chain = PolicyChain::new(&registry, PolicyScope::VirtualHost);

        let result = chain.evaluate("", &mut ctx()).await;

        assert_eq!(result, ChainResult::default());
        assert_eq!(result.message, NO_CREDENTIALS);
    }

    #[tokio::test]
    async fn test_unknown_policy_is_skipped() {
        let (real, calls) = Counting::new(PolicyOutcome::authenticated());
        let registry = PolicyRegistry::new().with_policy("realpolicy", real);
        let chain = PolicyChain::new(&registry, PolicyScope::VirtualHost);

        let result = chain.evaluate("unknownpolicy,realpolicy", &mut ctx()).await;

        assert!(result.authenticated);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deny_short_circuits() {
        let (first, first_calls) =
            Counting::new(PolicyOutcome::deny(DenyStatus::Unauthorized, "go away"));
        let (second, second_calls) = Counting::new(PolicyOutcome::authenticated());
        let registry = PolicyRegistry::new()
            .with_policy("first", first)
            .with_policy("second", second);
        let chain = PolicyChain::new(&registry, PolicyScope::ApiProduct);

        let result = chain.evaluate("first, second", &mut ctx()).await;

        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert!(!result.authenticated);
        assert!(result.denied);
        assert_eq!(result.status, DenyStatus::Unauthorized);
        assert_eq!(result.message, "go away");
    }

    #[tokio::test]
    async fn test_headers_merge_last_write_wins() {
        let (a, _) = Counting::new(
            PolicyOutcome::neutral()
                .with_header("x-one", "a")
                .with_header("x-shared", "a"),
        );
        let (b, _) = Counting::new(
            PolicyOutcome::authenticated()
                .with_header("x-shared", "b")
                .with_metadata("m", "b"),
        );
        let registry = PolicyRegistry::new().with_policy("a", a).with_policy("b", b);
        let chain = PolicyChain::new(&registry, PolicyScope::VirtualHost);

        let result = chain.evaluate("a,b", &mut ctx()).await;

        assert_eq!(result.headers["x-one"], "a");
        assert_eq!(result.headers["x-shared"], "b");
        assert_eq!(result.metadata["m"], "b");
    }

    #[tokio::test]
    async fn test_authenticated_is_monotonic_and_denied_flag_stays_set() {
        let (auth, _) = Counting::new(PolicyOutcome::authenticated());
        let (neutral, _) = Counting::new(PolicyOutcome::neutral());
        let registry = PolicyRegistry::new()
            .with_policy("auth", auth)
            .with_policy("neutral", neutral);
        let chain = PolicyChain::new(&registry, PolicyScope::VirtualHost);

        let result = chain.evaluate("auth,neutral", &mut ctx()).await;

        assert!(result.authenticated);
        assert!(result.denied);
        assert_eq!(result.message, NO_CREDENTIALS);
    }

    #[tokio::test]
    async fn test_policy_may_run_twice() {
        let (counting, calls) = Counting::new(PolicyOutcome::neutral());
        let registry = PolicyRegistry::new().with_policy("c", counting);
        let chain = PolicyChain::new(&registry, PolicyScope::VirtualHost);

        chain.evaluate("c, c", &mut ctx()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
