//! Policies that forward resolved identity upstream as headers.

use turnstile_store::BoxFuture;

use super::Policy;
use crate::context::RequestContext;
use crate::outcome::PolicyOutcome;

/// Sets one upstream header from the resolved context.
///
/// Neutral when the value it needs has not been resolved.
#[derive(Clone, Copy)]
pub struct HeaderPolicy {
    header: &'static str,
    value: fn(&RequestContext) -> Option<String>,
}

impl std::fmt::Debug for HeaderPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderPolicy")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl HeaderPolicy {
    /// Creates a policy setting `header` to whatever `value` extracts.
    pub const fn new(header: &'static str, value: fn(&RequestContext) -> Option<String>) -> Self {
        Self { header, value }
    }

    /// `x-apikey`: the presented API key.
    pub fn api_key() -> Self {
        Self::new("x-apikey", |ctx| ctx.api_key.clone())
    }

    /// `x-developer-email`.
    pub fn developer_email() -> Self {
        Self::new("x-developer-email", |ctx| {
            ctx.developer.as_ref().map(|d| d.email.clone())
        })
    }

    /// `x-developer-id`.
    pub fn developer_id() -> Self {
        Self::new("x-developer-id", |ctx| {
            ctx.developer.as_ref().map(|d| d.developer_id.clone())
        })
    }

    /// `x-developer-app-name`.
    pub fn developer_app_name() -> Self {
        Self::new("x-developer-app-name", |ctx| {
            ctx.developer_app.as_ref().map(|a| a.name.clone())
        })
    }

    /// `x-developer-app-id`.
    pub fn developer_app_id() -> Self {
        Self::new("x-developer-app-id", |ctx| {
            ctx.developer_app.as_ref().map(|a| a.app_id.clone())
        })
    }
}

impl Policy for HeaderPolicy {
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, PolicyOutcome> {
        let outcome = match (self.value)(ctx) {
            Some(value) => PolicyOutcome::neutral().with_header(self.header, value),
            None => PolicyOutcome::neutral(),
        };
        Box::pin(std::future::ready(outcome))
    }
}

/// Rewrites `:path` without the `apikey` query parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveApiKeyFromQueryPolicy;

impl RemoveApiKeyFromQueryPolicy {
    fn rewrite(ctx: &RequestContext) -> Option<String> {
        ctx.query_param("apikey")?;

        let remaining: Vec<&(String, String)> =
            ctx.query().iter().filter(|(key, _)| key != "apikey").collect();
        let query = serde_urlencoded::to_string(&remaining).ok()?;

        Some(if query.is_empty() {
            ctx.path().to_string()
        } else {
            format!("{}?{query}", ctx.path())
        })
    }
}

impl Policy for RemoveApiKeyFromQueryPolicy {
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, PolicyOutcome> {
        let outcome = match Self::rewrite(ctx) {
            Some(path) => PolicyOutcome::neutral().with_header(":path", path),
            None => PolicyOutcome::neutral(),
        };
        Box::pin(std::future::ready(outcome))
    }
}
