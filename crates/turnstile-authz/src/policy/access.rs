//! Per-app access restrictions stored as developer-app attributes.

use std::net::IpAddr;

use tracing::debug;
use turnstile_store::BoxFuture;

use super::Policy;
use crate::context::RequestContext;
use crate::glob::GlobCache;
use crate::outcome::{DenyStatus, PolicyOutcome};

/// App attribute listing allowed client networks.
pub const IP_ACCESS_LIST_ATTRIBUTE: &str = "IPAccessList";
/// App attribute listing allowed referer patterns.
pub const REFERERS_ATTRIBUTE: &str = "Referers";

/// Comma-separated attribute of the resolved app, `None` if absent or blank.
fn app_list<'a>(ctx: &'a RequestContext, attribute: &str) -> Option<Vec<&'a str>> {
    let value = ctx.developer_app.as_ref()?.attributes.get(attribute).ok()?;
    let entries: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect();
    (!entries.is_empty()).then_some(entries)
}

/// Denies clients outside the app's `IPAccessList`.
///
/// Entries are addresses or CIDR networks, IPv4 or IPv6.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpAccessListPolicy;

impl IpAccessListPolicy {
    fn check(ctx: &RequestContext) -> PolicyOutcome {
        let Some(networks) = app_list(ctx, IP_ACCESS_LIST_ATTRIBUTE) else {
            return PolicyOutcome::neutral();
        };
        let allowed = ctx
            .client_ip()
            .is_some_and(|ip| networks.iter().any(|network| network_contains(network, ip)));

        if allowed {
            PolicyOutcome::neutral()
        } else {
            debug!(client_ip = ?ctx.client_ip(), "client outside ip access list");
            PolicyOutcome::deny(DenyStatus::Forbidden, "Blocked by IP access list")
        }
    }
}

impl Policy for IpAccessListPolicy {
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, PolicyOutcome> {
        Box::pin(std::future::ready(Self::check(ctx)))
    }
}

/// Returns `true` if `ip` falls inside `network` (`addr` or `addr/len`).
/// Unparseable entries contain nothing.
fn network_contains(network: &str, ip: IpAddr) -> bool {
    let (addr, prefix) = match network.split_once('/') {
        Some((addr, prefix)) => (addr.trim(), Some(prefix.trim())),
        None => (network, None),
    };
    let Ok(base) = addr.parse::<IpAddr>() else {
        return false;
    };

    match (base, ip) {
        (IpAddr::V4(base), IpAddr::V4(ip)) => prefix_len(prefix, 32).is_some_and(|bits| {
            let mask = u32::MAX.checked_shl(32 - bits).unwrap_or(0);
            u32::from(base) & mask == u32::from(ip) & mask
        }),
        (IpAddr::V6(base), IpAddr::V6(ip)) => prefix_len(prefix, 128).is_some_and(|bits| {
            let mask = u128::MAX.checked_shl(128 - bits).unwrap_or(0);
            u128::from(base) & mask == u128::from(ip) & mask
        }),
        _ => false,
    }
}

fn prefix_len(prefix: Option<&str>, max: u32) -> Option<u32> {
    match prefix {
        None => Some(max),
        Some(p) => p.parse().ok().filter(|bits| *bits <= max),
    }
}

/// Denies requests whose `referer` does not match the app's `Referers`.
#[derive(Debug, Default)]
pub struct RefererPolicy {
    globs: GlobCache,
}

impl RefererPolicy {
    fn check(&self, ctx: &RequestContext) -> PolicyOutcome {
        let Some(patterns) = app_list(ctx, REFERERS_ATTRIBUTE) else {
            return PolicyOutcome::neutral();
        };
        let allowed = ctx
            .header(http::header::REFERER.as_str())
            .is_some_and(|referer| {
                patterns
                    .iter()
                    .any(|pattern| self.globs.is_match(pattern, referer))
            });

        if allowed {
            PolicyOutcome::neutral()
        } else {
            PolicyOutcome::deny(DenyStatus::Forbidden, "Referer not allowed")
        }
    }
}

impl Policy for RefererPolicy {
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, PolicyOutcome> {
        Box::pin(std::future::ready(self.check(ctx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use turnstile_core::DeveloperApp;

    use crate::context::CheckRequest;
    use crate::policy::testing::request_context;

    fn with_app_attribute(request: CheckRequest, name: &str, value: &str) -> RequestContext {
        let mut ctx = request_context(request);
        let mut app = DeveloperApp::default();
        app.attributes.set(name, value);
        ctx.developer_app = Some(app);
        ctx
    }

    #[test]
    fn test_network_contains() {
        let ip = |s: &str| s.parse::<IpAddr>().unwrap();

        assert!(network_contains("10.0.0.0/8", ip("10.20.30.40")));
        assert!(!network_contains("10.0.0.0/8", ip("11.0.0.1")));
        assert!(network_contains("203.0.113.9", ip("203.0.113.9")));
        assert!(!network_contains("203.0.113.9", ip("203.0.113.10")));
        assert!(network_contains("0.0.0.0/0", ip("198.51.100.1")));
        assert!(network_contains("2001:db8::/32", ip("2001:db8:1::1")));
        assert!(!network_contains("2001:db8::/32", ip("10.0.0.1")));
        assert!(!network_contains("10.0.0.0/33", ip("10.0.0.1")));
        assert!(!network_contains("not-an-ip", ip("10.0.0.1")));
    }

    #[tokio::test]
    async fn test_ip_access_list() {
        let request = || {
            CheckRequest::new(Method::GET, "/").with_header("x-forwarded-for", "192.168.1.20")
        };

        let mut ctx = with_app_attribute(
            request(),
            IP_ACCESS_LIST_ATTRIBUTE,
            "10.0.0.0/8, 192.168.1.0/24",
        );
        assert_eq!(IpAccessListPolicy.evaluate(&mut ctx).await, PolicyOutcome::neutral());

        let mut ctx = with_app_attribute(request(), IP_ACCESS_LIST_ATTRIBUTE, "10.0.0.0/8");
        let outcome = IpAccessListPolicy.evaluate(&mut ctx).await;
        assert!(outcome.denied);
        assert_eq!(outcome.message, "Blocked by IP access list");
    }

    #[tokio::test]
    async fn test_ip_access_list_unknown_client_denied() {
        let mut ctx = with_app_attribute(
            CheckRequest::new(Method::GET, "/"),
            IP_ACCESS_LIST_ATTRIBUTE,
            "10.0.0.0/8",
        );
        assert!(IpAccessListPolicy.evaluate(&mut ctx).await.denied);
    }

    #[tokio::test]
    async fn test_ip_access_list_absent_is_neutral() {
        let mut ctx = request_context(CheckRequest::new(Method::GET, "/"));
        assert_eq!(IpAccessListPolicy.evaluate(&mut ctx).await, PolicyOutcome::neutral());

        let mut ctx =
            with_app_attribute(CheckRequest::new(Method::GET, "/"), IP_ACCESS_LIST_ATTRIBUTE, " ");
        assert_eq!(IpAccessListPolicy.evaluate(&mut ctx).await, PolicyOutcome::neutral());
    }

    #[tokio::test]
    async fn test_referer() {
        let patterns = "https://*.example.com/**, https://partner.test/app";
        let policy = RefererPolicy::default();

        let mut ctx = with_app_attribute(
            CheckRequest::new(Method::GET, "/")
                .with_header("referer", "https://www.example.com/page/1"),
            REFERERS_ATTRIBUTE,
            patterns,
        );
        assert_eq!(policy.evaluate(&mut ctx).await, PolicyOutcome::neutral());

        let mut ctx = with_app_attribute(
            CheckRequest::new(Method::GET, "/").with_header("referer", "https://evil.test/"),
            REFERERS_ATTRIBUTE,
            patterns,
        );
        assert_eq!(
            policy.evaluate(&mut ctx).await,
            PolicyOutcome::deny(DenyStatus::Forbidden, "Referer not allowed")
        );

        let mut ctx =
            with_app_attribute(CheckRequest::new(Method::GET, "/"), REFERERS_ATTRIBUTE, patterns);
        assert!(policy.evaluate(&mut ctx).await.denied);

        // Repeated checks reuse the compiled patterns.
        assert_eq!(policy.globs.len(), 2);
    }
}
