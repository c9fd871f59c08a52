//! Rate-limit hints for the proxy's rate limit filter.

use turnstile_store::BoxFuture;

use super::Policy;
use crate::context::RequestContext;
use crate::outcome::{Fields, PolicyOutcome};

/// API product attribute holding the allowed requests per second.
pub const QPS_ATTRIBUTE: &str = "qps";

/// Metadata key for the allowed number of requests per unit.
pub const RL_REQUESTS_PER_UNIT: &str = "rl.requests_per_unit";
/// Metadata key for the rate limit unit.
pub const RL_UNIT: &str = "rl.unit";
/// Metadata key for the rate limit descriptor value.
pub const RL_DESCRIPTOR: &str = "rl.descriptor";
/// Metadata key for the combined limit read by a route's rate limit action.
pub const RL_OVERRIDE: &str = "rl.override";

/// Folds [`RL_REQUESTS_PER_UNIT`] and [`RL_UNIT`] into the JSON object a
/// route's rate limit override reads, e.g.
/// `{"requests_per_unit":25,"unit":"second"}`.
///
/// `None` without a unit or when the count does not parse. A missing count
/// reads as zero.
pub fn rate_limit_override(metadata: &Fields) -> Option<String> {
    let requests_per_unit = match metadata.get(RL_REQUESTS_PER_UNIT) {
        Some(value) => value.trim().parse::<f64>().ok().filter(|n| n.is_finite())?,
        None => 0.0,
    };
    let unit = metadata.get(RL_UNIT)?;

    #[allow(clippy::cast_possible_truncation)]
    let count = if requests_per_unit.fract() == 0.0 && requests_per_unit.abs() < 9.0e15 {
        serde_json::Value::from(requests_per_unit as i64)
    } else {
        serde_json::Value::from(requests_per_unit)
    };
    Some(serde_json::json!({ "requests_per_unit": count, "unit": unit }).to_string())
}

/// Emits `rl.*` metadata from the matched product's `qps` attribute.
#[derive(Debug, Clone, Copy, Default)]
pub struct QpsPolicy;

impl QpsPolicy {
    fn check(ctx: &RequestContext) -> PolicyOutcome {
        let Some(qps) = ctx
            .api_product
            .as_ref()
            .and_then(|product| product.attributes.get(QPS_ATTRIBUTE).ok())
            .map(str::trim)
            .filter(|qps| !qps.is_empty())
        else {
            return PolicyOutcome::neutral();
        };

        let mut outcome = PolicyOutcome::neutral()
            .with_metadata(RL_REQUESTS_PER_UNIT, qps)
            .with_metadata(RL_UNIT, "second");
        if let Some(app) = &ctx.developer_app {
            outcome = outcome.with_metadata(RL_DESCRIPTOR, app.app_id.as_str());
        }
        outcome
    }
}

impl Policy for QpsPolicy {
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, PolicyOutcome> {
        Box::pin(std::future::ready(Self::check(ctx)))
    }
}
