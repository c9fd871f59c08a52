//! Prometheus metrics for Turnstile.
//!
//! Recording functions are fire-and-forget: without an installed recorder
//! they are no-ops, so library code calls them unconditionally.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `turnstile_requests_accepted_total` | Counter | `category` | Allowed checks |
//! | `turnstile_requests_rejected_total` | Counter | `category` | Denied checks |
//! | `turnstile_check_duration_seconds` | Histogram | - | Check latency |
//! | `turnstile_in_flight_checks` | Gauge | - | Checks being processed |
//! | `turnstile_policy_evaluations_total` | Counter | `scope`, `policy` | Policies run |
//! | `turnstile_policy_unknown_total` | Counter | `scope`, `policy` | Unknown policy names skipped |
//! | `turnstile_cache_lookups_total` | Counter | `kind`, `result` | Entity cache lookups |
//! | `turnstile_database_queries_total` | Counter | `kind`, `outcome` | Database fetches |
//! | `turnstile_database_query_duration_seconds` | Histogram | `kind` | Database fetch latency |
//! | `turnstile_entitlement_failures_total` | Counter | `reason` | Failed entitlement checks |
//! | `turnstile_snapshot_loads_total` | Counter | `kind` | Configuration snapshots swapped in |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const CHECK_DURATION: &str = "turnstile_check_duration_seconds";
const DB_QUERY_DURATION: &str = "turnstile_database_query_duration_seconds";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are recorded.
    pub enabled: bool,

    /// Histogram buckets for check and database durations, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // 0.5ms .. 2.5s; checks are expected to be sub-millisecond on a warm cache
            duration_buckets: vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ],
        }
    }
}

/// Installs the Prometheus recorder.
///
/// The rendered output is served by the server's metrics endpoint through
/// [`render_metrics`].
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if the buckets are invalid or a
/// recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(CHECK_DURATION.to_string()),
            &config.duration_buckets,
        )
        .and_then(|b| {
            b.set_buckets_for_metric(
                Matcher::Full(DB_QUERY_DURATION.to_string()),
                &config.duration_buckets,
            )
        })
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        "turnstile_requests_accepted_total",
        "Authorization checks that allowed the request"
    );
    describe_counter!(
        "turnstile_requests_rejected_total",
        "Authorization checks that denied the request"
    );
    describe_histogram!(CHECK_DURATION, "Authorization check duration in seconds");
    describe_gauge!(
        "turnstile_in_flight_checks",
        "Authorization checks currently being processed"
    );
    describe_counter!(
        "turnstile_policy_evaluations_total",
        "Policy evaluations by scope and policy name"
    );
    describe_counter!(
        "turnstile_policy_unknown_total",
        "Unknown policy names skipped in a policy chain"
    );
    describe_counter!(
        "turnstile_cache_lookups_total",
        "Entity cache lookups by kind and result"
    );
    describe_counter!(
        "turnstile_database_queries_total",
        "Database fetches by kind and outcome"
    );
    describe_histogram!(DB_QUERY_DURATION, "Database fetch duration in seconds");
    describe_counter!(
        "turnstile_entitlement_failures_total",
        "Failed entitlement checks by reason"
    );
    describe_counter!(
        "turnstile_snapshot_loads_total",
        "Configuration snapshots loaded by kind"
    );
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Records a finished authorization check.
///
/// Exactly one of the accepted/rejected counters is incremented.
pub fn record_check(allowed: bool, category: &str, duration: Duration) {
    let name = if allowed {
        "turnstile_requests_accepted_total"
    } else {
        "turnstile_requests_rejected_total"
    };
    counter!(name, "category" => category.to_string()).increment(1);
    histogram!(CHECK_DURATION).record(duration.as_secs_f64());
}

/// Records one policy evaluation.
pub fn record_policy_evaluation(scope: &str, policy: &str) {
    counter!(
        "turnstile_policy_evaluations_total",
        "scope" => scope.to_string(),
        "policy" => policy.to_string()
    )
    .increment(1);
}

/// Records a policy name with no registered evaluator.
pub fn record_unknown_policy(scope: &str, policy: &str) {
    counter!(
        "turnstile_policy_unknown_total",
        "scope" => scope.to_string(),
        "policy" => policy.to_string()
    )
    .increment(1);
}

/// Records an entity cache lookup.
///
/// `result` is one of `hit`, `miss` or `negative_hit`.
pub fn record_cache_lookup(kind: &str, result: &'static str) {
    counter!(
        "turnstile_cache_lookups_total",
        "kind" => kind.to_string(),
        "result" => result
    )
    .increment(1);
}

/// Records a database fetch.
///
/// `outcome` is one of `ok`, `not_found`, `timeout` or `error`.
pub fn record_database_query(kind: &str, outcome: &'static str, duration: Duration) {
    counter!(
        "turnstile_database_queries_total",
        "kind" => kind.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(DB_QUERY_DURATION, "kind" => kind.to_string()).record(duration.as_secs_f64());
}

/// Records a failed entitlement check.
pub fn record_entitlement_failure(reason: &'static str) {
    counter!("turnstile_entitlement_failures_total", "reason" => reason).increment(1);
}

/// Records a configuration snapshot being swapped in.
pub fn record_snapshot_load(kind: &'static str) {
    counter!("turnstile_snapshot_loads_total", "kind" => kind).increment(1);
}

/// Guard that tracks one in-flight check.
///
/// Increments `turnstile_in_flight_checks` on creation and decrements it on
/// drop, including when the check future is cancelled.
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!("turnstile_in_flight_checks").increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!("turnstile_in_flight_checks").decrement(1.0);
    }
}
