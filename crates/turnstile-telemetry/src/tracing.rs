//! OpenTelemetry distributed tracing.
//!
//! Spans are exported over OTLP/gRPC. Envoy forwards W3C `traceparent`
//! headers on every check request; [`check_span`] continues that trace so the
//! authorization decision shows up under the proxied request.

use crate::config::ServiceIdentity;
use crate::error::TelemetryError;
use crate::TelemetryResult;
use opentelemetry::global::{self, BoxedSpan};
use opentelemetry::trace::Tracer;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;

const TRACER_NAME: &str = "turnstile";

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether span export is enabled.
    pub enabled: bool,

    /// OTLP endpoint (e.g., `http://localhost:4317`).
    pub otlp_endpoint: String,

    /// Sampling ratio (0.0 to 1.0).
    pub sample_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            sample_ratio: 1.0,
        }
    }
}

/// Initializes the OTLP tracer provider and the W3C propagator.
///
/// Spans carry `service` as their resource. Returns the provider so the
/// caller can flush it on shutdown.
///
/// # Errors
///
/// Returns `TelemetryError::TracingInit` if the exporter cannot be built.
pub fn init_tracing(
    config: &TracingConfig,
    service: &ServiceIdentity,
) -> TelemetryResult<Option<TracerProvider>> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    if !config.enabled {
        return Ok(None);
    }

    let resource = Resource::new([
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
            service.name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
            service.version.clone(),
        ),
        KeyValue::new("deployment.environment", service.environment.clone()),
    ]);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;

    let sampler = if config.sample_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if config.sample_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(config.sample_ratio)))
    };

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_sampler(sampler)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());

    Ok(Some(provider))
}

/// Extracts the remote trace context carried by request headers.
pub fn extract_context(headers: &http::HeaderMap) -> opentelemetry::Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Starts the span covering one authorization check.
///
/// The span is a child of the trace context found in `headers`, if any.
/// Without an installed provider this returns a no-op span.
pub fn check_span(headers: &http::HeaderMap) -> BoxedSpan {
    let parent = extract_context(headers);
    global::tracer(TRACER_NAME).start_with_context("ext_authz.check", &parent)
}

/// HTTP header extractor for `http::HeaderMap`.
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl opentelemetry::propagation::Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(http::HeaderName::as_str).collect()
    }
}
