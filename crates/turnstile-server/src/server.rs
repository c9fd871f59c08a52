//! Envoy ext_authz HTTP transport.
//!
//! Two listeners share one [`AuthzServer`]. On the check listener every
//! request is an authorization check: Envoy forwards the client's method,
//! path and headers, and the response status tells it whether to continue.
//! The admin listener serves the `/_turnstile/` endpoints and never runs a
//! check.

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::uri::PathAndQuery;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use opentelemetry::trace::Span;
use opentelemetry::KeyValue;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use turnstile_authz::{AuthorizationHandler, CheckRequest, CheckResponse, Fields};
use turnstile_telemetry::{check_span, render_metrics};
use uuid::Uuid;

use crate::error::ServerResult;
use crate::health::HealthChecker;
use crate::shutdown::ShutdownSignal;

/// Prefix of the endpoints served on the admin listener.
pub const INTERNAL_PREFIX: &str = "/_turnstile/";

/// Header correlating a check with Envoy's access log.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Prefix of headers carrying dynamic metadata back to Envoy.
pub const METADATA_HEADER_PREFIX: &str = "x-turnstile-metadata-";

/// What a listener answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    /// Authorization checks from Envoy.
    Check,
    /// Health, readiness, metrics and version.
    Admin,
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Check => "check",
            Self::Admin => "admin",
        })
    }
}

/// The ext_authz HTTP server.
#[derive(Debug, Clone)]
pub struct AuthzServer {
    handler: AuthorizationHandler,
    health: Arc<HealthChecker>,
    path_prefix: Arc<str>,
    shutdown_timeout: Duration,
}

impl AuthzServer {
    /// Creates a server.
    ///
    /// `path_prefix` is the `path_prefix` configured on Envoy's
    /// `http_service`; it is stripped before the check.
    pub fn new(
        handler: AuthorizationHandler,
        health: Arc<HealthChecker>,
        path_prefix: &str,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            handler,
            health,
            path_prefix: Arc::from(path_prefix.trim_end_matches('/')),
            shutdown_timeout,
        }
    }

    /// The health checker behind `/_turnstile/health` and `/_turnstile/ready`.
    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    /// Serves connections from `listener` as `role` until `shutdown` fires,
    /// then drains open connections for up to the shutdown timeout.
    ///
    /// Readiness reports draining from the moment shutdown begins.
    pub async fn run(
        self,
        listener: TcpListener,
        role: Listener,
        shutdown: ShutdownSignal,
    ) -> ServerResult<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, listener = %role, "turnstile listening");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                () = shutdown.recv() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(listener = %role, error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    let server = self.clone();
                    let shutdown = shutdown.clone();
                    connections.spawn(server.serve_connection(stream, peer, role, shutdown));
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        self.health.set_draining();
        drop(listener);
        info!(listener = %role, open = connections.len(), "draining connections");

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                listener = %role,
                open = connections.len(),
                timeout_secs = self.shutdown_timeout.as_secs(),
                "connections still open after shutdown timeout"
            );
            connections.abort_all();
        }

        info!(listener = %role, "listener stopped");
        Ok(())
    }

    async fn serve_connection(
        self,
        stream: TcpStream,
        peer: SocketAddr,
        role: Listener,
        shutdown: ShutdownSignal,
    ) {
        let io = TokioIo::new(stream);
        let server = self.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let server = server.clone();
            async move {
                let (parts, _body) = req.into_parts();
                let response = match role {
                    Listener::Check => server.respond(parts, peer).await,
                    Listener::Admin => server.admin_respond(&parts),
                };
                Ok::<_, Infallible>(response)
            }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            () = shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                conn.as_mut().await
            }
        };
        if let Err(e) = result {
            debug!(peer = %peer, listener = %role, error = %e, "connection error");
        }
    }

    /// Answers one authorization check.
    ///
    /// Every path is checked, `/_turnstile/` included.
    pub async fn respond(
        &self,
        parts: http::request::Parts,
        peer: SocketAddr,
    ) -> Response<Full<Bytes>> {
        let target = parts.uri.path_and_query().map_or("/", PathAndQuery::as_str);
        let mut request = CheckRequest::new(parts.method.clone(), self.strip_prefix(target))
            .with_peer_ip(peer.ip());
        if let Some(authority) = parts.uri.authority() {
            request = request.with_host(authority.as_str());
        }
        if let Some(scheme) = parts.uri.scheme_str() {
            request = request.with_scheme(scheme);
        }
        request.headers = parts.headers;

        let request_id = request
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| Uuid::now_v7().to_string(), ToString::to_string);
        let log_span = info_span!("check", request_id = %request_id, peer = %peer);

        let mut span = check_span(&request.headers);
        span.set_attribute(KeyValue::new("http.request.method", request.method.to_string()));
        span.set_attribute(KeyValue::new("server.address", request.host().to_string()));
        span.set_attribute(KeyValue::new("url.path", request.path.clone()));

        let decision = self.handler.check(request).instrument(log_span).await;

        span.set_attribute(KeyValue::new("turnstile.allowed", decision.is_allowed()));
        span.set_attribute(KeyValue::new(
            "http.response.status_code",
            i64::from(decision.status_code().as_u16()),
        ));
        span.end();

        check_response(&decision)
    }

    /// Answers one admin request.
    pub fn admin_respond(&self, parts: &http::request::Parts) -> Response<Full<Bytes>> {
        match parts.uri.path().strip_prefix(INTERNAL_PREFIX) {
            Some(endpoint) => self.internal_endpoint(endpoint),
            None => json_response(
                StatusCode::NOT_FOUND,
                &serde_json::json!({ "message": format!("not found: {}", parts.uri.path()) }),
            ),
        }
    }

    fn strip_prefix(&self, target: &str) -> String {
        if self.path_prefix.is_empty() {
            return target.to_string();
        }
        match target.strip_prefix(&*self.path_prefix) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('?') => format!("/{rest}"),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => target.to_string(),
        }
    }

    fn internal_endpoint(&self, endpoint: &str) -> Response<Full<Bytes>> {
        match endpoint {
            "health" => {
                let body = self.health.liveness();
                let status = if body.status.is_operational() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                json_response(status, &body)
            }
            "ready" => {
                let body = self.health.readiness();
                let status = if body.status.is_ready() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                json_response(status, &body)
            }
            "metrics" => match render_metrics() {
                Some(text) => {
                    let mut response = Response::new(Full::new(Bytes::from(text)));
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    response
                }
                None => json_response(
                    StatusCode::NOT_FOUND,
                    &serde_json::json!({ "message": "metrics are disabled" }),
                ),
            },
            "version" => json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "name": "turnstile",
                    "version": crate::VERSION,
                }),
            ),
            _ => json_response(
                StatusCode::NOT_FOUND,
                &serde_json::json!({
                    "message": format!("unknown internal endpoint: {INTERNAL_PREFIX}{endpoint}"),
                }),
            ),
        }
    }
}

/// Translates a decision into Envoy's HTTP ext_authz response.
///
/// On allow, headers are copied for the upstream request and metadata is
/// sent as `x-turnstile-metadata-<key>`. Pseudo-headers such as `:path`
/// travel as `x-turnstile-<name>`.
pub fn check_response(decision: &CheckResponse) -> Response<Full<Bytes>> {
    let body = decision.json_body().map(Bytes::from).unwrap_or_default();
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = decision.status_code();

    let headers = response.headers_mut();
    copy_fields(headers, decision.headers(), |name| {
        name.strip_prefix(':')
            .map_or_else(|| name.to_string(), |pseudo| format!("x-turnstile-{pseudo}"))
    });
    if decision.is_allowed() {
        copy_fields(headers, decision.metadata(), |key| {
            format!("{METADATA_HEADER_PREFIX}{key}")
        });
    } else {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    response
}

fn copy_fields(headers: &mut http::HeaderMap, fields: &Fields, name_of: impl Fn(&str) -> String) {
    for (key, value) in fields {
        let name = name_of(key);
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(field = %key, "skipping field not representable as a header"),
        }
    }
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use turnstile_authz::{DenyStatus, PolicyRegistry};
    use turnstile_store::SnapshotStore;

    fn server(prefix: &str) -> AuthzServer {
        let snapshots = Arc::new(SnapshotStore::new());
        let handler = AuthorizationHandler::new(snapshots.clone(), Arc::new(PolicyRegistry::new()));
        let health = Arc::new(HealthChecker::new(snapshots));
        AuthzServer::new(handler, health, prefix, Duration::from_secs(1))
    }

    fn parts(uri: &str) -> http::request::Parts {
        Request::builder()
            .uri(uri)
            .header("host", "api.example.com")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn peer() -> SocketAddr {
        "10.0.0.1:50000".parse().unwrap()
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_strip_prefix() {
        let server = server("/authz/");
        assert_eq!(server.strip_prefix("/authz/v1/a?x=1"), "/v1/a?x=1");
        assert_eq!(server.strip_prefix("/authz"), "/");
        assert_eq!(server.strip_prefix("/authz?apikey=k"), "/?apikey=k");
        assert_eq!(server.strip_prefix("/authzv1"), "/authzv1");
        assert_eq!(server.strip_prefix("/other"), "/other");

        let server = self::server("");
        assert_eq!(server.strip_prefix("/v1/a"), "/v1/a");
    }

    #[test]
    fn test_allow_response_headers() {
        let mut headers = Fields::new();
        headers.insert("x-developer-id".into(), "dev-1".into());
        headers.insert(":path".into(), "/v1/a".into());
        let mut metadata = Fields::new();
        metadata.insert("app.id".into(), "app-1".into());

        let response = check_response(&CheckResponse::Allow { headers, metadata });
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-developer-id"], "dev-1");
        assert_eq!(response.headers()["x-turnstile-path"], "/v1/a");
        assert_eq!(response.headers()["x-turnstile-metadata-app.id"], "app-1");
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn test_deny_response_body() {
        let mut decision = CheckResponse::deny(DenyStatus::Unauthorized, "Invalid access token");
        if let CheckResponse::Deny { headers, metadata, .. } = &mut decision {
            headers.insert("x-bad\nname".into(), "v".into());
            metadata.insert("app.id".into(), "app-1".into());
        }

        let response = check_response(&decision);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert!(response.headers().get("x-turnstile-metadata-app.id").is_none());
        assert_eq!(body_string(response).await, r#"{"message":"Invalid access token"}"#);
    }

    #[tokio::test]
    async fn test_admin_endpoints() {
        let server = server("");

        let response = server.admin_respond(&parts("/_turnstile/health"));
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("\"healthy\""));

        let response = server.admin_respond(&parts("/_turnstile/ready"));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = server.admin_respond(&parts("/_turnstile/version"));
        assert!(body_string(response).await.contains(crate::VERSION));

        let response = server.admin_respond(&parts("/_turnstile/nope"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = server.admin_respond(&parts("/v1/widgets"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_internal_paths_are_checked_on_check_listener() {
        let server = server("");

        for path in ["/_turnstile/health", "/_turnstile/version", "/_turnstile/nope"] {
            let response = server.respond(parts(path), peer()).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{path}");
            assert_eq!(body_string(response).await, r#"{"message":"unknown vhost"}"#);
        }
    }

    #[test]
    fn test_listener_display() {
        assert_eq!(Listener::Check.to_string(), "check");
        assert_eq!(Listener::Admin.to_string(), "admin");
    }

    #[tokio::test]
    async fn test_check_unknown_vhost() {
        let server = server("/authz");

        let response = server.respond(parts("/authz/v1/a"), peer()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_string(response).await, r#"{"message":"unknown vhost"}"#);
    }
}
