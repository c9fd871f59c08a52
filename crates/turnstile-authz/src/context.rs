//! Per-request context.
//!
//! A [`RequestContext`] is built once per check from the incoming
//! [`CheckRequest`] and handed by mutable reference down the policy chains,
//! which fill in the resolved virtual host, credential, app, developer and
//! API product as they go.

use std::net::IpAddr;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use turnstile_core::{ApiProduct, Credential, Developer, DeveloperApp, VirtualHost};

use crate::error::ContextError;

/// Attributes of the request being authorized.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    /// HTTP method.
    pub method: Method,
    /// Scheme the client used, `http` or `https`.
    pub scheme: String,
    /// Host as seen by the proxy. Falls back to the `host` header when empty.
    pub host: String,
    /// Path including the query string.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Address of the connecting peer.
    pub peer_ip: Option<IpAddr>,
}

impl CheckRequest {
    /// Creates a request for `method` and `path`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            scheme: "http".to_string(),
            host: String::new(),
            path: path.into(),
            headers: HeaderMap::new(),
            peer_ip: None,
        }
    }

    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the scheme.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Appends a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Sets the peer address.
    pub fn with_peer_ip(mut self, ip: IpAddr) -> Self {
        self.peer_ip = Some(ip);
        self
    }

    /// Effective host: the explicit host, else the `host` header.
    pub fn host(&self) -> &str {
        if !self.host.is_empty() {
            return &self.host;
        }
        self.headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

/// State of one authorization check.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request: CheckRequest,
    path: String,
    raw_query: Option<String>,
    query: Vec<(String, String)>,
    client_ip: Option<IpAddr>,

    /// API key presented by the caller, once a policy has found it.
    pub api_key: Option<String>,
    /// OAuth2 bearer token presented by the caller.
    pub oauth2_token: Option<String>,
    /// Matched virtual host.
    pub vhost: Option<VirtualHost>,
    /// Resolved credential.
    pub credential: Option<Credential>,
    /// Resolved developer app.
    pub developer_app: Option<DeveloperApp>,
    /// Resolved developer.
    pub developer: Option<Developer>,
    /// API product the request path is authorized under.
    pub api_product: Option<ApiProduct>,
}

impl RequestContext {
    /// Parses the request's path and query.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::MalformedPath` if the path is not a URI with an
    /// absolute path, and `ContextError::MalformedQuery` if the query string
    /// has a broken percent escape.
    pub fn from_request(request: CheckRequest) -> Result<Self, ContextError> {
        let uri: Uri = request
            .path
            .parse()
            .map_err(|_| ContextError::MalformedPath)?;
        if !uri.path().starts_with('/') {
            return Err(ContextError::MalformedPath);
        }

        let raw_query = uri.query().map(str::to_string);
        let query = match raw_query.as_deref() {
            Some(q) => parse_query(q)?,
            None => Vec::new(),
        };

        let client_ip = forwarded_for(&request.headers).or(request.peer_ip);

        Ok(Self {
            path: uri.path().to_string(),
            raw_query,
            query,
            client_ip,
            request,
            api_key: None,
            oauth2_token: None,
            vhost: None,
            credential: None,
            developer_app: None,
            developer: None,
            api_product: None,
        })
    }

    /// The original request.
    pub fn request(&self) -> &CheckRequest {
        &self.request
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.request.method
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, if any.
    pub fn raw_query(&self) -> Option<&str> {
        self.raw_query.as_deref()
    }

    /// Decoded query parameters in request order.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// First value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// First value of header `name`, if it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Client address: first `x-forwarded-for` entry, else the peer.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// Organization of the matched virtual host, empty if none.
    pub fn organization(&self) -> &str {
        self.vhost
            .as_ref()
            .map(|vhost| vhost.organization_name.as_str())
            .unwrap_or_default()
    }
}

fn parse_query(query: &str) -> Result<Vec<(String, String)>, ContextError> {
    if !has_valid_escapes(query) {
        return Err(ContextError::MalformedQuery);
    }
    serde_urlencoded::from_str(query).map_err(|_| ContextError::MalformedQuery)
}

fn has_valid_escapes(query: &str) -> bool {
    let bytes = query.as_bytes();
    bytes.iter().enumerate().all(|(i, b)| {
        *b != b'%'
            || bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
    })
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}
