//! # Turnstile Authz
//!
//! The request authorization engine behind the Turnstile ext_authz service.
//!
//! # Overview
//!
//! Every check runs the same pipeline:
//! - Match the request host against the current virtual-host snapshot
//! - Run the virtual host's policy chain, which usually authenticates the
//!   caller and resolves the API product it is entitled to
//! - Run the matched product's own policy chain, if it has one
//! - Merge both results into an allow (with upstream headers and metadata)
//!   or a deny (with status and message)
//!
//! # Architecture
//!
//! ```text
//!     CheckRequest
//!          │
//!   ┌──────▼──────────────┐      ┌─────────────────────┐
//!   │ AuthorizationHandler │─────▶│ SnapshotStore       │ vhost lookup
//!   └──────┬──────────────┘      └─────────────────────┘
//!          │ RequestContext
//!   ┌──────▼──────────────┐      ┌─────────────────────┐
//!   │ PolicyChain         │─────▶│ PolicyRegistry      │ name -> Policy
//!   │ (listener, product) │      └──────────┬──────────┘
//!   └──────┬──────────────┘                 │ apikey, oauth2
//!          │                      ┌─────────▼──────────┐
//!          │                      │ EntitlementResolver │
//!          │                      │ OAuthTokenStore     │
//!          │                      └─────────┬──────────┘
//!          │                                │ read-through
//!          ▼                      ┌─────────▼──────────┐
//!     CheckResponse               │ EntityCache -> DB   │
//!                                 └────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use turnstile_authz::{AuthorizationHandler, CheckRequest, PolicyRegistry};
//!
//! let registry = Arc::new(PolicyRegistry::standard(resolver, tokens));
//! let handler = AuthorizationHandler::new(snapshots, registry);
//!
//! let request = CheckRequest::new(http::Method::GET, "/v1/widgets?apikey=KEY1")
//!     .with_host("api.example.com");
//! let response = handler.check(request).await;
//! if !response.is_allowed() {
//!     println!("denied: {}", response.json_body().unwrap_or_default());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chain;
pub mod context;
pub mod entitlement;
pub mod error;
pub mod glob;
pub mod handler;
pub mod outcome;
pub mod policy;
pub mod tokens;

// Re-exports for convenience
pub use chain::{policy_names, PolicyChain, PolicyScope};
pub use context::{CheckRequest, RequestContext};
pub use entitlement::EntitlementResolver;
pub use error::{ContextError, EntitlementError, EntitlementResult, UnknownPolicy};
pub use glob::{glob_match, Glob, GlobCache, GlobError};
pub use handler::{AuthorizationHandler, CheckResponse, UNKNOWN_VHOST};
pub use outcome::{ChainResult, DenyStatus, Fields, PolicyOutcome, NO_CREDENTIALS};
pub use policy::{Policy, PolicyRegistry};
pub use tokens::OAuthTokenStore;
