//! Turnstile ext_authz service.
//!
//! Envoy's HTTP `ext_authz` filter forwards every client request here before
//! routing it. Turnstile resolves the virtual host, runs its policy chains
//! and answers with the decision.
//!
//! ```text
//!   client ──► Envoy ──► upstream
//!                │  ▲
//!   check request│  │ 200 + headers / 401 / 403 / 503
//!                ▼  │
//!        ┌────────────────────┐      ┌──────────────┐
//!        │ AuthzServer        │      │ SnapshotStore│◄── SnapshotRefresher
//!        │  check listener ───┼─► AuthorizationHandler        │
//!        │  admin listener    │        │                      ▼
//!        └────────────────────┘        └─► EntityCache ──► Database
//! ```
//!
//! # Admin endpoints
//!
//! Served only on the admin listener (`server.admin_addr`). On the check
//! listener these paths are checks like any other.
//!
//! | Path | Response |
//! |------|----------|
//! | `/_turnstile/health` | Liveness |
//! | `/_turnstile/ready` | 200 once virtual hosts are loaded, 503 while draining |
//! | `/_turnstile/metrics` | Prometheus text format |
//! | `/_turnstile/version` | Build version |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod app;
mod error;
mod health;
mod server;
mod shutdown;

pub use app::Turnstile;
pub use error::{ServerError, ServerResult};
pub use health::{
    CheckResult, HealthChecker, HealthResponse, HealthStatus, ReadinessResponse, ReadinessStatus,
};
pub use server::{
    check_response, AuthzServer, Listener, INTERNAL_PREFIX, METADATA_HEADER_PREFIX,
    REQUEST_ID_HEADER,
};
pub use shutdown::ShutdownSignal;

/// Version of the Turnstile service.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
