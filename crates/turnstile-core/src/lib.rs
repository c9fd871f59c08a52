//! # Turnstile Core
//!
//! Core types shared by every Turnstile crate.
//!
//! - [`AttributeBag`] - Ordered name/value attributes carried by every entity
//! - [`Credential`], [`DeveloperApp`], [`Developer`], [`ApiProduct`] - The entitlement chain
//! - [`OAuthToken`] - Stored OAuth2 token triple (code, access, refresh)
//! - [`VirtualHost`] - Listener configuration resolved from the `Host` header
//! - [`Clock`] - Millisecond time source, swappable in tests
//!
//! All timestamps are epoch milliseconds. [`NEVER`] (`-1`) marks an
//! expiry or suspension that is not set.

#![doc(html_root_url = "https://docs.rs/turnstile-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod attribute;
pub mod clock;
mod entity;
mod error;
mod redact;

pub use attribute::{Attribute, AttributeBag};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use entity::{
    ApiProduct, Credential, Developer, DeveloperApp, OAuthToken, ProductEntitlement, VirtualHost,
    NEVER, STATUS_APPROVED,
};
pub use error::{AttributeError, AttributeResult};
pub use redact::redact;
