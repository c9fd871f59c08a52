//! Cache keys and cached payloads.

use std::fmt;

use turnstile_core::{redact, ApiProduct, Credential, Developer, DeveloperApp, OAuthToken};
use turnstile_store::EntityKind;

/// Separator between the parts of a composite identifier.
const KEY_SEPARATOR: char = '%';

/// Cache key: entity kind plus identifier.
///
/// Organization-scoped entities join their parts with `%`, so
/// `("acme", "WidgetAPI")` becomes `acme%WidgetAPI`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: EntityKind,
    id: String,
}

impl CacheKey {
    /// Creates a key for a globally unique identifier.
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Creates a key for an identifier unique within an organization.
    pub fn scoped(kind: EntityKind, organization: &str, id: &str) -> Self {
        Self::new(kind, format!("{organization}{KEY_SEPARATOR}{id}"))
    }

    /// Entity kind.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier safe to log: secrets are redacted.
    pub fn display_id(&self) -> String {
        if !self.kind.key_is_secret() {
            return self.id.clone();
        }
        match self.id.split_once(KEY_SEPARATOR) {
            Some((organization, secret)) => {
                format!("{organization}{KEY_SEPARATOR}{}", redact(secret))
            }
            None => redact(&self.id),
        }
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.display_id())
    }
}

/// Payload stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedEntity {
    /// API key credential.
    Credential(Credential),
    /// Developer app.
    DeveloperApp(DeveloperApp),
    /// Developer.
    Developer(Developer),
    /// API product.
    ApiProduct(ApiProduct),
    /// OAuth token row (cached under access, refresh and code kinds).
    OAuthToken(OAuthToken),
}

/// Entity types the cache can hold.
///
/// Values go in and come out by clone, so a caller can never mutate what
/// another request will read.
pub trait Cacheable: Clone + Send + Sync + 'static {
    /// Wraps the value for storage.
    fn into_entry(self) -> CachedEntity;

    /// Unwraps a stored value, `None` if it holds another type.
    fn from_entry(entry: &CachedEntity) -> Option<Self>;
}

macro_rules! impl_cacheable {
    ($($ty:ident),* $(,)?) => {
        $(
            impl Cacheable for $ty {
                fn into_entry(self) -> CachedEntity {
                    CachedEntity::$ty(self)
                }

                fn from_entry(entry: &CachedEntity) -> Option<Self> {
                    match entry {
                        CachedEntity::$ty(value) => Some(value.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_cacheable!(Credential, DeveloperApp, Developer, ApiProduct, OAuthToken);
