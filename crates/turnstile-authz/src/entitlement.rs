//! API key entitlement resolution.
//!
//! Resolves the chain credential → developer app → developer, checks that
//! all of them are in good standing, then walks the credential's approved
//! products looking for the first path pattern that matches the request.

use std::sync::Arc;

use tracing::{debug, error};
use turnstile_cache::{CacheKey, EntityCache};
use turnstile_core::{redact, ApiProduct, Credential, Developer, DeveloperApp, SharedClock};
use turnstile_store::{Database, EntityKind, StoreResult};
use turnstile_telemetry::metrics::record_entitlement_failure;

use crate::context::RequestContext;
use crate::error::{EntitlementError, EntitlementResult};
use crate::glob::GlobCache;

/// Resolves which API product, if any, an API key grants for a request.
#[derive(Clone)]
pub struct EntitlementResolver {
    cache: Arc<EntityCache>,
    db: Arc<dyn Database>,
    clock: SharedClock,
    globs: Arc<GlobCache>,
}

impl std::fmt::Debug for EntitlementResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementResolver")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl EntitlementResolver {
    /// Creates a resolver reading through `cache` into `db`.
    pub fn new(cache: Arc<EntityCache>, db: Arc<dyn Database>, clock: SharedClock) -> Self {
        Self {
            cache,
            db,
            clock,
            globs: Arc::new(GlobCache::default()),
        }
    }

    /// The clock used for suspension and expiry checks.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Checks that `ctx.api_key` grants access to `ctx.path()` within
    /// `organization`.
    ///
    /// The credential, app, developer and finally the matched product are
    /// stored in `ctx` as they resolve.
    pub async fn check_product_entitlement(
        &self,
        organization: &str,
        ctx: &mut RequestContext,
    ) -> EntitlementResult<()> {
        let result = self.resolve(organization, ctx).await;
        if let Err(e) = &result {
            record_entitlement_failure(e.reason());
            self.log_failure(organization, ctx, e);
        }
        result
    }

    async fn resolve(&self, organization: &str, ctx: &mut RequestContext) -> EntitlementResult<()> {
        let api_key = ctx.api_key.clone().ok_or(EntitlementError::UnknownApiKey)?;

        let credential = self.resolve_credential(organization, &api_key).await?;
        ctx.credential = Some(credential.clone());

        let app = self.resolve_app(&credential).await?;
        ctx.developer_app = Some(app.clone());

        let developer = self.resolve_developer(&app).await?;
        ctx.developer = Some(developer.clone());

        self.validate(&developer, &credential)?;

        let product = self
            .match_product(organization, ctx.path(), &credential)
            .await?;
        ctx.api_product = Some(product);
        Ok(())
    }

    async fn resolve_credential(
        &self,
        organization: &str,
        api_key: &str,
    ) -> EntitlementResult<Credential> {
        let key = CacheKey::scoped(EntityKind::Credential, organization, api_key);
        self.cache
            .get_or_fetch(key, self.db.credential(organization, api_key))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    EntitlementError::UnknownApiKey
                } else {
                    EntitlementError::Backend(e)
                }
            })
    }

    async fn resolve_app(&self, credential: &Credential) -> EntitlementResult<DeveloperApp> {
        let app_id = credential.app_id.as_str();
        let key = CacheKey::new(EntityKind::DeveloperApp, app_id);
        self.cache
            .get_or_fetch(key, self.db.developer_app(app_id))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    EntitlementError::OrphanedCredential {
                        app_id: app_id.to_string(),
                    }
                } else {
                    EntitlementError::Backend(e)
                }
            })
    }

    async fn resolve_developer(&self, app: &DeveloperApp) -> EntitlementResult<Developer> {
        let developer_id = app.developer_id.as_str();
        let key = CacheKey::new(EntityKind::Developer, developer_id);
        self.cache
            .get_or_fetch(key, self.db.developer(developer_id))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    EntitlementError::OrphanedApp {
                        app_id: app.app_id.clone(),
                        developer_id: developer_id.to_string(),
                    }
                } else {
                    EntitlementError::Backend(e)
                }
            })
    }

    fn validate(&self, developer: &Developer, credential: &Credential) -> EntitlementResult<()> {
        let now = self.clock.now_millis();

        if developer.is_suspended_at(now) {
            return Err(EntitlementError::DeveloperSuspended {
                developer_id: developer.developer_id.clone(),
                until: developer.suspended_till,
            });
        }
        if !credential.is_approved() {
            return Err(EntitlementError::CredentialNotApproved {
                status: credential.status.clone(),
            });
        }
        if credential.is_expired_at(now) {
            return Err(EntitlementError::CredentialExpired {
                expires_at: credential.expires_at,
            });
        }
        Ok(())
    }

    async fn match_product(
        &self,
        organization: &str,
        path: &str,
        credential: &Credential,
    ) -> EntitlementResult<ApiProduct> {
        for entitlement in credential.api_products.iter().filter(|e| e.is_approved()) {
            let product = match self.api_product(organization, &entitlement.api_product).await {
                Ok(product) => product,
                Err(e) => {
                    debug!(
                        organization,
                        product = %entitlement.api_product,
                        error = %e,
                        "skipping unresolvable api product"
                    );
                    continue;
                }
            };

            if let Some(pattern) = product
                .paths
                .iter()
                .find(|pattern| self.globs.is_match(pattern, path))
            {
                debug!(product = %product.name, pattern = %pattern, path, "path authorized");
                return Ok(product);
            }
        }

        Err(EntitlementError::NoAuthorizedPath {
            path: path.to_string(),
        })
    }

    async fn api_product(&self, organization: &str, name: &str) -> StoreResult<ApiProduct> {
        let key = CacheKey::scoped(EntityKind::ApiProduct, organization, name);
        self.cache
            .get_or_fetch(key, self.db.api_product(organization, name))
            .await
    }

    fn log_failure(&self, organization: &str, ctx: &RequestContext, e: &EntitlementError) {
        let api_key = ctx.api_key.as_deref().map(redact).unwrap_or_default();
        // Backend failures were already logged at warn by the cache.
        if e.is_data_integrity() {
            error!(organization, api_key = %api_key, error = %e, "inconsistent entitlement data");
        } else {
            debug!(organization, api_key = %api_key, reason = e.reason(), "entitlement denied");
        }
    }
}
