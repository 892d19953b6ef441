//! User ID mapping service.
//!
//! Looks up authoritative mappings first and, when asked to, falls back to
//! the strategy chain for users nobody has linked yet.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::StoreError;
use crate::fallback::{FallbackContext, FallbackResult, FallbackStrategyManager};
use crate::models::UserIdMapping;
use crate::store::{IdentityStore, MappingStore, Stores};

/// Resolves and maintains legacy user ID <-> centralized identity links.
#[derive(Clone)]
pub struct MappingService {
    mappings: Arc<dyn MappingStore>,
    identities: Arc<dyn IdentityStore>,
    fallback: Arc<FallbackStrategyManager>,
    fallback_enabled: bool,
}

impl MappingService {
    pub fn new(stores: &Stores, fallback: Arc<FallbackStrategyManager>) -> Self {
        Self {
            mappings: stores.mappings.clone(),
            identities: stores.identities.clone(),
            fallback,
            fallback_enabled: true,
        }
    }

    /// Turn fallback resolution on or off. When off, `use_fallback` on the
    /// lookups is ignored.
    pub fn with_fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn fallback_enabled(&self) -> bool {
        self.fallback_enabled
    }

    /// Centralized identity for a legacy user, optionally resolving through
    /// the fallback chain when no mapping exists.
    pub async fn centralized_identity_id(
        &self,
        application_id: &str,
        legacy_user_id: &str,
        use_fallback: bool,
        context: Option<FallbackContext>,
    ) -> Result<Option<String>, StoreError> {
        if let Some(mapping) = self
            .mappings
            .get_by_legacy_user_id(application_id, legacy_user_id)
            .await?
        {
            return Ok(Some(mapping.centralized_identity_id));
        }

        if !(use_fallback && self.fallback_enabled) {
            debug!(application_id, legacy_user_id, "no mapping and fallback not requested");
            return Ok(None);
        }

        let mut ctx = context.unwrap_or_default();
        if ctx.legacy_id().is_none() {
            ctx.legacy_user_id = Some(legacy_user_id.to_string());
        }

        let result = self.try_fallback(application_id, &ctx).await;
        match result.centralized_identity_id {
            Some(identity_id) if result.success => {
                info!(
                    application_id,
                    legacy_user_id,
                    identity_id = %identity_id,
                    "resolved centralized identity through fallback"
                );
                Ok(Some(identity_id))
            }
            _ => {
                warn!(
                    application_id,
                    legacy_user_id,
                    "fallback could not resolve a centralized identity"
                );
                Ok(None)
            }
        }
    }

    /// Legacy user ID for a centralized identity, optionally resolving
    /// through the fallback chain. Missing contact details in the context
    /// are filled from the identity record first.
    pub async fn legacy_user_id(
        &self,
        application_id: &str,
        identity_id: &str,
        use_fallback: bool,
        context: Option<FallbackContext>,
    ) -> Result<Option<String>, StoreError> {
        if let Some(mapping) = self
            .mappings
            .get_by_application_and_identity_id(application_id, identity_id)
            .await?
        {
            return Ok(Some(mapping.legacy_user_id));
        }

        if !(use_fallback && self.fallback_enabled) {
            debug!(application_id, identity_id, "no mapping and fallback not requested");
            return Ok(None);
        }

        let mut ctx = context.unwrap_or_default();
        if ctx.identity_id().is_none() {
            ctx.centralized_identity_id = Some(identity_id.to_string());
        }

        if ctx.email().is_none() || ctx.mobile_number().is_none() {
            if let Some(identity) = self.identities.get_by_id(identity_id).await? {
                if ctx.email().is_none() {
                    ctx.user_email = identity.email;
                }
                if ctx.mobile_number().is_none() {
                    ctx.user_mobile_number = identity.mobile_number;
                }
                if ctx.display_name().is_none() {
                    ctx.user_display_name = Some(identity.display_name);
                }
            }
        }

        let result = self.try_fallback(application_id, &ctx).await;
        match result.legacy_user_id {
            Some(legacy_user_id) if result.success => {
                info!(
                    application_id,
                    identity_id,
                    legacy_user_id = %legacy_user_id,
                    "resolved legacy user ID through fallback"
                );
                Ok(Some(legacy_user_id))
            }
            _ => {
                warn!(
                    application_id,
                    identity_id,
                    "fallback could not resolve a legacy user ID"
                );
                Ok(None)
            }
        }
    }

    /// Link a legacy user to an existing identity. The mapping starts
    /// unvalidated and the legacy ID is recorded on the identity in the same
    /// write.
    pub async fn create_mapping(
        &self,
        application_id: &str,
        legacy_user_id: &str,
        identity_id: &str,
    ) -> Result<UserIdMapping, StoreError> {
        let mapping = self
            .mappings
            .create_linked(
                &UserIdMapping::new(application_id, legacy_user_id, identity_id),
                self.identities.as_ref(),
            )
            .await?;

        info!(
            application_id,
            legacy_user_id,
            identity_id,
            mapping_id = %mapping.id,
            "created mapping"
        );
        Ok(mapping)
    }

    /// Mark a mapping as confirmed. Returns `false` if it does not exist.
    pub async fn validate_mapping(&self, mapping_id: &str) -> Result<bool, StoreError> {
        let Some(mut mapping) = self.mappings.get_by_id(mapping_id).await? else {
            return Ok(false);
        };
        mapping.is_validated = true;
        self.mappings.update(&mapping).await?;
        info!(mapping_id, "validated mapping");
        Ok(true)
    }

    pub async fn delete_mapping(&self, mapping_id: &str) -> Result<bool, StoreError> {
        let deleted = self.mappings.delete(mapping_id).await?;
        if deleted {
            info!(mapping_id, "deleted mapping");
        }
        Ok(deleted)
    }

    pub async fn mapping(&self, mapping_id: &str) -> Result<Option<UserIdMapping>, StoreError> {
        self.mappings.get_by_id(mapping_id).await
    }

    pub async fn mappings_for_application(
        &self,
        application_id: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<UserIdMapping>, StoreError> {
        self.mappings
            .list_by_application(application_id, skip, take)
            .await
    }

    /// Run the fallback chain directly.
    pub async fn try_fallback(&self, application_id: &str, ctx: &FallbackContext) -> FallbackResult {
        self.fallback.execute_fallback(application_id, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackConfig;
    use crate::fallback::build_manager;
    use crate::models::UserIdentity;
    use crate::store::MemoryStore;

    fn service() -> (MappingService, Stores) {
        let stores = Stores::from_shared(Arc::new(MemoryStore::new()));
        let manager = build_manager(&FallbackConfig::default(), &stores);
        (MappingService::new(&stores, Arc::new(manager)), stores)
    }

    async fn seed_identity(stores: &Stores, email: &str) -> UserIdentity {
        stores
            .identities
            .create(&UserIdentity::new("Alice").with_email(email))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_lookup_both_ways() {
        let (service, stores) = service();
        let identity = seed_identity(&stores, "alice@example.com").await;

        let mapping = service.create_mapping("crm", "L1", &identity.id).await.unwrap();
        assert!(!mapping.is_validated);

        let found = service
            .centralized_identity_id("crm", "L1", false, None)
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some(identity.id.as_str()));

        let found = service
            .legacy_user_id("crm", &identity.id, false, None)
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("L1"));

        let identity = stores.identities.get_by_id(&identity.id).await.unwrap().unwrap();
        assert_eq!(identity.legacy_user_ids.get("crm").map(String::as_str), Some("L1"));
    }

    #[tokio::test]
    async fn test_create_requires_identity() {
        let (service, _) = service();
        let err = service.create_mapping("crm", "L1", "missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate() {
        let (service, stores) = service();
        let identity = seed_identity(&stores, "alice@example.com").await;
        service.create_mapping("crm", "L1", &identity.id).await.unwrap();

        let err = service.create_mapping("crm", "L1", &identity.id).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_lookup_without_fallback_returns_none() {
        let (service, stores) = service();
        seed_identity(&stores, "alice@example.com").await;

        let ctx = FallbackContext::default().with_email("alice@example.com");
        let found = service
            .centralized_identity_id("crm", "L1", false, Some(ctx))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_lookup_with_fallback_links_by_email() {
        let (service, stores) = service();
        let identity = seed_identity(&stores, "alice@example.com").await;

        // The caller's context lacks the legacy ID; the service fills it in.
        let ctx = FallbackContext::default().with_email("ALICE@example.com");
        let found = service
            .centralized_identity_id("crm", "L1", true, Some(ctx))
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some(identity.id.as_str()));

        let mapping = stores
            .mappings
            .get_by_legacy_user_id("crm", "L1")
            .await
            .unwrap()
            .unwrap();
        assert!(!mapping.is_validated);
    }

    #[tokio::test]
    async fn test_reverse_fallback_cannot_invent_legacy_id() {
        let (service, stores) = service();
        let identity = seed_identity(&stores, "alice@example.com").await;

        // The email comes from the identity record; with no legacy ID known
        // for the application the chain has nothing to link.
        let found = service
            .legacy_user_id("crm", &identity.id, true, None)
            .await
            .unwrap();
        assert!(found.is_none());
        assert!(stores
            .mappings
            .list_by_application("crm", 0, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_disabled_fallback_ignores_request() {
        let (service, stores) = service();
        let service = service.with_fallback_enabled(false);
        seed_identity(&stores, "alice@example.com").await;

        let ctx = FallbackContext::default().with_email("alice@example.com");
        let found = service
            .centralized_identity_id("crm", "L1", true, Some(ctx))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_validate_and_delete() {
        let (service, stores) = service();
        let identity = seed_identity(&stores, "alice@example.com").await;
        let mapping = service.create_mapping("crm", "L1", &identity.id).await.unwrap();

        assert!(service.validate_mapping(&mapping.id).await.unwrap());
        assert!(service.mapping(&mapping.id).await.unwrap().unwrap().is_validated);
        assert!(!service.validate_mapping("missing").await.unwrap());

        assert_eq!(service.mappings_for_application("crm", 0, 10).await.unwrap().len(), 1);
        assert!(service.delete_mapping(&mapping.id).await.unwrap());
        assert!(!service.delete_mapping(&mapping.id).await.unwrap());
        assert!(service.mapping(&mapping.id).await.unwrap().is_none());
    }
}
