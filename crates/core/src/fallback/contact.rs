//! Fallback strategies keyed on a contact attribute.
//!
//! The email and mobile-number strategies behave identically apart from
//! which attribute they read from the context and look identities up by.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{FallbackContext, FallbackResult, FallbackStrategy};
use crate::errors::StoreError;
use crate::models::{UserIdMapping, UserIdentity};
use crate::store::{IdentityStore, MappingStore};

/// Default priority for both contact strategies.
pub const DEFAULT_PRIORITY: i32 = 50;

/// Which contact attribute a strategy keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactKind {
    Email,
    MobileNumber,
}

impl ContactKind {
    fn name(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::MobileNumber => "mobile",
        }
    }

    /// Capitalized noun for result messages.
    fn noun(self) -> &'static str {
        match self {
            Self::Email => "Email",
            Self::MobileNumber => "Mobile number",
        }
    }

    fn value_in(self, ctx: &FallbackContext) -> Option<&str> {
        match self {
            Self::Email => ctx.email(),
            Self::MobileNumber => ctx.mobile_number(),
        }
    }
}

/// Resolves or creates a mapping through an identity found by email or
/// mobile number.
pub struct ContactFallbackStrategy {
    kind: ContactKind,
    priority: i32,
    identities: Arc<dyn IdentityStore>,
    mappings: Arc<dyn MappingStore>,
}

impl ContactFallbackStrategy {
    pub fn new(
        kind: ContactKind,
        identities: Arc<dyn IdentityStore>,
        mappings: Arc<dyn MappingStore>,
    ) -> Self {
        Self {
            kind,
            priority: DEFAULT_PRIORITY,
            identities,
            mappings,
        }
    }

    pub fn email(identities: Arc<dyn IdentityStore>, mappings: Arc<dyn MappingStore>) -> Self {
        Self::new(ContactKind::Email, identities, mappings)
    }

    pub fn mobile(identities: Arc<dyn IdentityStore>, mappings: Arc<dyn MappingStore>) -> Self {
        Self::new(ContactKind::MobileNumber, identities, mappings)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn kind(&self) -> ContactKind {
        self.kind
    }

    async fn find_identity(&self, contact: &str) -> Result<Option<UserIdentity>, StoreError> {
        match self.kind {
            ContactKind::Email => self.identities.get_by_email(contact).await,
            ContactKind::MobileNumber => self.identities.get_by_mobile_number(contact).await,
        }
    }

    fn metadata(&self, contact: &str) -> String {
        format!(
            "Created by {}-based fallback strategy for {} {}",
            self.kind.name(),
            self.kind.name(),
            contact
        )
    }

    fn mismatch(&self) -> FallbackResult {
        FallbackResult::failure(format!(
            "{} matches a different centralized identity than provided",
            self.kind.noun()
        ))
    }

    /// Return the application's mapping for `legacy_user_id`, creating one
    /// that points at `identity_id` if there is none.
    async fn find_or_create_mapping(
        &self,
        application_id: &str,
        legacy_user_id: &str,
        identity_id: &str,
        contact: &str,
        created_message: String,
    ) -> Result<FallbackResult, StoreError> {
        if let Some(existing) = self
            .mappings
            .get_by_legacy_user_id(application_id, legacy_user_id)
            .await?
        {
            info!(application_id, legacy_user_id, "found existing mapping for legacy user ID");
            return Ok(FallbackResult::success(
                existing,
                "Found existing mapping by legacy user ID",
            ));
        }

        let created = self
            .link(application_id, legacy_user_id, identity_id, contact)
            .await?;
        Ok(FallbackResult::success(created, created_message))
    }

    /// Create an unvalidated mapping and register the legacy ID on the
    /// identity.
    async fn link(
        &self,
        application_id: &str,
        legacy_user_id: &str,
        identity_id: &str,
        contact: &str,
    ) -> Result<UserIdMapping, StoreError> {
        let mapping = UserIdMapping::new(application_id, legacy_user_id, identity_id)
            .with_metadata(self.metadata(contact));
        let created = self
            .mappings
            .create_linked(&mapping, self.identities.as_ref())
            .await?;
        info!(
            application_id,
            mapping_id = %created.id,
            legacy_user_id,
            identity_id,
            "created mapping via fallback"
        );
        Ok(created)
    }
}

#[async_trait]
impl FallbackStrategy for ContactFallbackStrategy {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_handle(&self, _application_id: &str, ctx: &FallbackContext) -> bool {
        self.kind.value_in(ctx).is_some()
    }

    async fn handle(
        &self,
        application_id: &str,
        ctx: &FallbackContext,
    ) -> Result<FallbackResult, StoreError> {
        let Some(contact) = self.kind.value_in(ctx) else {
            return Ok(FallbackResult::failure(format!(
                "{} is required for the {} fallback strategy",
                self.kind.noun(),
                self.kind.name()
            )));
        };
        info!(application_id, strategy = self.kind.name(), contact, "attempting contact-based fallback");

        match self.find_identity(contact).await? {
            Some(identity) => match (ctx.legacy_id(), ctx.identity_id()) {
                (Some(legacy_user_id), None) => {
                    self.find_or_create_mapping(
                        application_id,
                        legacy_user_id,
                        &identity.id,
                        contact,
                        format!(
                            "Created new mapping based on existing user identity found by {}",
                            self.kind.noun().to_lowercase()
                        ),
                    )
                    .await
                }
                (None, Some(wanted)) => {
                    if identity.id != wanted {
                        warn!(found = %identity.id, wanted, "contact matches a different identity");
                        return Ok(self.mismatch());
                    }
                    if let Some(legacy_user_id) = identity.legacy_user_ids.get(application_id) {
                        if let Some(mapping) = self
                            .mappings
                            .get_by_legacy_user_id(application_id, legacy_user_id)
                            .await?
                        {
                            return Ok(FallbackResult::success(
                                mapping,
                                "Found existing mapping from central identity's legacy IDs",
                            ));
                        }
                    }
                    Ok(FallbackResult::failure(
                        "Cannot create a mapping without a legacy user ID",
                    ))
                }
                (Some(legacy_user_id), Some(wanted)) => {
                    if identity.id != wanted {
                        warn!(found = %identity.id, wanted, "contact matches a different identity");
                        return Ok(self.mismatch());
                    }
                    self.find_or_create_mapping(
                        application_id,
                        legacy_user_id,
                        &identity.id,
                        contact,
                        "Created new mapping based on provided IDs and existing user identity".into(),
                    )
                    .await
                }
                (None, None) => {
                    warn!(application_id, "insufficient information to create a mapping");
                    Ok(FallbackResult::failure("Insufficient information to create a mapping"))
                }
            },
            None => match (ctx.display_name(), ctx.legacy_id()) {
                (Some(display_name), Some(legacy_user_id)) => {
                    info!(application_id, contact, "no identity for contact, creating one");
                    let identity = match self.kind {
                        ContactKind::Email => UserIdentity::new(display_name).with_email(contact),
                        ContactKind::MobileNumber => {
                            UserIdentity::new(display_name).with_mobile_number(contact)
                        }
                    };
                    let identity = self.identities.create(&identity).await?;
                    let mapping = self
                        .link(application_id, legacy_user_id, &identity.id, contact)
                        .await?;
                    Ok(FallbackResult::success(
                        mapping,
                        format!(
                            "Created new user identity and mapping based on {} and display name",
                            self.kind.noun().to_lowercase()
                        ),
                    ))
                }
                _ => {
                    warn!(application_id, "insufficient information to create a mapping");
                    Ok(FallbackResult::failure("Insufficient information to create a mapping"))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FallbackStrategyManager;
    use crate::store::MemoryStore;

    const APP: &str = "crm";

    fn email_strategy(store: &Arc<MemoryStore>) -> ContactFallbackStrategy {
        ContactFallbackStrategy::email(store.clone(), store.clone())
    }

    async fn seed_identity(store: &MemoryStore, identity: UserIdentity) -> UserIdentity {
        IdentityStore::create(store, &identity).await.unwrap()
    }

    #[test]
    fn test_can_handle_requires_contact() {
        let store = Arc::new(MemoryStore::new());
        let email = email_strategy(&store);
        let mobile = ContactFallbackStrategy::mobile(store.clone(), store.clone());

        let ctx = FallbackContext::for_legacy_user("L1").with_email("a@b.com");
        assert!(email.can_handle(APP, &ctx));
        assert!(!mobile.can_handle(APP, &ctx));
        assert!(!email.can_handle(APP, &FallbackContext::for_legacy_user("L1")));
        assert_eq!(email.priority(), DEFAULT_PRIORITY);
        assert_eq!(mobile.name(), "mobile");
    }

    #[tokio::test]
    async fn test_links_existing_identity_by_email() {
        let store = Arc::new(MemoryStore::new());
        let identity = seed_identity(&store, UserIdentity::new("Ada").with_email("a@b.com")).await;

        let ctx = FallbackContext::for_legacy_user("L1").with_email("A@B.com");
        let result = email_strategy(&store).handle(APP, &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.centralized_identity_id.as_deref(), Some(identity.id.as_str()));

        let mapping = result.mapping.unwrap();
        assert!(!mapping.is_validated);
        assert_eq!(
            mapping.metadata.as_deref(),
            Some("Created by email-based fallback strategy for email A@B.com")
        );
        assert_eq!(store.list_by_application(APP, 0, 10).await.unwrap().len(), 1);

        let stored = IdentityStore::get_by_id(store.as_ref(), &identity.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.legacy_user_ids.get(APP).map(String::as_str), Some("L1"));
    }

    #[tokio::test]
    async fn test_returns_existing_mapping_without_creating() {
        let store = Arc::new(MemoryStore::new());
        seed_identity(&store, UserIdentity::new("Ada").with_email("a@b.com")).await;
        let existing = MappingStore::create(store.as_ref(), &UserIdMapping::new(APP, "L1", "other"))
            .await
            .unwrap();

        let ctx = FallbackContext::for_legacy_user("L1").with_email("a@b.com");
        let result = email_strategy(&store).handle(APP, &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.mapping.unwrap().id, existing.id);
        assert_eq!(store.list_by_application(APP, 0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reverse_lookup_through_identity_legacy_ids() {
        let store = Arc::new(MemoryStore::new());
        let identity = seed_identity(&store, UserIdentity::new("Ada").with_email("a@b.com")).await;
        store.add_legacy_user_id(&identity.id, APP, "L9").await.unwrap();
        MappingStore::create(store.as_ref(), &UserIdMapping::new(APP, "L9", &identity.id))
            .await
            .unwrap();

        let ctx = FallbackContext {
            centralized_identity_id: Some(identity.id.clone()),
            user_email: Some("a@b.com".into()),
            ..FallbackContext::default()
        };
        let result = email_strategy(&store).handle(APP, &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.legacy_user_id.as_deref(), Some("L9"));
    }

    #[tokio::test]
    async fn test_reverse_lookup_cannot_fabricate_legacy_id() {
        let store = Arc::new(MemoryStore::new());
        let identity = seed_identity(&store, UserIdentity::new("Ada").with_email("a@b.com")).await;

        let ctx = FallbackContext {
            centralized_identity_id: Some(identity.id.clone()),
            user_email: Some("a@b.com".into()),
            ..FallbackContext::default()
        };
        let result = email_strategy(&store).handle(APP, &ctx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Cannot create a mapping without a legacy user ID");
    }

    #[tokio::test]
    async fn test_identity_mismatch_fails() {
        let store = Arc::new(MemoryStore::new());
        seed_identity(&store, UserIdentity::new("Ada").with_email("a@b.com")).await;

        let ctx = FallbackContext {
            legacy_user_id: Some("L1".into()),
            centralized_identity_id: Some("someone-else".into()),
            user_email: Some("a@b.com".into()),
            ..FallbackContext::default()
        };
        let result = email_strategy(&store).handle(APP, &ctx).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("different centralized identity"));
        assert!(store.list_by_application(APP, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_both_ids_create_mapping() {
        let store = Arc::new(MemoryStore::new());
        let identity = seed_identity(&store, UserIdentity::new("Ada").with_email("a@b.com")).await;

        let ctx = FallbackContext {
            legacy_user_id: Some("L1".into()),
            centralized_identity_id: Some(identity.id.clone()),
            user_email: Some("a@b.com".into()),
            ..FallbackContext::default()
        };
        let result = email_strategy(&store).handle(APP, &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.mapping.unwrap().centralized_identity_id, identity.id);
    }

    #[tokio::test]
    async fn test_creates_identity_by_mobile() {
        let store = Arc::new(MemoryStore::new());
        let strategy = ContactFallbackStrategy::mobile(store.clone(), store.clone());

        let ctx = FallbackContext::for_legacy_user("L1")
            .with_mobile_number("+15550100")
            .with_display_name("Grace");
        let result = strategy.handle(APP, &ctx).await.unwrap();
        assert!(result.success);

        let identity = store.get_by_mobile_number("+15550100").await.unwrap().unwrap();
        assert_eq!(identity.display_name, "Grace");
        assert!(!identity.mobile_verified);
        assert_eq!(identity.legacy_user_ids.get(APP).map(String::as_str), Some("L1"));
        assert_eq!(result.centralized_identity_id.as_deref(), Some(identity.id.as_str()));
    }

    #[tokio::test]
    async fn test_insufficient_information() {
        let store = Arc::new(MemoryStore::new());
        let ctx = FallbackContext::for_legacy_user("L1").with_email("new@b.com");
        let result = email_strategy(&store).handle(APP, &ctx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Insufficient information to create a mapping");
        assert!(store.get_by_email("new@b.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chain_without_contact_attributes_fails() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = FallbackStrategyManager::new();
        manager.register_strategy(Arc::new(email_strategy(&store)));
        manager.register_strategy(Arc::new(ContactFallbackStrategy::mobile(
            store.clone(),
            store.clone(),
        )));

        let ctx = FallbackContext::for_legacy_user("L1").with_display_name("Ada");
        let result = manager.execute_fallback(APP, &ctx).await;
        assert!(!result.success);
        assert!(store.list_by_application(APP, 0, 10).await.unwrap().is_empty());
    }
}
