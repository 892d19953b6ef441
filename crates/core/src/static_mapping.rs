//! Static role and claim mappings.
//!
//! A lookup-table alternative to the rule engine: each registered
//! application keeps a fixed list of role name pairs and claim type pairs.
//! No conditions and no priorities; a claim mapping may carry one transform
//! expression for the value.

use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::StoreError;
use crate::models::{
    fold_case, Claim, ClaimMapping, ClaimTransformation, MappingDirection, RoleMapping,
};
use crate::rules::{keys, transform, RuleContext};
use crate::store::{ApplicationStore, ClaimMappingStore, RoleMappingStore, Stores};

/// Maintains and applies the static mappings of registered applications.
#[derive(Clone)]
pub struct StaticMappingService {
    applications: Arc<dyn ApplicationStore>,
    roles: Arc<dyn RoleMappingStore>,
    claims: Arc<dyn ClaimMappingStore>,
}

impl StaticMappingService {
    pub fn new(stores: &Stores) -> Self {
        Self {
            applications: stores.applications.clone(),
            roles: stores.role_mappings.clone(),
            claims: stores.claim_mappings.clone(),
        }
    }

    async fn require_application(&self, application_id: &str) -> Result<(), StoreError> {
        match self.applications.get_by_id(application_id).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found("application", application_id)),
        }
    }

    // -- roles ---------------------------------------------------------------

    /// Translate one role name. `Bidirectional` reads as legacy to
    /// centralized.
    pub async fn translate_role(
        &self,
        application_id: &str,
        role: &str,
        direction: MappingDirection,
    ) -> Result<Option<String>, StoreError> {
        self.require_application(application_id).await?;

        let mapping = match direction {
            MappingDirection::CentralizedToLegacy => {
                self.roles.get_by_centralized_role(application_id, role).await?
            }
            _ => self.roles.get_by_legacy_role(application_id, role).await?,
        };
        let translated = mapping
            .as_ref()
            .and_then(|m| m.translate(role, direction))
            .map(str::to_string);
        debug!(application_id, role, %direction, translated = ?translated, "translated role");
        Ok(translated)
    }

    pub async fn role_mapping(&self, id: &str) -> Result<Option<RoleMapping>, StoreError> {
        self.roles.get_by_id(id).await
    }

    pub async fn role_mappings_for(
        &self,
        application_id: &str,
    ) -> Result<Vec<RoleMapping>, StoreError> {
        self.require_application(application_id).await?;
        self.roles.get_by_application(application_id).await
    }

    pub async fn all_role_mappings(
        &self,
        skip: usize,
        take: usize,
    ) -> Result<Vec<RoleMapping>, StoreError> {
        self.roles.list(skip, take).await
    }

    /// Add a role pair to a registered application.
    pub async fn create_role_mapping(&self, mapping: &RoleMapping) -> Result<RoleMapping, StoreError> {
        self.require_application(&mapping.application_id).await?;
        let created = self.roles.create(mapping).await?;
        info!(
            application_id = %created.application_id,
            legacy_role = %created.legacy_role_name,
            centralized_role = %created.centralized_role_name,
            "created role mapping"
        );
        Ok(created)
    }

    pub async fn update_role_mapping(&self, mapping: &RoleMapping) -> Result<RoleMapping, StoreError> {
        self.roles.update(mapping).await
    }

    pub async fn delete_role_mapping(&self, id: &str) -> Result<bool, StoreError> {
        let deleted = self.roles.delete(id).await?;
        if deleted {
            info!(role_mapping_id = id, "deleted role mapping");
        }
        Ok(deleted)
    }

    // -- claims --------------------------------------------------------------

    /// Translate a batch of claims through the application's claim mappings.
    ///
    /// Claims without a mapping, or whose mapping is excluded for
    /// `direction`, are left out. Input order is kept.
    pub async fn transform_claims(
        &self,
        application_id: &str,
        claims: &[Claim],
        direction: MappingDirection,
    ) -> Result<Vec<ClaimTransformation>, StoreError> {
        self.require_application(application_id).await?;

        let mappings = self.claims.get_by_application(application_id).await?;
        let mut out = Vec::with_capacity(claims.len());
        for claim in claims {
            let Some(mapping) = find_claim_mapping(&mappings, &claim.claim_type, direction) else {
                debug!(application_id, claim_type = %claim.claim_type, "no claim mapping");
                continue;
            };
            if !mapping.included_in(direction) {
                debug!(application_id, claim_type = %claim.claim_type, %direction, "claim excluded");
                continue;
            }
            out.push(apply_claim_mapping(mapping, claim, direction));
        }
        Ok(out)
    }

    pub async fn claim_mapping(&self, id: &str) -> Result<Option<ClaimMapping>, StoreError> {
        self.claims.get_by_id(id).await
    }

    pub async fn claim_mappings_for(
        &self,
        application_id: &str,
    ) -> Result<Vec<ClaimMapping>, StoreError> {
        self.require_application(application_id).await?;
        self.claims.get_by_application(application_id).await
    }

    pub async fn all_claim_mappings(
        &self,
        skip: usize,
        take: usize,
    ) -> Result<Vec<ClaimMapping>, StoreError> {
        self.claims.list(skip, take).await
    }

    /// Add a claim type pair to a registered application.
    pub async fn create_claim_mapping(
        &self,
        mapping: &ClaimMapping,
    ) -> Result<ClaimMapping, StoreError> {
        self.require_application(&mapping.application_id).await?;
        let created = self.claims.create(mapping).await?;
        info!(
            application_id = %created.application_id,
            legacy_claim_type = %created.legacy_claim_type,
            centralized_claim_type = %created.centralized_claim_type,
            "created claim mapping"
        );
        Ok(created)
    }

    pub async fn update_claim_mapping(
        &self,
        mapping: &ClaimMapping,
    ) -> Result<ClaimMapping, StoreError> {
        self.claims.update(mapping).await
    }

    pub async fn delete_claim_mapping(&self, id: &str) -> Result<bool, StoreError> {
        let deleted = self.claims.delete(id).await?;
        if deleted {
            info!(claim_mapping_id = id, "deleted claim mapping");
        }
        Ok(deleted)
    }
}

fn find_claim_mapping<'a>(
    mappings: &'a [ClaimMapping],
    claim_type: &str,
    direction: MappingDirection,
) -> Option<&'a ClaimMapping> {
    let wanted = fold_case(claim_type);
    mappings.iter().find(|m| {
        let near = match direction {
            MappingDirection::CentralizedToLegacy => &m.centralized_claim_type,
            _ => &m.legacy_claim_type,
        };
        fold_case(near) == wanted
    })
}

fn apply_claim_mapping(
    mapping: &ClaimMapping,
    claim: &Claim,
    direction: MappingDirection,
) -> ClaimTransformation {
    let transformed_type = match direction {
        MappingDirection::CentralizedToLegacy => mapping.legacy_claim_type.clone(),
        _ => mapping.centralized_claim_type.clone(),
    };

    let transformed_value = match mapping.transformation_expression.as_deref() {
        Some(expression) if !expression.is_empty() => {
            let mut scope = RuleContext::new();
            scope.insert(keys::SOURCE_CLAIM, claim.clone());
            scope.insert(keys::SOURCE_CLAIM_TYPE, claim.claim_type.as_str());
            scope.insert(keys::SOURCE_CLAIM_VALUE, claim.value.as_str());
            transform::apply(&claim.value, expression, &scope)
        }
        _ => claim.value.clone(),
    };

    ClaimTransformation {
        original_type: claim.claim_type.clone(),
        original_value: claim.value.clone(),
        transformed_type,
        transformed_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Application;
    use crate::store::MemoryStore;

    async fn service() -> (StaticMappingService, Stores) {
        let stores = Stores::from_shared(Arc::new(MemoryStore::new()));
        stores
            .applications
            .create(&Application::new("CRM").with_id("crm"))
            .await
            .unwrap();
        (StaticMappingService::new(&stores), stores)
    }

    #[tokio::test]
    async fn test_translate_role_both_ways() {
        let (service, _) = service().await;
        service
            .create_role_mapping(&RoleMapping::new("crm", "Administrators", "admin"))
            .await
            .unwrap();

        let to_central = service
            .translate_role("crm", "ADMINISTRATORS", MappingDirection::LegacyToCentralized)
            .await
            .unwrap();
        assert_eq!(to_central.as_deref(), Some("admin"));

        let to_legacy = service
            .translate_role("crm", "Admin", MappingDirection::CentralizedToLegacy)
            .await
            .unwrap();
        assert_eq!(to_legacy.as_deref(), Some("Administrators"));

        let unknown = service
            .translate_role("crm", "Guests", MappingDirection::LegacyToCentralized)
            .await
            .unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn test_unregistered_application_is_not_found() {
        let (service, _) = service().await;
        let err = service
            .translate_role("erp", "admin", MappingDirection::LegacyToCentralized)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let err = service
            .create_claim_mapping(&ClaimMapping::new("erp", "mail", "email"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_transform_claims_honours_flags_and_expressions() {
        let (service, _) = service().await;
        service
            .create_claim_mapping(&ClaimMapping::new("crm", "mail", "email").with_transform("lowercase"))
            .await
            .unwrap();
        let mut internal = ClaimMapping::new("crm", "cost_centre", "department");
        internal.include_in_centralized = false;
        service.create_claim_mapping(&internal).await.unwrap();

        let claims = vec![
            Claim::new("Mail", "Ann@Example.COM"),
            Claim::new("cost_centre", "4711"),
            Claim::new("shoe_size", "42"),
        ];
        let out = service
            .transform_claims("crm", &claims, MappingDirection::LegacyToCentralized)
            .await
            .unwrap();
        assert_eq!(
            out,
            vec![ClaimTransformation {
                original_type: "Mail".into(),
                original_value: "Ann@Example.COM".into(),
                transformed_type: "email".into(),
                transformed_value: "ann@example.com".into(),
            }]
        );

        let back = service
            .transform_claims(
                "crm",
                &[Claim::new("department", "ops")],
                MappingDirection::CentralizedToLegacy,
            )
            .await
            .unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].transformed_type, "cost_centre");
        assert_eq!(back[0].transformed_value, "ops");
    }

    #[tokio::test]
    async fn test_broken_expression_keeps_value() {
        let (service, _) = service().await;
        service
            .create_claim_mapping(&ClaimMapping::new("crm", "mail", "email").with_transform("'"))
            .await
            .unwrap();
        let out = service
            .transform_claims("crm", &[Claim::new("mail", "a@b.com")], MappingDirection::LegacyToCentralized)
            .await
            .unwrap();
        assert_eq!(out[0].transformed_value, "a@b.com");
    }
}
