//! Store traits backed by the SQLite [`Database`].
//!
//! The queries are short and local, so they run inline on the calling task
//! rather than on a blocking thread pool.

use async_trait::async_trait;
use chrono::Utc;

use super::{
    link_in_sequence, prepare_application, same_object, ApplicationStore, ClaimMappingStore,
    IdentityStore, MappingStore, RoleMappingStore, RuleStore,
};
use crate::db::Database;
use crate::errors::StoreError;
use crate::models::{
    fold_case, Application, ClaimMapping, MappingDirection, MappingRule, RoleMapping, RuleType,
    UserIdMapping, UserIdentity,
};

fn fresh_id(id: &str) -> String {
    if id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        id.to_string()
    }
}

#[async_trait]
impl RuleStore for Database {
    async fn get_by_id(&self, id: &str) -> Result<Option<MappingRule>, StoreError> {
        self.select_rule(id)
    }

    async fn get_by_application(&self, application_id: &str) -> Result<Vec<MappingRule>, StoreError> {
        self.select_rules_by_application(application_id)
    }

    async fn get_by_type(
        &self,
        application_id: &str,
        rule_type: RuleType,
    ) -> Result<Vec<MappingRule>, StoreError> {
        self.select_rules_by_type(application_id, rule_type)
    }

    async fn get_by_type_and_direction(
        &self,
        application_id: &str,
        rule_type: RuleType,
        direction: MappingDirection,
    ) -> Result<Vec<MappingRule>, StoreError> {
        self.select_rules_by_type_and_direction(application_id, rule_type, direction)
    }

    async fn get_by_source_identifier(
        &self,
        application_id: &str,
        rule_type: RuleType,
        source_identifier: &str,
    ) -> Result<Vec<MappingRule>, StoreError> {
        self.select_rules_by_source(application_id, rule_type, source_identifier)
    }

    async fn create(&self, rule: &MappingRule) -> Result<MappingRule, StoreError> {
        let now = Utc::now();
        let rule = MappingRule {
            id: fresh_id(&rule.id),
            created_at: now,
            updated_at: now,
            ..rule.clone()
        };
        self.insert_rule(&rule)?;
        Ok(rule)
    }

    async fn update(&self, rule: &MappingRule) -> Result<MappingRule, StoreError> {
        let mut updated = rule.clone();
        updated.updated_at = Utc::now();
        if !self.update_rule(&updated)? {
            return Err(StoreError::not_found("rule", &rule.id));
        }
        self.select_rule(&rule.id)?
            .ok_or_else(|| StoreError::not_found("rule", &rule.id))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_rule(id)
    }
}

#[async_trait]
impl MappingStore for Database {
    async fn get_by_id(&self, id: &str) -> Result<Option<UserIdMapping>, StoreError> {
        self.select_mapping(id)
    }

    async fn get_by_legacy_user_id(
        &self,
        application_id: &str,
        legacy_user_id: &str,
    ) -> Result<Option<UserIdMapping>, StoreError> {
        self.select_mapping_by_legacy_id(application_id, legacy_user_id)
    }

    async fn get_by_application_and_identity_id(
        &self,
        application_id: &str,
        centralized_identity_id: &str,
    ) -> Result<Option<UserIdMapping>, StoreError> {
        self.select_mapping_by_identity(application_id, centralized_identity_id)
    }

    async fn list_by_application(
        &self,
        application_id: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<UserIdMapping>, StoreError> {
        self.select_mappings_by_application(application_id, skip, take)
    }

    async fn create(&self, mapping: &UserIdMapping) -> Result<UserIdMapping, StoreError> {
        let mapping = UserIdMapping {
            id: fresh_id(&mapping.id),
            created_at: Utc::now(),
            ..mapping.clone()
        };
        self.insert_mapping(&mapping)?;
        Ok(mapping)
    }

    async fn create_linked(
        &self,
        mapping: &UserIdMapping,
        identities: &dyn IdentityStore,
    ) -> Result<UserIdMapping, StoreError> {
        if !same_object(identities, self) {
            return link_in_sequence(self, mapping, identities).await;
        }
        let mapping = UserIdMapping {
            id: fresh_id(&mapping.id),
            created_at: Utc::now(),
            ..mapping.clone()
        };
        self.insert_linked_mapping(&mapping)?;
        Ok(mapping)
    }

    async fn update(&self, mapping: &UserIdMapping) -> Result<UserIdMapping, StoreError> {
        if !self.update_mapping(mapping)? {
            return Err(StoreError::not_found("mapping", &mapping.id));
        }
        self.select_mapping(&mapping.id)?
            .ok_or_else(|| StoreError::not_found("mapping", &mapping.id))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_mapping(id)
    }
}

#[async_trait]
impl IdentityStore for Database {
    async fn get_by_id(&self, id: &str) -> Result<Option<UserIdentity>, StoreError> {
        self.select_identity(id)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<UserIdentity>, StoreError> {
        self.select_identity_by_email(email)
    }

    async fn get_by_mobile_number(
        &self,
        mobile_number: &str,
    ) -> Result<Option<UserIdentity>, StoreError> {
        self.select_identity_by_mobile(mobile_number)
    }

    async fn create(&self, identity: &UserIdentity) -> Result<UserIdentity, StoreError> {
        let now = Utc::now();
        let identity = UserIdentity {
            id: fresh_id(&identity.id),
            created_at: now,
            updated_at: now,
            ..identity.clone()
        };
        self.insert_identity(&identity)?;
        Ok(identity)
    }

    async fn list(&self, skip: usize, take: usize) -> Result<Vec<UserIdentity>, StoreError> {
        self.select_identities(skip, take)
    }

    async fn update(&self, identity: &UserIdentity) -> Result<UserIdentity, StoreError> {
        let mut updated = identity.clone();
        updated.updated_at = Utc::now();
        if !self.update_identity(&updated)? {
            return Err(StoreError::not_found("identity", &identity.id));
        }
        self.select_identity(&identity.id)?
            .ok_or_else(|| StoreError::not_found("identity", &identity.id))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_identity(id)
    }

    async fn add_legacy_user_id(
        &self,
        identity_id: &str,
        application_id: &str,
        legacy_user_id: &str,
    ) -> Result<bool, StoreError> {
        self.upsert_identity_legacy_id(identity_id, application_id, legacy_user_id)
    }

    async fn find_by_legacy_user_id(
        &self,
        application_id: &str,
        legacy_user_id: &str,
    ) -> Result<Option<UserIdentity>, StoreError> {
        self.select_identity_by_legacy_id(application_id, legacy_user_id)
    }
}

#[async_trait]
impl ApplicationStore for Database {
    async fn get_by_id(&self, id: &str) -> Result<Option<Application>, StoreError> {
        self.select_application(id)
    }

    async fn list(&self, skip: usize, take: usize) -> Result<Vec<Application>, StoreError> {
        self.select_applications(skip, take)
    }

    async fn create(&self, application: &Application) -> Result<Application, StoreError> {
        let application = prepare_application(application);
        self.insert_application(&application)?;
        Ok(application)
    }

    async fn update(&self, application: &Application) -> Result<Application, StoreError> {
        let mut updated = application.clone();
        updated.updated_at = Utc::now();
        if !self.update_application(&updated)? {
            return Err(StoreError::not_found("application", &application.id));
        }
        self.select_application(&application.id)?
            .ok_or_else(|| StoreError::not_found("application", &application.id))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_application(id)
    }

    async fn set_api_key(&self, id: &str, api_key: &str) -> Result<bool, StoreError> {
        self.update_application_api_key(id, api_key)
    }
}

#[async_trait]
impl RoleMappingStore for Database {
    async fn get_by_id(&self, id: &str) -> Result<Option<RoleMapping>, StoreError> {
        self.select_role_mapping(id)
    }

    async fn get_by_application(&self, application_id: &str) -> Result<Vec<RoleMapping>, StoreError> {
        self.select_role_mappings_by_application(application_id)
    }

    async fn list(&self, skip: usize, take: usize) -> Result<Vec<RoleMapping>, StoreError> {
        self.select_role_mappings(skip, take)
    }

    async fn get_by_legacy_role(
        &self,
        application_id: &str,
        legacy_role_name: &str,
    ) -> Result<Option<RoleMapping>, StoreError> {
        let wanted = fold_case(legacy_role_name);
        Ok(self
            .select_role_mappings_by_application(application_id)?
            .into_iter()
            .find(|m| fold_case(&m.legacy_role_name) == wanted))
    }

    async fn get_by_centralized_role(
        &self,
        application_id: &str,
        centralized_role_name: &str,
    ) -> Result<Option<RoleMapping>, StoreError> {
        let wanted = fold_case(centralized_role_name);
        Ok(self
            .select_role_mappings_by_application(application_id)?
            .into_iter()
            .find(|m| fold_case(&m.centralized_role_name) == wanted))
    }

    async fn create(&self, mapping: &RoleMapping) -> Result<RoleMapping, StoreError> {
        let mapping = RoleMapping {
            id: fresh_id(&mapping.id),
            created_at: Utc::now(),
            ..mapping.clone()
        };
        self.insert_role_mapping(&mapping)?;
        Ok(mapping)
    }

    async fn update(&self, mapping: &RoleMapping) -> Result<RoleMapping, StoreError> {
        if !self.update_role_mapping(mapping)? {
            return Err(StoreError::not_found("role mapping", &mapping.id));
        }
        self.select_role_mapping(&mapping.id)?
            .ok_or_else(|| StoreError::not_found("role mapping", &mapping.id))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_role_mapping(id)
    }
}

#[async_trait]
impl ClaimMappingStore for Database {
    async fn get_by_id(&self, id: &str) -> Result<Option<ClaimMapping>, StoreError> {
        self.select_claim_mapping(id)
    }

    async fn get_by_application(
        &self,
        application_id: &str,
    ) -> Result<Vec<ClaimMapping>, StoreError> {
        self.select_claim_mappings_by_application(application_id)
    }

    async fn list(&self, skip: usize, take: usize) -> Result<Vec<ClaimMapping>, StoreError> {
        self.select_claim_mappings(skip, take)
    }

    async fn get_by_legacy_claim_type(
        &self,
        application_id: &str,
        legacy_claim_type: &str,
    ) -> Result<Option<ClaimMapping>, StoreError> {
        let wanted = fold_case(legacy_claim_type);
        Ok(self
            .select_claim_mappings_by_application(application_id)?
            .into_iter()
            .find(|m| fold_case(&m.legacy_claim_type) == wanted))
    }

    async fn get_by_centralized_claim_type(
        &self,
        application_id: &str,
        centralized_claim_type: &str,
    ) -> Result<Option<ClaimMapping>, StoreError> {
        let wanted = fold_case(centralized_claim_type);
        Ok(self
            .select_claim_mappings_by_application(application_id)?
            .into_iter()
            .find(|m| fold_case(&m.centralized_claim_type) == wanted))
    }

    async fn create(&self, mapping: &ClaimMapping) -> Result<ClaimMapping, StoreError> {
        let now = Utc::now();
        let mapping = ClaimMapping {
            id: fresh_id(&mapping.id),
            created_at: now,
            updated_at: now,
            ..mapping.clone()
        };
        self.insert_claim_mapping(&mapping)?;
        Ok(mapping)
    }

    async fn update(&self, mapping: &ClaimMapping) -> Result<ClaimMapping, StoreError> {
        let mut updated = mapping.clone();
        updated.updated_at = Utc::now();
        if !self.update_claim_mapping(&updated)? {
            return Err(StoreError::not_found("claim mapping", &mapping.id));
        }
        self.select_claim_mapping(&mapping.id)?
            .ok_or_else(|| StoreError::not_found("claim mapping", &mapping.id))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_claim_mapping(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::Stores;

    fn stores() -> Stores {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        Stores::from_shared(Arc::new(db))
    }

    #[tokio::test]
    async fn test_create_fills_id_and_timestamps() {
        let stores = stores();
        let mut rule = MappingRule::new(
            "crm",
            "mail",
            RuleType::Claim,
            "mail",
            "email",
            MappingDirection::Bidirectional,
            1,
        );
        rule.id = String::new();
        let created = stores.rules.create(&rule).await.unwrap();
        assert!(!created.id.is_empty());
        assert!(stores.rules.get_by_id(&created.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let stores = stores();
        let mapping = UserIdMapping::new("crm", "L1", "id-1");
        let err = stores.mappings.update(&mapping).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_preserves_created_at() {
        let stores = stores();
        let created = stores
            .mappings
            .create(&UserIdMapping::new("crm", "L1", "id-1"))
            .await
            .unwrap();
        let mut validated = created.clone();
        validated.is_validated = true;
        validated.created_at = Utc::now() + chrono::Duration::days(1);
        let stored = stores.mappings.update(&validated).await.unwrap();
        assert!(stored.is_validated);
        assert_eq!(stored.created_at.timestamp(), created.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_create_linked_records_legacy_id() {
        let stores = stores();
        let identity = stores
            .identities
            .create(&UserIdentity::new("Ada"))
            .await
            .unwrap();

        let mapping = stores
            .mappings
            .create_linked(
                &UserIdMapping::new("crm", "L1", &identity.id),
                stores.identities.as_ref(),
            )
            .await
            .unwrap();
        let found = stores
            .identities
            .find_by_legacy_user_id("crm", "L1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, identity.id);

        let err = stores
            .mappings
            .create_linked(
                &UserIdMapping::new("crm", "L2", "ghost"),
                stores.identities.as_ref(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(stores.mappings.get_by_legacy_user_id("crm", "L2").await.unwrap().is_none());
        assert_eq!(stores.mappings.get_by_id(&mapping.id).await.unwrap().unwrap().legacy_user_id, "L1");
    }

    #[tokio::test]
    async fn test_static_lookups_fold_case() {
        let stores = stores();
        stores
            .role_mappings
            .create(&RoleMapping::new("his", "Ärzte", "physicians"))
            .await
            .unwrap();
        let found = stores
            .role_mappings
            .get_by_legacy_role("his", "ÄRZTE")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.centralized_role_name, "physicians");

        stores
            .claim_mappings
            .create(&ClaimMapping::new("his", "Straße", "street"))
            .await
            .unwrap();
        assert!(stores
            .claim_mappings
            .get_by_centralized_claim_type("his", "STREET")
            .await
            .unwrap()
            .is_some());
        assert!(stores
            .claim_mappings
            .get_by_legacy_claim_type("his", "strasse")
            .await
            .unwrap()
            .is_none());
    }
}
