//! Process-local store implementing every store trait.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    link_in_sequence, prepare_application, same_object, sort_by_priority, ApplicationStore, ClaimMappingStore, IdentityStore,
    MappingStore, RoleMappingStore, RuleStore,
};
use crate::errors::StoreError;
use crate::models::{
    fold_case, Application, ClaimMapping, MappingDirection, MappingRule, RoleMapping, RuleType,
    UserIdMapping, UserIdentity,
};

/// In-memory counterpart of every table in the SQLite schema.
///
/// Records live in insertion order, which is what breaks priority ties.
#[derive(Default)]
pub struct MemoryStore {
    rules: RwLock<Vec<MappingRule>>,
    mappings: RwLock<Vec<UserIdMapping>>,
    identities: RwLock<Vec<UserIdentity>>,
    applications: RwLock<Vec<Application>>,
    role_mappings: RwLock<Vec<RoleMapping>>,
    claim_mappings: RwLock<Vec<ClaimMapping>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn rules_where<F>(&self, keep: F) -> Vec<MappingRule>
    where
        F: Fn(&MappingRule) -> bool,
    {
        let mut rules: Vec<MappingRule> = self
            .rules
            .read()
            .await
            .iter()
            .filter(|r| keep(r))
            .cloned()
            .collect();
        sort_by_priority(&mut rules);
        rules
    }
}

fn fresh_id(id: &str) -> String {
    if id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        id.to_string()
    }
}

fn page<T>(items: Vec<T>, skip: usize, take: usize) -> Vec<T> {
    items.into_iter().skip(skip).take(take).collect()
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[async_trait]
impl RuleStore for MemoryStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<MappingRule>, StoreError> {
        Ok(self.rules.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn get_by_application(&self, application_id: &str) -> Result<Vec<MappingRule>, StoreError> {
        Ok(self.rules_where(|r| r.application_id == application_id).await)
    }

    async fn get_by_type(
        &self,
        application_id: &str,
        rule_type: RuleType,
    ) -> Result<Vec<MappingRule>, StoreError> {
        Ok(self
            .rules_where(|r| {
                r.application_id == application_id && r.rule_type == rule_type && r.is_enabled
            })
            .await)
    }

    async fn get_by_type_and_direction(
        &self,
        application_id: &str,
        rule_type: RuleType,
        direction: MappingDirection,
    ) -> Result<Vec<MappingRule>, StoreError> {
        Ok(self
            .rules_where(|r| {
                r.application_id == application_id
                    && r.rule_type == rule_type
                    && r.is_enabled
                    && r.direction.applies_to(direction)
            })
            .await)
    }

    async fn get_by_source_identifier(
        &self,
        application_id: &str,
        rule_type: RuleType,
        source_identifier: &str,
    ) -> Result<Vec<MappingRule>, StoreError> {
        Ok(self
            .rules_where(|r| {
                r.application_id == application_id
                    && r.rule_type == rule_type
                    && r.source_identifier == source_identifier
                    && r.is_enabled
            })
            .await)
    }

    async fn create(&self, rule: &MappingRule) -> Result<MappingRule, StoreError> {
        let mut rules = self.rules.write().await;
        let mut rule = rule.clone();
        rule.id = fresh_id(&rule.id);
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(StoreError::Conflict(format!("rule {} already exists", rule.id)));
        }
        let now = Utc::now();
        rule.created_at = now;
        rule.updated_at = now;
        rules.push(rule.clone());
        debug!(rule_id = %rule.id, application_id = %rule.application_id, "created rule");
        Ok(rule)
    }

    async fn update(&self, rule: &MappingRule) -> Result<MappingRule, StoreError> {
        let mut rules = self.rules.write().await;
        let existing = rules
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or_else(|| StoreError::not_found("rule", &rule.id))?;
        let mut updated = rule.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();
        *existing = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| r.id != id);
        Ok(rules.len() != before)
    }
}

// ---------------------------------------------------------------------------
// Mappings
// ---------------------------------------------------------------------------

#[async_trait]
impl MappingStore for MemoryStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<UserIdMapping>, StoreError> {
        Ok(self.mappings.read().await.iter().find(|m| m.id == id).cloned())
    }

    async fn get_by_legacy_user_id(
        &self,
        application_id: &str,
        legacy_user_id: &str,
    ) -> Result<Option<UserIdMapping>, StoreError> {
        Ok(self
            .mappings
            .read()
            .await
            .iter()
            .find(|m| m.application_id == application_id && m.legacy_user_id == legacy_user_id)
            .cloned())
    }

    async fn get_by_application_and_identity_id(
        &self,
        application_id: &str,
        centralized_identity_id: &str,
    ) -> Result<Option<UserIdMapping>, StoreError> {
        Ok(self
            .mappings
            .read()
            .await
            .iter()
            .find(|m| {
                m.application_id == application_id
                    && m.centralized_identity_id == centralized_identity_id
            })
            .cloned())
    }

    async fn list_by_application(
        &self,
        application_id: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<UserIdMapping>, StoreError> {
        let mut page: Vec<UserIdMapping> = self
            .mappings
            .read()
            .await
            .iter()
            .filter(|m| m.application_id == application_id)
            .cloned()
            .collect();
        page.sort_by(|a, b| a.legacy_user_id.cmp(&b.legacy_user_id));
        Ok(page.into_iter().skip(skip).take(take).collect())
    }

    async fn create(&self, mapping: &UserIdMapping) -> Result<UserIdMapping, StoreError> {
        let mut mappings = self.mappings.write().await;
        if mappings.iter().any(|m| {
            m.application_id == mapping.application_id && m.legacy_user_id == mapping.legacy_user_id
        }) {
            return Err(StoreError::Conflict(format!(
                "a mapping already exists for application {} and legacy user ID {}",
                mapping.application_id, mapping.legacy_user_id
            )));
        }
        let mut mapping = mapping.clone();
        mapping.id = fresh_id(&mapping.id);
        mapping.created_at = Utc::now();
        mappings.push(mapping.clone());
        debug!(mapping_id = %mapping.id, application_id = %mapping.application_id, "created mapping");
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

        let mut mappings = self.mappings.write().await;
        let mut stored_identities = self.identities.write().await;
        let identity = stored_identities
            .iter_mut()
            .find(|i| i.id == mapping.centralized_identity_id)
            .ok_or_else(|| StoreError::not_found("identity", &mapping.centralized_identity_id))?;
        if mappings.iter().any(|m| {
            m.application_id == mapping.application_id && m.legacy_user_id == mapping.legacy_user_id
        }) {
            return Err(StoreError::Conflict(format!(
                "a mapping already exists for application {} and legacy user ID {}",
                mapping.application_id, mapping.legacy_user_id
            )));
        }
        let mut mapping = mapping.clone();
        mapping.id = fresh_id(&mapping.id);
        mapping.created_at = Utc::now();
        identity
            .legacy_user_ids
            .insert(mapping.application_id.clone(), mapping.legacy_user_id.clone());
        identity.updated_at = mapping.created_at;
        mappings.push(mapping.clone());
        debug!(mapping_id = %mapping.id, application_id = %mapping.application_id, "created linked mapping");
        Ok(mapping)
    }

    async fn update(&self, mapping: &UserIdMapping) -> Result<UserIdMapping, StoreError> {
        let mut mappings = self.mappings.write().await;
        if mappings.iter().any(|m| {
            m.id != mapping.id
                && m.application_id == mapping.application_id
                && m.legacy_user_id == mapping.legacy_user_id
        }) {
            return Err(StoreError::Conflict(format!(
                "a mapping already exists for application {} and legacy user ID {}",
                mapping.application_id, mapping.legacy_user_id
            )));
        }
        let existing = mappings
            .iter_mut()
            .find(|m| m.id == mapping.id)
            .ok_or_else(|| StoreError::not_found("mapping", &mapping.id))?;
        let mut updated = mapping.clone();
        updated.created_at = existing.created_at;
        *existing = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut mappings = self.mappings.write().await;
        let before = mappings.len();
        mappings.retain(|m| m.id != id);
        Ok(mappings.len() != before)
    }
}

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self.identities.read().await.iter().find(|i| i.id == id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self
            .identities
            .read()
            .await
            .iter()
            .find(|i| i.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .cloned())
    }

    async fn get_by_mobile_number(
        &self,
        mobile_number: &str,
    ) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self
            .identities
            .read()
            .await
            .iter()
            .find(|i| i.mobile_number.as_deref() == Some(mobile_number))
            .cloned())
    }

    async fn list(&self, skip: usize, take: usize) -> Result<Vec<UserIdentity>, StoreError> {
        let mut identities = self.identities.read().await.clone();
        identities.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(page(identities, skip, take))
    }

    async fn create(&self, identity: &UserIdentity) -> Result<UserIdentity, StoreError> {
        let mut identities = self.identities.write().await;
        let mut identity = identity.clone();
        identity.id = fresh_id(&identity.id);
        if identities.iter().any(|i| i.id == identity.id) {
            return Err(StoreError::Conflict(format!(
                "identity {} already exists",
                identity.id
            )));
        }
        let now = Utc::now();
        identity.created_at = now;
        identity.updated_at = now;
        identities.push(identity.clone());
        debug!(identity_id = %identity.id, "created identity");
        Ok(identity)
    }

    async fn update(&self, identity: &UserIdentity) -> Result<UserIdentity, StoreError> {
        let mut identities = self.identities.write().await;
        let existing = identities
            .iter_mut()
            .find(|i| i.id == identity.id)
            .ok_or_else(|| StoreError::not_found("identity", &identity.id))?;
        let mut updated = identity.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();
        *existing = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut identities = self.identities.write().await;
        let before = identities.len();
        identities.retain(|i| i.id != id);
        Ok(identities.len() != before)
    }

    async fn add_legacy_user_id(
        &self,
        identity_id: &str,
        application_id: &str,
        legacy_user_id: &str,
    ) -> Result<bool, StoreError> {
        let mut identities = self.identities.write().await;
        match identities.iter_mut().find(|i| i.id == identity_id) {
            Some(identity) => {
                identity
                    .legacy_user_ids
                    .insert(application_id.to_string(), legacy_user_id.to_string());
                identity.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_legacy_user_id(
        &self,
        application_id: &str,
        legacy_user_id: &str,
    ) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self
            .identities
            .read()
            .await
            .iter()
            .find(|i| {
                i.legacy_user_ids.get(application_id).map(String::as_str) == Some(legacy_user_id)
            })
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Applications
// ---------------------------------------------------------------------------

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<Application>, StoreError> {
        Ok(self.applications.read().await.iter().find(|a| a.id == id).cloned())
    }

    async fn list(&self, skip: usize, take: usize) -> Result<Vec<Application>, StoreError> {
        let mut applications = self.applications.read().await.clone();
        applications.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(page(applications, skip, take))
    }

    async fn create(&self, application: &Application) -> Result<Application, StoreError> {
        let mut applications = self.applications.write().await;
        let application = prepare_application(application);
        if applications.iter().any(|a| a.id == application.id) {
            return Err(StoreError::Conflict(format!(
                "application {} already exists",
                application.id
            )));
        }
        applications.push(application.clone());
        debug!(application_id = %application.id, "registered application");
        Ok(application)
    }

    async fn update(&self, application: &Application) -> Result<Application, StoreError> {
        let mut applications = self.applications.write().await;
        let existing = applications
            .iter_mut()
            .find(|a| a.id == application.id)
            .ok_or_else(|| StoreError::not_found("application", &application.id))?;
        let mut updated = application.clone();
        updated.api_key = existing.api_key.clone();
        updated.registered_at = existing.registered_at;
        updated.updated_at = Utc::now();
        *existing = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut applications = self.applications.write().await;
        let before = applications.len();
        applications.retain(|a| a.id != id);
        Ok(applications.len() != before)
    }

    async fn set_api_key(&self, id: &str, api_key: &str) -> Result<bool, StoreError> {
        let mut applications = self.applications.write().await;
        match applications.iter_mut().find(|a| a.id == id) {
            Some(application) => {
                application.api_key = api_key.to_string();
                application.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Static role and claim mappings
// ---------------------------------------------------------------------------

fn duplicate_role(mapping: &RoleMapping) -> StoreError {
    StoreError::Conflict(format!(
        "application {} already maps legacy role {}",
        mapping.application_id, mapping.legacy_role_name
    ))
}

fn duplicate_claim(mapping: &ClaimMapping) -> StoreError {
    StoreError::Conflict(format!(
        "application {} already maps legacy claim type {}",
        mapping.application_id, mapping.legacy_claim_type
    ))
}

#[async_trait]
impl RoleMappingStore for MemoryStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<RoleMapping>, StoreError> {
        Ok(self.role_mappings.read().await.iter().find(|m| m.id == id).cloned())
    }

    async fn get_by_application(&self, application_id: &str) -> Result<Vec<RoleMapping>, StoreError> {
        let mut mappings: Vec<RoleMapping> = self
            .role_mappings
            .read()
            .await
            .iter()
            .filter(|m| m.application_id == application_id)
            .cloned()
            .collect();
        mappings.sort_by(|a, b| a.legacy_role_name.cmp(&b.legacy_role_name));
        Ok(mappings)
    }

    async fn list(&self, skip: usize, take: usize) -> Result<Vec<RoleMapping>, StoreError> {
        let mut mappings = self.role_mappings.read().await.clone();
        mappings.sort_by(|a, b| {
            (&a.application_id, &a.legacy_role_name).cmp(&(&b.application_id, &b.legacy_role_name))
        });
        Ok(page(mappings, skip, take))
    }

    async fn get_by_legacy_role(
        &self,
        application_id: &str,
        legacy_role_name: &str,
    ) -> Result<Option<RoleMapping>, StoreError> {
        let wanted = fold_case(legacy_role_name);
        Ok(self
            .role_mappings
            .read()
            .await
            .iter()
            .find(|m| m.application_id == application_id && fold_case(&m.legacy_role_name) == wanted)
            .cloned())
    }

    async fn get_by_centralized_role(
        &self,
        application_id: &str,
        centralized_role_name: &str,
    ) -> Result<Option<RoleMapping>, StoreError> {
        let wanted = fold_case(centralized_role_name);
        Ok(self
            .role_mappings
            .read()
            .await
            .iter()
            .find(|m| {
                m.application_id == application_id
                    && fold_case(&m.centralized_role_name) == wanted
            })
            .cloned())
    }

    async fn create(&self, mapping: &RoleMapping) -> Result<RoleMapping, StoreError> {
        let mut mappings = self.role_mappings.write().await;
        let wanted = fold_case(&mapping.legacy_role_name);
        if mappings.iter().any(|m| {
            m.application_id == mapping.application_id && fold_case(&m.legacy_role_name) == wanted
        }) {
            return Err(duplicate_role(mapping));
        }
        let mut mapping = mapping.clone();
        mapping.id = fresh_id(&mapping.id);
        mapping.created_at = Utc::now();
        mappings.push(mapping.clone());
        debug!(role_mapping_id = %mapping.id, application_id = %mapping.application_id, "created role mapping");
        Ok(mapping)
    }

    async fn update(&self, mapping: &RoleMapping) -> Result<RoleMapping, StoreError> {
        let mut mappings = self.role_mappings.write().await;
        let wanted = fold_case(&mapping.legacy_role_name);
        if mappings.iter().any(|m| {
            m.id != mapping.id
                && m.application_id == mapping.application_id
                && fold_case(&m.legacy_role_name) == wanted
        }) {
            return Err(duplicate_role(mapping));
        }
        let existing = mappings
            .iter_mut()
            .find(|m| m.id == mapping.id)
            .ok_or_else(|| StoreError::not_found("role mapping", &mapping.id))?;
        let mut updated = mapping.clone();
        updated.created_at = existing.created_at;
        *existing = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut mappings = self.role_mappings.write().await;
        let before = mappings.len();
        mappings.retain(|m| m.id != id);
        Ok(mappings.len() != before)
    }
}

#[async_trait]
impl ClaimMappingStore for MemoryStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<ClaimMapping>, StoreError> {
        Ok(self.claim_mappings.read().await.iter().find(|m| m.id == id).cloned())
    }

    async fn get_by_application(
        &self,
        application_id: &str,
    ) -> Result<Vec<ClaimMapping>, StoreError> {
        let mut mappings: Vec<ClaimMapping> = self
            .claim_mappings
            .read()
            .await
            .iter()
            .filter(|m| m.application_id == application_id)
            .cloned()
            .collect();
        mappings.sort_by(|a, b| a.legacy_claim_type.cmp(&b.legacy_claim_type));
        Ok(mappings)
    }

    async fn list(&self, skip: usize, take: usize) -> Result<Vec<ClaimMapping>, StoreError> {
        let mut mappings = self.claim_mappings.read().await.clone();
        mappings.sort_by(|a, b| {
            (&a.application_id, &a.legacy_claim_type)
                .cmp(&(&b.application_id, &b.legacy_claim_type))
        });
        Ok(page(mappings, skip, take))
    }

    async fn get_by_legacy_claim_type(
        &self,
        application_id: &str,
        legacy_claim_type: &str,
    ) -> Result<Option<ClaimMapping>, StoreError> {
        let wanted = fold_case(legacy_claim_type);
        Ok(self
            .claim_mappings
            .read()
            .await
            .iter()
            .find(|m| {
                m.application_id == application_id && fold_case(&m.legacy_claim_type) == wanted
            })
            .cloned())
    }

    async fn get_by_centralized_claim_type(
        &self,
        application_id: &str,
        centralized_claim_type: &str,
    ) -> Result<Option<ClaimMapping>, StoreError> {
        let wanted = fold_case(centralized_claim_type);
        Ok(self
            .claim_mappings
            .read()
            .await
            .iter()
            .find(|m| {
                m.application_id == application_id
                    && fold_case(&m.centralized_claim_type) == wanted
            })
            .cloned())
    }

    async fn create(&self, mapping: &ClaimMapping) -> Result<ClaimMapping, StoreError> {
        let mut mappings = self.claim_mappings.write().await;
        let wanted = fold_case(&mapping.legacy_claim_type);
        if mappings.iter().any(|m| {
            m.application_id == mapping.application_id && fold_case(&m.legacy_claim_type) == wanted
        }) {
            return Err(duplicate_claim(mapping));
        }
        let now = Utc::now();
        let mut mapping = mapping.clone();
        mapping.id = fresh_id(&mapping.id);
        mapping.created_at = now;
        mapping.updated_at = now;
        mappings.push(mapping.clone());
        debug!(claim_mapping_id = %mapping.id, application_id = %mapping.application_id, "created claim mapping");
        Ok(mapping)
    }

    async fn update(&self, mapping: &ClaimMapping) -> Result<ClaimMapping, StoreError> {
        let mut mappings = self.claim_mappings.write().await;
        let wanted = fold_case(&mapping.legacy_claim_type);
        if mappings.iter().any(|m| {
            m.id != mapping.id
                && m.application_id == mapping.application_id
                && fold_case(&m.legacy_claim_type) == wanted
        }) {
            return Err(duplicate_claim(mapping));
        }
        let existing = mappings
            .iter_mut()
            .find(|m| m.id == mapping.id)
            .ok_or_else(|| StoreError::not_found("claim mapping", &mapping.id))?;
        let mut updated = mapping.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();
        *existing = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut mappings = self.claim_mappings.write().await;
        let before = mappings.len();
        mappings.retain(|m| m.id != id);
        Ok(mappings.len() != before)
    }
}
