//! Storage traits for rules, mappings, identities, registered applications,
//! and static role/claim mappings.
//!
//! The rule engine and fallback strategies only ever see these traits. Two
//! implementations ship with the crate: [`MemoryStore`] (process-local, used
//! by tests and throwaway deployments) and [`Database`](crate::db::Database)
//! (SQLite).

pub mod memory;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::StoreError;
use crate::models::{
    generate_api_key, Application, ClaimMapping, MappingDirection, MappingRule, RoleMapping,
    RuleType, UserIdMapping, UserIdentity,
};

pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Rule store
// ---------------------------------------------------------------------------

/// Persistent mapping-rule definitions.
///
/// Every query except [`get_by_id`](RuleStore::get_by_id) and
/// [`get_by_application`](RuleStore::get_by_application) returns enabled
/// rules only, in ascending priority. Ties keep insertion order.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<MappingRule>, StoreError>;

    /// All rules of an application, enabled or not, in priority order.
    async fn get_by_application(&self, application_id: &str) -> Result<Vec<MappingRule>, StoreError>;

    async fn get_by_type(
        &self,
        application_id: &str,
        rule_type: RuleType,
    ) -> Result<Vec<MappingRule>, StoreError>;

    /// Rules declared for `direction` or for both directions.
    async fn get_by_type_and_direction(
        &self,
        application_id: &str,
        rule_type: RuleType,
        direction: MappingDirection,
    ) -> Result<Vec<MappingRule>, StoreError>;

    async fn get_by_source_identifier(
        &self,
        application_id: &str,
        rule_type: RuleType,
        source_identifier: &str,
    ) -> Result<Vec<MappingRule>, StoreError>;

    /// Insert a rule. An empty `id` is replaced with a fresh one; both
    /// timestamps are set to now.
    async fn create(&self, rule: &MappingRule) -> Result<MappingRule, StoreError>;

    /// Replace a rule, keeping its original `created_at`.
    async fn update(&self, rule: &MappingRule) -> Result<MappingRule, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// Mapping store
// ---------------------------------------------------------------------------

/// Legacy user ID to centralized identity links.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<UserIdMapping>, StoreError>;

    async fn get_by_legacy_user_id(
        &self,
        application_id: &str,
        legacy_user_id: &str,
    ) -> Result<Option<UserIdMapping>, StoreError>;

    async fn get_by_application_and_identity_id(
        &self,
        application_id: &str,
        centralized_identity_id: &str,
    ) -> Result<Option<UserIdMapping>, StoreError>;

    /// One page of an application's mappings, ordered by legacy user ID.
    async fn list_by_application(
        &self,
        application_id: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<UserIdMapping>, StoreError>;

    /// Insert a mapping. Fails with [`StoreError::Conflict`] if the
    /// application already maps this legacy user ID.
    async fn create(&self, mapping: &UserIdMapping) -> Result<UserIdMapping, StoreError>;

    /// Insert a mapping and record its legacy user ID on the identity.
    ///
    /// Fails with [`StoreError::NotFound`] if the identity does not exist.
    /// Backends that hold both tables override this to write them in one
    /// transaction; the default issues the two writes in sequence.
    async fn create_linked(
        &self,
        mapping: &UserIdMapping,
        identities: &dyn IdentityStore,
    ) -> Result<UserIdMapping, StoreError> {
        link_in_sequence(self, mapping, identities).await
    }

    /// Replace a mapping, keeping its original `created_at`.
    async fn update(&self, mapping: &UserIdMapping) -> Result<UserIdMapping, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// Identity store
// ---------------------------------------------------------------------------

/// Centralized identity records.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<UserIdentity>, StoreError>;

    /// Case-insensitive match on the email address.
    async fn get_by_email(&self, email: &str) -> Result<Option<UserIdentity>, StoreError>;

    async fn get_by_mobile_number(&self, mobile_number: &str)
        -> Result<Option<UserIdentity>, StoreError>;

    /// One page of identities, ordered by display name.
    async fn list(&self, skip: usize, take: usize) -> Result<Vec<UserIdentity>, StoreError>;

    async fn create(&self, identity: &UserIdentity) -> Result<UserIdentity, StoreError>;

    /// Replace an identity's attributes and legacy IDs, keeping its original
    /// `created_at`.
    async fn update(&self, identity: &UserIdentity) -> Result<UserIdentity, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Record `legacy_user_id` as the identity's ID in `application_id`,
    /// replacing any previous one. Returns `false` if the identity does not
    /// exist.
    async fn add_legacy_user_id(
        &self,
        identity_id: &str,
        application_id: &str,
        legacy_user_id: &str,
    ) -> Result<bool, StoreError>;

    async fn find_by_legacy_user_id(
        &self,
        application_id: &str,
        legacy_user_id: &str,
    ) -> Result<Option<UserIdentity>, StoreError>;
}

// ---------------------------------------------------------------------------
// Application store
// ---------------------------------------------------------------------------

/// Registered legacy applications and their API keys.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<Application>, StoreError>;

    /// One page of applications, ordered by name.
    async fn list(&self, skip: usize, take: usize) -> Result<Vec<Application>, StoreError>;

    /// Register an application. An empty `id` or `api_key` is filled in;
    /// both timestamps are set to now.
    async fn create(&self, application: &Application) -> Result<Application, StoreError>;

    /// Replace an application, keeping its API key and `registered_at`.
    async fn update(&self, application: &Application) -> Result<Application, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Overwrite the stored key. Returns `false` if the application does not
    /// exist.
    async fn set_api_key(&self, id: &str, api_key: &str) -> Result<bool, StoreError>;

    /// `true` only for an active application whose key equals `api_key`.
    async fn validate_api_key(&self, id: &str, api_key: &str) -> Result<bool, StoreError> {
        let Some(application) = self.get_by_id(id).await? else {
            return Ok(false);
        };
        if !application.is_active {
            debug!(application_id = id, "API key presented for an inactive application");
            return Ok(false);
        }
        Ok(bool::from(
            application.api_key.as_bytes().ct_eq(api_key.as_bytes()),
        ))
    }

    /// Issue a new key, invalidating the old one.
    async fn regenerate_api_key(&self, id: &str) -> Result<String, StoreError> {
        let api_key = generate_api_key();
        if !self.set_api_key(id, &api_key).await? {
            return Err(StoreError::not_found("application", id));
        }
        info!(application_id = id, "regenerated API key");
        Ok(api_key)
    }
}

// ---------------------------------------------------------------------------
// Static role / claim mapping stores
// ---------------------------------------------------------------------------

/// Fixed role name translations. Name lookups ignore case; an application
/// maps each legacy role name at most once.
#[async_trait]
pub trait RoleMappingStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<RoleMapping>, StoreError>;

    /// Every role mapping of an application, ordered by legacy role name.
    async fn get_by_application(&self, application_id: &str) -> Result<Vec<RoleMapping>, StoreError>;

    /// One page across all applications.
    async fn list(&self, skip: usize, take: usize) -> Result<Vec<RoleMapping>, StoreError>;

    async fn get_by_legacy_role(
        &self,
        application_id: &str,
        legacy_role_name: &str,
    ) -> Result<Option<RoleMapping>, StoreError>;

    async fn get_by_centralized_role(
        &self,
        application_id: &str,
        centralized_role_name: &str,
    ) -> Result<Option<RoleMapping>, StoreError>;

    /// Fails with [`StoreError::Conflict`] if the application already maps
    /// this legacy role name.
    async fn create(&self, mapping: &RoleMapping) -> Result<RoleMapping, StoreError>;

    /// Replace a mapping, keeping its original `created_at`.
    async fn update(&self, mapping: &RoleMapping) -> Result<RoleMapping, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Fixed claim type translations. Type lookups ignore case; an application
/// maps each legacy claim type at most once.
#[async_trait]
pub trait ClaimMappingStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<ClaimMapping>, StoreError>;

    /// Every claim mapping of an application, ordered by legacy claim type.
    async fn get_by_application(&self, application_id: &str)
        -> Result<Vec<ClaimMapping>, StoreError>;

    /// One page across all applications.
    async fn list(&self, skip: usize, take: usize) -> Result<Vec<ClaimMapping>, StoreError>;

    async fn get_by_legacy_claim_type(
        &self,
        application_id: &str,
        legacy_claim_type: &str,
    ) -> Result<Option<ClaimMapping>, StoreError>;

    async fn get_by_centralized_claim_type(
        &self,
        application_id: &str,
        centralized_claim_type: &str,
    ) -> Result<Option<ClaimMapping>, StoreError>;

    /// Fails with [`StoreError::Conflict`] if the application already maps
    /// this legacy claim type.
    async fn create(&self, mapping: &ClaimMapping) -> Result<ClaimMapping, StoreError>;

    /// Replace a mapping, keeping its original `created_at`.
    async fn update(&self, mapping: &ClaimMapping) -> Result<ClaimMapping, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// Which store implementation backs a deployment.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// Every store, usually all backed by the same object.
#[derive(Clone)]
pub struct Stores {
    pub rules: Arc<dyn RuleStore>,
    pub mappings: Arc<dyn MappingStore>,
    pub identities: Arc<dyn IdentityStore>,
    pub applications: Arc<dyn ApplicationStore>,
    pub role_mappings: Arc<dyn RoleMappingStore>,
    pub claim_mappings: Arc<dyn ClaimMappingStore>,
}

impl Stores {
    /// Use one object for every store.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: RuleStore
            + MappingStore
            + IdentityStore
            + ApplicationStore
            + RoleMappingStore
            + ClaimMappingStore
            + 'static,
    {
        Self {
            rules: store.clone(),
            mappings: store.clone(),
            identities: store.clone(),
            applications: store.clone(),
            role_mappings: store.clone(),
            claim_mappings: store,
        }
    }

    /// Open the backend named by the configuration. The SQLite file and its
    /// parent directory are created when missing, and migrations are applied.
    pub fn open(config: &AppConfig) -> Result<Self, StoreError> {
        match config.storage.backend {
            StorageBackend::Memory => {
                info!("using in-memory stores; data is lost on exit");
                Ok(Self::from_shared(Arc::new(MemoryStore::new())))
            }
            StorageBackend::Sqlite => {
                let path = config.database_path();
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let db = Database::new(&path)?;
                db.initialize()?;
                Ok(Self::from_shared(Arc::new(db)))
            }
        }
    }
}

/// Sort rules by ascending priority, keeping the incoming order for ties.
pub(crate) fn sort_by_priority(rules: &mut [MappingRule]) {
    rules.sort_by_key(|r| r.priority);
}

/// The two writes behind [`MappingStore::create_linked`], without a shared
/// transaction.
pub(crate) async fn link_in_sequence<M>(
    mappings: &M,
    mapping: &UserIdMapping,
    identities: &dyn IdentityStore,
) -> Result<UserIdMapping, StoreError>
where
    M: MappingStore + ?Sized,
{
    if identities
        .get_by_id(&mapping.centralized_identity_id)
        .await?
        .is_none()
    {
        return Err(StoreError::not_found(
            "identity",
            &mapping.centralized_identity_id,
        ));
    }
    let created = mappings.create(mapping).await?;
    identities
        .add_legacy_user_id(
            &created.centralized_identity_id,
            &created.application_id,
            &created.legacy_user_id,
        )
        .await?;
    Ok(created)
}

/// `true` if `identities` is the very object `store` points at.
pub(crate) fn same_object<T>(identities: &dyn IdentityStore, store: &T) -> bool {
    std::ptr::eq(
        identities as *const dyn IdentityStore as *const (),
        store as *const T as *const (),
    )
}

/// Fill in the generated fields of a new application.
pub(crate) fn prepare_application(application: &Application) -> Application {
    let now = Utc::now();
    let mut application = application.clone();
    if application.id.is_empty() {
        application.id = uuid::Uuid::new_v4().to_string();
    }
    if application.api_key.is_empty() {
        application.api_key = generate_api_key();
    }
    application.registered_at = now;
    application.updated_at = now;
    application
}
