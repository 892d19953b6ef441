//! Fallback resolution for users without an authoritative mapping.
//!
//! A [`FallbackStrategyManager`] holds strategies ordered by priority and
//! runs them as a chain of responsibility: the first eligible strategy that
//! succeeds ends the chain. The shipped strategies key on a contact attribute
//! (email or mobile number), see [`ContactFallbackStrategy`].

pub mod contact;
pub mod manager;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::FallbackConfig;
use crate::errors::StoreError;
use crate::models::UserIdMapping;
use crate::store::Stores;

pub use contact::{ContactFallbackStrategy, ContactKind};
pub use manager::FallbackStrategyManager;

/// Everything a caller knows about the user being resolved.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FallbackContext {
    pub legacy_user_id: Option<String>,
    pub centralized_identity_id: Option<String>,
    pub user_email: Option<String>,
    pub user_mobile_number: Option<String>,
    pub user_display_name: Option<String>,
    pub additional_data: BTreeMap<String, String>,
}

impl FallbackContext {
    /// A context for resolving a known legacy user ID.
    pub fn for_legacy_user(legacy_user_id: &str) -> Self {
        Self {
            legacy_user_id: Some(legacy_user_id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.user_email = Some(email.to_string());
        self
    }

    pub fn with_mobile_number(mut self, mobile_number: &str) -> Self {
        self.user_mobile_number = Some(mobile_number.to_string());
        self
    }

    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.user_display_name = Some(display_name.to_string());
        self
    }

    /// `legacy_user_id`, treating an empty string as absent.
    pub fn legacy_id(&self) -> Option<&str> {
        non_empty(&self.legacy_user_id)
    }

    /// `centralized_identity_id`, treating an empty string as absent.
    pub fn identity_id(&self) -> Option<&str> {
        non_empty(&self.centralized_identity_id)
    }

    pub fn email(&self) -> Option<&str> {
        non_empty(&self.user_email)
    }

    pub fn mobile_number(&self) -> Option<&str> {
        non_empty(&self.user_mobile_number)
    }

    pub fn display_name(&self) -> Option<&str> {
        non_empty(&self.user_display_name)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Outcome of a fallback attempt. Built fresh per call and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FallbackResult {
    pub success: bool,
    pub mapping: Option<UserIdMapping>,
    pub centralized_identity_id: Option<String>,
    pub legacy_user_id: Option<String>,
    pub message: String,
}

impl FallbackResult {
    pub fn success(mapping: UserIdMapping, message: impl Into<String>) -> Self {
        Self {
            success: true,
            centralized_identity_id: Some(mapping.centralized_identity_id.clone()),
            legacy_user_id: Some(mapping.legacy_user_id.clone()),
            mapping: Some(mapping),
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            mapping: None,
            centralized_identity_id: None,
            legacy_user_id: None,
            message: message.into(),
        }
    }
}

/// One link of the fallback chain.
#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    /// Name used in logs and listings.
    fn name(&self) -> &str;

    /// Lower runs earlier.
    fn priority(&self) -> i32;

    /// Whether this strategy applies. Must not touch any store.
    fn can_handle(&self, application_id: &str, ctx: &FallbackContext) -> bool;

    /// Attempt resolution. May read and write the identity and mapping
    /// stores. A store error counts as this strategy failing.
    async fn handle(
        &self,
        application_id: &str,
        ctx: &FallbackContext,
    ) -> Result<FallbackResult, StoreError>;
}

/// Build the manager for a deployment, registering the contact strategies
/// the configuration enables.
pub fn build_manager(config: &FallbackConfig, stores: &Stores) -> FallbackStrategyManager {
    let mut manager = FallbackStrategyManager::new();
    if !config.enabled {
        return manager;
    }
    if config.email.enabled {
        manager.register_strategy(Arc::new(
            ContactFallbackStrategy::email(stores.identities.clone(), stores.mappings.clone())
                .with_priority(config.email.priority),
        ));
    }
    if config.mobile.enabled {
        manager.register_strategy(Arc::new(
            ContactFallbackStrategy::mobile(stores.identities.clone(), stores.mappings.clone())
                .with_priority(config.mobile.priority),
        ));
    }
    manager
}
