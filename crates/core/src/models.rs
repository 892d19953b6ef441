//! Domain model types used throughout idbridge.
//!
//! These types bridge the rule engine, the fallback strategies, the stores,
//! and the HTTP API.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

/// A `(type, value)` attribute describing a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Claim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.claim_type, self.value)
    }
}

// ---------------------------------------------------------------------------
// Rule enums
// ---------------------------------------------------------------------------

/// What kind of element a rule translates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Claim,
    Role,
    User,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claim => write!(f, "claim"),
            Self::Role => write!(f, "role"),
            Self::User => write!(f, "user"),
        }
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claim" => Ok(Self::Claim),
            "role" => Ok(Self::Role),
            "user" => Ok(Self::User),
            other => Err(format!("unknown rule type '{}'", other)),
        }
    }
}

/// Which way a rule translates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MappingDirection {
    LegacyToCentralized,
    CentralizedToLegacy,
    Bidirectional,
}

impl MappingDirection {
    /// `true` if a rule declared with `self` applies to a request in
    /// direction `requested`.
    pub fn applies_to(self, requested: MappingDirection) -> bool {
        self == requested || self == MappingDirection::Bidirectional
    }
}

impl fmt::Display for MappingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LegacyToCentralized => write!(f, "legacy_to_centralized"),
            Self::CentralizedToLegacy => write!(f, "centralized_to_legacy"),
            Self::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

impl FromStr for MappingDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy_to_centralized" | "to_centralized" => Ok(Self::LegacyToCentralized),
            "centralized_to_legacy" | "to_legacy" => Ok(Self::CentralizedToLegacy),
            "bidirectional" | "both" => Ok(Self::Bidirectional),
            other => Err(format!("unknown mapping direction '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Mapping rule
// ---------------------------------------------------------------------------

/// A per-application declarative rule translating one identifier/value into
/// another.
///
/// For a fixed `(application_id, rule_type, source_identifier)` rules are
/// evaluated in ascending `priority` and the first whose condition passes
/// wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingRule {
    pub id: String,
    pub application_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub condition: Option<String>,
    pub rule_type: RuleType,
    /// Claim type or role name this rule matches; `*` matches everything.
    pub source_identifier: String,
    pub target_identifier: String,
    #[serde(default)]
    pub transform_expression: Option<String>,
    pub direction: MappingDirection,
    /// Lower values run first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// Wildcard source identifier.
pub const WILDCARD: &str = "*";

impl MappingRule {
    /// Create an enabled, unconditional, pass-through rule with a fresh ID.
    pub fn new(
        application_id: &str,
        name: &str,
        rule_type: RuleType,
        source_identifier: &str,
        target_identifier: &str,
        direction: MappingDirection,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            application_id: application_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            condition: None,
            rule_type,
            source_identifier: source_identifier.to_string(),
            target_identifier: target_identifier.to_string(),
            transform_expression: None,
            direction,
            priority,
            is_enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder-style setter for the guard condition.
    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    /// Builder-style setter for the transform expression.
    pub fn with_transform(mut self, expression: &str) -> Self {
        self.transform_expression = Some(expression.to_string());
        self
    }

    /// `true` if this rule's source identifier names `identifier`
    /// (case-insensitively) or is the wildcard.
    pub fn matches_source(&self, identifier: &str) -> bool {
        self.source_identifier == WILDCARD
            || fold_case(&self.source_identifier) == fold_case(identifier)
    }
}

/// Case folding shared by identifier matching and condition comparison.
pub(crate) fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

// ---------------------------------------------------------------------------
// User ID mapping
// ---------------------------------------------------------------------------

/// A link between a legacy application's user ID and a centralized identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserIdMapping {
    pub id: String,
    pub application_id: String,
    pub legacy_user_id: String,
    pub centralized_identity_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<String>,
    /// Set by an explicit validation step, never by the fallback chain.
    #[serde(default)]
    pub is_validated: bool,
}

impl UserIdMapping {
    /// Create a new, unvalidated mapping with a fresh ID.
    pub fn new(application_id: &str, legacy_user_id: &str, centralized_identity_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            application_id: application_id.to_string(),
            legacy_user_id: legacy_user_id.to_string(),
            centralized_identity_id: centralized_identity_id.to_string(),
            created_at: Utc::now(),
            metadata: None,
            is_validated: false,
        }
    }

    pub fn with_metadata(mut self, metadata: String) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// ---------------------------------------------------------------------------
// User identity
// ---------------------------------------------------------------------------

/// A user record in the centralized identity authority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserIdentity {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub mobile_number: Option<String>,
    #[serde(default)]
    pub mobile_verified: bool,
    /// Application ID -> user ID in that application.
    #[serde(default)]
    pub legacy_user_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub claims: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserIdentity {
    /// Create an identity with a fresh ID and no contact attributes.
    pub fn new(display_name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
            email: None,
            email_verified: false,
            mobile_number: None,
            mobile_verified: false,
            legacy_user_ids: BTreeMap::new(),
            claims: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_mobile_number(mut self, mobile_number: &str) -> Self {
        self.mobile_number = Some(mobile_number.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// A legacy application registered with the bridge.
///
/// `api_key` lets the application call its own lookup and transform
/// endpoints without the administrator token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub database_identifier: Option<String>,
    /// Name of the user ID field in the application's own user store.
    #[serde(default = "default_user_id_field")]
    pub user_id_field_name: String,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_user_id_field() -> String {
    "UserId".to_string()
}

impl Application {
    /// An active application with a fresh ID and API key.
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: String::new(),
            base_url: None,
            api_key: generate_api_key(),
            is_active: true,
            database_identifier: None,
            user_id_field_name: default_user_id_field(),
            registered_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }
}

/// 32 random bytes, URL-safe base64 without padding.
pub fn generate_api_key() -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// ---------------------------------------------------------------------------
// Static role and claim mappings
// ---------------------------------------------------------------------------

/// A fixed one-to-one role name translation for an application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleMapping {
    pub id: String,
    pub application_id: String,
    pub legacy_role_name: String,
    pub centralized_role_name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl RoleMapping {
    pub fn new(application_id: &str, legacy_role_name: &str, centralized_role_name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            application_id: application_id.to_string(),
            legacy_role_name: legacy_role_name.to_string(),
            centralized_role_name: centralized_role_name.to_string(),
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Role name on the far side of `direction`, if this mapping names
    /// `role` on the near side.
    pub fn translate(&self, role: &str, direction: MappingDirection) -> Option<&str> {
        let (from, to) = match direction {
            MappingDirection::CentralizedToLegacy => {
                (&self.centralized_role_name, &self.legacy_role_name)
            }
            _ => (&self.legacy_role_name, &self.centralized_role_name),
        };
        (fold_case(from) == fold_case(role)).then_some(to.as_str())
    }
}

/// A fixed claim type translation for an application, with an optional
/// value transform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimMapping {
    pub id: String,
    pub application_id: String,
    pub legacy_claim_type: String,
    pub centralized_claim_type: String,
    #[serde(default)]
    pub transformation_expression: Option<String>,
    /// Emit the claim when translating legacy to centralized.
    #[serde(default = "default_true")]
    pub include_in_centralized: bool,
    /// Emit the claim when translating centralized to legacy.
    #[serde(default = "default_true")]
    pub include_in_legacy: bool,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClaimMapping {
    pub fn new(application_id: &str, legacy_claim_type: &str, centralized_claim_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            application_id: application_id.to_string(),
            legacy_claim_type: legacy_claim_type.to_string(),
            centralized_claim_type: centralized_claim_type.to_string(),
            transformation_expression: None,
            include_in_centralized: true,
            include_in_legacy: true,
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_transform(mut self, expression: &str) -> Self {
        self.transformation_expression = Some(expression.to_string());
        self
    }

    /// Whether the mapping emits anything in `direction`.
    pub fn included_in(&self, direction: MappingDirection) -> bool {
        match direction {
            MappingDirection::LegacyToCentralized => self.include_in_centralized,
            MappingDirection::CentralizedToLegacy => self.include_in_legacy,
            MappingDirection::Bidirectional => {
                self.include_in_centralized && self.include_in_legacy
            }
        }
    }
}

/// One claim before and after a static claim mapping was applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimTransformation {
    pub original_type: String,
    pub original_value: String,
    pub transformed_type: String,
    pub transformed_value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_applies_to() {
        use MappingDirection::*;
        assert!(LegacyToCentralized.applies_to(LegacyToCentralized));
        assert!(!LegacyToCentralized.applies_to(CentralizedToLegacy));
        assert!(Bidirectional.applies_to(CentralizedToLegacy));
        assert!(Bidirectional.applies_to(LegacyToCentralized));
    }

    #[test]
    fn test_enum_string_forms() {
        assert_eq!(RuleType::Role.to_string(), "role");
        assert_eq!("CLAIM".parse::<RuleType>().unwrap(), RuleType::Claim);
        assert!("group".parse::<RuleType>().is_err());

        let dir: MappingDirection = "centralized_to_legacy".parse().unwrap();
        assert_eq!(dir, MappingDirection::CentralizedToLegacy);
        assert_eq!(dir.to_string(), "centralized_to_legacy");
    }

    #[test]
    fn test_matches_source() {
        let rule = MappingRule::new(
            "crm",
            "mail",
            RuleType::Claim,
            "Mail",
            "email",
            MappingDirection::LegacyToCentralized,
            1,
        );
        assert!(rule.matches_source("mail"));
        assert!(rule.matches_source("MAIL"));
        assert!(!rule.matches_source("phone"));

        let wildcard = MappingRule { source_identifier: "*".into(), ..rule };
        assert!(wildcard.matches_source("anything"));
    }

    #[test]
    fn test_matches_source_folds_non_ascii() {
        let rule = MappingRule::new(
            "his",
            "aerzte",
            RuleType::Role,
            "Ärzte",
            "physicians",
            MappingDirection::LegacyToCentralized,
            1,
        );
        assert!(rule.matches_source("ärzte"));
        assert!(rule.matches_source("ÄRZTE"));
        assert!(!rule.matches_source("arzte"));
    }

    #[test]
    fn test_claim_serializes_with_type_key() {
        let json = serde_json::to_value(Claim::new("email", "a@b.com")).unwrap();
        assert_eq!(json["type"], "email");
        assert_eq!(json["value"], "a@b.com");
    }

    #[test]
    fn test_new_mapping_is_unvalidated() {
        let mapping = UserIdMapping::new("crm", "L1", "id-1");
        assert!(!mapping.is_validated);
        assert!(!mapping.id.is_empty());
    }

    #[test]
    fn test_application_key_shape() {
        let app = Application::new("CRM");
        assert!(app.is_active);
        assert_eq!(app.user_id_field_name, "UserId");
        // 32 bytes encode to 43 unpadded characters.
        assert_eq!(app.api_key.len(), 43);
        assert!(!app.api_key.contains(['+', '/', '=']));
        assert_ne!(app.api_key, Application::new("CRM").api_key);
    }

    #[test]
    fn test_role_mapping_translates_both_ways() {
        let mapping = RoleMapping::new("crm", "Administrators", "admin");
        assert_eq!(
            mapping.translate("administrators", MappingDirection::LegacyToCentralized),
            Some("admin")
        );
        assert_eq!(
            mapping.translate("ADMIN", MappingDirection::CentralizedToLegacy),
            Some("Administrators")
        );
        assert_eq!(mapping.translate("admin", MappingDirection::LegacyToCentralized), None);
    }

    #[test]
    fn test_claim_mapping_include_flags() {
        let mut mapping = ClaimMapping::new("crm", "mail", "email");
        mapping.include_in_legacy = false;
        assert!(mapping.included_in(MappingDirection::LegacyToCentralized));
        assert!(!mapping.included_in(MappingDirection::CentralizedToLegacy));
        assert!(!mapping.included_in(MappingDirection::Bidirectional));
    }
}
