//! TOML rules file reader/writer.
//!
//! The rules file format:
//!
//! ```toml
//! [[rules]]
//! application_id = "crm"
//! name = "mail to email"
//! rule_type = "claim"
//! source = "mail"
//! target = "email"
//! direction = "legacy_to_centralized"
//! priority = 10
//! transform = "lowercase"
//!
//! [[rules]]
//! id = "admin-role"
//! application_id = "crm"
//! name = "admins"
//! rule_type = "role"
//! source = "Administrators"
//! target = "admin"
//! direction = "bidirectional"
//! ```

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{RulesFileError, StoreError};
use crate::models::{MappingDirection, MappingRule, RuleType};
use crate::store::RuleStore;

/// A single `[[rules]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleEntry {
    /// Stable ID. Entries with an ID are upserted on import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub application_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub rule_type: RuleType,
    pub source: String,
    #[serde(default)]
    pub target: String,
    pub direction: MappingDirection,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl RuleEntry {
    /// Convert to a [`MappingRule`], checking the fields a rule cannot work
    /// without. `index` is the entry's position in the file, for messages.
    pub fn into_rule(self, index: usize) -> Result<MappingRule, RulesFileError> {
        let invalid = |detail: &str| RulesFileError::InvalidRule {
            index,
            detail: detail.to_string(),
        };

        if self.application_id.trim().is_empty() {
            return Err(invalid("application_id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.source.is_empty() {
            return Err(invalid("source must not be empty (use \"*\" to match anything)"));
        }
        if self.target.is_empty() && self.transform.is_none() {
            return Err(invalid("either target or transform is required"));
        }

        let now = Utc::now();
        Ok(MappingRule {
            id: self.id.unwrap_or_default(),
            application_id: self.application_id,
            name: self.name,
            description: self.description,
            condition: self.condition.filter(|c| !c.is_empty()),
            rule_type: self.rule_type,
            source_identifier: self.source,
            target_identifier: self.target,
            transform_expression: self.transform.filter(|t| !t.is_empty()),
            direction: self.direction,
            priority: self.priority,
            is_enabled: self.enabled,
            created_at: now,
            updated_at: now,
        })
    }
}

impl From<&MappingRule> for RuleEntry {
    fn from(rule: &MappingRule) -> Self {
        Self {
            id: Some(rule.id.clone()).filter(|id| !id.is_empty()),
            application_id: rule.application_id.clone(),
            name: rule.name.clone(),
            description: rule.description.clone(),
            rule_type: rule.rule_type,
            source: rule.source_identifier.clone(),
            target: rule.target_identifier.clone(),
            direction: rule.direction,
            priority: rule.priority,
            condition: rule.condition.clone(),
            transform: rule.transform_expression.clone(),
            enabled: rule.is_enabled,
        }
    }
}

/// Wrapper around the TOML rules file structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RulesFileData {
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

/// How many rules an import created and updated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
}

/// Utilities for loading, saving, and importing rules files.
pub struct RulesFile;

impl RulesFile {
    /// Load the rules file from disk. Entries without an `id` come back
    /// with an empty ID, which the stores fill on create.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<MappingRule>, RulesFileError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading rules file");

        if !path.exists() {
            return Err(RulesFileError::Io {
                path: path.display().to_string(),
                detail: "file not found".into(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|e| RulesFileError::Io {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let rules = Self::parse(&contents)?;

        debug!(count = rules.len(), "loaded rules");
        Ok(rules)
    }

    /// Parse rules from TOML text.
    pub fn parse(contents: &str) -> Result<Vec<MappingRule>, RulesFileError> {
        let data: RulesFileData =
            toml::from_str(contents).map_err(|e| RulesFileError::Parse(e.to_string()))?;
        data.rules
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.into_rule(index))
            .collect()
    }

    /// Save rules to disk in TOML format.
    pub fn save<P: AsRef<Path>>(path: P, rules: &[MappingRule]) -> Result<(), RulesFileError> {
        let path = path.as_ref();
        info!(path = %path.display(), "saving rules file");

        let data = RulesFileData {
            rules: rules.iter().map(RuleEntry::from).collect(),
        };
        let toml_str =
            toml::to_string_pretty(&data).map_err(|e| RulesFileError::Serialize(e.to_string()))?;
        std::fs::write(path, toml_str).map_err(|e| RulesFileError::Io {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;

        debug!(count = rules.len(), "saved rules");
        Ok(())
    }

    /// Write rules into a store. A rule whose ID already exists is updated,
    /// everything else is created.
    pub async fn import(
        store: &dyn RuleStore,
        rules: &[MappingRule],
    ) -> Result<ImportSummary, StoreError> {
        let mut summary = ImportSummary::default();
        for rule in rules {
            let existing = if rule.id.is_empty() {
                None
            } else {
                store.get_by_id(&rule.id).await?
            };
            match existing {
                Some(_) => {
                    store.update(rule).await?;
                    summary.updated += 1;
                }
                None => {
                    store.create(rule).await?;
                    summary.created += 1;
                }
            }
        }
        info!(
            created = summary.created,
            updated = summary.updated,
            "imported rules"
        );
        Ok(summary)
    }
}
