//! Typed query helpers for every table in the idbridge database.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use tracing::debug;

use super::Database;
use crate::errors::StoreError;
use crate::models::{
    fold_case, Application, ClaimMapping, MappingDirection, MappingRule, RoleMapping, RuleType,
    UserIdMapping, UserIdentity,
};

const RULE_COLUMNS: &str = "id, application_id, name, description, condition, rule_type,
     source_identifier, target_identifier, transform_expression, direction, priority,
     is_enabled, created_at, updated_at";

const MAPPING_COLUMNS: &str = "id, application_id, legacy_user_id, centralized_identity_id,
     created_at, metadata, is_validated";

const IDENTITY_COLUMNS: &str = "id, display_name, email, email_verified, mobile_number,
     mobile_verified, claims, created_at, updated_at";

const APPLICATION_COLUMNS: &str = "id, name, description, base_url, api_key, is_active,
     database_identifier, user_id_field_name, registered_at, updated_at";

const ROLE_MAPPING_COLUMNS: &str = "id, application_id, legacy_role_name, centralized_role_name,
     description, created_at";

const CLAIM_MAPPING_COLUMNS: &str = "id, application_id, legacy_claim_type, centralized_claim_type,
     transformation_expression, include_in_centralized, include_in_legacy, description,
     created_at, updated_at";

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- mapping_rules ------------------------------------------------------

    /// Insert a rule. A duplicate ID is a [`StoreError::Conflict`].
    pub fn insert_rule(&self, rule: &MappingRule) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO mapping_rules ({RULE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                rule.id,
                rule.application_id,
                rule.name,
                rule.description,
                rule.condition,
                rule.rule_type.to_string(),
                rule.source_identifier,
                rule.target_identifier,
                rule.transform_expression,
                rule.direction.to_string(),
                rule.priority,
                rule.is_enabled,
                rule.created_at.to_rfc3339(),
                rule.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| conflict_or(e, || format!("rule {} already exists", rule.id)))?;
        debug!(rule_id = %rule.id, application_id = %rule.application_id, "inserted rule");
        Ok(())
    }

    pub fn select_rule(&self, id: &str) -> Result<Option<MappingRule>, StoreError> {
        let conn = self.conn();
        let rule = conn
            .query_row(
                &format!("SELECT {RULE_COLUMNS} FROM mapping_rules WHERE id = ?1"),
                params![id],
                row_to_rule,
            )
            .optional()?;
        Ok(rule)
    }

    /// Every rule of an application, enabled or not.
    pub fn select_rules_by_application(
        &self,
        application_id: &str,
    ) -> Result<Vec<MappingRule>, StoreError> {
        self.query_rules("application_id = ?1", &[&application_id])
    }

    pub fn select_rules_by_type(
        &self,
        application_id: &str,
        rule_type: RuleType,
    ) -> Result<Vec<MappingRule>, StoreError> {
        let rule_type = rule_type.to_string();
        self.query_rules(
            "application_id = ?1 AND rule_type = ?2 AND is_enabled = 1",
            &[&application_id, &rule_type],
        )
    }

    /// Enabled rules declared for `direction` or for both directions.
    pub fn select_rules_by_type_and_direction(
        &self,
        application_id: &str,
        rule_type: RuleType,
        direction: MappingDirection,
    ) -> Result<Vec<MappingRule>, StoreError> {
        let rule_type = rule_type.to_string();
        let direction = direction.to_string();
        let both = MappingDirection::Bidirectional.to_string();
        self.query_rules(
            "application_id = ?1 AND rule_type = ?2 AND is_enabled = 1
             AND (direction = ?3 OR direction = ?4)",
            &[&application_id, &rule_type, &direction, &both],
        )
    }

    pub fn select_rules_by_source(
        &self,
        application_id: &str,
        rule_type: RuleType,
        source_identifier: &str,
    ) -> Result<Vec<MappingRule>, StoreError> {
        let rule_type = rule_type.to_string();
        self.query_rules(
            "application_id = ?1 AND rule_type = ?2 AND source_identifier = ?3 AND is_enabled = 1",
            &[&application_id, &rule_type, &source_identifier],
        )
    }

    /// Overwrite every column except `created_at`. Returns `false` if no
    /// rule has this ID.
    pub fn update_rule(&self, rule: &MappingRule) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE mapping_rules SET application_id = ?2, name = ?3, description = ?4,
             condition = ?5, rule_type = ?6, source_identifier = ?7, target_identifier = ?8,
             transform_expression = ?9, direction = ?10, priority = ?11, is_enabled = ?12,
             updated_at = ?13
             WHERE id = ?1",
            params![
                rule.id,
                rule.application_id,
                rule.name,
                rule.description,
                rule.condition,
                rule.rule_type.to_string(),
                rule.source_identifier,
                rule.target_identifier,
                rule.transform_expression,
                rule.direction.to_string(),
                rule.priority,
                rule.is_enabled,
                rule.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_rule(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM mapping_rules WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn query_rules(
        &self,
        predicate: &str,
        args: &[&dyn ToSql],
    ) -> Result<Vec<MappingRule>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM mapping_rules WHERE {predicate}
             ORDER BY priority ASC, rowid ASC"
        ))?;
        let rules = stmt
            .query_map(args, row_to_rule)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    // -- user_id_mappings ---------------------------------------------------

    /// Insert a mapping. A second mapping for the same application and
    /// legacy user ID is a [`StoreError::Conflict`].
    pub fn insert_mapping(&self, mapping: &UserIdMapping) -> Result<(), StoreError> {
        let conn = self.conn();
        insert_mapping_row(&conn, mapping)?;
        debug!(
            mapping_id = %mapping.id,
            application_id = %mapping.application_id,
            legacy_user_id = %mapping.legacy_user_id,
            "inserted mapping"
        );
        Ok(())
    }

    /// Insert a mapping and record its legacy user ID on the identity in one
    /// transaction. A missing identity is a [`StoreError::NotFound`] and
    /// leaves both tables untouched.
    pub fn insert_linked_mapping(&self, mapping: &UserIdMapping) -> Result<(), StoreError> {
        self.transaction(|conn| {
            insert_mapping_row(conn, mapping)?;
            if !upsert_legacy_id_row(
                conn,
                &mapping.centralized_identity_id,
                &mapping.application_id,
                &mapping.legacy_user_id,
            )? {
                return Err(StoreError::not_found(
                    "identity",
                    &mapping.centralized_identity_id,
                ));
            }
            Ok(())
        })?;
        debug!(
            mapping_id = %mapping.id,
            application_id = %mapping.application_id,
            legacy_user_id = %mapping.legacy_user_id,
            "inserted linked mapping"
        );
        Ok(())
    }

    pub fn select_mapping(&self, id: &str) -> Result<Option<UserIdMapping>, StoreError> {
        self.query_mapping("id = ?1", &[&id])
    }

    pub fn select_mapping_by_legacy_id(
        &self,
        application_id: &str,
        legacy_user_id: &str,
    ) -> Result<Option<UserIdMapping>, StoreError> {
        self.query_mapping(
            "application_id = ?1 AND legacy_user_id = ?2",
            &[&application_id, &legacy_user_id],
        )
    }

    pub fn select_mapping_by_identity(
        &self,
        application_id: &str,
        centralized_identity_id: &str,
    ) -> Result<Option<UserIdMapping>, StoreError> {
        self.query_mapping(
            "application_id = ?1 AND centralized_identity_id = ?2",
            &[&application_id, &centralized_identity_id],
        )
    }

    pub fn select_mappings_by_application(
        &self,
        application_id: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<UserIdMapping>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MAPPING_COLUMNS} FROM user_id_mappings WHERE application_id = ?1
             ORDER BY legacy_user_id LIMIT ?2 OFFSET ?3"
        ))?;
        let mappings = stmt
            .query_map(
                params![application_id, take as i64, skip as i64],
                row_to_mapping,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    /// Overwrite every column except `created_at`. Returns `false` if no
    /// mapping has this ID.
    pub fn update_mapping(&self, mapping: &UserIdMapping) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE user_id_mappings SET application_id = ?2, legacy_user_id = ?3,
                 centralized_identity_id = ?4, metadata = ?5, is_validated = ?6
                 WHERE id = ?1",
                params![
                    mapping.id,
                    mapping.application_id,
                    mapping.legacy_user_id,
                    mapping.centralized_identity_id,
                    mapping.metadata,
                    mapping.is_validated,
                ],
            )
            .map_err(|e| {
                conflict_or(e, || {
                    format!(
                        "a mapping already exists for application {} and legacy user ID {}",
                        mapping.application_id, mapping.legacy_user_id
                    )
                })
            })?;
        Ok(changed > 0)
    }

    pub fn delete_mapping(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM user_id_mappings WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn query_mapping(
        &self,
        predicate: &str,
        args: &[&dyn ToSql],
    ) -> Result<Option<UserIdMapping>, StoreError> {
        let conn = self.conn();
        let mapping = conn
            .query_row(
                &format!("SELECT {MAPPING_COLUMNS} FROM user_id_mappings WHERE {predicate} LIMIT 1"),
                args,
                row_to_mapping,
            )
            .optional()?;
        Ok(mapping)
    }

    // -- user_identities / identity_legacy_ids ------------------------------

    /// Insert an identity together with its legacy user IDs.
    pub fn insert_identity(&self, identity: &UserIdentity) -> Result<(), StoreError> {
        let claims = serde_json::to_string(&identity.claims)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.transaction(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO user_identities ({IDENTITY_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    identity.id,
                    identity.display_name,
                    identity.email,
                    identity.email_verified,
                    identity.mobile_number,
                    identity.mobile_verified,
                    claims,
                    identity.created_at.to_rfc3339(),
                    identity.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| conflict_or(e, || format!("identity {} already exists", identity.id)))?;
            for (application_id, legacy_user_id) in &identity.legacy_user_ids {
                conn.execute(
                    "INSERT INTO identity_legacy_ids (identity_id, application_id, legacy_user_id)
                     VALUES (?1, ?2, ?3)",
                    params![identity.id, application_id, legacy_user_id],
                )?;
            }
            Ok(())
        })?;
        debug!(identity_id = %identity.id, "inserted identity");
        Ok(())
    }

    pub fn select_identity(&self, id: &str) -> Result<Option<UserIdentity>, StoreError> {
        let conn = self.conn();
        query_identity(&conn, "id = ?1", &[&id])
    }

    /// Case-insensitive (ASCII) match on the email address.
    pub fn select_identity_by_email(&self, email: &str) -> Result<Option<UserIdentity>, StoreError> {
        let conn = self.conn();
        query_identity(&conn, "email = ?1 COLLATE NOCASE", &[&email])
    }

    pub fn select_identity_by_mobile(
        &self,
        mobile_number: &str,
    ) -> Result<Option<UserIdentity>, StoreError> {
        let conn = self.conn();
        query_identity(&conn, "mobile_number = ?1", &[&mobile_number])
    }

    pub fn select_identity_by_legacy_id(
        &self,
        application_id: &str,
        legacy_user_id: &str,
    ) -> Result<Option<UserIdentity>, StoreError> {
        let conn = self.conn();
        query_identity(
            &conn,
            "id = (SELECT identity_id FROM identity_legacy_ids
                   WHERE application_id = ?1 AND legacy_user_id = ?2 LIMIT 1)",
            &[&application_id, &legacy_user_id],
        )
    }

    /// Set the identity's legacy user ID for `application_id`. Returns
    /// `false` if the identity does not exist.
    pub fn upsert_identity_legacy_id(
        &self,
        identity_id: &str,
        application_id: &str,
        legacy_user_id: &str,
    ) -> Result<bool, StoreError> {
        let found = self.transaction(|conn| {
            upsert_legacy_id_row(conn, identity_id, application_id, legacy_user_id)
        })?;
        if found {
            debug!(identity_id, application_id, legacy_user_id, "registered legacy user ID");
        }
        Ok(found)
    }

    /// One page of identities ordered by display name.
    pub fn select_identities(
        &self,
        skip: usize,
        take: usize,
    ) -> Result<Vec<UserIdentity>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM user_identities
             ORDER BY display_name, rowid LIMIT ?1 OFFSET ?2"
        ))?;
        let mut identities = stmt
            .query_map(params![take as i64, skip as i64], row_to_identity)?
            .collect::<Result<Vec<_>, _>>()?;
        for identity in &mut identities {
            load_legacy_ids(&conn, identity)?;
        }
        Ok(identities)
    }

    /// Overwrite an identity's attributes and replace its legacy user IDs.
    /// Returns `false` if no identity has this ID.
    pub fn update_identity(&self, identity: &UserIdentity) -> Result<bool, StoreError> {
        let claims = serde_json::to_string(&identity.claims)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.transaction(|conn| {
            let changed = conn.execute(
                "UPDATE user_identities SET display_name = ?2, email = ?3, email_verified = ?4,
                 mobile_number = ?5, mobile_verified = ?6, claims = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    identity.id,
                    identity.display_name,
                    identity.email,
                    identity.email_verified,
                    identity.mobile_number,
                    identity.mobile_verified,
                    claims,
                    identity.updated_at.to_rfc3339(),
                ],
            )?;
            if changed == 0 {
                return Ok(false);
            }
            conn.execute(
                "DELETE FROM identity_legacy_ids WHERE identity_id = ?1",
                params![identity.id],
            )?;
            for (application_id, legacy_user_id) in &identity.legacy_user_ids {
                conn.execute(
                    "INSERT INTO identity_legacy_ids (identity_id, application_id, legacy_user_id)
                     VALUES (?1, ?2, ?3)",
                    params![identity.id, application_id, legacy_user_id],
                )?;
            }
            Ok(true)
        })
    }

    /// Delete an identity; its legacy user IDs go with it.
    pub fn delete_identity(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM user_identities WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // -- applications -------------------------------------------------------

    pub fn insert_application(&self, application: &Application) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO applications ({APPLICATION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                application.id,
                application.name,
                application.description,
                application.base_url,
                application.api_key,
                application.is_active,
                application.database_identifier,
                application.user_id_field_name,
                application.registered_at.to_rfc3339(),
                application.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| conflict_or(e, || format!("application {} already exists", application.id)))?;
        debug!(application_id = %application.id, "inserted application");
        Ok(())
    }

    pub fn select_application(&self, id: &str) -> Result<Option<Application>, StoreError> {
        let conn = self.conn();
        let application = conn
            .query_row(
                &format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"),
                params![id],
                row_to_application,
            )
            .optional()?;
        Ok(application)
    }

    pub fn select_applications(
        &self,
        skip: usize,
        take: usize,
    ) -> Result<Vec<Application>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications
             ORDER BY name, rowid LIMIT ?1 OFFSET ?2"
        ))?;
        let applications = stmt
            .query_map(params![take as i64, skip as i64], row_to_application)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(applications)
    }

    /// Overwrite everything except the API key and `registered_at`.
    pub fn update_application(&self, application: &Application) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE applications SET name = ?2, description = ?3, base_url = ?4, is_active = ?5,
             database_identifier = ?6, user_id_field_name = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                application.id,
                application.name,
                application.description,
                application.base_url,
                application.is_active,
                application.database_identifier,
                application.user_id_field_name,
                application.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn update_application_api_key(&self, id: &str, api_key: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE applications SET api_key = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, api_key, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_application(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM applications WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // -- role_mappings ------------------------------------------------------

    /// Insert a role mapping. A legacy role name the application already
    /// maps, in any letter case, is a [`StoreError::Conflict`].
    pub fn insert_role_mapping(&self, mapping: &RoleMapping) -> Result<(), StoreError> {
        self.transaction(|conn| {
            ensure_unmapped(
                conn,
                "role_mappings",
                "legacy_role_name",
                &mapping.application_id,
                &mapping.legacy_role_name,
                &mapping.id,
            )?;
            conn.execute(
                &format!(
                    "INSERT INTO role_mappings ({ROLE_MAPPING_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![
                    mapping.id,
                    mapping.application_id,
                    mapping.legacy_role_name,
                    mapping.centralized_role_name,
                    mapping.description,
                    mapping.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| conflict_or(e, || format!("role mapping {} already exists", mapping.id)))?;
            Ok(())
        })?;
        debug!(role_mapping_id = %mapping.id, application_id = %mapping.application_id, "inserted role mapping");
        Ok(())
    }

    pub fn select_role_mapping(&self, id: &str) -> Result<Option<RoleMapping>, StoreError> {
        let conn = self.conn();
        let mapping = conn
            .query_row(
                &format!("SELECT {ROLE_MAPPING_COLUMNS} FROM role_mappings WHERE id = ?1"),
                params![id],
                row_to_role_mapping,
            )
            .optional()?;
        Ok(mapping)
    }

    pub fn select_role_mappings_by_application(
        &self,
        application_id: &str,
    ) -> Result<Vec<RoleMapping>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROLE_MAPPING_COLUMNS} FROM role_mappings WHERE application_id = ?1
             ORDER BY legacy_role_name"
        ))?;
        let mappings = stmt
            .query_map(params![application_id], row_to_role_mapping)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    pub fn select_role_mappings(
        &self,
        skip: usize,
        take: usize,
    ) -> Result<Vec<RoleMapping>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROLE_MAPPING_COLUMNS} FROM role_mappings
             ORDER BY application_id, legacy_role_name LIMIT ?1 OFFSET ?2"
        ))?;
        let mappings = stmt
            .query_map(params![take as i64, skip as i64], row_to_role_mapping)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    /// Overwrite every column except `created_at`.
    pub fn update_role_mapping(&self, mapping: &RoleMapping) -> Result<bool, StoreError> {
        self.transaction(|conn| {
            ensure_unmapped(
                conn,
                "role_mappings",
                "legacy_role_name",
                &mapping.application_id,
                &mapping.legacy_role_name,
                &mapping.id,
            )?;
            let changed = conn.execute(
                "UPDATE role_mappings SET application_id = ?2, legacy_role_name = ?3,
                 centralized_role_name = ?4, description = ?5
                 WHERE id = ?1",
                params![
                    mapping.id,
                    mapping.application_id,
                    mapping.legacy_role_name,
                    mapping.centralized_role_name,
                    mapping.description,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete_role_mapping(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM role_mappings WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // -- claim_mappings -----------------------------------------------------

    /// Insert a claim mapping. A legacy claim type the application already
    /// maps, in any letter case, is a [`StoreError::Conflict`].
    pub fn insert_claim_mapping(&self, mapping: &ClaimMapping) -> Result<(), StoreError> {
        self.transaction(|conn| {
            ensure_unmapped(
                conn,
                "claim_mappings",
                "legacy_claim_type",
                &mapping.application_id,
                &mapping.legacy_claim_type,
                &mapping.id,
            )?;
            conn.execute(
                &format!(
                    "INSERT INTO claim_mappings ({CLAIM_MAPPING_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    mapping.id,
                    mapping.application_id,
                    mapping.legacy_claim_type,
                    mapping.centralized_claim_type,
                    mapping.transformation_expression,
                    mapping.include_in_centralized,
                    mapping.include_in_legacy,
                    mapping.description,
                    mapping.created_at.to_rfc3339(),
                    mapping.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| conflict_or(e, || format!("claim mapping {} already exists", mapping.id)))?;
            Ok(())
        })?;
        debug!(claim_mapping_id = %mapping.id, application_id = %mapping.application_id, "inserted claim mapping");
        Ok(())
    }

    pub fn select_claim_mapping(&self, id: &str) -> Result<Option<ClaimMapping>, StoreError> {
        let conn = self.conn();
        let mapping = conn
            .query_row(
                &format!("SELECT {CLAIM_MAPPING_COLUMNS} FROM claim_mappings WHERE id = ?1"),
                params![id],
                row_to_claim_mapping,
            )
            .optional()?;
        Ok(mapping)
    }

    pub fn select_claim_mappings_by_application(
        &self,
        application_id: &str,
    ) -> Result<Vec<ClaimMapping>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CLAIM_MAPPING_COLUMNS} FROM claim_mappings WHERE application_id = ?1
             ORDER BY legacy_claim_type"
        ))?;
        let mappings = stmt
            .query_map(params![application_id], row_to_claim_mapping)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    pub fn select_claim_mappings(
        &self,
        skip: usize,
        take: usize,
    ) -> Result<Vec<ClaimMapping>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CLAIM_MAPPING_COLUMNS} FROM claim_mappings
             ORDER BY application_id, legacy_claim_type LIMIT ?1 OFFSET ?2"
        ))?;
        let mappings = stmt
            .query_map(params![take as i64, skip as i64], row_to_claim_mapping)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    /// Overwrite every column except `created_at`.
    pub fn update_claim_mapping(&self, mapping: &ClaimMapping) -> Result<bool, StoreError> {
        self.transaction(|conn| {
            ensure_unmapped(
                conn,
                "claim_mappings",
                "legacy_claim_type",
                &mapping.application_id,
                &mapping.legacy_claim_type,
                &mapping.id,
            )?;
            let changed = conn.execute(
                "UPDATE claim_mappings SET application_id = ?2, legacy_claim_type = ?3,
                 centralized_claim_type = ?4, transformation_expression = ?5,
                 include_in_centralized = ?6, include_in_legacy = ?7, description = ?8,
                 updated_at = ?9
                 WHERE id = ?1",
                params![
                    mapping.id,
                    mapping.application_id,
                    mapping.legacy_claim_type,
                    mapping.centralized_claim_type,
                    mapping.transformation_expression,
                    mapping.include_in_centralized,
                    mapping.include_in_legacy,
                    mapping.description,
                    mapping.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete_claim_mapping(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM claim_mappings WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}

// ---------------------------------------------------------------------------
// Shared statements
// ---------------------------------------------------------------------------

fn insert_mapping_row(conn: &Connection, mapping: &UserIdMapping) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO user_id_mappings ({MAPPING_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ),
        params![
            mapping.id,
            mapping.application_id,
            mapping.legacy_user_id,
            mapping.centralized_identity_id,
            mapping.created_at.to_rfc3339(),
            mapping.metadata,
            mapping.is_validated,
        ],
    )
    .map_err(|e| {
        conflict_or(e, || {
            format!(
                "a mapping already exists for application {} and legacy user ID {}",
                mapping.application_id, mapping.legacy_user_id
            )
        })
    })?;
    Ok(())
}

/// Returns `false`, writing nothing, if the identity does not exist.
fn upsert_legacy_id_row(
    conn: &Connection,
    identity_id: &str,
    application_id: &str,
    legacy_user_id: &str,
) -> Result<bool, StoreError> {
    let touched = conn.execute(
        "UPDATE user_identities SET updated_at = ?2 WHERE id = ?1",
        params![identity_id, Utc::now().to_rfc3339()],
    )?;
    if touched == 0 {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO identity_legacy_ids (identity_id, application_id, legacy_user_id)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (identity_id, application_id)
         DO UPDATE SET legacy_user_id = excluded.legacy_user_id",
        params![identity_id, application_id, legacy_user_id],
    )?;
    Ok(true)
}

/// Fail with a conflict if another row of `table` in the application already
/// uses `name` in `column`, ignoring case. SQLite's `NOCASE` only folds
/// ASCII, so the comparison runs here.
fn ensure_unmapped(
    conn: &Connection,
    table: &str,
    column: &str,
    application_id: &str,
    name: &str,
    own_id: &str,
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, {column} FROM {table} WHERE application_id = ?1"
    ))?;
    let rows = stmt
        .query_map(params![application_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let wanted = fold_case(name);
    if rows
        .iter()
        .any(|(id, existing)| id != own_id && fold_case(existing) == wanted)
    {
        return Err(StoreError::Conflict(format!(
            "application {} already maps {}",
            application_id, name
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn query_identity(
    conn: &Connection,
    predicate: &str,
    args: &[&dyn ToSql],
) -> Result<Option<UserIdentity>, StoreError> {
    let identity = conn
        .query_row(
            &format!("SELECT {IDENTITY_COLUMNS} FROM user_identities WHERE {predicate} LIMIT 1"),
            args,
            row_to_identity,
        )
        .optional()?;

    let Some(mut identity) = identity else {
        return Ok(None);
    };
    load_legacy_ids(conn, &mut identity)?;
    Ok(Some(identity))
}

fn load_legacy_ids(conn: &Connection, identity: &mut UserIdentity) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT application_id, legacy_user_id FROM identity_legacy_ids WHERE identity_id = ?1",
    )?;
    identity.legacy_user_ids = stmt
        .query_map(params![identity.id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<BTreeMap<String, String>, _>>()?;
    Ok(())
}

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<MappingRule> {
    Ok(MappingRule {
        id: row.get(0)?,
        application_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        condition: row.get(4)?,
        rule_type: parse_column(row, 5)?,
        source_identifier: row.get(6)?,
        target_identifier: row.get(7)?,
        transform_expression: row.get(8)?,
        direction: parse_column(row, 9)?,
        priority: row.get(10)?,
        is_enabled: row.get(11)?,
        created_at: parse_datetime(&row.get::<_, String>(12)?),
        updated_at: parse_datetime(&row.get::<_, String>(13)?),
    })
}

fn row_to_mapping(row: &Row<'_>) -> rusqlite::Result<UserIdMapping> {
    Ok(UserIdMapping {
        id: row.get(0)?,
        application_id: row.get(1)?,
        legacy_user_id: row.get(2)?,
        centralized_identity_id: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        metadata: row.get(5)?,
        is_validated: row.get(6)?,
    })
}

fn row_to_identity(row: &Row<'_>) -> rusqlite::Result<UserIdentity> {
    let claims: String = row.get(6)?;
    let claims: BTreeMap<String, String> = serde_json::from_str(&claims)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    Ok(UserIdentity {
        id: row.get(0)?,
        display_name: row.get(1)?,
        email: row.get(2)?,
        email_verified: row.get(3)?,
        mobile_number: row.get(4)?,
        mobile_verified: row.get(5)?,
        legacy_user_ids: BTreeMap::new(),
        claims,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        updated_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

fn row_to_application(row: &Row<'_>) -> rusqlite::Result<Application> {
    Ok(Application {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        base_url: row.get(3)?,
        api_key: row.get(4)?,
        is_active: row.get(5)?,
        database_identifier: row.get(6)?,
        user_id_field_name: row.get(7)?,
        registered_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

fn row_to_role_mapping(row: &Row<'_>) -> rusqlite::Result<RoleMapping> {
    Ok(RoleMapping {
        id: row.get(0)?,
        application_id: row.get(1)?,
        legacy_role_name: row.get(2)?,
        centralized_role_name: row.get(3)?,
        description: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn row_to_claim_mapping(row: &Row<'_>) -> rusqlite::Result<ClaimMapping> {
    Ok(ClaimMapping {
        id: row.get(0)?,
        application_id: row.get(1)?,
        legacy_claim_type: row.get(2)?,
        centralized_claim_type: row.get(3)?,
        transformation_expression: row.get(4)?,
        include_in_centralized: row.get(5)?,
        include_in_legacy: row.get(6)?,
        description: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

/// Decode a `snake_case` enum column through its `FromStr` impl.
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// Parse a datetime string, returning Utc::now() as a fallback if parsing fails.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Turn a constraint violation into [`StoreError::Conflict`].
fn conflict_or(e: rusqlite::Error, detail: impl FnOnce() -> String) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(detail())
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn rule(source: &str, priority: i32, direction: MappingDirection) -> MappingRule {
        MappingRule::new("crm", source, RuleType::Claim, source, "email", direction, priority)
    }

    #[test]
    fn test_rule_crud() {
        let db = setup_db();
        let rule = rule("mail", 1, MappingDirection::Bidirectional)
            .with_condition("sourceClaimType == 'mail'")
            .with_transform("lowercase");
        db.insert_rule(&rule).unwrap();

        let stored = db.select_rule(&rule.id).unwrap().unwrap();
        assert_eq!(stored.condition.as_deref(), Some("sourceClaimType == 'mail'"));
        assert_eq!(stored.transform_expression.as_deref(), Some("lowercase"));
        assert_eq!(stored.direction, MappingDirection::Bidirectional);

        let mut changed = stored.clone();
        changed.is_enabled = false;
        assert!(db.update_rule(&changed).unwrap());
        assert!(db.select_rules_by_type("crm", RuleType::Claim).unwrap().is_empty());
        assert_eq!(db.select_rules_by_application("crm").unwrap().len(), 1);

        assert!(db.delete_rule(&rule.id).unwrap());
        assert!(db.select_rule(&rule.id).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_rule_id_conflicts() {
        let db = setup_db();
        let rule = rule("mail", 1, MappingDirection::Bidirectional);
        db.insert_rule(&rule).unwrap();
        assert!(db.insert_rule(&rule).unwrap_err().is_conflict());
    }

    #[test]
    fn test_rule_order_and_direction_filter() {
        let db = setup_db();
        let late = rule("a", 5, MappingDirection::LegacyToCentralized);
        let early = rule("b", 1, MappingDirection::Bidirectional);
        let tie = rule("c", 5, MappingDirection::LegacyToCentralized);
        let other_way = rule("d", 0, MappingDirection::CentralizedToLegacy);
        for r in [&late, &early, &tie, &other_way] {
            db.insert_rule(r).unwrap();
        }

        let rules = db
            .select_rules_by_type_and_direction(
                "crm",
                RuleType::Claim,
                MappingDirection::LegacyToCentralized,
            )
            .unwrap();
        let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![early.id.as_str(), late.id.as_str(), tie.id.as_str()]);

        let by_source = db.select_rules_by_source("crm", RuleType::Claim, "d").unwrap();
        assert_eq!(by_source.len(), 1);
    }

    #[test]
    fn test_mapping_crud_and_uniqueness() {
        let db = setup_db();
        let mapping = UserIdMapping::new("crm", "L1", "id-1").with_metadata("seeded".into());
        db.insert_mapping(&mapping).unwrap();

        let dup = UserIdMapping::new("crm", "L1", "id-2");
        assert!(db.insert_mapping(&dup).unwrap_err().is_conflict());

        let by_legacy = db.select_mapping_by_legacy_id("crm", "L1").unwrap().unwrap();
        assert_eq!(by_legacy.id, mapping.id);
        assert_eq!(by_legacy.metadata.as_deref(), Some("seeded"));
        let by_identity = db.select_mapping_by_identity("crm", "id-1").unwrap().unwrap();
        assert_eq!(by_identity.id, mapping.id);

        let mut validated = by_legacy.clone();
        validated.is_validated = true;
        assert!(db.update_mapping(&validated).unwrap());
        assert!(db.select_mapping(&mapping.id).unwrap().unwrap().is_validated);

        assert!(db.delete_mapping(&mapping.id).unwrap());
        assert!(!db.delete_mapping(&mapping.id).unwrap());
    }

    #[test]
    fn test_mapping_pages() {
        let db = setup_db();
        for legacy in ["c", "a", "b", "d"] {
            db.insert_mapping(&UserIdMapping::new("crm", legacy, "id")).unwrap();
        }
        let page = db.select_mappings_by_application("crm", 1, 2).unwrap();
        let ids: Vec<&str> = page.iter().map(|m| m.legacy_user_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_identity_lookups() {
        let db = setup_db();
        let mut identity = UserIdentity::new("Ada")
            .with_email("Ada@Example.com")
            .with_mobile_number("+15550100");
        identity.claims.insert("dept".into(), "eng".into());
        identity.legacy_user_ids.insert("erp".into(), "E-9".into());
        db.insert_identity(&identity).unwrap();

        let by_email = db.select_identity_by_email("ada@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, identity.id);
        assert_eq!(by_email.claims.get("dept").map(String::as_str), Some("eng"));
        assert_eq!(by_email.legacy_user_ids.get("erp").map(String::as_str), Some("E-9"));
        assert!(db.select_identity_by_mobile("+15550100").unwrap().is_some());

        assert!(db.upsert_identity_legacy_id(&identity.id, "crm", "L1").unwrap());
        assert!(db.upsert_identity_legacy_id(&identity.id, "crm", "L2").unwrap());
        assert!(!db.upsert_identity_legacy_id("missing", "crm", "L1").unwrap());

        let found = db.select_identity_by_legacy_id("crm", "L2").unwrap().unwrap();
        assert_eq!(found.legacy_user_ids.get("crm").map(String::as_str), Some("L2"));
        assert!(db.select_identity_by_legacy_id("crm", "L1").unwrap().is_none());
    }

    #[test]
    fn test_linked_mapping_is_all_or_nothing() {
        let db = setup_db();
        let identity = UserIdentity::new("Ada");
        db.insert_identity(&identity).unwrap();

        let orphan = UserIdMapping::new("crm", "L1", "missing");
        let err = db.insert_linked_mapping(&orphan).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(db.select_mapping_by_legacy_id("crm", "L1").unwrap().is_none());

        let mapping = UserIdMapping::new("crm", "L1", &identity.id);
        db.insert_linked_mapping(&mapping).unwrap();
        let stored = db.select_identity(&identity.id).unwrap().unwrap();
        assert_eq!(stored.legacy_user_ids.get("crm").map(String::as_str), Some("L1"));

        // The conflicting insert must not move the identity's legacy ID.
        let other = UserIdentity::new("Bob");
        db.insert_identity(&other).unwrap();
        let dup = UserIdMapping::new("crm", "L1", &other.id);
        assert!(db.insert_linked_mapping(&dup).unwrap_err().is_conflict());
        assert!(db.select_identity(&other.id).unwrap().unwrap().legacy_user_ids.is_empty());
    }

    #[test]
    fn test_identity_update_replaces_legacy_ids() {
        let db = setup_db();
        let mut identity = UserIdentity::new("Ada");
        identity.legacy_user_ids.insert("erp".into(), "E-1".into());
        db.insert_identity(&identity).unwrap();
        db.insert_identity(&UserIdentity::new("Bob")).unwrap();

        identity.legacy_user_ids.clear();
        identity.legacy_user_ids.insert("crm".into(), "C-1".into());
        identity.email = Some("ada@example.com".into());
        assert!(db.update_identity(&identity).unwrap());

        let stored = db.select_identity(&identity.id).unwrap().unwrap();
        assert_eq!(stored.email.as_deref(), Some("ada@example.com"));
        assert!(stored.legacy_user_ids.get("erp").is_none());
        assert!(db.select_identity_by_legacy_id("crm", "C-1").unwrap().is_some());

        let page = db.select_identities(0, 10).unwrap();
        let names: Vec<&str> = page.iter().map(|i| i.display_name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "Bob"]);
        assert_eq!(page[0].legacy_user_ids.len(), 1);

        assert!(db.delete_identity(&identity.id).unwrap());
        assert!(db.select_identity_by_legacy_id("crm", "C-1").unwrap().is_none());
        assert!(!db.update_identity(&identity).unwrap());
    }

    #[test]
    fn test_application_key_survives_update() {
        let db = setup_db();
        let app = Application::new("CRM").with_id("crm");
        db.insert_application(&app).unwrap();
        assert!(db.insert_application(&app).unwrap_err().is_conflict());

        let mut changed = app.clone();
        changed.api_key = "ignored".into();
        changed.is_active = false;
        assert!(db.update_application(&changed).unwrap());
        let stored = db.select_application("crm").unwrap().unwrap();
        assert_eq!(stored.api_key, app.api_key);
        assert!(!stored.is_active);

        assert!(db.update_application_api_key("crm", "next").unwrap());
        assert_eq!(db.select_application("crm").unwrap().unwrap().api_key, "next");
        assert!(!db.update_application_api_key("erp", "next").unwrap());
        assert!(db.delete_application("crm").unwrap());
    }

    #[test]
    fn test_static_mapping_uniqueness_folds_case() {
        let db = setup_db();
        db.insert_role_mapping(&RoleMapping::new("his", "Ärzte", "physicians"))
            .unwrap();
        let err = db
            .insert_role_mapping(&RoleMapping::new("his", "ÄRZTE", "doctors"))
            .unwrap_err();
        assert!(err.is_conflict());
        db.insert_role_mapping(&RoleMapping::new("crm", "ÄRZTE", "doctors"))
            .unwrap();
        assert_eq!(db.select_role_mappings(0, 10).unwrap().len(), 2);

        let mail = ClaimMapping::new("crm", "mail", "email").with_transform("lowercase");
        db.insert_claim_mapping(&mail).unwrap();
        let mut tel = ClaimMapping::new("crm", "tel", "phone");
        tel.include_in_legacy = false;
        db.insert_claim_mapping(&tel).unwrap();

        tel.legacy_claim_type = "Mail".into();
        assert!(db.update_claim_mapping(&tel).unwrap_err().is_conflict());

        let stored = db.select_claim_mappings_by_application("crm").unwrap();
        let types: Vec<&str> = stored.iter().map(|m| m.legacy_claim_type.as_str()).collect();
        assert_eq!(types, vec!["mail", "tel"]);
        assert_eq!(stored[0].transformation_expression.as_deref(), Some("lowercase"));
        assert!(!stored[1].include_in_legacy);
    }
}
