//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::StoreError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS mapping_rules (
            id                   TEXT PRIMARY KEY,
            application_id       TEXT    NOT NULL,
            name                 TEXT    NOT NULL,
            description          TEXT    NOT NULL DEFAULT '',
            condition            TEXT,
            rule_type            TEXT    NOT NULL CHECK (rule_type IN ('claim', 'role', 'user')),
            source_identifier    TEXT    NOT NULL,
            target_identifier    TEXT    NOT NULL,
            transform_expression TEXT,
            direction            TEXT    NOT NULL CHECK (direction IN
                                     ('legacy_to_centralized', 'centralized_to_legacy', 'bidirectional')),
            priority             INTEGER NOT NULL DEFAULT 0,
            is_enabled           INTEGER NOT NULL DEFAULT 1,
            created_at           TEXT    NOT NULL,
            updated_at           TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_mapping_rules_app_type
            ON mapping_rules (application_id, rule_type, priority);

        CREATE TABLE IF NOT EXISTS user_identities (
            id              TEXT PRIMARY KEY,
            display_name    TEXT    NOT NULL,
            email           TEXT,
            email_verified  INTEGER NOT NULL DEFAULT 0,
            mobile_number   TEXT,
            mobile_verified INTEGER NOT NULL DEFAULT 0,
            claims          TEXT    NOT NULL DEFAULT '{}',
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_user_identities_email
            ON user_identities (email COLLATE NOCASE);
        CREATE INDEX IF NOT EXISTS idx_user_identities_mobile
            ON user_identities (mobile_number);

        CREATE TABLE IF NOT EXISTS identity_legacy_ids (
            identity_id     TEXT NOT NULL REFERENCES user_identities (id) ON DELETE CASCADE,
            application_id  TEXT NOT NULL,
            legacy_user_id  TEXT NOT NULL,
            PRIMARY KEY (identity_id, application_id)
        );

        CREATE INDEX IF NOT EXISTS idx_identity_legacy_ids_lookup
            ON identity_legacy_ids (application_id, legacy_user_id);

        CREATE TABLE IF NOT EXISTS user_id_mappings (
            id                      TEXT PRIMARY KEY,
            application_id          TEXT    NOT NULL,
            legacy_user_id          TEXT    NOT NULL,
            centralized_identity_id TEXT    NOT NULL,
            created_at              TEXT    NOT NULL,
            metadata                TEXT,
            is_validated            INTEGER NOT NULL DEFAULT 0,
            UNIQUE (application_id, legacy_user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_user_id_mappings_identity
            ON user_id_mappings (application_id, centralized_identity_id);
        "#,
    ),
    (
        2,
        "application registry and static role/claim mappings",
        r#"
        CREATE TABLE IF NOT EXISTS applications (
            id                  TEXT PRIMARY KEY,
            name                TEXT    NOT NULL,
            description         TEXT    NOT NULL DEFAULT '',
            base_url            TEXT,
            api_key             TEXT    NOT NULL,
            is_active           INTEGER NOT NULL DEFAULT 1,
            database_identifier TEXT,
            user_id_field_name  TEXT    NOT NULL DEFAULT 'UserId',
            registered_at       TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_applications_name ON applications (name);

        CREATE TABLE IF NOT EXISTS role_mappings (
            id                    TEXT PRIMARY KEY,
            application_id        TEXT NOT NULL,
            legacy_role_name      TEXT NOT NULL,
            centralized_role_name TEXT NOT NULL,
            description           TEXT NOT NULL DEFAULT '',
            created_at            TEXT NOT NULL,
            UNIQUE (application_id, legacy_role_name)
        );

        CREATE TABLE IF NOT EXISTS claim_mappings (
            id                        TEXT PRIMARY KEY,
            application_id            TEXT    NOT NULL,
            legacy_claim_type         TEXT    NOT NULL,
            centralized_claim_type    TEXT    NOT NULL,
            transformation_expression TEXT,
            include_in_centralized    INTEGER NOT NULL DEFAULT 1,
            include_in_legacy         INTEGER NOT NULL DEFAULT 1,
            description               TEXT    NOT NULL DEFAULT '',
            created_at                TEXT    NOT NULL,
            updated_at                TEXT    NOT NULL,
            UNIQUE (application_id, legacy_claim_type)
        );
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| StoreError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, StoreError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), StoreError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
