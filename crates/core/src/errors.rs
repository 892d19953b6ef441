//! Error types for the idbridge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Note that the rule engine and the fallback chain never hand these errors
//! to their callers: a broken rule downgrades to "no match" and a failing
//! strategy downgrades to a failed [`FallbackResult`](crate::fallback::FallbackResult).

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    RulesFile(#[from] RulesFileError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors from the rule, mapping, and identity stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A uniqueness constraint was violated (e.g. a second mapping for the
    /// same application and legacy user ID).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored value could not be decoded.
    #[error("stored value could not be decoded: {0}")]
    Serialization(String),

    /// The backing store is unreachable or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Generic I/O error (e.g. file permissions).
    #[error("store I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StoreError {
    /// Shorthand for a [`StoreError::NotFound`].
    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// `true` for uniqueness violations.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

// ---------------------------------------------------------------------------
// Rule evaluation errors
// ---------------------------------------------------------------------------

/// Errors raised while evaluating a condition or transform expression.
///
/// These are always contained inside the rule engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    /// The condition could not be parsed.
    #[error("malformed condition '{condition}': {detail}")]
    MalformedCondition { condition: String, detail: String },

    /// The transform expression could not be parsed.
    #[error("malformed transform expression '{expression}': {detail}")]
    MalformedExpression { expression: String, detail: String },

    /// An expression referenced something that is not in scope.
    #[error("cannot resolve '{0}' in the evaluation context")]
    Unresolved(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Rules file errors
// ---------------------------------------------------------------------------

/// Errors from reading or writing a TOML rules file.
#[derive(Debug, Error)]
pub enum RulesFileError {
    /// The rules file could not be read or written.
    #[error("rules file error at '{path}': {detail}")]
    Io { path: String, detail: String },

    /// TOML parse error.
    #[error("rules file parse error: {0}")]
    Parse(String),

    /// TOML serialization error.
    #[error("rules file serialization error: {0}")]
    Serialize(String),

    /// An entry is structurally valid TOML but not a usable rule.
    #[error("invalid rule #{index} in rules file: {detail}")]
    InvalidRule { index: usize, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = StoreError::not_found("mapping", "m-1");
        assert_eq!(err.to_string(), "mapping not found: m-1");

        let err = RuleError::Unresolved("claim.Kind".into());
        assert!(err.to_string().contains("claim.Kind"));

        let err = ConfigError::InvalidValue {
            field: "web.listen".into(),
            detail: "must not be empty".into(),
        };
        assert!(err.to_string().contains("web.listen"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = StoreError::Conflict("dup".into()).into();
        assert!(matches!(core_err, CoreError::Store(_)));

        let core_err: CoreError = ConfigError::ParseError("bad".into()).into();
        assert!(matches!(core_err, CoreError::Config(_)));
    }

    #[test]
    fn test_conflict_predicate() {
        assert!(StoreError::Conflict("x".into()).is_conflict());
        assert!(!StoreError::not_found("rule", "r").is_conflict());
    }
}
