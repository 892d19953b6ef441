//! Guard conditions for mapping rules.
//!
//! Supported forms, checked in this order:
//!
//! - `A == B` / `A != B` (only when the operator splits the condition into
//!   exactly two parts)
//! - `A.StartsWith(B)`, `A.EndsWith(B)`, `A.Contains(B)`
//!
//! Operands are quoted literals, context keys, or `key.Value` / `key.Type`
//! on a claim in the context. Every comparison is case-insensitive. Anything
//! that does not parse evaluates to `false`.

use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::{debug, warn};

use super::context::{resolve_operand, ContextLookup};
use crate::errors::RuleError;
use crate::models::fold_case;

#[derive(Debug, Clone, Copy)]
enum Method {
    StartsWith,
    EndsWith,
    Contains,
}

impl Method {
    fn test(self, haystack: &str, needle: &str) -> bool {
        match self {
            Self::StartsWith => haystack.starts_with(needle),
            Self::EndsWith => haystack.ends_with(needle),
            Self::Contains => haystack.contains(needle),
        }
    }
}

fn method_patterns() -> &'static [(Method, Regex)] {
    static PATTERNS: OnceLock<Vec<(Method, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (Method::StartsWith, r"(.+)\.StartsWith\((.+)\)"),
            (Method::EndsWith, r"(.+)\.EndsWith\((.+)\)"),
            (Method::Contains, r"(.+)\.Contains\((.+)\)"),
        ]
        .into_iter()
        .map(|(method, pattern)| {
            (method, Regex::new(pattern).expect("static condition pattern is valid"))
        })
        .collect()
    })
}

/// Evaluate `condition` against `scope`.
///
/// An empty condition is `true`. Parse failures are logged and yield
/// `false`; they never reach the caller.
pub fn evaluate(condition: &str, scope: &dyn ContextLookup) -> bool {
    match try_evaluate(condition, scope) {
        Ok(result) => result,
        Err(e) => {
            warn!(condition, error = %e, "condition could not be evaluated, treating as false");
            false
        }
    }
}

/// Like [`evaluate`], but surfaces parse failures.
pub fn try_evaluate(condition: &str, scope: &dyn ContextLookup) -> Result<bool, RuleError> {
    let condition = condition.trim();
    if condition.is_empty() {
        return Ok(true);
    }

    if condition.contains("==") {
        if let [left, right] = condition.split("==").collect::<Vec<_>>().as_slice() {
            return compare(condition, left, right, scope);
        }
    }

    if condition.contains("!=") {
        if let [left, right] = condition.split("!=").collect::<Vec<_>>().as_slice() {
            return compare(condition, left, right, scope).map(|equal| !equal);
        }
    }

    for (method, regex) in method_patterns() {
        if let Some(caps) = regex.captures(condition) {
            let haystack = resolve(condition, &caps[1], scope)?;
            let needle = resolve(condition, &caps[2], scope)?;
            return Ok(method.test(&haystack, &needle));
        }
    }

    debug!(condition, "condition matches no supported form");
    Err(RuleError::MalformedCondition {
        condition: condition.to_string(),
        detail: "expected ==, !=, StartsWith, EndsWith, or Contains".into(),
    })
}

fn compare(
    condition: &str,
    left: &str,
    right: &str,
    scope: &dyn ContextLookup,
) -> Result<bool, RuleError> {
    Ok(resolve(condition, left, scope)? == resolve(condition, right, scope)?)
}

/// Resolve one operand and fold it to lowercase for comparison.
fn resolve(condition: &str, token: &str, scope: &dyn ContextLookup) -> Result<String, RuleError> {
    resolve_operand(token, scope)
        .map(|operand| fold_case(&operand.into_string()))
        .ok_or_else(|| RuleError::MalformedCondition {
            condition: condition.to_string(),
            detail: format!("lone quote {} is not a string literal", token.trim()),
        })
}
