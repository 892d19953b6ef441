//! Value transform expressions.
//!
//! | Expression             | Result                              |
//! |------------------------|-------------------------------------|
//! | empty                  | value unchanged                     |
//! | `prefix:TEXT`          | `TEXT` + value                      |
//! | `suffix:TEXT`          | value + `TEXT`                      |
//! | `replace:OLD:NEW`      | first `OLD` replaced by `NEW`       |
//! | `uppercase...`         | value uppercased                    |
//! | `lowercase...`         | value lowercased                    |
//! | anything else          | operand evaluated in a sandbox      |
//!
//! The sandbox accepts exactly one operand (a quoted literal, `value`, a
//! context key, or `key.Value` / `key.Type`) and nothing else. Any failure
//! returns the input value.

use tracing::warn;

use super::context::{keys, resolve_operand, ContextLookup, ContextValue, Operand, Overlay};
use crate::errors::RuleError;

/// Apply `expression` to `value`. Never fails: on error the original value
/// is returned and the error is logged.
pub fn apply(value: &str, expression: &str, scope: &dyn ContextLookup) -> String {
    match try_apply(value, expression, scope) {
        Ok(transformed) => transformed,
        Err(e) => {
            warn!(expression, error = %e, "transform failed, keeping original value");
            value.to_string()
        }
    }
}

/// Like [`apply`], but surfaces failures.
pub fn try_apply(value: &str, expression: &str, scope: &dyn ContextLookup) -> Result<String, RuleError> {
    if expression.is_empty() {
        return Ok(value.to_string());
    }

    if let Some(text) = expression.strip_prefix("prefix:") {
        return Ok(format!("{}{}", text, value));
    }

    if let Some(text) = expression.strip_prefix("suffix:") {
        return Ok(format!("{}{}", value, text));
    }

    if let Some(args) = expression.strip_prefix("replace:") {
        return match args.split(':').collect::<Vec<_>>().as_slice() {
            [old, _] if old.is_empty() => Err(malformed(expression, "replace needs a non-empty search text")),
            [old, new] => Ok(value.replacen(old, new, 1)),
            _ => Err(malformed(expression, "expected replace:OLD:NEW")),
        };
    }

    if expression.starts_with("uppercase") {
        return Ok(value.to_uppercase());
    }

    if expression.starts_with("lowercase") {
        return Ok(value.to_lowercase());
    }

    evaluate_sandboxed(value, expression, scope)
}

/// Evaluate a single operand with `value` bound on top of `scope`.
fn evaluate_sandboxed(
    value: &str,
    expression: &str,
    scope: &dyn ContextLookup,
) -> Result<String, RuleError> {
    let overlay = Overlay::new(keys::VALUE, ContextValue::from(value), scope);
    match resolve_operand(expression, &overlay) {
        Some(Operand::Literal(s)) | Some(Operand::Bound(s)) => Ok(s),
        Some(Operand::Unbound(token)) => Err(RuleError::Unresolved(token)),
        None => Err(malformed(expression, "a lone quote is not a string literal")),
    }
}

fn malformed(expression: &str, detail: &str) -> RuleError {
    RuleError::MalformedExpression {
        expression: expression.to_string(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Claim;
    use crate::rules::context::RuleContext;

    #[test]
    fn test_builtin_forms() {
        let ctx = RuleContext::new();
        assert_eq!(apply("bob", "", &ctx), "bob");
        assert_eq!(apply("42", "prefix:EMP-", &ctx), "EMP-42");
        assert_eq!(apply("bob", "suffix:@corp.example", &ctx), "bob@corp.example");
        assert_eq!(apply("Bob", "uppercase", &ctx), "BOB");
        assert_eq!(apply("Bob", "lowercase()", &ctx), "bob");
    }

    #[test]
    fn test_replace_first_occurrence_only() {
        let ctx = RuleContext::new();
        assert_eq!(apply("a-b-c", "replace:-:_", &ctx), "a_b-c");
        assert_eq!(apply("x", "replace:y:z", &ctx), "x");
    }

    #[test]
    fn test_malformed_replace_keeps_value() {
        let ctx = RuleContext::new();
        assert_eq!(apply("a:b", "replace:a", &ctx), "a:b");
        assert_eq!(apply("a:b", "replace:a:b:c", &ctx), "a:b");
        assert_eq!(apply("abc", "replace::x", &ctx), "abc");
        assert!(try_apply("abc", "replace:a", &ctx).is_err());
    }

    #[test]
    fn test_sandbox_operands() {
        let mut ctx = RuleContext::new();
        ctx.insert("tenant", "acme");
        ctx.insert("sourceClaim", Claim::new("dept", "sales"));

        assert_eq!(apply("bob", "value", &ctx), "bob");
        assert_eq!(apply("bob", "tenant", &ctx), "acme");
        assert_eq!(apply("bob", "sourceClaim.Type", &ctx), "dept");
        assert_eq!(apply("bob", "'fixed'", &ctx), "fixed");
    }

    #[test]
    fn test_sandbox_failures_keep_value() {
        let ctx = RuleContext::new();
        assert_eq!(apply("bob", "value + 1", &ctx), "bob");
        assert_eq!(apply("bob", "'unterminated", &ctx), "bob");
        assert!(matches!(
            try_apply("bob", "nothing", &ctx),
            Err(RuleError::Unresolved(_))
        ));
    }

    #[test]
    fn test_sandbox_does_not_mutate_context() {
        let ctx = RuleContext::new();
        let _ = apply("bob", "value", &ctx);
        assert!(ctx.is_empty());
    }
}
