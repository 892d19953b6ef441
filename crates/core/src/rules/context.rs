//! Evaluation context for rule conditions and transform expressions.
//!
//! A [`RuleContext`] is a string-keyed map of tagged [`ContextValue`]s. The
//! rule engine writes the element under evaluation into it (see [`keys`]);
//! callers may pre-populate it with anything else a condition should see.

use std::collections::HashMap;
use std::fmt;

use crate::models::Claim;

/// Well-known context keys written by the rule engine.
pub mod keys {
    pub const SOURCE_CLAIM: &str = "sourceClaim";
    pub const SOURCE_CLAIM_TYPE: &str = "sourceClaimType";
    pub const SOURCE_CLAIM_VALUE: &str = "sourceClaimValue";
    pub const SOURCE_CLAIMS: &str = "sourceClaims";
    pub const SOURCE_ROLE: &str = "sourceRole";
    pub const SOURCE_ROLES: &str = "sourceRoles";
    /// Only visible to transform expressions.
    pub const VALUE: &str = "value";
}

/// A single value stored in a [`RuleContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Claim(Claim),
    Claims(Vec<Claim>),
    Roles(Vec<String>),
}

impl ContextValue {
    /// The claim behind this value, if it is one.
    pub fn as_claim(&self) -> Option<&Claim> {
        match self {
            Self::Claim(claim) => Some(claim),
            _ => None,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Claim(c) => write!(f, "{}: {}", c.claim_type, c.value),
            Self::Claims(claims) => {
                let joined: Vec<String> = claims
                    .iter()
                    .map(|c| format!("{}: {}", c.claim_type, c.value))
                    .collect();
                f.write_str(&joined.join(","))
            }
            Self::Roles(roles) => f.write_str(&roles.join(",")),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for ContextValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for ContextValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for ContextValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Claim> for ContextValue {
    fn from(c: Claim) -> Self {
        Self::Claim(c)
    }
}

impl From<Vec<Claim>> for ContextValue {
    fn from(c: Vec<Claim>) -> Self {
        Self::Claims(c)
    }
}

impl From<Vec<String>> for ContextValue {
    fn from(r: Vec<String>) -> Self {
        Self::Roles(r)
    }
}

/// Anything operands can be resolved against.
pub trait ContextLookup {
    fn lookup(&self, key: &str) -> Option<&ContextValue>;
}

/// Request-scoped bag of values visible to conditions and transforms.
///
/// Batch transforms share one context across all elements so a condition on
/// one element can look at its siblings (`sourceClaims`, `sourceRoles`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleContext {
    values: HashMap<String, ContextValue>,
}

impl RuleContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: &str, value: impl Into<ContextValue>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ContextLookup for RuleContext {
    fn lookup(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }
}

impl<K: Into<String>, V: Into<ContextValue>> FromIterator<(K, V)> for RuleContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A read-only view that shadows one key of a parent context.
///
/// Used to expose `value` to transform expressions without writing it into
/// the caller's context.
pub(crate) struct Overlay<'a> {
    key: &'a str,
    value: ContextValue,
    parent: &'a dyn ContextLookup,
}

impl<'a> Overlay<'a> {
    pub(crate) fn new(key: &'a str, value: ContextValue, parent: &'a dyn ContextLookup) -> Self {
        Self { key, value, parent }
    }
}

impl ContextLookup for Overlay<'_> {
    fn lookup(&self, key: &str) -> Option<&ContextValue> {
        if key == self.key {
            Some(&self.value)
        } else {
            self.parent.lookup(key)
        }
    }
}

// ---------------------------------------------------------------------------
// Operand resolution
// ---------------------------------------------------------------------------

/// The outcome of resolving one operand token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Operand {
    /// A quoted literal, quotes stripped.
    Literal(String),
    /// A name (or `obj.Field`) found in the context.
    Bound(String),
    /// A name not found in the context; carries the token unchanged.
    Unbound(String),
}

impl Operand {
    pub(crate) fn into_string(self) -> String {
        match self {
            Self::Literal(s) | Self::Bound(s) | Self::Unbound(s) => s,
        }
    }
}

/// Resolve an operand token.
///
/// Returns `None` only for a lone quote character. A token with an opening
/// quote but no matching closing quote is not a literal and comes back
/// unchanged like any other unresolved name.
pub(crate) fn resolve_operand(token: &str, scope: &dyn ContextLookup) -> Option<Operand> {
    let token = token.trim();

    if let Some(quote) = token.chars().next().filter(|c| *c == '\'' || *c == '"') {
        if token.len() == 1 {
            return None;
        }
        if token.ends_with(quote) {
            return Some(Operand::Literal(token[1..token.len() - 1].to_string()));
        }
        return Some(Operand::Unbound(token.to_string()));
    }

    if token.contains('.') {
        let parts: Vec<&str> = token.split('.').collect();
        if let [object, field] = parts.as_slice() {
            if let Some(claim) = scope.lookup(object).and_then(ContextValue::as_claim) {
                match *field {
                    "Value" => return Some(Operand::Bound(claim.value.clone())),
                    "Type" => return Some(Operand::Bound(claim.claim_type.clone())),
                    _ => {}
                }
            }
        }
        return Some(Operand::Unbound(token.to_string()));
    }

    match scope.lookup(token) {
        Some(value) => Some(Operand::Bound(value.to_string())),
        None => Some(Operand::Unbound(token.to_string())),
    }
}
