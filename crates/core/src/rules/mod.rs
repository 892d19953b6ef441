//! Declarative claim and role mapping.
//!
//! - [`condition`] decides whether a rule's guard holds.
//! - [`transform`] rewrites a value per a rule's transform expression.
//! - [`engine`] picks and applies rules for claims and roles.
//!
//! Both expression grammars are deliberately tiny pattern matchers. There is
//! no boolean composition and no general interpreter.

pub mod condition;
pub mod context;
pub mod engine;
pub mod transform;

pub use context::{keys, ContextLookup, ContextValue, RuleContext};
pub use engine::{RuleEngine, UnmappedPolicy};
