//! REST API endpoint modules.

pub mod applications;
pub mod auth;
pub mod fallback;
pub mod identities;
pub mod mappings;
pub mod rules;
pub mod static_mappings;
pub mod status;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_support;
