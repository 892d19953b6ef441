//! idbridge core library.
//!
//! This crate provides the foundational components for bridging identities
//! between legacy applications and a centralized identity authority: the
//! declarative claim/role rule engine, the fallback strategy chain, the
//! application registry with static role/claim mappings, the stores behind
//! them, configuration, and the rules file format.

pub mod config;
pub mod db;
pub mod errors;
pub mod fallback;
pub mod models;
pub mod rules;
pub mod rules_file;
pub mod service;
pub mod static_mapping;
pub mod store;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use fallback::{FallbackContext, FallbackResult, FallbackStrategy, FallbackStrategyManager};
pub use rules::{RuleContext, RuleEngine, UnmappedPolicy};
pub use rules_file::RulesFile;
pub use service::MappingService;
pub use static_mapping::StaticMappingService;
pub use store::{StorageBackend, Stores};
