//! idbridge command-line management tool.
//!
//! Provides subcommands for generating and validating configuration files,
//! importing and exporting mapping rules, dry-running claim and role
//! transformations, inspecting and editing user ID mappings, running the
//! fallback chain, and managing centralized identities and registered
//! applications.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use idbridge_core::config::AppConfig;
use idbridge_core::fallback::{build_manager, FallbackContext};
use idbridge_core::models::{Application, Claim, MappingDirection, MappingRule, UserIdentity};
use idbridge_core::rules::{RuleContext, RuleEngine};
use idbridge_core::rules_file::RulesFile;
use idbridge_core::service::MappingService;
use idbridge_core::store::{ApplicationStore, IdentityStore, RuleStore, Stores};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// idbridge command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "idbridge",
    version,
    about = "Manage and inspect an idbridge identity mapping deployment"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/idbridge/config.toml"
    )]
    config: PathBuf,

    /// Log level for diagnostic output (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./idbridge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Manage mapping rules.
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Dry-run the rule engine against the configured rules.
    Transform {
        #[command(subcommand)]
        action: TransformAction,
    },

    /// Inspect and edit user ID mappings.
    Mapping {
        #[command(subcommand)]
        action: MappingAction,
    },

    /// Run the fallback strategy chain for a user.
    Fallback {
        /// Application ID.
        app: String,

        #[command(flatten)]
        user: UserArgs,
    },

    /// Manage centralized identities.
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Register applications and manage their API keys.
    App {
        #[command(subcommand)]
        action: AppAction,
    },
}

/// What is known about a user, for fallback resolution.
#[derive(clap::Args, Debug, Default)]
struct UserArgs {
    /// Legacy user ID in the application.
    #[arg(long)]
    legacy_id: Option<String>,

    /// Centralized identity ID.
    #[arg(long)]
    identity_id: Option<String>,

    /// Email address.
    #[arg(long)]
    email: Option<String>,

    /// Mobile number.
    #[arg(long)]
    mobile: Option<String>,

    /// Display name, used when a new identity has to be created.
    #[arg(long)]
    name: Option<String>,
}

impl UserArgs {
    fn into_context(self) -> FallbackContext {
        FallbackContext {
            legacy_user_id: self.legacy_id,
            centralized_identity_id: self.identity_id,
            user_email: self.email,
            user_mobile_number: self.mobile,
            user_display_name: self.name,
            ..FallbackContext::default()
        }
    }

    fn has_contact(&self) -> bool {
        self.email.is_some() || self.mobile.is_some() || self.name.is_some()
    }
}

#[derive(Subcommand, Debug)]
enum RulesAction {
    /// List an application's rules in evaluation order.
    List {
        /// Application ID.
        app: String,
    },
    /// Import rules from a TOML rules file.
    Import {
        /// Rules file to read.
        file: PathBuf,
    },
    /// Export an application's rules to a TOML rules file.
    Export {
        /// Application ID.
        app: String,

        /// Output path.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Delete a rule.
    Delete {
        /// Rule ID.
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum TransformAction {
    /// Transform a single claim.
    Claim {
        /// Application ID.
        app: String,

        /// Claim type.
        #[arg(long = "type")]
        claim_type: String,

        /// Claim value.
        #[arg(long)]
        value: String,

        /// legacy_to_centralized, centralized_to_legacy, or bidirectional.
        #[arg(long, default_value = "legacy_to_centralized")]
        direction: MappingDirection,

        /// Extra context values as key=value.
        #[arg(long = "context", value_parser = parse_key_value)]
        context: Vec<(String, String)>,
    },
    /// Transform a single role.
    Role {
        /// Application ID.
        app: String,

        /// Role name.
        role: String,

        /// legacy_to_centralized, centralized_to_legacy, or bidirectional.
        #[arg(long, default_value = "legacy_to_centralized")]
        direction: MappingDirection,

        /// Extra context values as key=value.
        #[arg(long = "context", value_parser = parse_key_value)]
        context: Vec<(String, String)>,
    },
}

#[derive(Subcommand, Debug)]
enum MappingAction {
    /// Find the centralized identity for a legacy user.
    Lookup {
        /// Application ID.
        app: String,

        /// Legacy user ID.
        legacy: String,

        /// Run the fallback chain when no mapping exists.
        #[arg(long)]
        fallback: bool,

        #[command(flatten)]
        user: UserArgs,
    },
    /// Find the legacy user ID for a centralized identity.
    Reverse {
        /// Application ID.
        app: String,

        /// Centralized identity ID.
        identity: String,

        /// Run the fallback chain when no mapping exists.
        #[arg(long)]
        fallback: bool,

        #[command(flatten)]
        user: UserArgs,
    },
    /// List an application's mappings.
    List {
        /// Application ID.
        app: String,

        #[arg(long, default_value = "0")]
        skip: usize,

        #[arg(long, default_value = "100")]
        take: usize,
    },
    /// Link a legacy user to an existing identity.
    Create {
        /// Application ID.
        app: String,

        /// Legacy user ID.
        legacy_id: String,

        /// Centralized identity ID.
        identity_id: String,
    },
    /// Mark a mapping as confirmed.
    Validate {
        /// Mapping ID.
        id: String,
    },
    /// Delete a mapping.
    Delete {
        /// Mapping ID.
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum IdentityAction {
    /// Create a centralized identity.
    Add {
        /// Display name.
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        mobile: Option<String>,
    },
    /// Show an identity by ID or email.
    Show {
        /// Identity ID.
        id: Option<String>,

        /// Look up by email instead of ID.
        #[arg(long, conflicts_with = "id")]
        email: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum AppAction {
    /// Register an application and print its API key.
    Add {
        /// Display name.
        name: String,

        /// Application ID (a UUID is generated when omitted).
        #[arg(long)]
        id: Option<String>,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long)]
        base_url: Option<String>,
    },
    /// List registered applications.
    List {
        #[arg(long, default_value_t = 0)]
        skip: usize,

        #[arg(long, default_value_t = 100)]
        take: usize,
    },
    /// Issue a new API key; the old one stops working.
    RegenerateKey {
        /// Application ID.
        app: String,
    },
    /// Remove an application.
    Delete {
        /// Application ID.
        app: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .without_time()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        command => {
            // Everything else needs the config and the stores
            let config = load_config(&cli.config)?;
            let stores = Stores::open(&config).context("failed to open stores")?;
            debug!(backend = %config.storage.backend, "stores opened");

            match command {
                Commands::Rules { action } => cmd_rules(&stores, action).await,
                Commands::Transform { action } => cmd_transform(&stores, action).await,
                Commands::Mapping { action } => {
                    cmd_mapping(&mapping_service(&config, &stores), action).await
                }
                Commands::Fallback { app, user } => {
                    cmd_fallback(&mapping_service(&config, &stores), &app, user).await
                }
                Commands::Identity { action } => cmd_identity(&stores, action).await,
                Commands::App { action } => cmd_app(&stores, action).await,
                Commands::Init { .. } | Commands::Validate => unreachable!(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config =
        AppConfig::load_from_file(path).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config.validate().context("configuration validation failed")?;
    Ok(config)
}

fn mapping_service(config: &AppConfig, stores: &Stores) -> MappingService {
    let manager = build_manager(&config.fallback, stores);
    MappingService::new(stores, Arc::new(manager)).with_fallback_enabled(config.fallback.enabled)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# idbridge Configuration
# See documentation for all available options.

[service]
log_level = "info"
data_dir = "/var/lib/idbridge"

[storage]
backend = "sqlite"
database_file = "idbridge.db"

[web]
listen = "127.0.0.1:8080"
api_token_env = "IDBRIDGE_API_TOKEN"

[fallback]
enabled = true
email = { enabled = true, priority = 50 }
mobile = { enabled = true, priority = 50 }

[rules]
# seed_file = "/etc/idbridge/rules.toml"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file (data directory, listen address)");
    println!("  2. Set IDBRIDGE_API_TOKEN to require a bearer token on the API");
    println!(
        "  3. Validate with: idbridge validate --config {}",
        output.display()
    );
    println!(
        "  4. Start the daemon: idbridge-daemon --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    // Missing env vars only warn
    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    if let Some(ref seed_file) = config.rules.seed_file {
        match RulesFile::load(seed_file) {
            Ok(rules) => println!("  [OK] Seed rules file parses ({} rules)", rules.len()),
            Err(e) => {
                println!("  [FAIL] Seed rules file: {}", e);
                anyhow::bail!("rules file validation failed");
            }
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Storage       : {}", config.storage.backend);
    println!("  Database      : {}", config.database_path().display());
    println!("  Web listen    : {}", config.web.listen);
    println!(
        "  API token     : {}",
        if config.web.api_token.is_some() {
            "set"
        } else {
            "not set (API is open)"
        }
    );
    println!(
        "  Fallback      : {}",
        if config.fallback.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

async fn cmd_rules(stores: &Stores, action: RulesAction) -> Result<()> {
    match action {
        RulesAction::List { app } => {
            let rules = stores
                .rules
                .get_by_application(&app)
                .await
                .context("failed to list rules")?;

            if rules.is_empty() {
                println!("No rules found for application '{}'.", app);
                return Ok(());
            }

            println!(
                "{:<38} {:<6} {:<5} {:<22} {:<20} {:<20} {}",
                "ID", "TYPE", "PRIO", "DIRECTION", "SOURCE", "TARGET", "ENABLED"
            );
            println!("{}", "-".repeat(120));
            for rule in &rules {
                print_rule_row(rule);
            }
            println!();
            println!("{} rule(s) shown", rules.len());
            Ok(())
        }

        RulesAction::Import { file } => {
            let rules = RulesFile::load(&file)
                .with_context(|| format!("failed to load rules file {}", file.display()))?;
            let summary = RulesFile::import(stores.rules.as_ref(), &rules)
                .await
                .context("failed to import rules")?;
            println!(
                "Imported {} rule(s): {} created, {} updated",
                rules.len(),
                summary.created,
                summary.updated
            );
            Ok(())
        }

        RulesAction::Export { app, output } => {
            let rules = stores
                .rules
                .get_by_application(&app)
                .await
                .context("failed to list rules")?;
            RulesFile::save(&output, &rules).context("failed to write rules file")?;
            println!("Exported {} rule(s) to {}", rules.len(), output.display());
            Ok(())
        }

        RulesAction::Delete { id } => {
            if !stores.rules.delete(&id).await.context("failed to delete rule")? {
                anyhow::bail!("rule '{}' not found", id);
            }
            println!("Rule {} deleted", id);
            Ok(())
        }
    }
}

fn print_rule_row(rule: &MappingRule) {
    let target = match rule.transform_expression {
        Some(ref expr) if rule.target_identifier.is_empty() => format!("<{}>", expr),
        _ => rule.target_identifier.clone(),
    };
    println!(
        "{:<38} {:<6} {:<5} {:<22} {:<20} {:<20} {}",
        rule.id,
        rule.rule_type.to_string(),
        rule.priority,
        rule.direction.to_string(),
        truncate(&rule.source_identifier, 20),
        truncate(&target, 20),
        if rule.is_enabled { "yes" } else { "no" },
    );
}

async fn cmd_transform(stores: &Stores, action: TransformAction) -> Result<()> {
    let engine = RuleEngine::new(stores.rules.clone());

    match action {
        TransformAction::Claim {
            app,
            claim_type,
            value,
            direction,
            context,
        } => {
            let mut ctx: RuleContext = context.into_iter().collect();
            let source = Claim::new(claim_type, value);
            match engine.transform_claim(&app, &source, direction, &mut ctx).await {
                Some(mapped) => println!("{} -> {}", source, mapped),
                None => println!("{} -> (no matching rule)", source),
            }
            Ok(())
        }

        TransformAction::Role {
            app,
            role,
            direction,
            context,
        } => {
            let mut ctx: RuleContext = context.into_iter().collect();
            match engine.transform_role(&app, &role, direction, &mut ctx).await {
                Some(mapped) => println!("{} -> {}", role, mapped),
                None => println!("{} -> (no matching rule)", role),
            }
            Ok(())
        }
    }
}

async fn cmd_mapping(service: &MappingService, action: MappingAction) -> Result<()> {
    match action {
        MappingAction::Lookup {
            app,
            legacy,
            fallback,
            user,
        } => {
            let ctx = user.has_contact().then(|| user.into_context());
            match service
                .centralized_identity_id(&app, &legacy, fallback, ctx)
                .await
                .context("lookup failed")?
            {
                Some(identity_id) => println!("{} -> {}", legacy, identity_id),
                None => println!("No centralized identity found for '{}' in '{}'", legacy, app),
            }
            Ok(())
        }

        MappingAction::Reverse {
            app,
            identity,
            fallback,
            user,
        } => {
            let ctx = user.has_contact().then(|| user.into_context());
            match service
                .legacy_user_id(&app, &identity, fallback, ctx)
                .await
                .context("lookup failed")?
            {
                Some(legacy_id) => println!("{} -> {}", identity, legacy_id),
                None => println!("No legacy user found for '{}' in '{}'", identity, app),
            }
            Ok(())
        }

        MappingAction::List { app, skip, take } => {
            let mappings = service
                .mappings_for_application(&app, skip, take)
                .await
                .context("failed to list mappings")?;

            if mappings.is_empty() {
                println!("No mappings found for application '{}'.", app);
                return Ok(());
            }

            println!(
                "{:<38} {:<24} {:<38} {}",
                "ID", "LEGACY ID", "IDENTITY", "VALIDATED"
            );
            println!("{}", "-".repeat(110));
            for m in &mappings {
                println!(
                    "{:<38} {:<24} {:<38} {}",
                    m.id,
                    truncate(&m.legacy_user_id, 24),
                    m.centralized_identity_id,
                    if m.is_validated { "yes" } else { "no" },
                );
            }
            println!();
            println!("{} mapping(s) shown", mappings.len());
            Ok(())
        }

        MappingAction::Create {
            app,
            legacy_id,
            identity_id,
        } => {
            let mapping = service
                .create_mapping(&app, &legacy_id, &identity_id)
                .await
                .context("failed to create mapping")?;
            println!("Mapping {} created ({} -> {})", mapping.id, legacy_id, identity_id);
            Ok(())
        }

        MappingAction::Validate { id } => {
            if !service
                .validate_mapping(&id)
                .await
                .context("failed to validate mapping")?
            {
                anyhow::bail!("mapping '{}' not found", id);
            }
            println!("Mapping {} validated", id);
            Ok(())
        }

        MappingAction::Delete { id } => {
            if !service
                .delete_mapping(&id)
                .await
                .context("failed to delete mapping")?
            {
                anyhow::bail!("mapping '{}' not found", id);
            }
            println!("Mapping {} deleted", id);
            Ok(())
        }
    }
}

async fn cmd_fallback(service: &MappingService, app: &str, user: UserArgs) -> Result<()> {
    if !service.fallback_enabled() {
        anyhow::bail!("fallback is disabled in the configuration");
    }

    let result = service.try_fallback(app, &user.into_context()).await;
    println!("Success  : {}", if result.success { "yes" } else { "no" });
    println!("Message  : {}", result.message);
    if let Some(ref mapping) = result.mapping {
        println!("Mapping  : {}", mapping.id);
        println!("Legacy   : {}", mapping.legacy_user_id);
        println!("Identity : {}", mapping.centralized_identity_id);
    }

    if !result.success {
        anyhow::bail!("fallback did not resolve the user");
    }
    Ok(())
}

async fn cmd_identity(stores: &Stores, action: IdentityAction) -> Result<()> {
    match action {
        IdentityAction::Add {
            name,
            email,
            mobile,
        } => {
            let mut identity = UserIdentity::new(&name);
            identity.email = email;
            identity.mobile_number = mobile;
            let created = stores
                .identities
                .create(&identity)
                .await
                .context("failed to create identity")?;
            println!("Identity {} created", created.id);
            Ok(())
        }

        IdentityAction::Show { id, email } => {
            let identity = match (id, email) {
                (Some(id), _) => stores.identities.get_by_id(&id).await,
                (None, Some(email)) => stores.identities.get_by_email(&email).await,
                (None, None) => anyhow::bail!("provide an identity ID or --email"),
            }
            .context("failed to read identity")?
            .ok_or_else(|| anyhow::anyhow!("identity not found"))?;

            println!("{}", serde_json::to_string_pretty(&identity)?);
            Ok(())
        }
    }
}

async fn cmd_app(stores: &Stores, action: AppAction) -> Result<()> {
    match action {
        AppAction::Add {
            name,
            id,
            description,
            base_url,
        } => {
            let mut application = Application::new(&name);
            if let Some(id) = id {
                application.id = id;
            }
            application.description = description;
            application.base_url = base_url;
            let created = stores
                .applications
                .create(&application)
                .await
                .context("failed to register application")?;
            println!("Application {} registered", created.id);
            println!("API key: {}", created.api_key);
            println!("Store the key now; it is not shown again.");
            Ok(())
        }

        AppAction::List { skip, take } => {
            let applications = stores
                .applications
                .list(skip, take)
                .await
                .context("failed to list applications")?;

            if applications.is_empty() {
                println!("No applications registered.");
                return Ok(());
            }

            println!("{:<38} {:<24} {:<8} {}", "ID", "NAME", "ACTIVE", "BASE URL");
            println!("{}", "-".repeat(100));
            for a in &applications {
                println!(
                    "{:<38} {:<24} {:<8} {}",
                    a.id,
                    truncate(&a.name, 24),
                    if a.is_active { "yes" } else { "no" },
                    a.base_url.as_deref().unwrap_or("-"),
                );
            }
            println!();
            println!("{} application(s) shown", applications.len());
            Ok(())
        }

        AppAction::RegenerateKey { app } => {
            let api_key = stores
                .applications
                .regenerate_api_key(&app)
                .await
                .context("failed to regenerate API key")?;
            println!("New API key for {}: {}", app, api_key);
            Ok(())
        }

        AppAction::Delete { app } => {
            if !stores
                .applications
                .delete(&app)
                .await
                .context("failed to delete application")?
            {
                anyhow::bail!("application '{}' not found", app);
            }
            println!("Application {} deleted", app);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("tenant=acme=1").unwrap(),
            ("tenant".to_string(), "acme=1".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate("ééééééééé", 5), "éé...");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_transform_args() {
        let cli = Cli::try_parse_from([
            "idbridge",
            "transform",
            "claim",
            "crm",
            "--type",
            "mail",
            "--value",
            "a@b.com",
            "--direction",
            "centralized_to_legacy",
            "--context",
            "tenant=acme",
        ])
        .unwrap();
        match cli.command {
            Commands::Transform {
                action:
                    TransformAction::Claim {
                        direction, context, ..
                    },
            } => {
                assert_eq!(direction, MappingDirection::CentralizedToLegacy);
                assert_eq!(context, vec![("tenant".to_string(), "acme".to_string())]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_app_add_args() {
        let cli = Cli::try_parse_from([
            "idbridge", "app", "add", "CRM", "--id", "crm", "--base-url", "https://crm.local",
        ])
        .unwrap();
        match cli.command {
            Commands::App {
                action: AppAction::Add { name, id, base_url, .. },
            } => {
                assert_eq!(name, "CRM");
                assert_eq!(id.as_deref(), Some("crm"));
                assert_eq!(base_url.as_deref(), Some("https://crm.local"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_app_commands_against_memory_store() {
        let stores = Stores::from_shared(Arc::new(idbridge_core::store::MemoryStore::new()));
        cmd_app(
            &stores,
            AppAction::Add {
                name: "CRM".into(),
                id: Some("crm".into()),
                description: String::new(),
                base_url: None,
            },
        )
        .await
        .unwrap();
        let before = stores.applications.get_by_id("crm").await.unwrap().unwrap();

        cmd_app(&stores, AppAction::RegenerateKey { app: "crm".into() })
            .await
            .unwrap();
        let after = stores.applications.get_by_id("crm").await.unwrap().unwrap();
        assert_ne!(before.api_key, after.api_key);

        cmd_app(&stores, AppAction::Delete { app: "crm".into() }).await.unwrap();
        assert!(cmd_app(&stores, AppAction::Delete { app: "crm".into() }).await.is_err());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idbridge.toml");
        cmd_init(&path).unwrap();
        assert!(cmd_init(&path).is_err());
    }
}
