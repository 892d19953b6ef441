//! idbridge daemon entry point.
//!
//! Loads configuration, opens the stores, imports seed rules, wires the rule
//! engine and fallback chain into the web server, and handles graceful
//! shutdown.

mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use idbridge_core::config::AppConfig;
use idbridge_core::fallback::build_manager;
use idbridge_core::rules_file::RulesFile;
use idbridge_core::service::MappingService;
use idbridge_core::store::Stores;
use idbridge_web::{AppState, WebServer};

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// idbridge identity mapping daemon.
#[derive(Parser, Debug)]
#[command(
    name = "idbridge-daemon",
    version,
    about = "Identity mapping bridge between legacy applications and a central identity authority"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the listen address from the config file.
    #[arg(long)]
    listen: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load and resolve configuration
    let mut config =
        AppConfig::load_from_file(&args.config).context("failed to load configuration file")?;
    if let Some(listen) = args.listen {
        config.web.listen = listen;
    }
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables in config")?;
    config
        .validate()
        .context("configuration validation failed")?;

    // Initialize tracing
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.service.log_level);

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    // Startup banner
    info!("========================================");
    info!("  idbridge daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Storage       : {}", config.storage.backend);
    info!("Web listen    : {}", config.web.listen);
    info!("Data dir      : {}", config.service.data_dir.display());
    info!("Fallback      : {}", if config.fallback.enabled { "enabled" } else { "disabled" });
    info!("API token     : {}", if config.web.api_token.is_some() { "required" } else { "not configured" });
    info!("Log level     : {}", log_level);
    info!("========================================");

    // Open stores
    let stores = Stores::open(&config).context("failed to open stores")?;
    info!("Stores opened ({})", config.storage.backend);

    // Seed rules
    if let Some(ref seed_file) = config.rules.seed_file {
        let rules = RulesFile::load(seed_file)
            .with_context(|| format!("failed to load rules file {}", seed_file.display()))?;
        let summary = RulesFile::import(stores.rules.as_ref(), &rules)
            .await
            .context("failed to import seed rules")?;
        info!(
            "Seed rules imported from {}: {} created, {} updated",
            seed_file.display(),
            summary.created,
            summary.updated
        );
    }

    // Fallback chain and mapping service
    let manager = build_manager(&config.fallback, &stores);
    let strategies: Vec<String> = manager
        .registered_strategies()
        .iter()
        .map(|s| format!("{}({})", s.name(), s.priority()))
        .collect();
    info!("Fallback strategies: [{}]", strategies.join(", "));

    let service = MappingService::new(&stores, Arc::new(manager))
        .with_fallback_enabled(config.fallback.enabled);

    // Start web server in background, stopping when notified
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let server_shutdown = shutdown.clone();
    let web_server = WebServer::new(AppState::new(&stores, service, config.web.api_token.clone()));
    let listen_addr = config.web.listen.clone();

    let mut web_handle = tokio::spawn(async move {
        web_server
            .start(&listen_addr, async move { server_shutdown.notified().await })
            .await
    });

    // Wait for a shutdown signal, or for the server to die on its own
    tokio::select! {
        signal = signals::wait_for_shutdown() => {
            info!("{} received, stopping...", signal);
        }
        result = &mut web_handle => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.context("web server failed")),
                Err(e) => Err(anyhow::anyhow!("web server task failed: {}", e)),
            };
        }
    }

    // notify_one leaves a permit for a server not yet waiting on it.
    shutdown.notify_one();

    // Let in-flight requests drain (up to 10s)
    match tokio::time::timeout(Duration::from_secs(10), web_handle).await {
        Ok(Ok(Ok(()))) => info!("web server stopped gracefully"),
        Ok(Ok(Err(e))) => warn!("web server error during shutdown: {}", e),
        Ok(Err(e)) => warn!("web server task error: {}", e),
        Err(_) => warn!("web server did not stop within 10s, forcing shutdown"),
    }

    info!("idbridge daemon stopped.");
    Ok(())
}
