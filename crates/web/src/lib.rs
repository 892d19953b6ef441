//! idbridge web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - A health endpoint
//! - Claim and role transformation per application
//! - Mapping rule administration
//! - User ID mapping lookups, creation, validation, and fallback resolution
//! - Application registration, static role/claim mappings, and identities
//! - Optional bearer-token authentication, plus per-application API keys

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use idbridge_core::rules::RuleEngine;
use idbridge_core::service::MappingService;
use idbridge_core::static_mapping::StaticMappingService;
use idbridge_core::store::{ApplicationStore, IdentityStore, RuleStore, Stores};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub engine: RuleEngine,
    pub rules: Arc<dyn RuleStore>,
    pub service: MappingService,
    pub static_mappings: StaticMappingService,
    pub applications: Arc<dyn ApplicationStore>,
    pub identities: Arc<dyn IdentityStore>,
    /// Bearer token every non-health route requires. `None` disables auth.
    pub api_token: Option<String>,
}

impl AppState {
    pub fn new(stores: &Stores, service: MappingService, api_token: Option<String>) -> Self {
        Self {
            engine: RuleEngine::new(stores.rules.clone()),
            rules: stores.rules.clone(),
            service,
            static_mappings: StaticMappingService::new(stores),
            applications: stores.applications.clone(),
            identities: stores.identities.clone(),
            api_token,
        }
    }
}

/// Build the full router with middleware attached.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(api::auth::API_KEY_HEADER),
        ]);

    Router::new()
        .merge(api::status::routes())
        .merge(api::transform::routes())
        .merge(api::rules::routes())
        .merge(api::mappings::routes())
        .merge(api::fallback::routes())
        .merge(api::applications::routes())
        .merge(api::static_mappings::routes())
        .merge(api::identities::routes())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Serve until `shutdown` resolves.
    pub async fn start<F>(self, listen_addr: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listen_addr.parse()?;
        let app = router(self.state);

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("web server stopped");
        Ok(())
    }
}
