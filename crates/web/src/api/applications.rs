//! Application registry endpoints.
//!
//! Administrative routes: all of them require the bearer token. An
//! application's API key is returned only when it is issued, on
//! registration or regeneration.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use idbridge_core::models::Application;
use idbridge_core::store::ApplicationStore;

use crate::api::auth::require_token;
use crate::api::status::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Body for registering or replacing an application.
#[derive(Deserialize)]
pub struct ApplicationRequest {
    /// Optional on registration; a UUID is assigned when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub database_identifier: Option<String>,
    #[serde(default)]
    pub user_id_field_name: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ApplicationRequest {
    fn into_application(self, id: Option<String>) -> Result<Application, AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest("name is required".into()));
        }
        let mut application = Application::new(&self.name);
        if let Some(id) = id.or(self.id).filter(|id| !id.is_empty()) {
            application.id = id;
        }
        application.description = self.description;
        application.base_url = self.base_url;
        application.is_active = self.is_active;
        application.database_identifier = self.database_identifier;
        if let Some(field) = self.user_id_field_name.filter(|f| !f.is_empty()) {
            application.user_id_field_name = field;
        }
        Ok(application)
    }
}

/// An application as listed: everything but the key.
#[derive(Serialize)]
pub struct ApplicationView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub base_url: Option<String>,
    pub is_active: bool,
    pub database_identifier: Option<String>,
    pub user_id_field_name: String,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Application> for ApplicationView {
    fn from(a: Application) -> Self {
        Self {
            id: a.id,
            name: a.name,
            description: a.description,
            base_url: a.base_url,
            is_active: a.is_active,
            database_identifier: a.database_identifier,
            user_id_field_name: a.user_id_field_name,
            registered_at: a.registered_at,
            updated_at: a.updated_at,
        }
    }
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub skip: Option<usize>,
    pub take: Option<usize>,
}

impl PageQuery {
    pub fn bounds(&self) -> (usize, usize) {
        (self.skip.unwrap_or(0), self.take.unwrap_or(100).min(1000))
    }
}

#[derive(Serialize)]
struct ApiKeyResponse {
    application_id: String,
    api_key: String,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/applications",
            get(list_applications).post(register_application),
        )
        .route(
            "/api/applications/:app",
            get(get_application)
                .put(update_application)
                .delete(delete_application),
        )
        .route(
            "/api/applications/:app/regenerate-api-key",
            post(regenerate_api_key),
        )
}

async fn list_applications(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<ApplicationView>>, AppError> {
    require_token(&state, &headers)?;

    let (skip, take) = page.bounds();
    let applications = state.applications.list(skip, take).await?;
    Ok(Json(applications.into_iter().map(ApplicationView::from).collect()))
}

async fn get_application(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
) -> Result<Json<ApplicationView>, AppError> {
    require_token(&state, &headers)?;

    let application = state
        .applications
        .get_by_id(&app)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("application '{}' not found", app)))?;
    Ok(Json(application.into()))
}

/// Registration is the one response that carries the API key.
async fn register_application(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ApplicationRequest>,
) -> Result<(StatusCode, Json<Application>), AppError> {
    require_token(&state, &headers)?;

    let application = body.into_application(None)?;
    let created = state.applications.create(&application).await?;
    info!(application_id = %created.id, name = %created.name, "registered application");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_application(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
    Json(body): Json<ApplicationRequest>,
) -> Result<Json<ApplicationView>, AppError> {
    require_token(&state, &headers)?;

    let application = body.into_application(Some(app))?;
    let updated = state.applications.update(&application).await?;
    info!(application_id = %updated.id, "updated application");
    Ok(Json(updated.into()))
}

async fn delete_application(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_token(&state, &headers)?;

    if !state.applications.delete(&app).await? {
        return Err(AppError::NotFound(format!("application '{}' not found", app)));
    }
    info!(application_id = %app, "deleted application");
    Ok(Json(serde_json::json!({
        "ok": true,
        "message": format!("application {} deleted", app),
    })))
}

async fn regenerate_api_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    require_token(&state, &headers)?;

    let api_key = state.applications.regenerate_api_key(&app).await?;
    Ok(Json(ApiKeyResponse {
        application_id: app,
        api_key,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::test_support::{app, memory_stores, send, send_with, state_for};

    #[tokio::test]
    async fn test_register_list_update_delete() {
        let app = app(&memory_stores());

        let (status, created) = send(
            &app,
            "POST",
            "/api/applications",
            Some(json!({ "id": "crm", "name": "CRM", "base_url": "https://crm.local" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["id"], "crm");
        assert_eq!(created["user_id_field_name"], "UserId");
        let key = created["api_key"].as_str().unwrap().to_string();
        assert_eq!(key.len(), 43);

        let (status, _) = send(
            &app,
            "POST",
            "/api/applications",
            Some(json!({ "id": "crm", "name": "CRM again" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, listed) = send(&app, "GET", "/api/applications", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert!(listed[0].get("api_key").is_none());

        let (status, updated) = send(
            &app,
            "PUT",
            "/api/applications/crm",
            Some(json!({ "name": "CRM", "description": "customer records", "is_active": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["is_active"], false);
        assert_eq!(updated["description"], "customer records");

        let (status, _) = send(&app, "DELETE", "/api/applications/crm", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/api/applications/crm", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_blank_name_is_rejected() {
        let app = app(&memory_stores());
        let (status, body) = send(
            &app,
            "POST",
            "/api/applications",
            Some(json!({ "name": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("name"));
    }

    #[tokio::test]
    async fn test_regenerated_key_replaces_old_one() {
        let stores = memory_stores();
        let app = crate::router(Arc::new(state_for(&stores, Some("s3cret"))));
        let admin = [("authorization", "Bearer s3cret")];

        let (status, created) = send_with(
            &app,
            "POST",
            "/api/applications",
            Some(json!({ "id": "crm", "name": "CRM" })),
            &admin,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let old_key = created["api_key"].as_str().unwrap().to_string();

        let (status, issued) = send_with(
            &app,
            "POST",
            "/api/applications/crm/regenerate-api-key",
            None,
            &admin,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let new_key = issued["api_key"].as_str().unwrap().to_string();
        assert_ne!(new_key, old_key);

        let lookup = "/api/applications/crm/mappings/legacy/L1";
        let (status, _) = send_with(&app, "GET", lookup, None, &[("x-api-key", old_key.as_str())]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        // Authorized, but nothing is mapped yet.
        let (status, _) = send_with(&app, "GET", lookup, None, &[("x-api-key", new_key.as_str())]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Keys never open the administrative routes.
        let (status, _) = send_with(&app, "GET", "/api/applications", None, &[("x-api-key", new_key.as_str())]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send_with(
            &app,
            "POST",
            "/api/applications/erp/regenerate-api-key",
            None,
            &admin,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
