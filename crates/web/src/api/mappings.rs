//! User ID mapping endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use idbridge_core::fallback::FallbackContext;
use idbridge_core::models::UserIdMapping;

use crate::api::auth::{require_app_access, require_token};
use crate::api::status::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Query string for the lookup endpoints. The contact fields only matter
/// when `fallback=true`.
#[derive(Deserialize, Default)]
pub struct LookupQuery {
    #[serde(default)]
    pub fallback: bool,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub display_name: Option<String>,
}

impl LookupQuery {
    fn context(&self) -> Option<FallbackContext> {
        if self.email.is_none() && self.mobile.is_none() && self.display_name.is_none() {
            return None;
        }
        Some(FallbackContext {
            user_email: self.email.clone(),
            user_mobile_number: self.mobile.clone(),
            user_display_name: self.display_name.clone(),
            ..FallbackContext::default()
        })
    }
}

#[derive(Serialize)]
struct LookupResponse {
    application_id: String,
    legacy_user_id: String,
    centralized_identity_id: String,
}

#[derive(Deserialize)]
pub struct ListMappingsQuery {
    pub skip: Option<usize>,
    pub take: Option<usize>,
}

#[derive(Deserialize)]
pub struct CreateMappingRequest {
    pub legacy_user_id: String,
    pub centralized_identity_id: String,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/applications/:app/mappings",
            get(list_mappings).post(create_mapping),
        )
        .route(
            "/api/applications/:app/mappings/legacy/:legacy_id",
            get(lookup_by_legacy_id),
        )
        .route(
            "/api/applications/:app/mappings/identity/:identity_id",
            get(lookup_by_identity_id),
        )
        .route("/api/mappings/:id", get(get_mapping).delete(delete_mapping))
        .route("/api/mappings/:id/validate", post(validate_mapping))
}

async fn lookup_by_legacy_id(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((app, legacy_id)): Path<(String, String)>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<LookupResponse>, AppError> {
    require_app_access(&state, &headers, &app).await?;

    let identity_id = state
        .service
        .centralized_identity_id(&app, &legacy_id, query.fallback, query.context())
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "no centralized identity for legacy user '{}' in '{}'",
                legacy_id, app
            ))
        })?;

    Ok(Json(LookupResponse {
        application_id: app,
        legacy_user_id: legacy_id,
        centralized_identity_id: identity_id,
    }))
}

async fn lookup_by_identity_id(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((app, identity_id)): Path<(String, String)>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<LookupResponse>, AppError> {
    require_app_access(&state, &headers, &app).await?;

    let legacy_id = state
        .service
        .legacy_user_id(&app, &identity_id, query.fallback, query.context())
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "no legacy user for identity '{}' in '{}'",
                identity_id, app
            ))
        })?;

    Ok(Json(LookupResponse {
        application_id: app,
        legacy_user_id: legacy_id,
        centralized_identity_id: identity_id,
    }))
}

async fn list_mappings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
    Query(query): Query<ListMappingsQuery>,
) -> Result<Json<Vec<UserIdMapping>>, AppError> {
    require_token(&state, &headers)?;

    let skip = query.skip.unwrap_or(0);
    let take = query.take.unwrap_or(100).min(1000);
    Ok(Json(
        state.service.mappings_for_application(&app, skip, take).await?,
    ))
}

async fn create_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
    Json(body): Json<CreateMappingRequest>,
) -> Result<(StatusCode, Json<UserIdMapping>), AppError> {
    require_token(&state, &headers)?;

    if body.legacy_user_id.is_empty() || body.centralized_identity_id.is_empty() {
        return Err(AppError::BadRequest(
            "legacy_user_id and centralized_identity_id are required".into(),
        ));
    }

    let mapping = state
        .service
        .create_mapping(&app, &body.legacy_user_id, &body.centralized_identity_id)
        .await?;
    Ok((StatusCode::CREATED, Json(mapping)))
}

async fn get_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<UserIdMapping>, AppError> {
    require_token(&state, &headers)?;

    let mapping = state
        .service
        .mapping(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("mapping '{}' not found", id)))?;
    Ok(Json(mapping))
}

async fn validate_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_token(&state, &headers)?;

    if !state.service.validate_mapping(&id).await? {
        return Err(AppError::NotFound(format!("mapping '{}' not found", id)));
    }
    Ok(Json(serde_json::json!({
        "ok": true,
        "message": format!("mapping {} validated", id),
    })))
}

async fn delete_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_token(&state, &headers)?;

    if !state.service.delete_mapping(&id).await? {
        return Err(AppError::NotFound(format!("mapping '{}' not found", id)));
    }
    Ok(Json(serde_json::json!({
        "ok": true,
        "message": format!("mapping {} deleted", id),
    })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use idbridge_core::models::UserIdentity;
    use idbridge_core::store::IdentityStore;

    use crate::api::test_support::{app, memory_stores, send, state_for};

    #[tokio::test]
    async fn test_create_lookup_validate_delete() {
        let stores = memory_stores();
        let identity = stores
            .identities
            .create(&UserIdentity::new("Ann").with_email("ann@example.com"))
            .await
            .unwrap();
        let app = app(&stores);

        let (status, created) = send(
            &app,
            "POST",
            "/api/applications/crm/mappings",
            Some(json!({ "legacy_user_id": "L1", "centralized_identity_id": identity.id })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["is_validated"], false);
        let mapping_id = created["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            "POST",
            "/api/applications/crm/mappings",
            Some(json!({ "legacy_user_id": "L1", "centralized_identity_id": identity.id })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, found) = send(&app, "GET", "/api/applications/crm/mappings/legacy/L1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["centralized_identity_id"], identity.id.as_str());

        let (status, found) = send(
            &app,
            "GET",
            &format!("/api/applications/crm/mappings/identity/{}", identity.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["legacy_user_id"], "L1");

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/mappings/{}/validate", mapping_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, fetched) = send(&app, "GET", &format!("/api/mappings/{}", mapping_id), None).await;
        assert_eq!(fetched["is_validated"], true);

        let (status, _) = send(&app, "DELETE", &format!("/api/mappings/{}", mapping_id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/api/applications/crm/mappings/legacy/L1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_for_unknown_identity_is_not_found() {
        let app = app(&memory_stores());
        let (status, _) = send(
            &app,
            "POST",
            "/api/applications/crm/mappings",
            Some(json!({ "legacy_user_id": "L1", "centralized_identity_id": "ghost" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_lookup_with_fallback_query() {
        let stores = memory_stores();
        let identity = stores
            .identities
            .create(&UserIdentity::new("Ann").with_email("ann@example.com"))
            .await
            .unwrap();
        let app = app(&stores);

        let (status, _) = send(
            &app,
            "GET",
            "/api/applications/crm/mappings/legacy/L2?email=ann@example.com",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, found) = send(
            &app,
            "GET",
            "/api/applications/crm/mappings/legacy/L2?fallback=true&email=ann@example.com",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["centralized_identity_id"], identity.id.as_str());

        let (_, listed) = send(&app, "GET", "/api/applications/crm/mappings?take=10", None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_token_required_when_configured() {
        let stores = memory_stores();
        let app = crate::router(Arc::new(state_for(&stores, Some("s3cret"))));

        let (status, _) = send(&app, "GET", "/api/applications/crm/mappings", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::builder()
            .uri("/api/applications/crm/mappings")
            .header("authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
