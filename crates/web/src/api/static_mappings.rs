//! Static role and claim mapping endpoints.
//!
//! Maintenance routes need the bearer token; `translate` and `transform`
//! also accept the application's own API key.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use idbridge_core::models::{
    Claim, ClaimMapping, ClaimTransformation, MappingDirection, RoleMapping,
};

use crate::api::applications::PageQuery;
use crate::api::auth::{require_app_access, require_token};
use crate::api::status::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RoleMappingRequest {
    pub legacy_role_name: String,
    pub centralized_role_name: String,
    #[serde(default)]
    pub description: String,
}

impl RoleMappingRequest {
    fn check(&self) -> Result<(), AppError> {
        if self.legacy_role_name.trim().is_empty() || self.centralized_role_name.trim().is_empty() {
            return Err(AppError::BadRequest(
                "legacy_role_name and centralized_role_name are required".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct ClaimMappingRequest {
    pub legacy_claim_type: String,
    pub centralized_claim_type: String,
    #[serde(default)]
    pub transformation_expression: Option<String>,
    #[serde(default = "default_true")]
    pub include_in_centralized: bool,
    #[serde(default = "default_true")]
    pub include_in_legacy: bool,
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

impl ClaimMappingRequest {
    fn check(&self) -> Result<(), AppError> {
        if self.legacy_claim_type.trim().is_empty() || self.centralized_claim_type.trim().is_empty() {
            return Err(AppError::BadRequest(
                "legacy_claim_type and centralized_claim_type are required".into(),
            ));
        }
        Ok(())
    }

    fn apply_to(self, mapping: &mut ClaimMapping) {
        mapping.legacy_claim_type = self.legacy_claim_type;
        mapping.centralized_claim_type = self.centralized_claim_type;
        mapping.transformation_expression = self.transformation_expression.filter(|e| !e.is_empty());
        mapping.include_in_centralized = self.include_in_centralized;
        mapping.include_in_legacy = self.include_in_legacy;
        mapping.description = self.description;
    }
}

#[derive(Deserialize)]
pub struct TranslateRoleQuery {
    pub role: String,
    pub direction: MappingDirection,
}

#[derive(Serialize)]
struct TranslateRoleResponse {
    application_id: String,
    role: String,
    direction: MappingDirection,
    translated_role: String,
}

#[derive(Deserialize)]
pub struct StaticTransformRequest {
    pub claims: Vec<Claim>,
    pub direction: MappingDirection,
}

#[derive(Serialize)]
struct StaticTransformResponse {
    claims: Vec<ClaimTransformation>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/applications/:app/role-mappings",
            get(list_role_mappings).post(create_role_mapping),
        )
        .route(
            "/api/applications/:app/role-mappings/translate",
            get(translate_role),
        )
        .route("/api/role-mappings", get(all_role_mappings))
        .route(
            "/api/role-mappings/:id",
            get(get_role_mapping)
                .put(update_role_mapping)
                .delete(delete_role_mapping),
        )
        .route(
            "/api/applications/:app/claim-mappings",
            get(list_claim_mappings).post(create_claim_mapping),
        )
        .route(
            "/api/applications/:app/claim-mappings/transform",
            post(transform_claims),
        )
        .route("/api/claim-mappings", get(all_claim_mappings))
        .route(
            "/api/claim-mappings/:id",
            get(get_claim_mapping)
                .put(update_claim_mapping)
                .delete(delete_claim_mapping),
        )
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

async fn translate_role(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
    Query(query): Query<TranslateRoleQuery>,
) -> Result<Json<TranslateRoleResponse>, AppError> {
    require_app_access(&state, &headers, &app).await?;

    let translated = state
        .static_mappings
        .translate_role(&app, &query.role, query.direction)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("role '{}' is not mapped in '{}'", query.role, app))
        })?;

    Ok(Json(TranslateRoleResponse {
        application_id: app,
        role: query.role,
        direction: query.direction,
        translated_role: translated,
    }))
}

async fn list_role_mappings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
) -> Result<Json<Vec<RoleMapping>>, AppError> {
    require_token(&state, &headers)?;
    Ok(Json(state.static_mappings.role_mappings_for(&app).await?))
}

async fn all_role_mappings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<RoleMapping>>, AppError> {
    require_token(&state, &headers)?;

    let (skip, take) = page.bounds();
    Ok(Json(state.static_mappings.all_role_mappings(skip, take).await?))
}

async fn create_role_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
    Json(body): Json<RoleMappingRequest>,
) -> Result<(StatusCode, Json<RoleMapping>), AppError> {
    require_token(&state, &headers)?;
    body.check()?;

    let mut mapping = RoleMapping::new(&app, &body.legacy_role_name, &body.centralized_role_name);
    mapping.description = body.description;
    let created = state.static_mappings.create_role_mapping(&mapping).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_role_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RoleMapping>, AppError> {
    require_token(&state, &headers)?;

    let mapping = state
        .static_mappings
        .role_mapping(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("role mapping '{}' not found", id)))?;
    Ok(Json(mapping))
}

/// The owning application cannot change.
async fn update_role_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RoleMappingRequest>,
) -> Result<Json<RoleMapping>, AppError> {
    require_token(&state, &headers)?;
    body.check()?;

    let mut mapping = state
        .static_mappings
        .role_mapping(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("role mapping '{}' not found", id)))?;
    mapping.legacy_role_name = body.legacy_role_name;
    mapping.centralized_role_name = body.centralized_role_name;
    mapping.description = body.description;

    Ok(Json(state.static_mappings.update_role_mapping(&mapping).await?))
}

async fn delete_role_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_token(&state, &headers)?;

    if !state.static_mappings.delete_role_mapping(&id).await? {
        return Err(AppError::NotFound(format!("role mapping '{}' not found", id)));
    }
    Ok(Json(serde_json::json!({
        "ok": true,
        "message": format!("role mapping {} deleted", id),
    })))
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

async fn transform_claims(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
    Json(body): Json<StaticTransformRequest>,
) -> Result<Json<StaticTransformResponse>, AppError> {
    require_app_access(&state, &headers, &app).await?;

    let claims = state
        .static_mappings
        .transform_claims(&app, &body.claims, body.direction)
        .await?;
    Ok(Json(StaticTransformResponse { claims }))
}

async fn list_claim_mappings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
) -> Result<Json<Vec<ClaimMapping>>, AppError> {
    require_token(&state, &headers)?;
    Ok(Json(state.static_mappings.claim_mappings_for(&app).await?))
}

async fn all_claim_mappings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<ClaimMapping>>, AppError> {
    require_token(&state, &headers)?;

    let (skip, take) = page.bounds();
    Ok(Json(state.static_mappings.all_claim_mappings(skip, take).await?))
}

async fn create_claim_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
    Json(body): Json<ClaimMappingRequest>,
) -> Result<(StatusCode, Json<ClaimMapping>), AppError> {
    require_token(&state, &headers)?;
    body.check()?;

    let mut mapping = ClaimMapping::new(&app, "", "");
    body.apply_to(&mut mapping);
    let created = state.static_mappings.create_claim_mapping(&mapping).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_claim_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ClaimMapping>, AppError> {
    require_token(&state, &headers)?;

    let mapping = state
        .static_mappings
        .claim_mapping(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("claim mapping '{}' not found", id)))?;
    Ok(Json(mapping))
}

async fn update_claim_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ClaimMappingRequest>,
) -> Result<Json<ClaimMapping>, AppError> {
    require_token(&state, &headers)?;
    body.check()?;

    let mut mapping = state
        .static_mappings
        .claim_mapping(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("claim mapping '{}' not found", id)))?;
    body.apply_to(&mut mapping);

    Ok(Json(state.static_mappings.update_claim_mapping(&mapping).await?))
}

async fn delete_claim_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_token(&state, &headers)?;

    if !state.static_mappings.delete_claim_mapping(&id).await? {
        return Err(AppError::NotFound(format!("claim mapping '{}' not found", id)));
    }
    Ok(Json(serde_json::json!({
        "ok": true,
        "message": format!("claim mapping {} deleted", id),
    })))
}
