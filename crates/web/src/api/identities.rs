//! Centralized identity endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use idbridge_core::models::UserIdentity;
use idbridge_core::store::IdentityStore;

use crate::api::auth::{require_app_access, require_token};
use crate::api::status::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ListIdentitiesQuery {
    pub skip: Option<usize>,
    pub take: Option<usize>,
    /// Exact lookup instead of a page; yields zero or one identity.
    pub email: Option<String>,
}

/// Body for creating or replacing an identity. On replace, omitted
/// `legacy_user_ids` and `claims` keep their stored values.
#[derive(Deserialize)]
pub struct IdentityRequest {
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub mobile_number: Option<String>,
    #[serde(default)]
    pub mobile_verified: bool,
    #[serde(default)]
    pub legacy_user_ids: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub claims: Option<BTreeMap<String, String>>,
}

impl IdentityRequest {
    fn apply_to(self, identity: &mut UserIdentity) -> Result<(), AppError> {
        if self.display_name.trim().is_empty() {
            return Err(AppError::BadRequest("display_name is required".into()));
        }
        identity.display_name = self.display_name;
        identity.email = self.email.filter(|e| !e.is_empty());
        identity.email_verified = self.email_verified;
        identity.mobile_number = self.mobile_number.filter(|m| !m.is_empty());
        identity.mobile_verified = self.mobile_verified;
        if let Some(ids) = self.legacy_user_ids {
            identity.legacy_user_ids = ids;
        }
        if let Some(claims) = self.claims {
            identity.claims = claims;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct LegacyUserIdRequest {
    pub application_id: String,
    pub legacy_user_id: String,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/identities", get(list_identities).post(create_identity))
        .route(
            "/api/identities/:id",
            get(get_identity).put(update_identity).delete(delete_identity),
        )
        .route("/api/identities/:id/legacy-user-ids", post(add_legacy_user_id))
        .route(
            "/api/applications/:app/legacy-users/:legacy_id/identity",
            get(identity_by_legacy_user_id),
        )
}

async fn list_identities(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListIdentitiesQuery>,
) -> Result<Json<Vec<UserIdentity>>, AppError> {
    require_token(&state, &headers)?;

    if let Some(email) = query.email.as_deref() {
        let found = state.identities.get_by_email(email).await?;
        return Ok(Json(found.into_iter().collect()));
    }

    let skip = query.skip.unwrap_or(0);
    let take = query.take.unwrap_or(100).min(1000);
    Ok(Json(state.identities.list(skip, take).await?))
}

/// An email address already held by another identity is a conflict.
async fn create_identity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IdentityRequest>,
) -> Result<(StatusCode, Json<UserIdentity>), AppError> {
    require_token(&state, &headers)?;

    let mut identity = UserIdentity::new("");
    body.apply_to(&mut identity)?;
    if let Some(email) = identity.email.as_deref() {
        if state.identities.get_by_email(email).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "an identity with email '{}' already exists",
                email
            )));
        }
    }

    let created = state.identities.create(&identity).await?;
    info!(identity_id = %created.id, "created identity");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_identity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<UserIdentity>, AppError> {
    require_token(&state, &headers)?;

    let identity = state
        .identities
        .get_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("identity '{}' not found", id)))?;
    Ok(Json(identity))
}

async fn update_identity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<IdentityRequest>,
) -> Result<Json<UserIdentity>, AppError> {
    require_token(&state, &headers)?;

    let mut identity = state
        .identities
        .get_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("identity '{}' not found", id)))?;
    body.apply_to(&mut identity)?;

    let updated = state.identities.update(&identity).await?;
    info!(identity_id = %updated.id, "updated identity");
    Ok(Json(updated))
}

async fn delete_identity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_token(&state, &headers)?;

    if !state.identities.delete(&id).await? {
        return Err(AppError::NotFound(format!("identity '{}' not found", id)));
    }
    info!(identity_id = %id, "deleted identity");
    Ok(Json(serde_json::json!({
        "ok": true,
        "message": format!("identity {} deleted", id),
    })))
}

async fn add_legacy_user_id(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<LegacyUserIdRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_token(&state, &headers)?;

    if body.application_id.is_empty() || body.legacy_user_id.is_empty() {
        return Err(AppError::BadRequest(
            "application_id and legacy_user_id are required".into(),
        ));
    }
    if !state
        .identities
        .add_legacy_user_id(&id, &body.application_id, &body.legacy_user_id)
        .await?
    {
        return Err(AppError::NotFound(format!("identity '{}' not found", id)));
    }
    info!(
        identity_id = %id,
        application_id = %body.application_id,
        "recorded legacy user id"
    );
    Ok(Json(serde_json::json!({
        "ok": true,
        "message": format!(
            "identity {} is '{}' in {}",
            id, body.legacy_user_id, body.application_id
        ),
    })))
}

/// Looks through the identities' own legacy ID records, not the mapping
/// table.
async fn identity_by_legacy_user_id(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((app, legacy_id)): Path<(String, String)>,
) -> Result<Json<UserIdentity>, AppError> {
    require_app_access(&state, &headers, &app).await?;

    let identity = state
        .identities
        .find_by_legacy_user_id(&app, &legacy_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "no identity records legacy user '{}' in '{}'",
                legacy_id, app
            ))
        })?;
    Ok(Json(identity))
}
