//! Mapping rule administration endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use idbridge_core::errors::RulesFileError;
use idbridge_core::models::{MappingDirection, MappingRule, RuleType};
use idbridge_core::rules_file::RuleEntry;
use idbridge_core::store::RuleStore;

use crate::api::auth::require_token;
use crate::api::status::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Body for creating or replacing a rule. Field names follow the rules file.
#[derive(Deserialize)]
pub struct RuleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rule_type: RuleType,
    pub source: String,
    #[serde(default)]
    pub target: String,
    pub direction: MappingDirection,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl RuleRequest {
    fn into_rule(self, id: Option<String>, application_id: String) -> Result<MappingRule, AppError> {
        RuleEntry {
            id,
            application_id,
            name: self.name,
            description: self.description,
            rule_type: self.rule_type,
            source: self.source,
            target: self.target,
            direction: self.direction,
            priority: self.priority,
            condition: self.condition,
            transform: self.transform,
            enabled: self.enabled,
        }
        .into_rule(0)
        .map_err(|e| match e {
            RulesFileError::InvalidRule { detail, .. } => AppError::BadRequest(detail),
            other => AppError::BadRequest(other.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/applications/:app/rules",
            get(list_rules).post(create_rule),
        )
        .route("/api/rules/:id", put(update_rule).delete(delete_rule).get(get_rule))
}

async fn list_rules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
) -> Result<Json<Vec<MappingRule>>, AppError> {
    require_token(&state, &headers)?;
    Ok(Json(state.rules.get_by_application(&app).await?))
}

async fn get_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MappingRule>, AppError> {
    require_token(&state, &headers)?;
    let rule = state
        .rules
        .get_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("rule '{}' not found", id)))?;
    Ok(Json(rule))
}

async fn create_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
    Json(body): Json<RuleRequest>,
) -> Result<(StatusCode, Json<MappingRule>), AppError> {
    require_token(&state, &headers)?;

    let rule = body.into_rule(None, app)?;
    let created = state.rules.create(&rule).await?;
    info!(rule_id = %created.id, application_id = %created.application_id, "rule created via API");

    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RuleRequest>,
) -> Result<Json<MappingRule>, AppError> {
    require_token(&state, &headers)?;

    let existing = state
        .rules
        .get_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("rule '{}' not found", id)))?;

    let rule = body.into_rule(Some(id), existing.application_id)?;
    let updated = state.rules.update(&rule).await?;
    info!(rule_id = %updated.id, "rule updated via API");

    Ok(Json(updated))
}

async fn delete_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_token(&state, &headers)?;

    if !state.rules.delete(&id).await? {
        return Err(AppError::NotFound(format!("rule '{}' not found", id)));
    }
    info!(rule_id = %id, "rule deleted via API");

    Ok(Json(serde_json::json!({
        "ok": true,
        "message": format!("rule {} deleted", id),
    })))
}
