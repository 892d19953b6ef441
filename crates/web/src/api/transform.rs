//! Claim and role transformation endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use idbridge_core::models::{Claim, MappingDirection};
use idbridge_core::rules::{RuleContext, UnmappedPolicy};

use crate::api::auth::require_app_access;
use crate::api::status::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct TransformClaimsRequest {
    pub claims: Vec<Claim>,
    pub direction: MappingDirection,
    #[serde(default)]
    pub unmapped: UnmappedPolicy,
    /// Extra values conditions and transforms can refer to by name.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct TransformClaimsResponse {
    claims: Vec<Claim>,
}

#[derive(Deserialize)]
pub struct TransformRolesRequest {
    pub roles: Vec<String>,
    pub direction: MappingDirection,
    #[serde(default)]
    pub unmapped: UnmappedPolicy,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct TransformRolesResponse {
    roles: Vec<String>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/applications/:app/claims/transform",
            post(transform_claims),
        )
        .route(
            "/api/applications/:app/roles/transform",
            post(transform_roles),
        )
}

fn context_from(values: BTreeMap<String, String>) -> RuleContext {
    let mut ctx = RuleContext::new();
    for (key, value) in values {
        ctx.insert(&key, value);
    }
    ctx
}

async fn transform_claims(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
    Json(body): Json<TransformClaimsRequest>,
) -> Result<Json<TransformClaimsResponse>, AppError> {
    require_app_access(&state, &headers, &app).await?;

    let mut ctx = context_from(body.context);
    let claims = state
        .engine
        .transform_claims(&app, &body.claims, body.direction, body.unmapped, &mut ctx)
        .await;

    Ok(Json(TransformClaimsResponse { claims }))
}

async fn transform_roles(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
    Json(body): Json<TransformRolesRequest>,
) -> Result<Json<TransformRolesResponse>, AppError> {
    require_app_access(&state, &headers, &app).await?;

    let mut ctx = context_from(body.context);
    let roles = state
        .engine
        .transform_roles(&app, &body.roles, body.direction, body.unmapped, &mut ctx)
        .await;

    Ok(Json(TransformRolesResponse { roles }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use idbridge_core::models::{MappingDirection, MappingRule, RuleType};
    use idbridge_core::store::RuleStore;

    use crate::api::test_support::{app, memory_stores, send};

    #[tokio::test]
    async fn test_transform_claims_applies_rules() {
        let stores = memory_stores();
        stores
            .rules
            .create(
                &MappingRule::new(
                    "crm",
                    "mail",
                    RuleType::Claim,
                    "mail",
                    "email",
                    MappingDirection::LegacyToCentralized,
                    1,
                )
                .with_transform("lowercase"),
            )
            .await
            .unwrap();
        let app = app(&stores);

        let (status, body) = send(
            &app,
            "POST",
            "/api/applications/crm/claims/transform",
            Some(json!({
                "claims": [
                    { "type": "mail", "value": "Ann@Example.COM" },
                    { "type": "dept", "value": "ops" }
                ],
                "direction": "legacy_to_centralized",
                "unmapped": "pass_through"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["claims"],
            json!([
                { "type": "email", "value": "ann@example.com" },
                { "type": "dept", "value": "ops" }
            ])
        );
    }

    #[tokio::test]
    async fn test_transform_roles_drops_unmapped_by_default() {
        let stores = memory_stores();
        stores
            .rules
            .create(&MappingRule::new(
                "crm",
                "admins",
                RuleType::Role,
                "Administrators",
                "admin",
                MappingDirection::Bidirectional,
                1,
            ))
            .await
            .unwrap();
        let app = app(&stores);

        let (status, body) = send(
            &app,
            "POST",
            "/api/applications/crm/roles/transform",
            Some(json!({
                "roles": ["Administrators", "Guests"],
                "direction": "centralized_to_legacy"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["roles"], json!(["admin"]));
    }

    #[tokio::test]
    async fn test_bad_direction_is_rejected() {
        let app = app(&memory_stores());
        let (status, _) = send(
            &app,
            "POST",
            "/api/applications/crm/roles/transform",
            Some(json!({ "roles": [], "direction": "sideways" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
