//! Direct fallback execution endpoint.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};

use idbridge_core::fallback::{FallbackContext, FallbackResult};

use crate::api::auth::require_app_access;
use crate::api::status::AppError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/applications/:app/fallback", post(run_fallback))
}

/// Run the strategy chain for the posted context. A failed chain is still a
/// `200` with `success: false`; the message says why.
async fn run_fallback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(app): Path<String>,
    Json(ctx): Json<FallbackContext>,
) -> Result<Json<FallbackResult>, AppError> {
    require_app_access(&state, &headers, &app).await?;

    if !state.service.fallback_enabled() {
        return Ok(Json(FallbackResult::failure("Fallback is disabled")));
    }
    Ok(Json(state.service.try_fallback(&app, &ctx).await))
}
