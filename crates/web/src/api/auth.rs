//! Bearer-token and per-application API key authentication.
//!
//! A single static token is configured through `web.api_token_env`. When no
//! token resolves, every route is open. Application-scoped routes also accept
//! the calling application's own key in an `X-Api-Key` header.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;
use tracing::debug;

use idbridge_core::store::ApplicationStore;

use crate::api::status::AppError;
use crate::AppState;

/// Header carrying a registered application's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Authorize a call on behalf of `application_id`.
///
/// A present `X-Api-Key` header must hold that application's key, and the
/// application must be active; the bearer token is not consulted then.
/// Without the header this is [`require_token`].
pub async fn require_app_access(
    state: &AppState,
    headers: &HeaderMap,
    application_id: &str,
) -> Result<(), AppError> {
    let Some(presented) = headers.get(API_KEY_HEADER) else {
        return require_token(state, headers);
    };
    let presented = presented
        .to_str()
        .map_err(|_| AppError::Unauthorized("invalid X-Api-Key header".into()))?;

    if state
        .applications
        .validate_api_key(application_id, presented)
        .await?
    {
        Ok(())
    } else {
        debug!(application_id, "rejected request with an invalid application API key");
        Err(AppError::Unauthorized(format!(
            "invalid API key for application '{}'",
            application_id
        )))
    }
}

/// Check the `Authorization: Bearer <token>` header against the configured
/// token.
///
/// Call this first in every handler that requires authentication.
pub fn require_token(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(());
    };

    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing or invalid Authorization header".into()))?;

    // ct_eq returns false for different lengths without an early exit.
    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        debug!("rejected request with an invalid API token");
        Err(AppError::Unauthorized("invalid API token".into()))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use idbridge_core::models::Application;

    use super::*;
    use crate::api::test_support::{memory_stores, state_for, state_with_token};

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_open_when_no_token_configured() {
        let state = state_with_token(None);
        assert!(require_token(&state, &HeaderMap::new()).is_ok());
    }

    fn api_key(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_app_key_checks() {
        let stores = memory_stores();
        let crm = stores
            .applications
            .create(&Application::new("CRM").with_id("crm"))
            .await
            .unwrap();
        let state = state_for(&stores, Some("s3cret"));

        assert!(require_app_access(&state, &api_key(&crm.api_key), "crm").await.is_ok());
        assert!(require_app_access(&state, &bearer("s3cret"), "crm").await.is_ok());
        assert!(matches!(
            require_app_access(&state, &HeaderMap::new(), "crm").await,
            Err(AppError::Unauthorized(_))
        ));
        // One application's key does not open another's routes.
        assert!(matches!(
            require_app_access(&state, &api_key(&crm.api_key), "erp").await,
            Err(AppError::Unauthorized(_))
        ));

        // A wrong key is rejected even where no bearer token is configured.
        let open = state_for(&stores, None);
        assert!(require_app_access(&open, &HeaderMap::new(), "crm").await.is_ok());
        assert!(matches!(
            require_app_access(&open, &api_key("guess"), "crm").await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_token_checks() {
        let state = state_with_token(Some("s3cret"));
        assert!(require_token(&state, &bearer("s3cret")).is_ok());
        assert!(matches!(
            require_token(&state, &bearer("s3cre")),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            require_token(&state, &HeaderMap::new()),
            Err(AppError::Unauthorized(_))
        ));
    }
}
