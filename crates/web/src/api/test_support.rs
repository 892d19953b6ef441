//! Shared fixtures for the handler tests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use idbridge_core::config::FallbackConfig;
use idbridge_core::fallback::build_manager;
use idbridge_core::service::MappingService;
use idbridge_core::store::{MemoryStore, Stores};

use crate::AppState;

pub(crate) fn memory_stores() -> Stores {
    Stores::from_shared(Arc::new(MemoryStore::new()))
}

pub(crate) fn state_for(stores: &Stores, token: Option<&str>) -> AppState {
    let manager = build_manager(&FallbackConfig::default(), stores);
    let service = MappingService::new(stores, Arc::new(manager));
    AppState::new(stores, service, token.map(str::to_string))
}

pub(crate) fn state_with_token(token: Option<&str>) -> AppState {
    state_for(&memory_stores(), token)
}

pub(crate) fn app(stores: &Stores) -> Router {
    crate::router(Arc::new(state_for(stores, None)))
}

/// Send a request and decode the JSON body (`Null` when empty).
pub(crate) async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    send_with(app, method, uri, body, &[]).await
}

/// [`send`] with extra request headers.
pub(crate) async fn send_with(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
