//! Endpoint handlers and router assembly.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::warn;

use super::middleware::{gated, ApiMessage, Gate};
use crate::store::CounterStore;

/// Build the service router.
///
/// `/fixed` is gated by `fixed`, `/window` by `window`, and `/health` reports
/// whether `store` answers.
pub fn router(fixed: Gate, window: Gate, store: Arc<dyn CounterStore>) -> Router {
    Router::new()
        .route("/fixed", gated(get(fixed_endpoint), fixed))
        .route("/window", gated(get(window_endpoint), window))
        .route("/health", get(health))
        .with_state(store)
}

async fn fixed_endpoint() -> Json<ApiMessage> {
    Json(ApiMessage::new("Fixed API endpoint"))
}

async fn window_endpoint() -> Json<ApiMessage> {
    Json(ApiMessage::new("Window API endpoint"))
}

async fn health(State(store): State<Arc<dyn CounterStore>>) -> (StatusCode, Json<Value>) {
    match store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            warn!(error = %e, "Health check could not reach the counter store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
