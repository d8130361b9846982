/*
 * Responsibility
 * - Operational endpoints under /actuator: health, info, trust summary
 * - Public: the default route policy lets these through without a credential,
 *   so nothing here may expose key material or per-request detail
 */
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde_json::json;

use crate::services::auth::trust::TrustSummary;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/trust", get(trust))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "UP"})))
}

pub async fn info() -> impl IntoResponse {
    Json(json!({
        "app": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn trust(State(state): State<AppState>) -> Json<TrustSummary> {
    Json(state.trust.current().summary())
}
