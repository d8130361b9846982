/*
 * Responsibility
 * - URL layout of v1
 * - Every v1 route sits behind the gate (applied once at the top-level router in app.rs)
 */
use axum::{Router, routing::get};

use crate::api::v1::handlers::me::me;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/me", get(me))
}
