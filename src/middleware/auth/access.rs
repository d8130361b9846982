//! Gate middleware: classify → (verify bearer) → AuthCtx into extensions, or 401.
//!
//! The decision itself lives in `services::auth::gate`; this layer only adapts
//! it to axum. On rejection the downstream handler is never called.

use axum::{
    Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
};

use crate::api::v1::extractors::AuthCtx;
use crate::error::AppError;
use crate::services::auth::GateDecision;
use crate::state::AppState;

/// Put the gate in front of every route (and the fallback) of `router`.
///
/// Apply it to the top-level router, before nesting is flattened away, so the
/// middleware sees the full request path:
/// ```ignore
/// let app = Router::new()
///     .nest("/actuator", api::actuator::routes())
///     .nest("/api/v1", api::v1::routes())
///     .fallback(fallback);
/// let app = middleware::auth::access::apply(app, state.clone());
/// ```
pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    // axum 0.8 の from_fn は State extractor を受け取れないため、`from_fn_with_state` で明示的に state を渡す
    router.layer(middleware::from_fn_with_state(state, access_middleware))
}

async fn access_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    match state.gate.evaluate(req.uri().path(), req.headers()) {
        GateDecision::Allowed(Some(principal)) => {
            // middleware → extractor への受け渡し
            req.extensions_mut().insert(AuthCtx::from(principal));
        }
        GateDecision::Allowed(None) => {}
        // Reason already logged by the gate; the client gets a bare 401.
        GateDecision::Rejected(_) => return Err(AppError::Unauthorized),
    }

    Ok(next.run(req).await)
}
