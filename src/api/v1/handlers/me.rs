/*
 * Responsibility
 * - GET /api/v1/me: echo the authenticated subject
 * - Smallest handler that proves the gate hands AuthCtx downstream
 */
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::v1::extractors::AuthCtxExtractor;

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub subject: String,
    pub issuer: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

pub async fn me(AuthCtxExtractor(ctx): AuthCtxExtractor) -> Json<MeResponse> {
    Json(MeResponse {
        subject: ctx.subject,
        issuer: ctx.issuer,
        scopes: ctx.scopes,
        expires_at: ctx.expires_at,
    })
}
