/*
 * Responsibility
 * - The "authenticated context" type handlers see
 * - The gate middleware verifies the bearer token and stores this in request extensions;
 *   handlers only ever receive this type
 *
 * Notes
 * - JWT / trust-material logic stays in services::auth
 * - Keep this type as the contract between middleware and handlers
 */
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::services::auth::VerifiedPrincipal;

/// Context attached to an authenticated request.
///
/// - `subject` is the token's `sub` as issued by the identity provider
/// - `scopes` come from `scope` / `scp` (coarse-grained; fine-grained checks belong to handlers)
/// - `claims` keeps the full verified claim set for downstream use
#[derive(Debug, Clone)]
pub struct AuthCtx {
    pub subject: String,
    pub issuer: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub claims: Map<String, Value>,
}

impl From<VerifiedPrincipal> for AuthCtx {
    fn from(principal: VerifiedPrincipal) -> Self {
        Self {
            subject: principal.subject,
            issuer: principal.issuer,
            scopes: principal.scopes,
            expires_at: principal.expires_at,
            claims: principal.claims,
        }
    }
}
