//! Per-request gate.
//!
//! ```text
//! Start ─ classify ─┬─ PublicAllow ───────────────────────────────▶ Allowed
//!                   └─ RequireAuthenticated ─ bearer? ─┬─ no ─────▶ Rejected(MissingCredential)
//!                                                      └─ verify ─┬ Valid ─▶ Allowed(principal)
//!                                                                 └ Invalid ▶ Rejected(reason)
//! ```
//!
//! The gate holds no per-request state and is shared by every worker.

use std::sync::Arc;

use axum::http::{HeaderMap, header};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::services::auth::route_policy::{AccessPolicy, RoutePolicy};
use crate::services::auth::verifier::{
    CredentialVerifier, VerificationFailure, VerificationResult, VerifiedPrincipal,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("no bearer credential presented")]
    MissingCredential,
    #[error(transparent)]
    Verification(#[from] VerificationFailure),
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::Verification(failure) => failure.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    // `None` for public routes: credentials there are not even looked at.
    Allowed(Option<VerifiedPrincipal>),
    Rejected(RejectReason),
}

#[derive(Debug)]
pub struct Gate {
    routes: RoutePolicy,
    verifier: Arc<CredentialVerifier>,
}

impl Gate {
    pub fn new(routes: RoutePolicy, verifier: Arc<CredentialVerifier>) -> Self {
        Self { routes, verifier }
    }

    pub fn evaluate(&self, path: &str, headers: &HeaderMap) -> GateDecision {
        if self.routes.classify(path) == AccessPolicy::PublicAllow {
            tracing::debug!(path, "public route");
            return GateDecision::Allowed(None);
        }

        let token = match bearer_token(headers) {
            Ok(token) => token,
            Err(reason) => {
                tracing::warn!(path, reason = reason.code(), "request rejected");
                return GateDecision::Rejected(reason);
            }
        };

        match self.verifier.verify(token) {
            VerificationResult::Valid(principal) => {
                tracing::debug!(
                    path,
                    sub = %principal.subject,
                    kid = %principal.key_id,
                    "request authenticated"
                );
                GateDecision::Allowed(Some(principal))
            }
            VerificationResult::Invalid(failure) => {
                tracing::warn!(
                    path,
                    reason = failure.code(),
                    token_fp = %token_fingerprint(token),
                    "request rejected"
                );
                GateDecision::Rejected(failure.into())
            }
        }
    }
}

/// `Authorization: Bearer <token>` (scheme is case-insensitive).
///
/// Another scheme (e.g. `Basic`) counts as no bearer credential at all.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, RejectReason> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err(RejectReason::MissingCredential);
    };
    let value = value
        .to_str()
        .map_err(|_| RejectReason::Verification(VerificationFailure::MalformedToken))?;

    let (scheme, rest) = value.split_once(' ').unwrap_or((value, ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(RejectReason::MissingCredential);
    }

    let token = rest.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(RejectReason::Verification(VerificationFailure::MalformedToken));
    }
    Ok(token)
}

/// Short, non-reversible token id for correlating log lines.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut fp = URL_SAFE_NO_PAD.encode(digest);
    fp.truncate(12);
    fp
}
