use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Header, Validation, errors::ErrorKind};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::services::auth::clock::{Clock, SystemClock};
use crate::services::auth::trust::TrustStore;

/// Why a bearer credential was refused. Logged for operators, never sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("token is not a well-formed JWT")]
    MalformedToken,
    #[error("token signature could not be verified with the current trust material")]
    SignatureInvalid,
    #[error("token has expired")]
    Expired,
    #[error("token is not valid yet")]
    NotYetValid,
    #[error("token issuer is not trusted")]
    UntrustedIssuer,
    #[error("token audience does not match")]
    InvalidAudience,
}

impl VerificationFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed_token",
            Self::SignatureInvalid => "signature_invalid",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::UntrustedIssuer => "untrusted_issuer",
            Self::InvalidAudience => "invalid_audience",
        }
    }
}

/// Verified identity extracted from an access token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPrincipal {
    pub subject: String,
    pub issuer: String,
    pub key_id: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub claims: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationResult {
    Valid(VerifiedPrincipal),
    Invalid(VerificationFailure),
}

impl VerificationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    pub fn into_result(self) -> Result<VerifiedPrincipal, VerificationFailure> {
        match self {
            Self::Valid(principal) => Ok(principal),
            Self::Invalid(failure) => Err(failure),
        }
    }
}

/// Knobs the verifier needs. Kept apart from `Config` so the core stays testable.
#[derive(Debug, Clone, Default)]
pub struct VerifierSettings {
    // When set, `aud` (string or array) must contain it.
    pub audience: Option<String>,
    // Allowed clock skew for `exp` / `nbf`, seconds.
    pub leeway_seconds: u64,
}

/// Resource-server style bearer token verifier.
///
/// Checks run in a fixed order: structure, `exp`, `nbf`, signature (`kid` must
/// name a usable key in the current snapshot), issuer, audience. Expiry is
/// decided before the signature so an expired token is reported as such
/// whatever its signature. Verification never does I/O.
pub struct CredentialVerifier {
    trust: TrustStore,
    settings: VerifierSettings,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("settings", &self.settings)
            .field("trust_generation", &self.trust.current().generation())
            .finish()
    }
}

impl CredentialVerifier {
    pub fn new(trust: TrustStore, settings: VerifierSettings) -> Self {
        Self::with_clock(trust, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(trust: TrustStore, settings: VerifierSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            trust,
            settings,
            clock,
        }
    }

    pub fn verify(&self, token: &str) -> VerificationResult {
        match self.verify_claims(token) {
            Ok(principal) => VerificationResult::Valid(principal),
            Err(failure) => VerificationResult::Invalid(failure),
        }
    }

    fn verify_claims(&self, token: &str) -> Result<VerifiedPrincipal, VerificationFailure> {
        let (header, unverified) = parse_unverified(token)?;

        let exp = unverified
            .get("exp")
            .and_then(numeric_date)
            .ok_or(VerificationFailure::MalformedToken)?;
        let now = self.clock.now();
        let leeway = i64::try_from(self.settings.leeway_seconds).unwrap_or(i64::MAX);

        if now.timestamp() > exp.saturating_add(leeway) {
            return Err(VerificationFailure::Expired);
        }
        if let Some(nbf) = unverified.get("nbf") {
            let nbf = numeric_date(nbf).ok_or(VerificationFailure::MalformedToken)?;
            if now.timestamp().saturating_add(leeway) < nbf {
                return Err(VerificationFailure::NotYetValid);
            }
        }

        // One snapshot for the whole check, even if a refresh lands meanwhile.
        let snapshot = self.trust.current();
        let kid = header
            .kid
            .as_deref()
            .ok_or(VerificationFailure::SignatureInvalid)?;
        let key = snapshot
            .key(kid)
            .filter(|key| key.is_usable_at(now))
            .ok_or(VerificationFailure::SignatureInvalid)?;
        if header.alg != key.algorithm {
            return Err(VerificationFailure::SignatureInvalid);
        }

        let mut validation = Validation::new(key.algorithm);
        // Time and audience checks are ours (injected clock, optional audience).
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = jsonwebtoken::decode::<Map<String, Value>>(token, key.decoding_key(), &validation)
            .map_err(|err| match err.kind() {
                ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                    VerificationFailure::MalformedToken
                }
                _ => VerificationFailure::SignatureInvalid,
            })?
            .claims;

        let issuer = non_empty_str(&claims, "iss").ok_or(VerificationFailure::MalformedToken)?;
        if !snapshot.trusts_issuer(issuer) {
            return Err(VerificationFailure::UntrustedIssuer);
        }

        if let Some(expected) = self.settings.audience.as_deref() {
            if !audience_contains(claims.get("aud"), expected) {
                return Err(VerificationFailure::InvalidAudience);
            }
        }

        let subject = non_empty_str(&claims, "sub").ok_or(VerificationFailure::MalformedToken)?;
        let expires_at =
            DateTime::from_timestamp(exp, 0).ok_or(VerificationFailure::MalformedToken)?;

        Ok(VerifiedPrincipal {
            subject: subject.to_string(),
            issuer: issuer.to_string(),
            key_id: kid.to_string(),
            scopes: scopes(&claims),
            expires_at,
            claims,
        })
    }
}

// Structure check only: header, payload JSON object. The signature is not
// looked at here.
fn parse_unverified(token: &str) -> Result<(Header, Map<String, Value>), VerificationFailure> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(VerificationFailure::MalformedToken);
    };

    let header =
        jsonwebtoken::decode_header(token).map_err(|_| VerificationFailure::MalformedToken)?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| VerificationFailure::MalformedToken)?;
    let claims: Map<String, Value> =
        serde_json::from_slice(&payload).map_err(|_| VerificationFailure::MalformedToken)?;

    // `iss` and `sub` must exist before we spend a signature check on the token.
    if non_empty_str(&claims, "iss").is_none() || non_empty_str(&claims, "sub").is_none() {
        return Err(VerificationFailure::MalformedToken);
    }

    Ok((header, claims))
}

// NumericDate may carry a fractional part.
fn numeric_date(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

fn non_empty_str<'a>(claims: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn audience_contains(aud: Option<&Value>, expected: &str) -> bool {
    match aud {
        Some(Value::String(s)) => s == expected,
        Some(Value::Array(values)) => values.iter().any(|v| v.as_str() == Some(expected)),
        _ => false,
    }
}

// `scope` (space separated, RFC 8693) or `scp` (array or string, common IdP extension).
fn scopes(claims: &Map<String, Value>) -> Vec<String> {
    let from_str = |s: &str| s.split_whitespace().map(str::to_string).collect::<Vec<_>>();

    match claims.get("scope").or_else(|| claims.get("scp")) {
        Some(Value::String(s)) => from_str(s),
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jsonwebtoken::{Algorithm, EncodingKey};
    use serde_json::json;

    use super::*;
    use crate::services::auth::testutil::{
        FixedClock, TEST_AUDIENCE, TEST_ISSUER, TestKey, claims, ts,
    };
    use crate::services::auth::trust::{TrustMaterial, TrustSnapshot};

    const NOW: i64 = 1_700_000_000;
    const OVERLAP: Duration = Duration::from_secs(900);

    struct Fixture {
        store: TrustStore,
        clock: Arc<FixedClock>,
        verifier: CredentialVerifier,
    }

    fn fixture(keys: &[&TestKey], audience: Option<&str>) -> Fixture {
        let store = TrustStore::new(TrustSnapshot::empty([TEST_ISSUER]));
        store.apply(
            TrustMaterial {
                keys: keys.iter().map(|k| k.trusted_key()).collect(),
                issuer: None,
            },
            ts(NOW),
            OVERLAP,
        );
        let clock = Arc::new(FixedClock::at(ts(NOW)));
        let verifier = CredentialVerifier::with_clock(
            store.clone(),
            VerifierSettings {
                audience: audience.map(str::to_string),
                leeway_seconds: 0,
            },
            clock.clone(),
        );
        Fixture {
            store,
            clock,
            verifier,
        }
    }

    #[test]
    fn valid_token_yields_subject_and_claims() {
        let key = TestKey::new("k1", 1);
        let fx = fixture(&[&key], Some(TEST_AUDIENCE));
        let token = key.sign(&claims("user-123", ts(NOW), 3600));

        let principal = fx.verifier.verify(&token).into_result().unwrap();
        assert_eq!(principal.subject, "user-123");
        assert_eq!(principal.issuer, TEST_ISSUER);
        assert_eq!(principal.key_id, "k1");
        assert_eq!(principal.scopes, vec!["read", "write"]);
        assert_eq!(principal.expires_at, ts(NOW + 3600));
        assert_eq!(principal.claims["aud"], json!(TEST_AUDIENCE));
    }

    #[test]
    fn verification_is_idempotent() {
        let key = TestKey::new("k1", 1);
        let fx = fixture(&[&key], None);
        let token = key.sign(&claims("user-123", ts(NOW), 3600));

        let first = fx.verifier.verify(&token);
        let second = fx.verifier.verify(&token);
        assert!(first.is_valid());
        assert_eq!(first, second);
    }

    #[test]
    fn garbage_is_malformed() {
        let key = TestKey::new("k1", 1);
        let fx = fixture(&[&key], None);

        for token in ["", "abc", "a.b", "a.b.c.d", "!!!.@@@.###", "e30.e30.e30"] {
            assert_eq!(
                fx.verifier.verify(token),
                VerificationResult::Invalid(VerificationFailure::MalformedToken),
                "{token}"
            );
        }
    }

    #[test]
    fn missing_exp_or_sub_is_malformed() {
        let key = TestKey::new("k1", 1);
        let fx = fixture(&[&key], None);

        let no_exp = key.sign(&json!({"iss": TEST_ISSUER, "sub": "u"}));
        let no_sub = key.sign(&json!({"iss": TEST_ISSUER, "exp": NOW + 60}));
        let blank_sub = key.sign(&json!({"iss": TEST_ISSUER, "sub": "  ", "exp": NOW + 60}));
        for token in [no_exp, no_sub, blank_sub] {
            assert_eq!(
                fx.verifier.verify(&token),
                VerificationResult::Invalid(VerificationFailure::MalformedToken)
            );
        }
    }

    #[test]
    fn expired_regardless_of_signature() {
        let trusted = TestKey::new("k1", 1);
        let stranger = TestKey::new("k1", 9);
        let fx = fixture(&[&trusted], None);

        let expired_claims = claims("user-123", ts(NOW - 7200), 3600);
        for token in [trusted.sign(&expired_claims), stranger.sign(&expired_claims)] {
            assert_eq!(
                fx.verifier.verify(&token),
                VerificationResult::Invalid(VerificationFailure::Expired)
            );
        }
    }

    #[test]
    fn leeway_tolerates_small_skew() {
        let key = TestKey::new("k1", 1);
        let store = TrustStore::new(TrustSnapshot::empty([TEST_ISSUER]));
        store.apply(
            TrustMaterial {
                keys: vec![key.trusted_key()],
                issuer: None,
            },
            ts(NOW),
            OVERLAP,
        );
        let verifier = CredentialVerifier::with_clock(
            store,
            VerifierSettings {
                audience: None,
                leeway_seconds: 60,
            },
            Arc::new(FixedClock::at(ts(NOW))),
        );

        let just_expired = key.sign(&claims("u", ts(NOW - 30), 0));
        assert!(verifier.verify(&just_expired).is_valid());

        let long_expired = key.sign(&claims("u", ts(NOW - 120), 0));
        assert_eq!(
            verifier.verify(&long_expired),
            VerificationResult::Invalid(VerificationFailure::Expired)
        );
    }

    #[test]
    fn not_yet_valid_token_is_rejected() {
        let key = TestKey::new("k1", 1);
        let fx = fixture(&[&key], None);
        let mut c = claims("u", ts(NOW), 3600);
        c["nbf"] = json!(NOW + 600);

        assert_eq!(
            fx.verifier.verify(&key.sign(&c)),
            VerificationResult::Invalid(VerificationFailure::NotYetValid)
        );
    }

    #[test]
    fn unknown_key_is_signature_invalid() {
        let trusted = TestKey::new("k1", 1);
        let stranger = TestKey::new("k2", 2);
        let fx = fixture(&[&trusted], None);
        let c = claims("user-123", ts(NOW), 3600);

        // Unknown kid.
        assert_eq!(
            fx.verifier.verify(&stranger.sign(&c)),
            VerificationResult::Invalid(VerificationFailure::SignatureInvalid)
        );
        // Known kid, wrong key.
        assert_eq!(
            fx.verifier.verify(&stranger.sign_with_kid(&c, Some("k1"))),
            VerificationResult::Invalid(VerificationFailure::SignatureInvalid)
        );
        // No kid at all.
        assert_eq!(
            fx.verifier.verify(&trusted.sign_with_kid(&c, None)),
            VerificationResult::Invalid(VerificationFailure::SignatureInvalid)
        );
    }

    #[test]
    fn tampered_payload_is_signature_invalid() {
        let key = TestKey::new("k1", 1);
        let fx = fixture(&[&key], None);
        let token = key.sign(&claims("user-123", ts(NOW), 3600));

        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let forged = claims("admin", ts(NOW), 3600);
        parts[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let forged_token = parts.join(".");

        assert_eq!(
            fx.verifier.verify(&forged_token),
            VerificationResult::Invalid(VerificationFailure::SignatureInvalid)
        );
    }

    #[test]
    fn header_algorithm_must_match_the_key() {
        let key = TestKey::new("k1", 1);
        let fx = fixture(&[&key], None);
        let c = claims("user-123", ts(NOW), 3600);

        // HMAC keyed with the public key bytes, under the trusted kid.
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k1".to_string());
        let secret = URL_SAFE_NO_PAD.decode(key.public_x()).unwrap();
        let forged =
            jsonwebtoken::encode(&header, &c, &EncodingKey::from_secret(&secret)).unwrap();

        assert_eq!(
            fx.verifier.verify(&forged),
            VerificationResult::Invalid(VerificationFailure::SignatureInvalid)
        );
    }

    #[test]
    fn untrusted_issuer_is_rejected() {
        let key = TestKey::new("k1", 1);
        let fx = fixture(&[&key], None);
        let mut c = claims("user-123", ts(NOW), 3600);
        c["iss"] = json!("https://evil.example.test");

        assert_eq!(
            fx.verifier.verify(&key.sign(&c)),
            VerificationResult::Invalid(VerificationFailure::UntrustedIssuer)
        );
    }

    #[test]
    fn audience_is_enforced_when_configured() {
        let key = TestKey::new("k1", 1);
        let fx = fixture(&[&key], Some(TEST_AUDIENCE));

        let mut wrong = claims("u", ts(NOW), 3600);
        wrong["aud"] = json!("someone-else");
        assert_eq!(
            fx.verifier.verify(&key.sign(&wrong)),
            VerificationResult::Invalid(VerificationFailure::InvalidAudience)
        );

        let mut array = claims("u", ts(NOW), 3600);
        array["aud"] = json!(["someone-else", TEST_AUDIENCE]);
        assert!(fx.verifier.verify(&key.sign(&array)).is_valid());

        let mut missing = claims("u", ts(NOW), 3600);
        missing.as_object_mut().unwrap().remove("aud");
        assert_eq!(
            fx.verifier.verify(&key.sign(&missing)),
            VerificationResult::Invalid(VerificationFailure::InvalidAudience)
        );
    }

    #[test]
    fn rotated_out_key_verifies_only_within_overlap() {
        let old = TestKey::new("k1", 1);
        let new = TestKey::new("k2", 2);
        let fx = fixture(&[&old], None);
        let token = old.sign(&claims("user-123", ts(NOW), 7200));
        assert!(fx.verifier.verify(&token).is_valid());

        fx.store.apply(
            TrustMaterial {
                keys: vec![new.trusted_key()],
                issuer: None,
            },
            ts(NOW),
            OVERLAP,
        );
        assert!(fx.verifier.verify(&token).is_valid());

        fx.clock.advance(899);
        assert!(fx.verifier.verify(&token).is_valid());

        fx.clock.advance(1);
        assert_eq!(
            fx.verifier.verify(&token),
            VerificationResult::Invalid(VerificationFailure::SignatureInvalid)
        );

        let fresh = new.sign(&claims("user-123", ts(NOW + 900), 3600));
        assert!(fx.verifier.verify(&fresh).is_valid());
    }

    #[test]
    fn scopes_from_scp_array() {
        let key = TestKey::new("k1", 1);
        let fx = fixture(&[&key], None);
        let mut c = claims("u", ts(NOW), 3600);
        c.as_object_mut().unwrap().remove("scope");
        c["scp"] = json!(["orders.read", "orders.write"]);

        let principal = fx.verifier.verify(&key.sign(&c)).into_result().unwrap();
        assert_eq!(principal.scopes, vec!["orders.read", "orders.write"]);
    }
}
