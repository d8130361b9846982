//! Test helpers: deterministic Ed25519 keys, signed tokens and a settable clock.

use std::sync::Mutex;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeDelta, Utc};
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{EncodePrivateKey, EncodePublicKey};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::{Value, json};

use crate::services::auth::clock::Clock;
use crate::services::auth::trust::TrustedKey;

pub(crate) const TEST_ISSUER: &str = "https://idp.example.test";
pub(crate) const TEST_AUDIENCE: &str = "gateway";

pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub(crate) struct TestKey {
    pub kid: String,
    signing: SigningKey,
}

impl TestKey {
    pub fn new(kid: &str, seed: u8) -> Self {
        Self {
            kid: kid.to_string(),
            signing: SigningKey::from_bytes(&[seed; 32]),
        }
    }

    pub fn public_x(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.signing.verifying_key().to_bytes())
    }

    pub fn public_pem(&self) -> String {
        self.signing
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap()
    }

    pub fn trusted_key(&self) -> TrustedKey {
        let decoding = DecodingKey::from_ed_components(&self.public_x()).unwrap();
        TrustedKey::new(self.kid.clone(), Algorithm::EdDSA, decoding)
    }

    pub fn jwk(&self) -> Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": self.public_x(),
            "kid": self.kid,
            "use": "sig",
            "alg": "EdDSA",
        })
    }

    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with_kid(claims, Some(&self.kid))
    }

    pub fn sign_with_kid(&self, claims: &Value, kid: Option<&str>) -> String {
        let der = self.signing.to_pkcs8_der().unwrap();
        let encoding = EncodingKey::from_ed_der(der.as_bytes());
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = kid.map(str::to_string);
        jsonwebtoken::encode(&header, claims, &encoding).unwrap()
    }
}

/// Standard claims for `sub`, issued by [`TEST_ISSUER`] for [`TEST_AUDIENCE`].
pub(crate) fn claims(sub: &str, now: DateTime<Utc>, ttl_secs: i64) -> Value {
    json!({
        "iss": TEST_ISSUER,
        "aud": TEST_AUDIENCE,
        "sub": sub,
        "iat": now.timestamp(),
        "exp": now.timestamp() + ttl_secs,
        "scope": "read write",
    })
}

pub(crate) struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, secs: i64) {
        let mut now = self.0.lock().unwrap();
        *now += TimeDelta::seconds(secs);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}
