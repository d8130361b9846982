//! Sources of trust material.
//!
//! - [`JwksSource`]: a JWK Set URL
//! - [`DiscoverySource`]: OpenID Provider discovery from an issuer URL, then its `jwks_uri`
//! - [`StaticSource`]: one PEM public key from configuration
//!
//! Sources only fetch and parse. Timeouts, retries and snapshot swapping are
//! the refresher's job.

use async_trait::async_trait;
use jsonwebtoken::jwk::{
    AlgorithmParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse,
};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::services::auth::trust::{TrustMaterial, TrustedKey};

#[derive(Debug, Error)]
pub enum TrustSourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid jwk set: {0}")]
    InvalidJwks(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("issuer mismatch: expected {expected}, provider advertises {actual}")]
    IssuerMismatch { expected: String, actual: String },
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[async_trait]
pub trait TrustSource: Send + Sync {
    // Short name for logs.
    fn name(&self) -> &'static str;

    async fn fetch(&self) -> Result<TrustMaterial, TrustSourceError>;
}

/// Convert a JWK Set into verification keys.
///
/// Keys meant for encryption, symmetric keys, keys without `kid` and keys
/// whose algorithm cannot be determined are skipped. A set with no usable
/// key is an error so that a broken response never replaces good material.
pub fn keys_from_jwk_set(set: &JwkSet) -> Result<Vec<TrustedKey>, TrustSourceError> {
    let mut keys = Vec::with_capacity(set.keys.len());

    for jwk in &set.keys {
        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            continue;
        }
        let Some(kid) = jwk.common.key_id.as_deref() else {
            tracing::warn!("skipping jwk without kid");
            continue;
        };
        let Some(algorithm) = signing_algorithm(jwk) else {
            tracing::warn!(kid = %kid, "skipping jwk with unsupported algorithm");
            continue;
        };
        match DecodingKey::from_jwk(jwk) {
            Ok(decoding_key) => keys.push(TrustedKey::new(kid, algorithm, decoding_key)),
            Err(err) => tracing::warn!(kid = %kid, error = %err, "skipping unparsable jwk"),
        }
    }

    if keys.is_empty() {
        return Err(TrustSourceError::InvalidJwks(
            "no usable signing keys".to_string(),
        ));
    }
    Ok(keys)
}

fn signing_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    match jwk.common.key_algorithm {
        Some(KeyAlgorithm::RS256) => Some(Algorithm::RS256),
        Some(KeyAlgorithm::RS384) => Some(Algorithm::RS384),
        Some(KeyAlgorithm::RS512) => Some(Algorithm::RS512),
        Some(KeyAlgorithm::PS256) => Some(Algorithm::PS256),
        Some(KeyAlgorithm::PS384) => Some(Algorithm::PS384),
        Some(KeyAlgorithm::PS512) => Some(Algorithm::PS512),
        Some(KeyAlgorithm::ES256) => Some(Algorithm::ES256),
        Some(KeyAlgorithm::ES384) => Some(Algorithm::ES384),
        Some(KeyAlgorithm::EdDSA) => Some(Algorithm::EdDSA),
        // HMAC and key-management algorithms never verify access tokens here.
        Some(_) => None,
        None => match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => Some(Algorithm::RS256),
            AlgorithmParameters::EllipticCurve(params) => match params.curve {
                EllipticCurve::P256 => Some(Algorithm::ES256),
                EllipticCurve::P384 => Some(Algorithm::ES384),
                _ => None,
            },
            AlgorithmParameters::OctetKeyPair(params) => match params.curve {
                EllipticCurve::Ed25519 => Some(Algorithm::EdDSA),
                _ => None,
            },
            _ => None,
        },
    }
}

/// Fetches a JWK Set from a fixed URL.
#[derive(Debug, Clone)]
pub struct JwksSource {
    client: reqwest::Client,
    url: Url,
}

impl JwksSource {
    pub fn new(client: reqwest::Client, url: &str) -> Result<Self, TrustSourceError> {
        Ok(Self {
            client,
            url: Url::parse(url)?,
        })
    }
}

async fn fetch_jwk_set(client: &reqwest::Client, url: Url) -> Result<JwkSet, TrustSourceError> {
    let set = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<JwkSet>()
        .await?;
    Ok(set)
}

#[async_trait]
impl TrustSource for JwksSource {
    fn name(&self) -> &'static str {
        "jwks"
    }

    async fn fetch(&self) -> Result<TrustMaterial, TrustSourceError> {
        let set = fetch_jwk_set(&self.client, self.url.clone()).await?;
        Ok(TrustMaterial {
            keys: keys_from_jwk_set(&set)?,
            issuer: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    jwks_uri: String,
}

/// OpenID Provider discovery (`{issuer}/.well-known/openid-configuration`).
///
/// The advertised `issuer` must equal the configured one exactly; a provider
/// claiming to be someone else is not trusted.
#[derive(Debug, Clone)]
pub struct DiscoverySource {
    client: reqwest::Client,
    issuer: String,
    metadata_url: Url,
}

impl DiscoverySource {
    pub fn new(client: reqwest::Client, issuer: &str) -> Result<Self, TrustSourceError> {
        let metadata_url = Url::parse(&format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        ))?;
        Ok(Self {
            client,
            issuer: issuer.to_string(),
            metadata_url,
        })
    }
}

#[async_trait]
impl TrustSource for DiscoverySource {
    fn name(&self) -> &'static str {
        "oidc-discovery"
    }

    async fn fetch(&self) -> Result<TrustMaterial, TrustSourceError> {
        let metadata = self
            .client
            .get(self.metadata_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json::<ProviderMetadata>()
            .await?;

        if metadata.issuer != self.issuer {
            return Err(TrustSourceError::IssuerMismatch {
                expected: self.issuer.clone(),
                actual: metadata.issuer,
            });
        }

        let set = fetch_jwk_set(&self.client, Url::parse(&metadata.jwks_uri)?).await?;
        Ok(TrustMaterial {
            keys: keys_from_jwk_set(&set)?,
            issuer: Some(metadata.issuer),
        })
    }
}

/// A single key from configuration (PEM, SubjectPublicKeyInfo).
#[derive(Debug, Clone)]
pub struct StaticSource {
    key: TrustedKey,
}

impl StaticSource {
    pub fn from_pem(pem: &str, kid: &str, algorithm: Algorithm) -> Result<Self, TrustSourceError> {
        let bytes = pem.as_bytes();
        let decoding_key = match algorithm {
            Algorithm::EdDSA => DecodingKey::from_ed_pem(bytes),
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(bytes),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(bytes),
            other => {
                return Err(TrustSourceError::InvalidKey(format!(
                    "unsupported algorithm for a public key: {other:?}"
                )));
            }
        }
        .map_err(|e| TrustSourceError::InvalidKey(e.to_string()))?;

        Ok(Self {
            key: TrustedKey::new(kid, algorithm, decoding_key),
        })
    }
}

#[async_trait]
impl TrustSource for StaticSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch(&self) -> Result<TrustMaterial, TrustSourceError> {
        Ok(TrustMaterial {
            keys: vec![self.key.clone()],
            issuer: None,
        })
    }
}
