/// Factory: build the gate and its trust source from application `Config`.
use std::sync::Arc;

use crate::config::{Config, TrustSourceConfig};
use crate::services::auth::gate::Gate;
use crate::services::auth::jwks::{
    DiscoverySource, JwksSource, StaticSource, TrustSource, TrustSourceError,
};
use crate::services::auth::trust::TrustStore;
use crate::services::auth::verifier::{CredentialVerifier, VerifierSettings};

pub fn build_trust_source(config: &Config) -> Result<Arc<dyn TrustSource>, TrustSourceError> {
    let client = reqwest::Client::builder()
        .timeout(config.refresh.fetch_timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let source: Arc<dyn TrustSource> = match &config.trust_source {
        TrustSourceConfig::Discovery { issuer } => Arc::new(DiscoverySource::new(client, issuer)?),
        TrustSourceConfig::Jwks { url } => Arc::new(JwksSource::new(client, url)?),
        TrustSourceConfig::StaticPem {
            pem,
            kid,
            algorithm,
        } => Arc::new(StaticSource::from_pem(pem, kid, *algorithm)?),
    };
    Ok(source)
}

pub fn build_gate(config: &Config, trust: TrustStore) -> Arc<Gate> {
    let verifier = CredentialVerifier::new(
        trust,
        VerifierSettings {
            audience: config.auth_audience.clone(),
            leeway_seconds: config.access_token_leeway_seconds,
        },
    );

    Arc::new(Gate::new(config.routes.clone(), Arc::new(verifier)))
}
