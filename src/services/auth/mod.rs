pub mod clock;
pub mod factory;
pub mod gate;
pub mod jwks;
pub mod refresh;
pub mod route_policy;
pub mod trust;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testutil;

pub use factory::{build_gate, build_trust_source};
pub use gate::{Gate, GateDecision, RejectReason};
pub use verifier::{CredentialVerifier, VerificationFailure, VerificationResult, VerifiedPrincipal};
