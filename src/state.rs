/*
 * Responsibility
 * - Shared context bound to the Router (AppState)
 *   - gate: route classifier + credential verifier, built once from Config
 *   - trust: current trust snapshot (read by /actuator/trust)
 * - Cheap to Clone (Arc / channel handles inside)
 */
use std::sync::Arc;

use crate::services::auth::{Gate, trust::TrustStore};

#[derive(Clone, Debug)]
pub struct AppState {
    pub gate: Arc<Gate>,
    pub trust: TrustStore,
}

impl AppState {
    pub fn new(gate: Arc<Gate>, trust: TrustStore) -> Self {
        Self { gate, trust }
    }
}
