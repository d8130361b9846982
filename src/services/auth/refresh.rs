//! Background refresh of trust material.
//!
//! Policy:
//! - startup (`bootstrap`): retry with backoff; if nothing was ever fetched the
//!   process must not serve, unless an empty bootstrap is explicitly allowed
//! - steady state (`spawn`): refresh on an interval, each attempt bounded by a
//!   timeout; on failure keep serving the last-known-good snapshot
//!
//! Request handling never waits on any of this.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::auth::clock::{Clock, SystemClock};
use crate::services::auth::jwks::{TrustSource, TrustSourceError};
use crate::services::auth::trust::{TrustSnapshot, TrustStore};

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("trust material unavailable after {attempts} attempt(s)")]
    TrustMaterialUnavailable {
        attempts: u32,
        #[source]
        source: TrustSourceError,
    },
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub interval: Duration,
    // Per-attempt bound on a fetch.
    pub fetch_timeout: Duration,
    // Attempts per refresh cycle.
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    // How long a key removed by the provider keeps verifying.
    pub key_overlap: Duration,
    pub bootstrap_attempts: u32,
    pub allow_empty_bootstrap: bool,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            key_overlap: Duration::from_secs(900),
            bootstrap_attempts: 5,
            allow_empty_bootstrap: false,
        }
    }
}

pub struct TrustRefresher {
    source: Arc<dyn TrustSource>,
    store: TrustStore,
    settings: RefreshSettings,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TrustRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustRefresher")
            .field("source", &self.source.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl TrustRefresher {
    pub fn new(source: Arc<dyn TrustSource>, store: TrustStore, settings: RefreshSettings) -> Self {
        Self {
            source,
            store,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &TrustStore {
        &self.store
    }

    /// One bounded fetch; on success the new snapshot is published.
    pub async fn refresh_once(&self) -> Result<Arc<TrustSnapshot>, TrustSourceError> {
        let timeout = self.settings.fetch_timeout;
        let material = tokio::time::timeout(timeout, self.source.fetch())
            .await
            .map_err(|_| TrustSourceError::Timeout(timeout))??;

        Ok(self
            .store
            .apply(material, self.clock.now(), self.settings.key_overlap))
    }

    async fn refresh_with_retry(&self, attempts: u32) -> Result<Arc<TrustSnapshot>, TrustSourceError> {
        let attempts = attempts.max(1);
        let mut delay = self.settings.retry_base_delay;
        let mut attempt = 1;

        loop {
            match self.refresh_once().await {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) if attempt >= attempts => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        source = self.source.name(),
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "trust material fetch failed"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2).min(self.settings.retry_max_delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Load the first snapshot before serving.
    pub async fn bootstrap(&self) -> Result<Arc<TrustSnapshot>, TrustError> {
        let attempts = self.settings.bootstrap_attempts.max(1);

        match self.refresh_with_retry(attempts).await {
            Ok(snapshot) => {
                tracing::info!(
                    source = self.source.name(),
                    generation = snapshot.generation(),
                    keys = snapshot.key_count(),
                    "trust material loaded"
                );
                Ok(snapshot)
            }
            Err(err) if self.settings.allow_empty_bootstrap => {
                tracing::warn!(
                    source = self.source.name(),
                    error = %err,
                    "no trust material at startup; protected requests will be rejected until a refresh succeeds"
                );
                Ok(self.store.current())
            }
            Err(source) => Err(TrustError::TrustMaterialUnavailable { attempts, source }),
        }
    }

    /// Start the periodic refresh task. Dropping the handle stops it.
    pub fn spawn(self: Arc<Self>) -> RefreshHandle {
        let period = self.settings.interval.max(Duration::from_secs(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; bootstrap already covered it.
            ticker.tick().await;
            let mut empty_delay = self.settings.retry_base_delay.min(period);

            loop {
                // Nothing to verify with yet: keep retrying on the short backoff.
                if self.store.current().is_empty() {
                    tokio::time::sleep(empty_delay).await;
                    empty_delay = empty_delay
                        .saturating_mul(2)
                        .min(self.settings.retry_max_delay)
                        .min(period);
                    match self.refresh_once().await {
                        Ok(snapshot) => {
                            tracing::info!(
                                source = self.source.name(),
                                generation = snapshot.generation(),
                                keys = snapshot.key_count(),
                                "trust material loaded after empty start"
                            );
                            ticker.reset();
                        }
                        Err(err) => tracing::warn!(
                            source = self.source.name(),
                            retry_in_ms = empty_delay.as_millis() as u64,
                            error = %err,
                            "trust material still unavailable"
                        ),
                    }
                    continue;
                }

                ticker.tick().await;
                match self.refresh_with_retry(self.settings.retry_attempts).await {
                    Ok(snapshot) => tracing::debug!(
                        source = self.source.name(),
                        generation = snapshot.generation(),
                        keys = snapshot.key_count(),
                        "trust material refreshed"
                    ),
                    Err(err) => tracing::warn!(
                        source = self.source.name(),
                        generation = self.store.current().generation(),
                        error = %err,
                        "trust material refresh failed; keeping last-known-good snapshot"
                    ),
                }
            }
        });

        RefreshHandle { handle }
    }
}

#[derive(Debug)]
pub struct RefreshHandle {
    handle: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn shutdown(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
