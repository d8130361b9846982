//! Trust material: the signing keys and issuers a token may be verified against.
//!
//! A [`TrustSnapshot`] is immutable once built. [`TrustStore`] publishes the
//! current snapshot through a `watch` channel, so a verifier holds one `Arc`
//! for the whole check and a refresh swaps the entire key set at once.
//!
//! Rotation: a key that disappears from the identity provider's key set is
//! not dropped immediately. It is carried into the next snapshot with a
//! `retire_at` deadline (`now + overlap`), so tokens signed just before the
//! rotation keep verifying until the deadline passes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Serialize;
use tokio::sync::watch;

/// A verification key. Key material is intentionally not printable via Debug.
#[derive(Clone)]
pub struct TrustedKey {
    pub kid: String,
    pub algorithm: Algorithm,
    decoding_key: DecodingKey,
    pub retire_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for TrustedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustedKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("retire_at", &self.retire_at)
            .finish()
    }
}

impl TrustedKey {
    pub fn new(kid: impl Into<String>, algorithm: Algorithm, decoding_key: DecodingKey) -> Self {
        Self {
            kid: kid.into(),
            algorithm,
            decoding_key,
            retire_at: None,
        }
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.retire_at.is_none_or(|deadline| now < deadline)
    }
}

/// What a trust source hands back before it is merged into a snapshot.
#[derive(Debug, Clone, Default)]
pub struct TrustMaterial {
    pub keys: Vec<TrustedKey>,
    // Issuer advertised by the provider (discovery), if any.
    pub issuer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TrustSnapshot {
    keys: HashMap<String, TrustedKey>,
    issuers: HashSet<String>,
    fetched_at: Option<DateTime<Utc>>,
    generation: u64,
}

/// Public view of a snapshot (no key material).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TrustSummary {
    pub generation: u64,
    pub active_keys: usize,
    pub retiring_keys: usize,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl TrustSnapshot {
    /// Snapshot with no keys: every signature check fails until a refresh lands.
    pub fn empty<I, S>(issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: HashMap::new(),
            issuers: issuers.into_iter().map(Into::into).collect(),
            fetched_at: None,
            generation: 0,
        }
    }

    /// Build the successor of `previous` from freshly fetched material.
    pub fn rotate(
        previous: &TrustSnapshot,
        material: TrustMaterial,
        now: DateTime<Utc>,
        overlap: Duration,
    ) -> Self {
        let overlap = TimeDelta::from_std(overlap).unwrap_or_else(|_| TimeDelta::zero());
        let deadline = now
            .checked_add_signed(overlap)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut keys: HashMap<String, TrustedKey> = material
            .keys
            .into_iter()
            .map(|mut key| {
                key.retire_at = None;
                (key.kid.clone(), key)
            })
            .collect();

        for (kid, old) in &previous.keys {
            if keys.contains_key(kid) {
                continue;
            }
            let retire_at = old.retire_at.unwrap_or(deadline);
            if retire_at <= now {
                tracing::debug!(kid = %kid, "dropping retired signing key");
                continue;
            }
            let mut carried = old.clone();
            carried.retire_at = Some(retire_at);
            keys.insert(kid.clone(), carried);
        }

        let mut issuers = previous.issuers.clone();
        issuers.extend(material.issuer);

        Self {
            keys,
            issuers,
            fetched_at: Some(now),
            generation: previous.generation + 1,
        }
    }

    pub fn key(&self, kid: &str) -> Option<&TrustedKey> {
        self.keys.get(kid)
    }

    pub fn trusts_issuer(&self, issuer: &str) -> bool {
        self.issuers.contains(issuer)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn summary(&self) -> TrustSummary {
        let retiring_keys = self.keys.values().filter(|k| k.retire_at.is_some()).count();
        TrustSummary {
            generation: self.generation,
            active_keys: self.keys.len() - retiring_keys,
            retiring_keys,
            fetched_at: self.fetched_at,
        }
    }
}

/// Shared, read-mostly holder of the current snapshot.
///
/// Cheap to clone; all clones observe the same channel.
#[derive(Debug, Clone)]
pub struct TrustStore {
    tx: Arc<watch::Sender<Arc<TrustSnapshot>>>,
}

impl TrustStore {
    pub fn new(initial: TrustSnapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<TrustSnapshot> {
        self.tx.borrow().clone()
    }

    /// Merge `material` into the current snapshot and publish the result.
    pub fn apply(
        &self,
        material: TrustMaterial,
        now: DateTime<Utc>,
        overlap: Duration,
    ) -> Arc<TrustSnapshot> {
        self.tx.send_modify(|current| {
            *current = Arc::new(TrustSnapshot::rotate(current, material, now, overlap));
        });
        self.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<TrustSnapshot>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::testutil::{TEST_ISSUER, TestKey, ts};

    const OVERLAP: Duration = Duration::from_secs(900);

    fn material(keys: &[&TestKey]) -> TrustMaterial {
        TrustMaterial {
            keys: keys.iter().map(|k| k.trusted_key()).collect(),
            issuer: None,
        }
    }

    #[test]
    fn rotate_keeps_removed_keys_until_overlap_ends() {
        let k1 = TestKey::new("k1", 1);
        let k2 = TestKey::new("k2", 2);
        let t0 = ts(1_700_000_000);

        let first = TrustSnapshot::rotate(&TrustSnapshot::empty([TEST_ISSUER]), material(&[&k1]), t0, OVERLAP);
        assert_eq!(first.generation(), 1);
        assert!(first.key("k1").unwrap().retire_at.is_none());

        let second = TrustSnapshot::rotate(&first, material(&[&k2]), t0, OVERLAP);
        let retiring = second.key("k1").unwrap();
        assert_eq!(retiring.retire_at, Some(t0 + TimeDelta::seconds(900)));
        assert!(retiring.is_usable_at(t0 + TimeDelta::seconds(899)));
        assert!(!retiring.is_usable_at(t0 + TimeDelta::seconds(900)));
        assert_eq!(
            second.summary(),
            TrustSummary {
                generation: 2,
                active_keys: 1,
                retiring_keys: 1,
                fetched_at: Some(t0),
            }
        );

        // A later refresh must not extend the original deadline.
        let t1 = t0 + TimeDelta::seconds(600);
        let third = TrustSnapshot::rotate(&second, material(&[&k2]), t1, OVERLAP);
        assert_eq!(
            third.key("k1").unwrap().retire_at,
            Some(t0 + TimeDelta::seconds(900))
        );

        let t2 = t0 + TimeDelta::seconds(901);
        let fourth = TrustSnapshot::rotate(&third, material(&[&k2]), t2, OVERLAP);
        assert!(fourth.key("k1").is_none());
        assert!(fourth.key("k2").is_some());
    }

    #[test]
    fn reappearing_key_becomes_active_again() {
        let k1 = TestKey::new("k1", 1);
        let k2 = TestKey::new("k2", 2);
        let t0 = ts(1_700_000_000);

        let first = TrustSnapshot::rotate(&TrustSnapshot::empty([TEST_ISSUER]), material(&[&k1]), t0, OVERLAP);
        let second = TrustSnapshot::rotate(&first, material(&[&k2]), t0, OVERLAP);
        let third = TrustSnapshot::rotate(&second, material(&[&k1, &k2]), t0, OVERLAP);
        assert!(third.key("k1").unwrap().retire_at.is_none());
    }

    #[test]
    fn zero_overlap_drops_removed_keys_immediately() {
        let k1 = TestKey::new("k1", 1);
        let k2 = TestKey::new("k2", 2);
        let t0 = ts(1_700_000_000);

        let first = TrustSnapshot::rotate(&TrustSnapshot::empty([TEST_ISSUER]), material(&[&k1]), t0, OVERLAP);
        let second = TrustSnapshot::rotate(&first, material(&[&k2]), t0, Duration::ZERO);
        assert!(second.key("k1").is_none());
    }

    #[test]
    fn issuers_accumulate_configured_and_advertised() {
        let snapshot = TrustSnapshot::rotate(
            &TrustSnapshot::empty([TEST_ISSUER]),
            TrustMaterial {
                keys: Vec::new(),
                issuer: Some("https://other.example.test".to_string()),
            },
            ts(1_700_000_000),
            OVERLAP,
        );
        assert!(snapshot.trusts_issuer(TEST_ISSUER));
        assert!(snapshot.trusts_issuer("https://other.example.test"));
        assert!(!snapshot.trusts_issuer("https://evil.example.test"));
    }

    #[tokio::test]
    async fn store_publishes_whole_snapshots() {
        let k1 = TestKey::new("k1", 1);
        let store = TrustStore::new(TrustSnapshot::empty([TEST_ISSUER]));
        let mut rx = store.subscribe();
        let before = store.current();

        store.apply(material(&[&k1]), ts(1_700_000_000), OVERLAP);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().generation(), 1);
        assert!(store.current().key("k1").is_some());
        // Readers holding the old Arc are unaffected.
        assert!(before.is_empty());
        assert_eq!(before.generation(), 0);
    }
}
