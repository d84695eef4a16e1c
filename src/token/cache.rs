//! Token cache entries and the conditional-write store contract.
//!
//! At most one *valid* token exists per key at any instant. The conditional
//! write [`TokenStore::put_if_absent_or_expired`] is the stampede-prevention
//! primitive: under concurrent cold or post-expiry refreshes only one
//! writer's token is retained, and losers converge on the winner's token.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;

/// A cached bearer token with explicit expiry.
///
/// Superseded, never mutated in place: each refresh installs a fresh entry
/// and the old one is conceptually deleted once expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToken {
    /// Cache key (scope identifier) this token is stored under.
    pub key: String,
    /// The bearer token value.
    pub value: String,
    /// When the token was obtained from the issuer.
    pub issued_at: DateTime<Utc>,
    /// Absolute expiry as stated by the issuer.
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Whether the token is still usable at `now`, with the safety margin
    /// applied.
    ///
    /// The margin tolerates clock skew and in-flight latency: a token is
    /// treated as invalid slightly before its stated expiry.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin < self.expires_at
    }
}

/// Persistent key-value store for cached tokens.
///
/// Implementations back onto whatever store the deployment shares across
/// processes; the contract mirrors a conditional (compare-and-swap style)
/// write. [`MemoryTokenStore`] is the in-process implementation.
pub trait TokenStore: Send + Sync {
    /// Reads the entry under `key`, if any.
    ///
    /// A pure read: hard-expired entries may be pruned, but this never
    /// triggers issuance. Callers judge freshness with
    /// [`CachedToken::is_fresh`].
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<CachedToken>>> + Send;

    /// Stores `token` only if no entry exists under its key or the existing
    /// entry is stale at `now` with `margin` applied.
    ///
    /// Returns `false` when another writer already installed a still-valid
    /// token; the caller must then discard its own token and re-read.
    fn put_if_absent_or_expired(
        &self,
        token: &CachedToken,
        now: DateTime<Utc>,
        margin: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Removes the entry under `key`, if any.
    ///
    /// Used when the upstream API rejects a token that the cache still
    /// considers valid.
    fn invalidate(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

/// In-process token store with compare-and-swap semantics under one mutex.
///
/// Suitable for single-process deployments and tests. Multi-process
/// deployments implement [`TokenStore`] over a shared store with a native
/// conditional write (the original deployment used a DynamoDB table).
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, CachedToken>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<CachedToken>> {
        let mut entries = self.entries.lock().await;
        // Reclaim hard-expired entries the way a TTL-enabled store would.
        if let Some(entry) = entries.get(key)
            && entry.expires_at <= Utc::now()
        {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).cloned())
    }

    async fn put_if_absent_or_expired(
        &self,
        token: &CachedToken,
        now: DateTime<Utc>,
        margin: Duration,
    ) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(&token.key)
            && existing.is_fresh(now, margin)
        {
            return Ok(false);
        }
        entries.insert(token.key.clone(), token.clone());
        Ok(true)
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
