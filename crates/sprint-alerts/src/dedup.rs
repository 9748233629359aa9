//! Idempotency records for webhook deliveries.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::Result;

/// Default lifetime of an idempotency record.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest lifetime a record is kept; larger TTLs are capped to it.
pub const MAX_DEDUP_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// TTL store of event IDs already accepted.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Record `key` for `ttl`. Returns `true` when the key was not already live.
    async fn remember(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Drop `key`, so a redelivery is accepted again.
    async fn forget(&self, key: &str) -> Result<()>;
}

/// In-memory idempotency store.
///
/// Expired records are purged lazily on writes.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    entries: RwLock<HashMap<String, Instant>>,
}

impl InMemoryIdempotencyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently live.
    pub async fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .await
            .get(key)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    /// Number of stored records, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn remember(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, expires_at| *expires_at > now);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), now + ttl.min(MAX_DEDUP_TTL));
        Ok(true)
    }

    async fn forget(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
