//! Snapshot cache
//!
//! Holds the last known-good snapshot per provider, persists it after every
//! successful poll and tracks staleness. Capacity is bounded by the provider
//! set, so nothing is ever evicted; only [`SnapshotCache::reset`] deletes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::storage::CacheStorage;
use super::types::{ProviderId, Snapshot};

/// Default freshness threshold
pub const DEFAULT_STALE_AFTER_SECS: i64 = 5 * 60;

/// Cached state for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub last_good: Snapshot,
    pub is_stale: bool,
}

/// Result of offering a snapshot to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Snapshot stored and persisted
    Applied,
    /// A newer reading was already cached; the offered one was dropped
    Superseded,
}

pub struct SnapshotCache {
    entries: HashMap<ProviderId, CacheEntry>,
    storage: Arc<dyn CacheStorage>,
    stale_after: Duration,
}

impl SnapshotCache {
    /// Empty cache over the given storage (nothing is read)
    pub fn new(storage: Arc<dyn CacheStorage>, stale_after: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            storage,
            stale_after,
        }
    }

    /// Load persisted snapshots, marking anything older than the threshold stale
    ///
    /// An unreadable store degrades to an empty cache.
    pub async fn load(storage: Arc<dyn CacheStorage>, stale_after: Duration, now: DateTime<Utc>) -> Self {
        let mut cache = Self::new(storage, stale_after);

        match cache.storage.load_all().await {
            Ok(rows) => {
                for (provider, snapshot) in rows {
                    let is_stale = cache.is_aged_out(&snapshot, now);
                    if is_stale {
                        log::info!(
                            "[quota:cache] {} loaded stale (observed {}s ago)",
                            provider,
                            snapshot.age_seconds(now)
                        );
                    }
                    cache.entries.insert(
                        provider,
                        CacheEntry {
                            last_good: snapshot,
                            is_stale,
                        },
                    );
                }
                log::debug!("[quota:cache] Loaded {} cached snapshots", cache.entries.len());
            }
            Err(e) => {
                log::warn!("[quota:cache] Ignoring unreadable cache, starting empty: {}", e);
            }
        }

        cache
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn get(&self, provider: &ProviderId) -> Option<&CacheEntry> {
        self.entries.get(provider)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&ProviderId, &CacheEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store a fresh snapshot and persist it
    ///
    /// The reading with the latest `observed_at` wins: an older snapshot
    /// arriving after a newer one is dropped. Persistence failures are logged;
    /// the in-memory entry is still updated.
    pub async fn put(&mut self, provider: &ProviderId, snapshot: Snapshot) -> PutOutcome {
        if let Some(existing) = self.entries.get(provider) {
            if existing.last_good.observed_at > snapshot.observed_at {
                log::debug!(
                    "[quota:cache] Dropping out-of-order snapshot for {} ({} < {})",
                    provider,
                    snapshot.observed_at,
                    existing.last_good.observed_at
                );
                return PutOutcome::Superseded;
            }
        }

        if let Err(e) = self.storage.save(provider, &snapshot).await {
            log::error!("[quota:cache] Failed to persist snapshot for {}: {}", provider, e);
        }

        self.entries.insert(
            provider.clone(),
            CacheEntry {
                last_good: snapshot,
                is_stale: false,
            },
        );
        PutOutcome::Applied
    }

    /// Flag the entry stale, keeping its snapshot. Idempotent.
    ///
    /// Returns `true` if the flag changed.
    pub fn mark_stale(&mut self, provider: &ProviderId) -> bool {
        match self.entries.get_mut(provider) {
            Some(entry) if !entry.is_stale => {
                entry.is_stale = true;
                true
            }
            _ => false,
        }
    }

    /// Flag every entry whose age now exceeds the threshold
    ///
    /// Never clears a flag; only a successful [`put`](Self::put) does that.
    pub fn refresh_staleness(&mut self, now: DateTime<Utc>) -> Vec<ProviderId> {
        let stale_after = self.stale_after;
        let mut flipped = Vec::new();

        for (provider, entry) in self.entries.iter_mut() {
            if !entry.is_stale && now - entry.last_good.observed_at > stale_after {
                entry.is_stale = true;
                flipped.push(provider.clone());
            }
        }

        flipped
    }

    /// Drop every entry from memory and durable storage
    pub async fn reset(&mut self) -> crate::Result<()> {
        self.storage.clear().await?;
        let dropped = self.entries.len();
        self.entries.clear();
        log::info!("[quota:cache] Reset cache ({} entries dropped)", dropped);
        Ok(())
    }

    fn is_aged_out(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> bool {
        now - snapshot.observed_at > self.stale_after
    }
}
