//! Time-bounded result cache
//!
//! Maps a fingerprint of (query text, parameters) to the last result
//! produced for it. Expired entries are removed lazily when read; there is
//! no size bound and no background sweep, so [`ResultCache::clear`] is the
//! only bulk reclamation path.
//!
//! Concurrent readers and writers never corrupt an entry. Two callers racing
//! on the same key may both miss and both store, which costs one redundant
//! backend call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::result::{QueryParams, QueryResult};

/// Deterministic cache key for a query and its parameters
///
/// An absent parameter map and an empty one produce the same key.
#[must_use]
pub fn fingerprint(query: &str, params: Option<&QueryParams>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update([0u8]);

    let empty = QueryParams::new();
    let params = params.unwrap_or(&empty);
    // BTreeMap serializes in key order
    let encoded = serde_json::to_vec(params).unwrap_or_default();
    hasher.update(&encoded);

    hex::encode(hasher.finalize())
}

struct CacheEntry {
    result: QueryResult,
    inserted_at: Instant,
}

/// Cache counters for status reporting
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
}

pub struct ResultCache {
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

impl ResultCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live entry, purging it if its age has reached the TTL
    ///
    /// The returned copy has `from_cache` set.
    pub fn get(&self, key: &str) -> Option<QueryResult> {
        let stale = match self.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.result.cached_copy());
            }
            Some(entry) => Some(entry.inserted_at),
            None => None,
        };
        // Read guard is released here; removing while holding it deadlocks the shard

        if let Some(inserted_at) = stale {
            // Only drop the entry we judged stale, not a fresh one stored concurrently
            if self
                .entries
                .remove_if(key, |_, entry| entry.inserted_at == inserted_at)
                .is_some()
            {
                self.expired.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key, "Evicted expired cache entry");
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: String, result: QueryResult) {
        self.entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        tracing::debug!(entries = count, "Result cache cleared");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}
