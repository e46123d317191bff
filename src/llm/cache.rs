//! Time-bounded cache of model answers.
//!
//! Keys combine a context tag (the knowledge topic) with the normalized query,
//! so "What are your PRICES?" and "what are your prices?" share an entry while
//! the same words under a different topic do not.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clock::{Clock, to_chrono};

/// A cached answer.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub answer: String,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry may still be served at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Trim, collapse internal whitespace and lowercase.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Cache key for a query under a context tag.
pub fn cache_key(tag: &str, query: &str) -> String {
    format!("{tag}:{}", normalize_query(query))
}

/// In-memory answer cache with TTL and a size cap.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Look up a fresh answer. Expired entries are removed on the way out.
    pub async fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_fresh(now) => return Some(entry.answer.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_fresh(now)) {
            entries.remove(key);
            debug!(key, "Evicted expired cache entry");
        }
        None
    }

    /// Store an answer, evicting the oldest fifth of the cache when full.
    pub async fn put(&self, key: impl Into<String>, answer: impl Into<String>) {
        let key = key.into();
        let now = self.clock.now();
        let entry = CacheEntry {
            answer: answer.into(),
            inserted_at: now,
            expires_at: now + to_chrono(self.ttl),
        };

        let mut entries = self.entries.write().await;
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let evict = (self.max_entries / 5).max(1);
            let mut by_age: Vec<(String, DateTime<Utc>)> = entries
                .iter()
                .map(|(k, e)| (k.clone(), e.inserted_at))
                .collect();
            by_age.sort_by_key(|(_, inserted_at)| *inserted_at);
            for (old_key, _) in by_age.into_iter().take(evict) {
                entries.remove(&old_key);
            }
            debug!(evicted = evict, "Cache full, evicted oldest entries");
        }
        entries.insert(key, entry);
    }

    /// Remove every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh(now));
        let removed = before - entries.len();
        if removed > 0 {
            info!(count = removed, "Purged expired cache entries");
        }
        removed
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        info!("Response cache cleared");
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Spawn a background task that periodically purges expired entries.
pub fn spawn_cache_sweep(
    cache: Arc<ResponseCache>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            cache.purge_expired().await;
        }
    })
}
