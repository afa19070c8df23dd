//! In-memory TTL cache for merged forecasts.
//!
//! Entries expire lazily: a read that finds a stale entry removes it and
//! reports a miss. Uses `tokio::time::Instant` so paused test clocks apply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::bundle::ForecastBundle;

#[derive(Debug, Clone)]
struct CacheEntry {
    bundle: Arc<ForecastBundle>,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.inserted_at) < ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub ttl: Duration,
}

#[derive(Debug)]
pub struct WeatherCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: RwLock<Duration>,
}

impl WeatherCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: RwLock::new(ttl),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<ForecastBundle>> {
        let ttl = *self.ttl.read();
        {
            let entries = self.entries.read();
            let entry = entries.get(key)?;
            if entry.is_fresh(Instant::now(), ttl) {
                return Some(Arc::clone(&entry.bundle));
            }
        }

        // Stale. Re-check under the write lock; a writer may have refreshed it.
        let mut entries = self.entries.write();
        let fresh = entries
            .get(key)
            .filter(|entry| entry.is_fresh(Instant::now(), ttl))
            .map(|entry| Arc::clone(&entry.bundle));
        if fresh.is_none() {
            entries.remove(key);
            tracing::trace!(key, "Evicted expired cache entry");
        }
        fresh
    }

    /// Insert or replace; last writer wins.
    pub fn set(&self, key: impl Into<String>, bundle: Arc<ForecastBundle>) {
        self.entries.write().insert(
            key.into(),
            CacheEntry {
                bundle,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        let dropped = entries.len();
        entries.clear();
        tracing::debug!(dropped, "Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            ttl: *self.ttl.read(),
        }
    }

    /// Applies to existing entries as well as new ones.
    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.write() = ttl;
    }
}
