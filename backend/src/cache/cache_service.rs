use lru::LruCache;
use shared::AnalysisResult;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::models::{CacheEntry, CacheKey};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 1024,
        }
    }
}

/// In-memory analysis result cache with a TTL and LRU eviction. Never holds
/// more than `max_entries` results.
pub struct CacheService {
    ttl: Duration,
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
}

impl CacheService {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl: config.ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live entry for `key`, marked as most recently used. An expired entry
    /// is dropped instead.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<AnalysisResult>> {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => return Some(entry.result.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Stores `result` unless a live entry already exists, and returns
    /// whichever entry is now cached.
    pub fn insert_if_absent(&self, key: CacheKey, result: Arc<AnalysisResult>) -> Arc<AnalysisResult> {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired = match entries.get(&key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => return entry.result.clone(),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(&key);
        }

        // Expired results at the cold end go before any live one is evicted.
        while entries
            .peek_lru()
            .is_some_and(|(_, entry)| entry.is_expired(self.ttl, now))
        {
            entries.pop_lru();
        }
        if let Some((evicted, _)) = entries.push(key, CacheEntry::new(result.clone(), now)) {
            log::debug!("Evicting least recently used result {}", evicted.image_hash);
        }
        result
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        if !expired.is_empty() {
            log::debug!("Purged {} expired cache entries", expired.len());
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
