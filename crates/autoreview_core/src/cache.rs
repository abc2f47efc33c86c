use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::model::WikiId;

/// Block history is looked up from January 1 of the edit year, so the answer only
/// depends on the year of the edit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockCacheKey {
    pub wiki: WikiId,
    pub username: String,
    pub year: i32,
}

impl BlockCacheKey {
    pub fn new(wiki: &WikiId, username: &str, year: i32) -> Self {
        Self {
            wiki: wiki.clone(),
            username: username.to_string(),
            year,
        }
    }
}

/// Caller-owned memo for block-history lookups. Only successful lookups are cached.
pub trait BlockHistoryCache: Send + Sync {
    fn get(&self, key: &BlockCacheKey) -> Option<bool>;
    fn insert(&self, key: BlockCacheKey, blocked: bool);
}

/// Bounded LRU with a per-entry time to live.
pub struct LruBlockCache {
    entries: Mutex<LruCache<BlockCacheKey, (bool, Instant)>>,
    ttl: Duration,
}

impl LruBlockCache {
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn get_at(&self, key: &BlockCacheKey, now: Instant) -> Option<bool> {
        let Ok(mut entries) = self.entries.lock() else {
            return None;
        };
        let (blocked, stored_at) = *entries.get(key)?;
        if now.saturating_duration_since(stored_at) > self.ttl {
            entries.pop(key);
            return None;
        }
        Some(blocked)
    }

    fn insert_at(&self, key: BlockCacheKey, blocked: bool, now: Instant) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(key, (blocked, now));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockHistoryCache for LruBlockCache {
    fn get(&self, key: &BlockCacheKey) -> Option<bool> {
        self.get_at(key, Instant::now())
    }

    fn insert(&self, key: BlockCacheKey, blocked: bool) {
        self.insert_at(key, blocked, Instant::now());
    }
}
