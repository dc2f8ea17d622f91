// =============================================================================
// cache.rs — REMEMBERING WHICH DISTRICTS DELHI HAS
// =============================================================================
//
// The list of Indian states changes roughly once a decade. The courts in a
// complex change when a new judge is posted. Neither needs to be fetched
// from a slow government portal on every dropdown click.
//
// This is a bounded LRU keyed by (level, parent path), with a TTL per
// level. Only successful lookups are ever stored: a failed fetch must not
// turn into a cached empty list. Expired entries are evicted lazily on
// read. PDFs and cause lists never come near this cache.
// =============================================================================

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::models::{Level, LocationNode};

/// Cache key: the level being listed plus the codes of every ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub level: Level,
    pub parent_path: Vec<String>,
}

impl CacheKey {
    pub fn new(level: Level, parent_path: &[&str]) -> Self {
        Self {
            level,
            parent_path: parent_path.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Time-to-live for each level of the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelTtls {
    pub states: Duration,
    pub districts: Duration,
    pub complexes: Duration,
    pub courts: Duration,
}

impl LevelTtls {
    pub fn from_config(config: &Config) -> Self {
        Self {
            states: config.states_ttl,
            districts: config.districts_ttl,
            complexes: config.complexes_ttl,
            courts: config.courts_ttl,
        }
    }

    pub fn for_level(&self, level: Level) -> Duration {
        match level {
            Level::State => self.states,
            Level::District => self.districts,
            Level::Complex => self.complexes,
            Level::Court => self.courts,
        }
    }
}

struct CacheEntry {
    nodes: Arc<Vec<LocationNode>>,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_live(&self) -> bool {
        self.inserted_at.elapsed() < self.ttl
    }
}

pub struct LookupCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttls: LevelTtls,
}

impl LookupCache {
    pub fn new(capacity: usize, ttls: LevelTtls) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttls,
        }
    }

    /// A live entry for `key`, if there is one. Expired entries are evicted.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Vec<LocationNode>>> {
        let mut entries = self.entries.lock();
        let found = entries
            .get(key)
            .map(|entry| entry.is_live().then(|| entry.nodes.clone()));
        match found {
            Some(Some(nodes)) => Some(nodes),
            Some(None) => {
                entries.pop(key);
                debug!(level = %key.level, parent = ?key.parent_path, "Lookup cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Store `nodes` unless a live entry is already there, and return
    /// whichever list ends up cached.
    pub fn insert_if_absent(&self, key: CacheKey, nodes: Vec<LocationNode>) -> Arc<Vec<LocationNode>> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key).filter(|e| e.is_live()) {
            return existing.nodes.clone();
        }

        let nodes = Arc::new(nodes);
        let ttl = self.ttls.for_level(key.level);
        entries.put(
            key,
            CacheEntry {
                nodes: nodes.clone(),
                inserted_at: Instant::now(),
                ttl,
            },
        );
        nodes
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ttls(ttl: Duration) -> LevelTtls {
        LevelTtls {
            states: ttl,
            districts: ttl,
            complexes: ttl,
            courts: Duration::ZERO,
        }
    }

    fn delhi() -> Vec<LocationNode> {
        vec![LocationNode::new("6", "Delhi", Level::State)]
    }

    #[test]
    fn test_hit_after_insert() {
        let cache = LookupCache::new(8, ttls(Duration::from_secs(60)));
        let key = CacheKey::new(Level::State, &[]);
        assert!(cache.get(&key).is_none());

        cache.insert_if_absent(key.clone(), delhi());
        assert_eq!(cache.get(&key).unwrap()[0].code, "6");
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let cache = LookupCache::new(8, ttls(Duration::from_secs(60)));
        let key = CacheKey::new(Level::State, &[]);
        cache.insert_if_absent(key.clone(), delhi());
        let kept = cache.insert_if_absent(key, vec![]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_zero_ttl_level_never_hits() {
        let cache = LookupCache::new(8, ttls(Duration::from_secs(60)));
        let key = CacheKey::new(Level::Court, &["6", "6-3", "6-3-1"]);
        cache.insert_if_absent(key.clone(), delhi());
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = LookupCache::new(2, ttls(Duration::from_secs(60)));
        let a = CacheKey::new(Level::District, &["6"]);
        let b = CacheKey::new(Level::District, &["7"]);
        let c = CacheKey::new(Level::District, &["8"]);
        cache.insert_if_absent(a.clone(), delhi());
        cache.insert_if_absent(b.clone(), delhi());
        cache.get(&a);
        cache.insert_if_absent(c, delhi());
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
    }

    #[test]
    fn test_invalidate_all() {
        let cache = LookupCache::new(8, ttls(Duration::from_secs(60)));
        cache.insert_if_absent(CacheKey::new(Level::State, &[]), delhi());
        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}
