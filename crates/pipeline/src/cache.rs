//! TTL cache of resolved type mappings, keyed `"{data_source_id}:{shape_hash}"`.
//!
//! Entries hold the mapping with its transformations. Writers invalidate by
//! mapping id, which drops every key pointing at that mapping.
//!
//! Every invalidation bumps a generation counter. A reader that loaded a
//! mapping from the database only caches it if no invalidation happened
//! since it started, so a load racing a write cannot put the old mapping
//! back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use strata_core::mapping::{cache_key, TypeMapping};
use strata_core::types::DbId;
use tokio::sync::RwLock;

struct CacheEntry {
    mapping: Arc<TypeMapping>,
    inserted_at: Instant,
}

pub struct MappingCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    generation: AtomicU64,
}

impl MappingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, data_source_id: DbId, shape_hash: &str) -> Option<Arc<TypeMapping>> {
        let key = cache_key(data_source_id, shape_hash);
        let entries = self.entries.read().await;
        entries
            .get(&key)
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .map(|e| Arc::clone(&e.mapping))
    }

    /// Read before loading a mapping; pass it to [`Self::insert_if_current`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cache `mapping` unless an invalidation happened after `generation`
    /// was read. Returns whether the mapping was stored.
    pub async fn insert_if_current(&self, mapping: Arc<TypeMapping>, generation: u64) -> bool {
        let key = cache_key(mapping.data_source_id, &mapping.shape_hash);
        let mut entries = self.entries.write().await;
        if self.generation() != generation {
            return false;
        }
        entries.retain(|_, e| e.inserted_at.elapsed() < self.ttl);
        entries.insert(
            key,
            CacheEntry {
                mapping,
                inserted_at: Instant::now(),
            },
        );
        true
    }

    /// Drop every entry of `mapping_id`. Returns how many were removed.
    pub async fn invalidate_mapping(&self, mapping_id: DbId) -> usize {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        let before = entries.len();
        entries.retain(|_, e| e.mapping.id != mapping_id);
        before - entries.len()
    }

    pub async fn invalidate_key(&self, data_source_id: DbId, shape_hash: &str) {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.remove(&cache_key(data_source_id, shape_hash));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(id: DbId, source: DbId, hash: &str) -> Arc<TypeMapping> {
        Arc::new(TypeMapping {
            id,
            container_id: 1,
            data_source_id: source,
            shape_hash: hash.into(),
            sample_payload: None,
            active: true,
            transformations: vec![],
        })
    }

    async fn insert(cache: &MappingCache, mapping: Arc<TypeMapping>) {
        assert!(cache.insert_if_current(mapping, cache.generation()).await);
    }

    #[tokio::test]
    async fn hit_then_invalidate() {
        let cache = MappingCache::new(Duration::from_secs(60));
        insert(&cache, mapping(1, 2, "h")).await;
        insert(&cache, mapping(3, 2, "k")).await;

        assert_eq!(cache.get(2, "h").await.map(|m| m.id), Some(1));
        assert!(cache.get(9, "h").await.is_none());

        assert_eq!(cache.invalidate_mapping(1).await, 1);
        assert!(cache.get(2, "h").await.is_none());
        assert_eq!(cache.len().await, 1);

        cache.invalidate_key(2, "k").await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn load_started_before_invalidation_is_not_cached() {
        let cache = MappingCache::new(Duration::from_secs(60));
        let before_load = cache.generation();

        // A writer changes the mapping while the reader is still loading it.
        cache.invalidate_mapping(1).await;

        assert!(!cache.insert_if_current(mapping(1, 2, "h"), before_load).await);
        assert!(cache.get(2, "h").await.is_none());

        assert!(cache.insert_if_current(mapping(1, 2, "h"), cache.generation()).await);
        assert_eq!(cache.get(2, "h").await.map(|m| m.id), Some(1));
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache = MappingCache::new(Duration::ZERO);
        insert(&cache, mapping(1, 2, "h")).await;
        assert!(cache.get(2, "h").await.is_none());
    }
}
