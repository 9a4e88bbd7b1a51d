//! Two-tier cache for synthesized audio.
//!
//! Lookups hit a bounded in-memory tier first and the persistent store
//! second; a persistent hit is promoted into memory before returning.
//! Writes go through to both tiers. The cache is a performance layer
//! only: every store failure is logged and treated as a miss.

pub mod store;

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::warn;

use crate::config::CacheProfile;
pub use store::{FsStore, PersistentStore, StoreError, StoreResult};

/// Deterministic cache key for one synthesis request.
///
/// Composed from (engine id, voice id, speed, exact batch text) with the
/// delimiter escaped inside components, so distinct tuples can never
/// produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(engine: &str, voice: Option<&str>, speed: f32, text: &str) -> Self {
        fn escape(component: &str) -> String {
            component.replace('\\', "\\\\").replace('|', "\\|")
        }
        Self(format!(
            "{}|{}|{}|{}",
            escape(engine),
            escape(voice.unwrap_or("default")),
            speed,
            escape(text),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Bounded volatile tier with strict insertion-order eviction: once full,
/// the oldest-inserted key is dropped to admit a new one. Re-inserting an
/// existing key replaces its value without refreshing its position.
struct MemoryTier {
    entries: HashMap<String, Bytes>,
    order: VecDeque<String>,
    capacity: usize,
}

impl MemoryTier {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: &str, value: Bytes) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.to_string(), value).is_some() {
            return;
        }
        self.order.push_back(key.to_string());
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Two-tier audio cache keyed by [`Fingerprint`].
pub struct AudioCache {
    memory: Mutex<MemoryTier>,
    store: Option<Arc<dyn PersistentStore>>,
    persistent_capacity: usize,
}

impl AudioCache {
    pub fn new(profile: CacheProfile, store: Option<Arc<dyn PersistentStore>>) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::new(profile.memory_entries)),
            store,
            persistent_capacity: profile.persistent_entries,
        }
    }

    /// Volatile tier first, persistent second; a persistent hit populates
    /// the volatile tier. Store errors are misses.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Bytes> {
        if let Some(hit) = self.memory.lock().get(fingerprint.as_str()) {
            return Some(hit);
        }

        let store = self.store.as_ref()?;
        match store.get(fingerprint.as_str()).await {
            Ok(Some(bytes)) => {
                self.memory.lock().insert(fingerprint.as_str(), bytes.clone());
                Some(bytes)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("persistent cache read failed, treating as miss: {e}");
                None
            }
        }
    }

    /// Writes through to both tiers and prunes the persistent tier to its
    /// capacity. Store errors are logged and dropped.
    pub async fn put(&self, fingerprint: &Fingerprint, bytes: Bytes) {
        self.memory.lock().insert(fingerprint.as_str(), bytes.clone());

        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Err(e) = store.put(fingerprint.as_str(), bytes).await {
            warn!("persistent cache write failed: {e}");
            return;
        }
        if let Err(e) = store.prune(self.persistent_capacity).await {
            warn!("persistent cache prune failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fingerprint_distinguishes_every_component() {
        let base = Fingerprint::new("xtts", Some("v"), 1.0, "text");
        assert_ne!(Fingerprint::new("piper", Some("v"), 1.0, "text"), base);
        assert_ne!(Fingerprint::new("xtts", Some("w"), 1.0, "text"), base);
        assert_ne!(Fingerprint::new("xtts", Some("v"), 1.25, "text"), base);
        assert_ne!(Fingerprint::new("xtts", Some("v"), 1.0, "other"), base);
        assert_eq!(Fingerprint::new("xtts", Some("v"), 1.0, "text"), base);
    }

    #[test]
    fn fingerprint_escapes_the_delimiter() {
        // Without escaping these two tuples would collide.
        let a = Fingerprint::new("e", Some("v|x"), 1.0, "t");
        let b = Fingerprint::new("e", Some("v"), 1.0, "x|1|t");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_defaults_missing_voice() {
        let a = Fingerprint::new("e", None, 1.0, "t");
        let b = Fingerprint::new("e", Some("default"), 1.0, "t");
        assert_eq!(a, b);
    }

    #[test]
    fn memory_tier_evicts_oldest_inserted_first() {
        let mut tier = MemoryTier::new(2);
        tier.insert("a", Bytes::from("a"));
        tier.insert("b", Bytes::from("b"));
        tier.insert("c", Bytes::from("c"));

        assert_eq!(tier.len(), 2);
        assert!(tier.get("a").is_none());
        assert!(tier.get("b").is_some());
        assert!(tier.get("c").is_some());
    }

    #[test]
    fn memory_tier_never_exceeds_capacity() {
        let mut tier = MemoryTier::new(3);
        for i in 0..50 {
            tier.insert(&format!("k{i}"), Bytes::from("v"));
            assert!(tier.len() <= 3);
        }
    }

    #[test]
    fn reinsert_does_not_refresh_position() {
        let mut tier = MemoryTier::new(2);
        tier.insert("a", Bytes::from("a1"));
        tier.insert("b", Bytes::from("b"));
        // Overwriting "a" keeps it the oldest insertion.
        tier.insert("a", Bytes::from("a2"));
        tier.insert("c", Bytes::from("c"));

        assert!(tier.get("a").is_none());
        assert!(tier.get("b").is_some());
        assert!(tier.get("c").is_some());
    }

    struct FailingStore;

    #[async_trait]
    impl PersistentStore for FailingStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<Bytes>> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }

        async fn put(&self, _key: &str, _value: Bytes) -> StoreResult<()> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }

        async fn prune(&self, _keep: usize) -> StoreResult<()> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }
    }

    #[tokio::test]
    async fn store_failures_are_misses() {
        let cache = AudioCache::new(CacheProfile::standard(), Some(Arc::new(FailingStore)));
        let fp = Fingerprint::new("e", None, 1.0, "t");

        assert!(cache.get(&fp).await.is_none());
        // The write still lands in the volatile tier.
        cache.put(&fp, Bytes::from("audio")).await;
        assert_eq!(cache.get(&fp).await, Some(Bytes::from("audio")));
    }

    struct CountingStore {
        gets: AtomicUsize,
        value: Bytes,
    }

    #[async_trait]
    impl PersistentStore for CountingStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<Bytes>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.value.clone()))
        }

        async fn put(&self, _key: &str, _value: Bytes) -> StoreResult<()> {
            Ok(())
        }

        async fn prune(&self, _keep: usize) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn persistent_hit_promotes_into_memory() {
        let store = Arc::new(CountingStore {
            gets: AtomicUsize::new(0),
            value: Bytes::from("audio"),
        });
        let cache = AudioCache::new(CacheProfile::standard(), Some(store.clone()));
        let fp = Fingerprint::new("e", None, 1.0, "t");

        assert_eq!(cache.get(&fp).await, Some(Bytes::from("audio")));
        assert_eq!(cache.get(&fp).await, Some(Bytes::from("audio")));
        // Second lookup was served from the volatile tier.
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);
    }
}
