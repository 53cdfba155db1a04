//! Content-addressed memo of generation results.
//!
//! Keys are hashed (blake3 over their JSON encoding) so two requests with equal
//! content share a response. Streaming grows an entry chunk by chunk through
//! [`ResponseCache::extend`]; hashing the key on every chunk is avoided by a
//! second LRU from key identity (the `Arc` address) to its hash. The identity
//! LRU holds a clone of the `Arc`, so an address cannot be reused while its
//! entry is alive.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

/// Default capacity of both LRUs.
pub const DEFAULT_RESPONSES: usize = 100;

struct Inner<K> {
    identity: LruCache<usize, (Arc<K>, String)>,
    responses: LruCache<String, String>,
}

/// Bounded response memo keyed by any serializable request.
pub struct ResponseCache<K> {
    inner: Mutex<Inner<K>>,
}

impl<K: Serialize> ResponseCache<K> {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                identity: LruCache::new(cap),
                responses: LruCache::new(cap),
            }),
        }
    }

    /// Content hash of a key.
    pub fn hash(key: &K) -> String {
        let bytes = serde_json::to_vec(key).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    fn key(inner: &mut Inner<K>, key: &Arc<K>) -> String {
        let addr = Arc::as_ptr(key) as usize;
        if let Some((held, hash)) = inner.identity.get(&addr) {
            if Arc::ptr_eq(held, key) {
                return hash.clone();
            }
        }
        let hash = Self::hash(key);
        inner.identity.put(addr, (key.clone(), hash.clone()));
        hash
    }

    /// The full cached response for a key.
    pub fn get(&self, key: &Arc<K>) -> Option<String> {
        let mut inner = self.inner.lock();
        let hash = Self::key(&mut inner, key);
        inner.responses.get(&hash).cloned()
    }

    /// Replace the response for a key.
    pub fn update(&self, key: &Arc<K>, value: impl Into<String>) {
        let mut inner = self.inner.lock();
        let hash = Self::key(&mut inner, key);
        inner.responses.put(hash, value.into());
    }

    /// Append a chunk to the response for a key.
    pub fn extend(&self, key: &Arc<K>, chunk: &str) {
        let mut inner = self.inner.lock();
        let hash = Self::key(&mut inner, key);
        match inner.responses.get_mut(&hash) {
            Some(existing) => existing.push_str(chunk),
            None => {
                inner.responses.put(hash, chunk.to_string());
            }
        }
    }

    /// Drop the response for a key.
    pub fn invalidate(&self, key: &Arc<K>) {
        let mut inner = self.inner.lock();
        let hash = Self::key(&mut inner, key);
        if inner.responses.pop(&hash).is_some() {
            trace!(hash = %hash, "response invalidated");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> std::fmt::Debug for ResponseCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ResponseCache")
            .field("responses", &inner.responses.len())
            .field("identities", &inner.identity.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Key {
        text: &'static str,
        lang: &'static str,
    }

    #[test]
    fn test_extend_then_get_by_content() {
        let cache = ResponseCache::new(10);
        let key = Arc::new(Key { text: "Hello.", lang: "zh" });
        cache.extend(&key, "你");
        cache.extend(&key, "好。");

        let same_content = Arc::new(Key { text: "Hello.", lang: "zh" });
        assert_eq!(cache.get(&same_content).as_deref(), Some("你好。"));
        let other = Arc::new(Key { text: "Hello.", lang: "ja" });
        assert_eq!(cache.get(&other), None);
    }

    #[test]
    fn test_update_replaces_and_invalidate_removes() {
        let cache = ResponseCache::new(10);
        let key = Arc::new(Key { text: "a", lang: "en" });
        cache.extend(&key, "partial");
        cache.update(&key, "full");
        assert_eq!(cache.get(&key).as_deref(), Some("full"));

        cache.invalidate(&key);
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ResponseCache::new(2);
        let keys: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|text| Arc::new(Key { text, lang: "en" }))
            .collect();
        for key in &keys {
            cache.update(key, key.text);
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&keys[0]), None);
        assert_eq!(cache.get(&keys[2]).as_deref(), Some("c"));
    }

    #[test]
    fn test_hash_is_stable_and_content_based() {
        let a = Key { text: "x", lang: "en" };
        let b = Key { text: "x", lang: "en" };
        assert_eq!(ResponseCache::<Key>::hash(&a), ResponseCache::<Key>::hash(&b));
        assert_eq!(ResponseCache::<Key>::hash(&a).len(), 64);
    }
}
