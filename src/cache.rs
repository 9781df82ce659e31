//! In-memory caches fronting the offline mirror.
//!
//! Each service owns one cache per read shape (usually keyed by chapter).
//! Optimistic writes patch the cached value in place so the UI sees the
//! change before the server settles it.
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct StateCache<K, V> {
    entries: Mutex<HashMap<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Eq + Hash + Clone, V: Clone> StateCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(v.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: K, value: V) {
        self.entries.lock().unwrap().insert(key, value);
    }

    /// Patch the cached value in place. Returns false when nothing is
    /// cached for the key, in which case there is nothing to patch; the
    /// next read loads fresh state anyway.
    pub fn update<F: FnOnce(&mut V)>(&self, key: &K, patch: F) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(key) {
            Some(v) => {
                patch(v);
                true
            }
            None => false,
        }
    }

    /// Cached value for the key, or run `fetch` and remember its result.
    pub async fn load<F, Fut, E>(&self, key: &K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }
        let v = fetch().await?;
        self.put(key.clone(), v.clone());
        Ok(v)
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.lock().unwrap().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Entry count plus lifetime hit and miss totals. Totals survive
    /// `clear` so they stay meaningful across sign-in cycles.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.lock().unwrap().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for StateCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
