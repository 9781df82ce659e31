//! Namespaced JSON storage over a [`StorageBackend`].
//!
//! Writes are fire-and-forget: a failed save must never take down the
//! reading flow, so it is logged and absorbed. Reads degrade to `None` on
//! any backend or decode failure.
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use super::backend::StorageBackend;

#[derive(Clone)]
pub struct KvStore {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
}

impl KvStore {
    pub fn new(backend: Arc<dyn StorageBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}_{suffix}", self.namespace)
    }

    pub async fn save<T: Serialize>(&self, suffix: &str, value: &T) {
        let key = self.key(suffix);
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "failed to encode kv value");
                return;
            }
        };
        if let Err(e) = self.backend.set(&key, &json).await {
            warn!(key, error = %e, "kv write failed");
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, suffix: &str) -> Option<T> {
        let key = self.key(suffix);
        let raw = match self.backend.get(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "kv read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "kv entry corrupt, ignoring");
                None
            }
        }
    }

    pub async fn remove(&self, suffix: &str) {
        let key = self.key(suffix);
        if let Err(e) = self.backend.remove(&key).await {
            warn!(key, error = %e, "kv remove failed");
        }
    }

    /// Remove every key in this namespace. Keys belonging to other
    /// namespaces on the same backend are untouched.
    pub async fn clear_all(&self) {
        let keys = match self.backend.get_all_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "kv key listing failed");
                return;
            }
        };
        let prefix = format!("{}_", self.namespace);
        let mine: Vec<String> = keys.into_iter().filter(|k| k.starts_with(&prefix)).collect();
        if mine.is_empty() {
            return;
        }
        if let Err(e) = self.backend.multi_remove(&mine).await {
            warn!(namespace = %self.namespace, error = %e, "kv clear failed");
        }
    }

    /// Suffixes of every key currently stored in this namespace.
    pub async fn suffixes(&self) -> Vec<String> {
        let keys = match self.backend.get_all_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "kv key listing failed");
                return Vec::new();
            }
        };
        let prefix = format!("{}_", self.namespace);
        keys.into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryBackend;

    #[tokio::test]
    async fn clear_all_respects_namespaces() {
        let backend = Arc::new(MemoryBackend::new());
        let positions = KvStore::new(backend.clone(), "reading_position");
        let drafts = KvStore::new(backend.clone(), "note_draft");

        positions.save("1_3", &"p1").await;
        positions.save("2_5", &"p2").await;
        drafts.save("1_new", &"d1").await;

        positions.clear_all().await;

        assert!(positions.get::<String>("1_3").await.is_none());
        assert!(positions.get::<String>("2_5").await.is_none());
        assert_eq!(drafts.get::<String>("1_new").await.as_deref(), Some("d1"));
    }

    #[tokio::test]
    async fn failed_writes_are_absorbed() {
        let backend = Arc::new(MemoryBackend::new());
        let store = KvStore::new(backend.clone(), "reading_position");

        backend.set_fail_writes(true);
        store.save("1_3", &"value").await;
        assert!(store.get::<String>("1_3").await.is_none());

        backend.set_fail_writes(false);
        store.save("1_3", &"value").await;
        assert_eq!(store.get::<String>("1_3").await.as_deref(), Some("value"));
    }

    #[tokio::test]
    async fn corrupt_entries_read_as_none() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("reading_position_1_3", "{not json").await.unwrap();
        let store = KvStore::new(backend, "reading_position");
        assert!(store.get::<String>("1_3").await.is_none());
    }

    #[tokio::test]
    async fn suffixes_strip_the_namespace() {
        let backend = Arc::new(MemoryBackend::new());
        let store = KvStore::new(backend.clone(), "reading_position");
        store.save("1_3", &"a").await;
        store.save("12_40", &"b").await;
        backend.set("note_draft_1_new", "\"x\"").await.unwrap();

        let mut suffixes = store.suffixes().await;
        suffixes.sort();
        assert_eq!(suffixes, vec!["12_40", "1_3"]);
    }
}
