//! Reading-position persistence.
//!
//! One entry per `(book, chapter)` under `reading_position_{book}_{chapter}`.
//! Saves are local-first; the reconcile pass reports unsynced positions to
//! the server when it gets a chance and flips their flag.
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::backend::StorageBackend;
use super::kv::KvStore;
use crate::model::ReadingPosition;

const NAMESPACE: &str = "reading_position";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPosition {
    #[serde(flatten)]
    position: ReadingPosition,
    synced: bool,
}

#[derive(Clone)]
pub struct ReadingPositionStore {
    kv: KvStore,
}

impl ReadingPositionStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            kv: KvStore::new(backend, NAMESPACE),
        }
    }

    fn suffix(book_id: i64, chapter: i64) -> String {
        format!("{book_id}_{chapter}")
    }

    /// Persist the position locally. Fire-and-forget; the new entry starts
    /// out unsynced.
    pub async fn save(&self, position: &ReadingPosition) {
        let suffix = Self::suffix(position.book_id, position.chapter);
        let stored = StoredPosition {
            position: position.clone(),
            synced: false,
        };
        self.kv.save(&suffix, &stored).await;
    }

    pub async fn get(&self, book_id: i64, chapter: i64) -> Option<ReadingPosition> {
        self.kv
            .get::<StoredPosition>(&Self::suffix(book_id, chapter))
            .await
            .map(|s| s.position)
    }

    pub async fn remove(&self, book_id: i64, chapter: i64) {
        self.kv.remove(&Self::suffix(book_id, chapter)).await;
    }

    /// Positions saved locally but not yet reported to the server.
    pub async fn unsynced(&self) -> Vec<ReadingPosition> {
        let mut out = Vec::new();
        for suffix in self.kv.suffixes().await {
            if let Some(stored) = self.kv.get::<StoredPosition>(&suffix).await {
                if !stored.synced {
                    out.push(stored.position);
                }
            }
        }
        out
    }

    /// Mark a position as reported. A save that raced in between wins: it
    /// rewrote the entry as unsynced and will be reported next pass.
    pub async fn mark_synced(&self, position: &ReadingPosition) {
        let suffix = Self::suffix(position.book_id, position.chapter);
        match self.kv.get::<StoredPosition>(&suffix).await {
            Some(stored) if stored.position.timestamp == position.timestamp => {
                let synced = StoredPosition {
                    position: stored.position,
                    synced: true,
                };
                self.kv.save(&suffix, &synced).await;
            }
            _ => {}
        }
    }

    pub async fn clear_all(&self) {
        self.kv.clear_all().await;
    }
}
