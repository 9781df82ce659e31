//! Note draft persistence and debounced autosave.
//!
//! Draft keys are `note_draft_{book}_{note_id}` for edits of an existing
//! note and `note_draft_{book}_new` for a note being composed, so one
//! in-progress edit per target survives an app restart.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::backend::StorageBackend;
use super::kv::KvStore;
use crate::model::NoteDraft;

const NAMESPACE: &str = "note_draft";

fn draft_suffix(book_id: i64, note_id: Option<&str>) -> String {
    match note_id {
        Some(id) => format!("{book_id}_{id}"),
        None => format!("{book_id}_new"),
    }
}

#[derive(Clone)]
pub struct DraftStore {
    kv: KvStore,
}

impl DraftStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            kv: KvStore::new(backend, NAMESPACE),
        }
    }

    pub async fn save(&self, draft: &NoteDraft) {
        let suffix = draft_suffix(draft.book_id, draft.note_id.as_deref());
        self.kv.save(&suffix, draft).await;
    }

    pub async fn get(&self, book_id: i64, note_id: Option<&str>) -> Option<NoteDraft> {
        self.kv.get(&draft_suffix(book_id, note_id)).await
    }

    /// Discard a draft, typically after the note it belonged to was saved.
    pub async fn remove(&self, book_id: i64, note_id: Option<&str>) {
        self.kv.remove(&draft_suffix(book_id, note_id)).await;
    }

    pub async fn clear_all(&self) {
        self.kv.clear_all().await;
    }
}

/// Trailing-edge debounce around [`DraftStore::save`]. Each keystroke calls
/// [`schedule`]; only the newest draft inside the window is written.
/// Generations are tracked per draft key, so edits to one note never cancel
/// the pending save of another.
///
/// [`schedule`]: DraftSaver::schedule
#[derive(Clone)]
pub struct DraftSaver {
    store: DraftStore,
    delay: Duration,
    generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl DraftSaver {
    pub fn new(store: DraftStore, delay: Duration) -> Self {
        Self {
            store,
            delay,
            generations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn bump(&self, suffix: &str) -> u64 {
        let mut generations = self.generations.lock().unwrap();
        let slot = generations.entry(suffix.to_string()).or_insert(0);
        *slot += 1;
        *slot
    }

    /// Queue a save for `delay` from now. A newer schedule or flush for the
    /// same draft supersedes it.
    pub fn schedule(&self, draft: NoteDraft) {
        let suffix = draft_suffix(draft.book_id, draft.note_id.as_deref());
        let generation = self.bump(&suffix);
        let generations = Arc::clone(&self.generations);
        let store = self.store.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_latest =
                generations.lock().unwrap().get(&suffix).copied() == Some(generation);
            if still_latest {
                store.save(&draft).await;
            }
        });
    }

    /// Write immediately, invalidating any pending timer for the same draft.
    /// Used when the editor closes and the draft must not be lost to the
    /// window.
    pub async fn flush(&self, draft: NoteDraft) {
        self.bump(&draft_suffix(draft.book_id, draft.note_id.as_deref()));
        self.store.save(&draft).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryBackend;
    use chrono::Utc;

    fn draft(book_id: i64, note_id: Option<&str>, content: &str) -> NoteDraft {
        NoteDraft {
            content: content.into(),
            saved_at: Utc::now(),
            book_id,
            chapter_number: 3,
            note_id: note_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn draft_keys_distinguish_new_from_existing() {
        let backend = Arc::new(MemoryBackend::new());
        let store = DraftStore::new(backend.clone());

        store.save(&draft(1, None, "composing")).await;
        store.save(&draft(1, Some("note-456"), "editing")).await;

        assert!(backend.contains("note_draft_1_new"));
        assert!(backend.contains("note_draft_1_note-456"));

        assert_eq!(store.get(1, None).await.unwrap().content, "composing");
        assert_eq!(
            store.get(1, Some("note-456")).await.unwrap().content,
            "editing"
        );

        store.remove(1, None).await;
        assert!(store.get(1, None).await.is_none());
        assert!(store.get(1, Some("note-456")).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_collapse_to_one_write() {
        let backend = Arc::new(MemoryBackend::new());
        let saver = DraftSaver::new(DraftStore::new(backend.clone()), Duration::from_millis(500));

        saver.schedule(draft(1, None, "a"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        saver.schedule(draft(1, None, "ab"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        saver.schedule(draft(1, None, "abc"));

        // Let the last window elapse.
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(backend.set_count(), 1);
        let store = DraftStore::new(backend);
        assert_eq!(store.get(1, None).await.unwrap().content, "abc");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_drafts_debounce_independently() {
        let backend = Arc::new(MemoryBackend::new());
        let store = DraftStore::new(backend.clone());
        let saver = DraftSaver::new(store.clone(), Duration::from_millis(500));

        // A schedule for a different note inside the window must not cancel
        // the first note's pending write.
        saver.schedule(draft(1, None, "first note"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        saver.schedule(draft(2, None, "second note"));

        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(backend.set_count(), 2);
        assert_eq!(store.get(1, None).await.unwrap().content, "first note");
        assert_eq!(store.get(2, None).await.unwrap().content, "second note");
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_now_and_cancels_timer() {
        let backend = Arc::new(MemoryBackend::new());
        let store = DraftStore::new(backend.clone());
        let saver = DraftSaver::new(store.clone(), Duration::from_millis(500));

        saver.schedule(draft(1, None, "typed"));
        saver.flush(draft(1, None, "final")).await;
        assert_eq!(store.get(1, None).await.unwrap().content, "final");

        tokio::time::sleep(Duration::from_millis(600)).await;
        // The scheduled write was superseded, not replayed.
        assert_eq!(backend.set_count(), 1);
        assert_eq!(store.get(1, None).await.unwrap().content, "final");
    }
}
