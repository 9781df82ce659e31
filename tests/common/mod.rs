//! Shared test fixtures: an in-memory pool and a recording API double.
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use versemate_core::api::model::{
    HighlightChange, NewFavorite, NewHighlight, NewNote, NoteChange, PositionUpdate,
    RemoteFavorite, RemoteHighlight, RemoteNote,
};
use versemate_core::api::SyncApi;
use versemate_core::error::ApiError;

pub async fn setup_pool() -> sqlx::SqlitePool {
    // One pooled connection, otherwise each checkout would get its own
    // private in-memory database.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[allow(dead_code)]
pub fn note_limits() -> versemate_core::config::Notes {
    versemate_core::config::Notes {
        max_content_chars: 5000,
        warn_content_chars: 4500,
    }
}

/// Every request the double saw, in arrival order.
#[derive(Debug, Clone, PartialEq)]
#[allow(dead_code)]
pub enum ApiCall {
    CreateNote(String),
    UpdateNote(String, String),
    DeleteNote(String),
    CreateHighlight(String),
    UpdateHighlight(i64, String),
    DeleteHighlight(i64),
    CreateFavorite(i64, i64, Option<String>),
    DeleteFavorite(i64),
    ReportPosition(i64, i64),
}

/// A tiny in-memory stand-in for the server: acks echo the request under a
/// fresh server id, deletes of unknown ids return 404, and queued failures
/// are served before anything else.
#[derive(Default)]
pub struct RecordingApi {
    calls: Mutex<Vec<ApiCall>>,
    failures: Mutex<VecDeque<ApiError>>,
    next_id: AtomicI64,
    notes: Mutex<HashMap<String, RemoteNote>>,
    highlights: Mutex<HashMap<i64, RemoteHighlight>>,
    favorites: Mutex<HashMap<i64, RemoteFavorite>>,
}

#[allow(dead_code)]
impl RecordingApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        })
    }

    /// Queue an error; the next call, whatever it is, returns it.
    pub async fn fail_next(&self, err: ApiError) {
        self.failures.lock().await.push_back(err);
    }

    pub async fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().await.clone()
    }

    pub async fn server_has_note(&self, note_id: &str) -> bool {
        self.notes.lock().await.contains_key(note_id)
    }

    pub async fn server_has_favorite(&self, favorite_id: i64) -> bool {
        self.favorites.lock().await.contains_key(&favorite_id)
    }

    pub async fn seed_highlight(&self, remote: RemoteHighlight) {
        self.highlights
            .lock()
            .await
            .insert(remote.highlight_id, remote);
    }

    pub async fn seed_favorite(&self, remote: RemoteFavorite) {
        self.favorites
            .lock()
            .await
            .insert(remote.favorite_id, remote);
    }

    async fn take_failure(&self) -> Option<ApiError> {
        self.failures.lock().await.pop_front()
    }

    fn next(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn not_found() -> ApiError {
        ApiError::Status {
            status: 404,
            message: "not found".into(),
        }
    }
}

#[async_trait]
impl SyncApi for RecordingApi {
    async fn create_note(&self, note: &NewNote) -> Result<RemoteNote, ApiError> {
        self.calls
            .lock()
            .await
            .push(ApiCall::CreateNote(note.content.clone()));
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        let now = Utc::now();
        let remote = RemoteNote {
            note_id: format!("srv-note-{}", self.next()),
            book_id: note.book_id,
            chapter_number: note.chapter_number,
            book_name: note.book_name.clone(),
            verse_number: note.verse_number,
            content: note.content.clone(),
            created_at: now,
            updated_at: now,
        };
        self.notes
            .lock()
            .await
            .insert(remote.note_id.clone(), remote.clone());
        Ok(remote)
    }

    async fn update_note(
        &self,
        note_id: &str,
        change: &NoteChange,
    ) -> Result<RemoteNote, ApiError> {
        self.calls.lock().await.push(ApiCall::UpdateNote(
            note_id.to_string(),
            change.content.clone(),
        ));
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        let mut notes = self.notes.lock().await;
        let note = notes.get_mut(note_id).ok_or_else(Self::not_found)?;
        note.content = change.content.clone();
        note.updated_at = Utc::now();
        Ok(note.clone())
    }

    async fn delete_note(&self, note_id: &str) -> Result<(), ApiError> {
        self.calls
            .lock()
            .await
            .push(ApiCall::DeleteNote(note_id.to_string()));
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        self.notes
            .lock()
            .await
            .remove(note_id)
            .map(|_| ())
            .ok_or_else(Self::not_found)
    }

    async fn list_notes(&self) -> Result<Vec<RemoteNote>, ApiError> {
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        Ok(self.notes.lock().await.values().cloned().collect())
    }

    async fn create_highlight(&self, highlight: &NewHighlight) -> Result<RemoteHighlight, ApiError> {
        self.calls
            .lock()
            .await
            .push(ApiCall::CreateHighlight(highlight.color.clone()));
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        let now = Utc::now();
        let remote = RemoteHighlight {
            highlight_id: 1000 + self.next(),
            book_id: highlight.book_id,
            chapter_number: highlight.chapter_number,
            start_verse: highlight.start_verse,
            end_verse: highlight.end_verse,
            color: highlight.color.clone(),
            start_char: highlight.start_char,
            end_char: highlight.end_char,
            created_at: now,
            updated_at: now,
        };
        self.highlights
            .lock()
            .await
            .insert(remote.highlight_id, remote.clone());
        Ok(remote)
    }

    async fn update_highlight(
        &self,
        highlight_id: i64,
        change: &HighlightChange,
    ) -> Result<RemoteHighlight, ApiError> {
        self.calls
            .lock()
            .await
            .push(ApiCall::UpdateHighlight(highlight_id, change.color.clone()));
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        let mut highlights = self.highlights.lock().await;
        let highlight = highlights.get_mut(&highlight_id).ok_or_else(Self::not_found)?;
        highlight.color = change.color.clone();
        highlight.updated_at = Utc::now();
        Ok(highlight.clone())
    }

    async fn delete_highlight(&self, highlight_id: i64) -> Result<(), ApiError> {
        self.calls
            .lock()
            .await
            .push(ApiCall::DeleteHighlight(highlight_id));
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        self.highlights
            .lock()
            .await
            .remove(&highlight_id)
            .map(|_| ())
            .ok_or_else(Self::not_found)
    }

    async fn list_highlights(&self) -> Result<Vec<RemoteHighlight>, ApiError> {
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        Ok(self.highlights.lock().await.values().cloned().collect())
    }

    async fn create_favorite(&self, favorite: &NewFavorite) -> Result<RemoteFavorite, ApiError> {
        self.calls.lock().await.push(ApiCall::CreateFavorite(
            favorite.book_id,
            favorite.chapter_number,
            favorite.insight_type.clone(),
        ));
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        let remote = RemoteFavorite {
            favorite_id: 500 + self.next(),
            book_id: favorite.book_id,
            chapter_number: favorite.chapter_number,
            insight_type: favorite.insight_type.clone(),
            created_at: Utc::now(),
        };
        self.favorites
            .lock()
            .await
            .insert(remote.favorite_id, remote.clone());
        Ok(remote)
    }

    async fn delete_favorite(&self, favorite_id: i64) -> Result<(), ApiError> {
        self.calls
            .lock()
            .await
            .push(ApiCall::DeleteFavorite(favorite_id));
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        self.favorites
            .lock()
            .await
            .remove(&favorite_id)
            .map(|_| ())
            .ok_or_else(Self::not_found)
    }

    async fn list_favorites(&self) -> Result<Vec<RemoteFavorite>, ApiError> {
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        Ok(self.favorites.lock().await.values().cloned().collect())
    }

    async fn report_position(&self, position: &PositionUpdate) -> Result<(), ApiError> {
        self.calls.lock().await.push(ApiCall::ReportPosition(
            position.book_id,
            position.chapter,
        ));
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        Ok(())
    }
}
