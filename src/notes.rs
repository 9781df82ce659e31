//! Note service: optimistic CRUD for user notes.
//!
//! Notes mirror the server rows keyed by a server-assigned string id.
//! Creating one offline-first means inserting under a `local-` placeholder,
//! calling the server, then adopting the real id on ack. All edits to one
//! note serialize on its lane so a rapid edit-then-delete settles in order.
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::model::{NewNote, NoteChange, RemoteNote};
use crate::api::SyncApi;
use crate::cache::{CacheStats, StateCache};
use crate::config;
use crate::db::model::NoteRow;
use crate::db::repo::{self, Pool};
use crate::error::{ApiError, SyncError};
use crate::model::{local_note_id, Note, SyncState};
use crate::optimistic::{InFlight, Mutation, MutationLanes};

type ChapterKey = (i64, i64);

pub struct NoteService {
    pool: Pool,
    api: Arc<dyn SyncApi>,
    limits: config::Notes,
    cache: StateCache<ChapterKey, Vec<NoteRow>>,
    lanes: MutationLanes<String>,
    in_flight: InFlight<String>,
}

impl NoteService {
    pub fn new(pool: Pool, api: Arc<dyn SyncApi>, limits: config::Notes) -> Self {
        Self {
            pool,
            api,
            limits,
            cache: StateCache::new(),
            lanes: MutationLanes::new(),
            in_flight: InFlight::new(),
        }
    }

    pub fn is_saving(&self, note_id: &str) -> bool {
        self.in_flight.contains(&note_id.to_string())
    }

    pub async fn notes_for_chapter(
        &self,
        book_id: i64,
        chapter_number: i64,
    ) -> Result<Vec<NoteRow>, SyncError> {
        let pool = self.pool.clone();
        self.cache
            .load(&(book_id, chapter_number), || async move {
                repo::notes_for_chapter(&pool, book_id, chapter_number)
                    .await
                    .map_err(SyncError::from)
            })
            .await
    }

    pub async fn all_notes(&self) -> Result<Vec<NoteRow>, SyncError> {
        Ok(repo::all_notes(&self.pool).await?)
    }

    /// Create a note. Returns the server's copy; on rejection the
    /// placeholder row is removed and nothing remains.
    pub async fn create(
        &self,
        book_id: i64,
        chapter_number: i64,
        book_name: &str,
        verse_number: Option<i64>,
        content: &str,
    ) -> Result<Note, SyncError> {
        validate_content(content, &self.limits)?;

        let now = Utc::now();
        let local = Note {
            note_id: local_note_id(),
            book_id,
            chapter_number,
            book_name: book_name.to_string(),
            verse_number,
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };
        let chapter = (book_id, chapter_number);

        let _lane = self.lanes.lock(&local.note_id).await;
        let _flag = self.in_flight.begin(local.note_id.clone());

        let mut mutation: Mutation<()> = Mutation::new();
        mutation.begin(()).map_err(anyhow::Error::from)?;

        repo::insert_note(&self.pool, &local, SyncState::PendingCreate).await?;
        self.cache.update(&chapter, |rows| {
            rows.push(NoteRow {
                note: local.clone(),
                sync_state: SyncState::PendingCreate,
            })
        });

        let req = NewNote {
            book_id,
            chapter_number,
            book_name: book_name.to_string(),
            verse_number,
            content: content.to_string(),
        };
        debug!(book_id, chapter_number, "creating note");
        match self.api.create_note(&req).await {
            Ok(remote) => {
                let server = Note::from(remote);
                repo::adopt_note_id(&self.pool, &local.note_id, &server).await?;
                self.cache.update(&chapter, |rows| {
                    if let Some(row) = rows.iter_mut().find(|r| r.note.note_id == local.note_id) {
                        row.note = server.clone();
                        row.sync_state = SyncState::Synced;
                    }
                });
                mutation.commit().map_err(anyhow::Error::from)?;
                Ok(server)
            }
            Err(e) => {
                warn!(error = %e, "note create rejected, rolling back");
                mutation.roll_back().map_err(anyhow::Error::from)?;
                repo::delete_note(&self.pool, &local.note_id).await?;
                self.cache.invalidate(&chapter);
                Err(e.into())
            }
        }
    }

    /// Edit a note's content. On rejection the exact prior content,
    /// timestamp, and replication state come back.
    pub async fn update(&self, note_id: &str, content: &str) -> Result<Note, SyncError> {
        validate_content(content, &self.limits)?;

        let _lane = self.lanes.lock(&note_id.to_string()).await;
        let _flag = self.in_flight.begin(note_id.to_string());

        let row = repo::get_note(&self.pool, note_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("note {note_id}")))?;
        let chapter = (row.note.book_id, row.note.chapter_number);

        if row.sync_state == SyncState::PendingCreate {
            // The create has not settled. Fold the edit into the local row;
            // the eventual create carries the new content.
            let updated_at = Utc::now();
            repo::update_note(
                &self.pool,
                note_id,
                content,
                updated_at,
                SyncState::PendingCreate,
            )
            .await?;
            self.cache.invalidate(&chapter);
            let mut note = row.note;
            note.content = content.to_string();
            note.updated_at = updated_at;
            return Ok(note);
        }

        let mut mutation: Mutation<NoteRow> = Mutation::new();
        mutation.begin(row.clone()).map_err(anyhow::Error::from)?;

        let updated_at = Utc::now();
        repo::update_note(
            &self.pool,
            note_id,
            content,
            updated_at,
            SyncState::PendingUpdate,
        )
        .await?;
        self.cache.update(&chapter, |rows| {
            if let Some(r) = rows.iter_mut().find(|r| r.note.note_id == note_id) {
                r.note.content = content.to_string();
                r.note.updated_at = updated_at;
                r.sync_state = SyncState::PendingUpdate;
            }
        });

        let change = NoteChange {
            content: content.to_string(),
        };
        debug!(note_id, "updating note");
        match self.api.update_note(note_id, &change).await {
            Ok(remote) => {
                let server = Note::from(remote);
                repo::adopt_note_id(&self.pool, note_id, &server).await?;
                self.cache.update(&chapter, |rows| {
                    if let Some(r) = rows.iter_mut().find(|r| r.note.note_id == note_id) {
                        r.note = server.clone();
                        r.sync_state = SyncState::Synced;
                    }
                });
                mutation.commit().map_err(anyhow::Error::from)?;
                Ok(server)
            }
            Err(e) => {
                warn!(error = %e, "note update rejected, rolling back");
                let snapshot = mutation.roll_back().map_err(anyhow::Error::from)?;
                repo::update_note(
                    &self.pool,
                    note_id,
                    &snapshot.note.content,
                    snapshot.note.updated_at,
                    snapshot.sync_state,
                )
                .await?;
                self.cache.invalidate(&chapter);
                Err(e.into())
            }
        }
    }

    /// Delete a note. Rows whose create never settled are dropped locally
    /// without a server round-trip.
    pub async fn remove(&self, note_id: &str) -> Result<(), SyncError> {
        let _lane = self.lanes.lock(&note_id.to_string()).await;
        let _flag = self.in_flight.begin(note_id.to_string());

        let Some(row) = repo::get_note(&self.pool, note_id).await? else {
            return Ok(());
        };
        let chapter = (row.note.book_id, row.note.chapter_number);

        match row.sync_state {
            SyncState::PendingDelete => return Ok(()),
            SyncState::PendingCreate => {
                repo::delete_note(&self.pool, note_id).await?;
                self.cache
                    .update(&chapter, |rows| rows.retain(|r| r.note.note_id != note_id));
                return Ok(());
            }
            SyncState::Synced | SyncState::PendingUpdate => {}
        }

        let mut mutation: Mutation<NoteRow> = Mutation::new();
        mutation.begin(row).map_err(anyhow::Error::from)?;

        repo::set_note_sync_state(&self.pool, note_id, SyncState::PendingDelete).await?;
        self.cache
            .update(&chapter, |rows| rows.retain(|r| r.note.note_id != note_id));

        debug!(note_id, "deleting note");
        match self.api.delete_note(note_id).await {
            // Already gone server-side counts as settled.
            Ok(()) | Err(ApiError::Status { status: 404, .. }) => {
                repo::delete_note(&self.pool, note_id).await?;
                mutation.commit().map_err(anyhow::Error::from)?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "note delete rejected, rolling back");
                let snapshot = mutation.roll_back().map_err(anyhow::Error::from)?;
                repo::set_note_sync_state(&self.pool, note_id, snapshot.sync_state).await?;
                self.cache.invalidate(&chapter);
                Err(e.into())
            }
        }
    }

    /// Rebuild the synced mirror rows from the server's note listing.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let remote = self.api.list_notes().await?;
        let notes: Vec<Note> = remote.into_iter().map(Note::from).collect();
        repo::replace_notes(&self.pool, &notes).await?;
        self.cache.clear();
        Ok(())
    }

    /// Replay rows left pending by a crash or a fire-and-forget write.
    /// Each row settles under its lane so an interactive mutation can never
    /// interleave with its replay. Transient failures stop the sweep;
    /// permanent rejections skip the row and leave it for a later refresh.
    pub async fn flush_pending(&self) -> Result<usize, SyncError> {
        let pending = repo::pending_notes(&self.pool).await?;
        let mut settled = 0;
        for stale in pending {
            let _lane = self.lanes.lock(&stale.note.note_id).await;
            // Re-read under the lane; the row may have settled meanwhile.
            let Some(row) = repo::get_note(&self.pool, &stale.note.note_id).await? else {
                continue;
            };
            match row.sync_state {
                SyncState::Synced => continue,
                SyncState::PendingCreate => {
                    let req = NewNote {
                        book_id: row.note.book_id,
                        chapter_number: row.note.chapter_number,
                        book_name: row.note.book_name.clone(),
                        verse_number: row.note.verse_number,
                        content: row.note.content.clone(),
                    };
                    match self.api.create_note(&req).await {
                        Ok(remote) => {
                            let server = Note::from(remote);
                            repo::adopt_note_id(&self.pool, &row.note.note_id, &server).await?;
                        }
                        Err(e) if e.is_transient() || matches!(e, ApiError::Unauthorized) => {
                            return Err(e.into())
                        }
                        Err(e) => {
                            warn!(error = %e, note_id = %row.note.note_id, "note create replay rejected");
                            continue;
                        }
                    }
                }
                SyncState::PendingUpdate => {
                    let change = NoteChange {
                        content: row.note.content.clone(),
                    };
                    match self.api.update_note(&row.note.note_id, &change).await {
                        Ok(remote) => {
                            let server = Note::from(remote);
                            repo::adopt_note_id(&self.pool, &row.note.note_id, &server).await?;
                        }
                        // Deleted on another device; the server listing wins.
                        Err(ApiError::Status { status: 404, .. }) => {
                            repo::delete_note(&self.pool, &row.note.note_id).await?;
                        }
                        Err(e) if e.is_transient() || matches!(e, ApiError::Unauthorized) => {
                            return Err(e.into())
                        }
                        Err(e) => {
                            warn!(error = %e, note_id = %row.note.note_id, "note update replay rejected");
                            continue;
                        }
                    }
                }
                SyncState::PendingDelete => {
                    match self.api.delete_note(&row.note.note_id).await {
                        Ok(()) | Err(ApiError::Status { status: 404, .. }) => {
                            repo::delete_note(&self.pool, &row.note.note_id).await?;
                        }
                        Err(e) if e.is_transient() || matches!(e, ApiError::Unauthorized) => {
                            return Err(e.into())
                        }
                        Err(e) => {
                            warn!(error = %e, note_id = %row.note.note_id, "note delete replay rejected");
                            continue;
                        }
                    }
                }
            }
            settled += 1;
        }
        if settled > 0 {
            self.cache.clear();
        }
        Ok(settled)
    }

    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl From<RemoteNote> for Note {
    fn from(r: RemoteNote) -> Self {
        Note {
            note_id: r.note_id,
            book_id: r.book_id,
            chapter_number: r.chapter_number,
            book_name: r.book_name,
            verse_number: r.verse_number,
            content: r.content,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn validate_content(content: &str, limits: &config::Notes) -> Result<(), SyncError> {
    if content.trim().is_empty() {
        return Err(SyncError::Validation("note content is empty".into()));
    }
    let chars = content.chars().count();
    if chars > limits.max_content_chars {
        return Err(SyncError::Validation(format!(
            "note content is {chars} characters, the limit is {}",
            limits.max_content_chars
        )));
    }
    Ok(())
}
