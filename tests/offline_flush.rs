mod common;

use chrono::Utc;
use common::{setup_pool, ApiCall, RecordingApi};
use std::sync::Arc;
use versemate_core::api::model::RemoteHighlight;
use versemate_core::api::SyncApi;
use versemate_core::bookmarks::BookmarkService;
use versemate_core::config;
use versemate_core::db::repo;
use versemate_core::error::{ApiError, SyncError};
use versemate_core::highlights::HighlightService;
use versemate_core::model::{
    local_note_id, BookmarkKey, Highlight, HighlightColor, Note, ReadingPosition, SyncState,
};
use versemate_core::notes::NoteService;
use versemate_core::store::{MemoryBackend, ReadingPositionStore, StorageBackend};
use versemate_core::sync::SyncWorker;

struct Fixture {
    pool: sqlx::SqlitePool,
    api: Arc<RecordingApi>,
    backend: Arc<MemoryBackend>,
    worker: SyncWorker,
}

fn limits() -> config::Notes {
    config::Notes {
        max_content_chars: 5000,
        warn_content_chars: 4500,
    }
}

async fn fixture() -> Fixture {
    let pool = setup_pool().await;
    let api = RecordingApi::new();
    let backend = Arc::new(MemoryBackend::new());
    let sync_api: Arc<dyn SyncApi> = api.clone();

    let notes = Arc::new(NoteService::new(pool.clone(), sync_api.clone(), limits()));
    let highlights = Arc::new(HighlightService::new(pool.clone(), sync_api.clone()));
    let bookmarks = Arc::new(BookmarkService::new(pool.clone(), sync_api.clone()));
    let positions =
        ReadingPositionStore::new(Arc::clone(&backend) as Arc<dyn StorageBackend>);

    let worker = SyncWorker::new(pool.clone(), sync_api, notes, highlights, bookmarks, positions);
    Fixture {
        pool,
        api,
        backend,
        worker,
    }
}

fn stranded_note(content: &str) -> Note {
    let now = Utc::now();
    Note {
        note_id: local_note_id(),
        book_id: 1,
        chapter_number: 3,
        book_name: "Genesis".into(),
        verse_number: None,
        content: content.into(),
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn flush_replays_crash_leftovers() {
    let f = fixture().await;

    // A create that never reached the server.
    let note = stranded_note("stranded note");
    repo::insert_note(&f.pool, &note, SyncState::PendingCreate)
        .await
        .unwrap();

    // An update whose settlement was lost; the server still has the old color.
    let now = Utc::now();
    f.api
        .seed_highlight(RemoteHighlight {
            highlight_id: 2001,
            book_id: 1,
            chapter_number: 3,
            start_verse: 5,
            end_verse: 6,
            color: "yellow".into(),
            start_char: None,
            end_char: None,
            created_at: now,
            updated_at: now,
        })
        .await;
    let local = Highlight {
        highlight_id: 2001,
        book_id: 1,
        chapter_number: 3,
        start_verse: 5,
        end_verse: 6,
        color: HighlightColor::Blue,
        start_char: None,
        end_char: None,
        created_at: now,
        updated_at: now,
    };
    repo::insert_highlight(&f.pool, &local, SyncState::PendingUpdate)
        .await
        .unwrap();

    // A delete that never reached the server.
    let key = BookmarkKey::chapter(2, 5);
    f.api
        .seed_favorite(versemate_core::api::model::RemoteFavorite {
            favorite_id: 9,
            book_id: 2,
            chapter_number: 5,
            insight_type: None,
            created_at: now,
        })
        .await;
    repo::insert_bookmark(&f.pool, &key, Some(9), now, SyncState::PendingDelete)
        .await
        .unwrap();

    let outcome = f.worker.flush_once().await.unwrap();
    assert_eq!(outcome.settled, 3);
    assert_eq!(outcome.remaining, 0);

    // Note adopted its server id.
    assert!(repo::get_note(&f.pool, &note.note_id).await.unwrap().is_none());
    let all = repo::all_notes(&f.pool).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].sync_state, SyncState::Synced);
    assert_eq!(all[0].note.content, "stranded note");
    assert!(f.api.server_has_note(&all[0].note.note_id).await);

    // Highlight settled with the replayed color.
    let row = repo::get_highlight(&f.pool, 2001).await.unwrap().unwrap();
    assert_eq!(row.sync_state, SyncState::Synced);
    assert_eq!(row.highlight.color, HighlightColor::Blue);

    // Bookmark tombstone finished its delete.
    assert!(repo::get_bookmark(&f.pool, &key).await.unwrap().is_none());
    assert!(!f.api.server_has_favorite(9).await);
}

#[tokio::test]
async fn flush_reports_unsynced_positions() {
    let f = fixture().await;
    let positions = ReadingPositionStore::new(Arc::clone(&f.backend) as Arc<dyn StorageBackend>);

    let position = ReadingPosition {
        book_id: 1,
        chapter: 3,
        verse: 12,
        scroll_position: 0.4,
        timestamp: Utc::now(),
    };
    positions.save(&position).await;
    assert_eq!(positions.unsynced().await.len(), 1);

    let outcome = f.worker.flush_once().await.unwrap();
    assert_eq!(outcome.settled, 1);
    assert_eq!(f.api.calls().await, vec![ApiCall::ReportPosition(1, 3)]);
    assert!(positions.unsynced().await.is_empty());
    // The position itself survives for the next app start.
    assert!(positions.get(1, 3).await.is_some());
}

#[tokio::test]
async fn transient_failure_stops_the_sweep_and_keeps_rows() {
    let f = fixture().await;
    repo::insert_note(&f.pool, &stranded_note("first"), SyncState::PendingCreate)
        .await
        .unwrap();
    repo::insert_note(&f.pool, &stranded_note("second"), SyncState::PendingCreate)
        .await
        .unwrap();

    f.api
        .fail_next(ApiError::Status {
            status: 503,
            message: "unavailable".into(),
        })
        .await;
    assert!(f.worker.flush_once().await.is_err());
    assert_eq!(repo::count_pending(&f.pool).await.unwrap(), 2);

    // Next pass drains both.
    let outcome = f.worker.flush_once().await.unwrap();
    assert_eq!(outcome.settled, 2);
    assert_eq!(outcome.remaining, 0);
}

#[tokio::test]
async fn permanent_rejection_skips_the_row() {
    let f = fixture().await;
    repo::insert_note(&f.pool, &stranded_note("poison"), SyncState::PendingCreate)
        .await
        .unwrap();

    f.api
        .fail_next(ApiError::Status {
            status: 422,
            message: "rejected".into(),
        })
        .await;
    let outcome = f.worker.flush_once().await.unwrap();
    assert_eq!(outcome.settled, 0);
    assert_eq!(outcome.remaining, 1);
}

#[tokio::test]
async fn expired_session_aborts_the_pass() {
    let f = fixture().await;
    repo::insert_note(&f.pool, &stranded_note("queued"), SyncState::PendingCreate)
        .await
        .unwrap();

    f.api.fail_next(ApiError::Unauthorized).await;
    let err = f.worker.flush_once().await.unwrap_err();
    assert!(matches!(err, SyncError::Api(ApiError::Unauthorized)));
    assert_eq!(repo::count_pending(&f.pool).await.unwrap(), 1);
}
