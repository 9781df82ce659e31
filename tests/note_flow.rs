mod common;

use common::{note_limits, setup_pool, ApiCall, RecordingApi};
use versemate_core::db::repo;
use versemate_core::error::{ApiError, SyncError};
use versemate_core::model::{is_local_note_id, local_note_id, Note, SyncState};
use versemate_core::notes::NoteService;

fn service(pool: sqlx::SqlitePool, api: std::sync::Arc<RecordingApi>) -> NoteService {
    NoteService::new(pool, api, note_limits())
}

#[tokio::test]
async fn create_adopts_the_server_id() {
    let pool = setup_pool().await;
    let api = RecordingApi::new();
    let notes = service(pool.clone(), api.clone());

    let note = notes
        .create(1, 3, "Genesis", Some(5), "Light before luminaries.")
        .await
        .unwrap();
    assert_eq!(note.note_id, "srv-note-1");
    assert!(!is_local_note_id(&note.note_id));

    let row = repo::get_note(&pool, "srv-note-1").await.unwrap().unwrap();
    assert_eq!(row.sync_state, SyncState::Synced);
    assert_eq!(row.note.content, "Light before luminaries.");

    // The placeholder row was adopted, not duplicated.
    let all = repo::all_notes(&pool).await.unwrap();
    assert_eq!(all.len(), 1);

    let visible = notes.notes_for_chapter(1, 3).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].note.note_id, "srv-note-1");
}

#[tokio::test]
async fn rejected_create_leaves_no_trace() {
    let pool = setup_pool().await;
    let api = RecordingApi::new();
    let notes = service(pool.clone(), api.clone());

    api.fail_next(ApiError::Status {
        status: 422,
        message: "too long".into(),
    })
    .await;

    let err = notes
        .create(1, 3, "Genesis", None, "Some content")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Api(_)));

    assert!(repo::all_notes(&pool).await.unwrap().is_empty());
    assert!(notes.notes_for_chapter(1, 3).await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_update_restores_the_exact_prior_row() {
    let pool = setup_pool().await;
    let api = RecordingApi::new();
    let notes = service(pool.clone(), api.clone());

    let created = notes
        .create(1, 3, "Genesis", None, "original content")
        .await
        .unwrap();
    let before = repo::get_note(&pool, &created.note_id)
        .await
        .unwrap()
        .unwrap();

    api.fail_next(ApiError::Status {
        status: 500,
        message: "boom".into(),
    })
    .await;
    let err = notes
        .update(&created.note_id, "replacement content")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Api(_)));

    let after = repo::get_note(&pool, &created.note_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.note, before.note);
    assert_eq!(after.sync_state, before.sync_state);

    let visible = notes.notes_for_chapter(1, 3).await.unwrap();
    assert_eq!(visible[0].note.content, "original content");
}

#[tokio::test]
async fn settled_update_carries_the_server_copy() {
    let pool = setup_pool().await;
    let api = RecordingApi::new();
    let notes = service(pool.clone(), api.clone());

    let created = notes.create(1, 3, "Genesis", None, "draft one").await.unwrap();
    let updated = notes.update(&created.note_id, "draft two").await.unwrap();
    assert_eq!(updated.content, "draft two");
    assert!(updated.updated_at >= created.updated_at);

    let row = repo::get_note(&pool, &created.note_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.sync_state, SyncState::Synced);
    assert_eq!(row.note.content, "draft two");
}

#[tokio::test]
async fn updating_a_missing_note_is_not_found() {
    let pool = setup_pool().await;
    let api = RecordingApi::new();
    let notes = service(pool, api.clone());

    let err = notes.update("srv-note-99", "content").await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
    // The id lookup failed before any request went out.
    assert!(api.calls().await.is_empty());
}

#[tokio::test]
async fn validation_rejects_before_any_state_change() {
    let pool = setup_pool().await;
    let api = RecordingApi::new();
    let notes = service(pool.clone(), api.clone());

    let err = notes.create(1, 3, "Genesis", None, "   ").await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    let err = notes
        .create(1, 3, "Genesis", None, &"x".repeat(5001))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    assert!(api.calls().await.is_empty());
    assert!(repo::all_notes(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_settles_when_the_server_already_forgot() {
    let pool = setup_pool().await;
    let api = RecordingApi::new();
    let notes = service(pool.clone(), api.clone());

    // A synced row with no server counterpart, as after a stale hydration.
    let orphan = Note {
        note_id: "srv-note-77".into(),
        book_id: 1,
        chapter_number: 3,
        book_name: "Genesis".into(),
        verse_number: None,
        content: "gone remotely".into(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    repo::insert_note(&pool, &orphan, SyncState::Synced)
        .await
        .unwrap();

    notes.remove("srv-note-77").await.unwrap();
    assert!(repo::get_note(&pool, "srv-note-77").await.unwrap().is_none());
    assert_eq!(
        api.calls().await,
        vec![ApiCall::DeleteNote("srv-note-77".into())]
    );
}

#[tokio::test]
async fn edits_to_an_unsettled_create_stay_local() {
    let pool = setup_pool().await;
    let api = RecordingApi::new();
    let notes = service(pool.clone(), api.clone());

    // Crash leftover: a create that never reached the server.
    let stranded = Note {
        note_id: local_note_id(),
        book_id: 1,
        chapter_number: 3,
        book_name: "Genesis".into(),
        verse_number: None,
        content: "first pass".into(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    repo::insert_note(&pool, &stranded, SyncState::PendingCreate)
        .await
        .unwrap();

    let edited = notes.update(&stranded.note_id, "second pass").await.unwrap();
    assert_eq!(edited.content, "second pass");

    let row = repo::get_note(&pool, &stranded.note_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.sync_state, SyncState::PendingCreate);
    assert_eq!(row.note.content, "second pass");
    assert!(api.calls().await.is_empty());
}
