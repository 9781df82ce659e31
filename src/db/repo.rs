use super::model::{
    BookmarkRow, DownloadStatus, ExplanationRow, HighlightRow, NoteRow, TopicExplanationRow,
    TopicReferenceRow, TopicRow, TopicRows,
};
use crate::model::{BookmarkKey, Highlight, HighlightColor, InsightKind, Note, SyncState, Verse};
use crate::sql::{escape_like, BulkInsert, OnConflict};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // A fresh mirror starts from an empty file; migrations build the schema.
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    // WAL keeps readers unblocked while a mutation commits.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=NORMAL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in file-backed SQLite URLs and make sure the parent
/// directory exists. In-memory and non-SQLite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }
    let path = match path.strip_prefix("~/") {
        Some(tail) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{tail}", home.trim_end_matches('/')),
            Err(_) => path.to_string(),
        },
        None => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---- notes ----

fn note_from_row(row: &SqliteRow) -> Result<NoteRow> {
    let state_raw: String = row.get("sync_state");
    let sync_state = SyncState::parse(&state_raw)
        .ok_or_else(|| anyhow!("note row has unknown sync_state {state_raw}"))?;
    Ok(NoteRow {
        note: Note {
            note_id: row.get("note_id"),
            book_id: row.get("book_id"),
            chapter_number: row.get("chapter_number"),
            book_name: row.get("book_name"),
            verse_number: row.get("verse_number"),
            content: row.get("content"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        },
        sync_state,
    })
}

const NOTE_COLUMNS: &str = "note_id, book_id, chapter_number, book_name, verse_number, content, \
     created_at, updated_at, sync_state";

#[instrument(skip_all)]
pub async fn insert_note(pool: &Pool, note: &Note, state: SyncState) -> Result<()> {
    sqlx::query(
        "INSERT INTO offline_notes (note_id, book_id, chapter_number, book_name, verse_number, \
         content, created_at, updated_at, sync_state) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&note.note_id)
    .bind(note.book_id)
    .bind(note.chapter_number)
    .bind(&note.book_name)
    .bind(note.verse_number)
    .bind(&note.content)
    .bind(note.created_at)
    .bind(note.updated_at)
    .bind(state.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_note(pool: &Pool, note_id: &str) -> Result<Option<NoteRow>> {
    let row = sqlx::query(&format!(
        "SELECT {NOTE_COLUMNS} FROM offline_notes WHERE note_id = ?"
    ))
    .bind(note_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(note_from_row).transpose()
}

/// Notes visible in a chapter. Rows mid-delete are hidden; they come back
/// only if the delete is rolled back.
pub async fn notes_for_chapter(
    pool: &Pool,
    book_id: i64,
    chapter_number: i64,
) -> Result<Vec<NoteRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {NOTE_COLUMNS} FROM offline_notes \
         WHERE book_id = ? AND chapter_number = ? AND sync_state != 'pending_delete' \
         ORDER BY created_at ASC"
    ))
    .bind(book_id)
    .bind(chapter_number)
    .fetch_all(pool)
    .await?;
    rows.iter().map(note_from_row).collect()
}

pub async fn all_notes(pool: &Pool) -> Result<Vec<NoteRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {NOTE_COLUMNS} FROM offline_notes \
         WHERE sync_state != 'pending_delete' ORDER BY updated_at DESC"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(note_from_row).collect()
}

#[instrument(skip_all)]
pub async fn update_note(
    pool: &Pool,
    note_id: &str,
    content: &str,
    updated_at: DateTime<Utc>,
    state: SyncState,
) -> Result<()> {
    sqlx::query(
        "UPDATE offline_notes SET content = ?, updated_at = ?, sync_state = ? WHERE note_id = ?",
    )
    .bind(content)
    .bind(updated_at)
    .bind(state.as_str())
    .bind(note_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_note_sync_state(pool: &Pool, note_id: &str, state: SyncState) -> Result<()> {
    sqlx::query("UPDATE offline_notes SET sync_state = ? WHERE note_id = ?")
        .bind(state.as_str())
        .bind(note_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_note(pool: &Pool, note_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM offline_notes WHERE note_id = ?")
        .bind(note_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Swap a placeholder id for the server-assigned row after a create is
/// acknowledged. The server copy wins for every field.
#[instrument(skip_all)]
pub async fn adopt_note_id(pool: &Pool, local_id: &str, server: &Note) -> Result<()> {
    sqlx::query(
        "UPDATE offline_notes SET note_id = ?, book_id = ?, chapter_number = ?, book_name = ?, \
         verse_number = ?, content = ?, created_at = ?, updated_at = ?, sync_state = 'synced' \
         WHERE note_id = ?",
    )
    .bind(&server.note_id)
    .bind(server.book_id)
    .bind(server.chapter_number)
    .bind(&server.book_name)
    .bind(server.verse_number)
    .bind(&server.content)
    .bind(server.created_at)
    .bind(server.updated_at)
    .bind(local_id)
    .execute(pool)
    .await
    .context("failed to adopt server note id")?;
    Ok(())
}

/// Rebuild the synced portion of the mirror from a server listing. Rows
/// still pending keep precedence until the reconcile pass settles them.
#[instrument(skip_all)]
pub async fn replace_notes(pool: &Pool, notes: &[Note]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM offline_notes WHERE sync_state = 'synced'")
        .execute(&mut *tx)
        .await?;
    for note in notes {
        sqlx::query(
            "INSERT OR IGNORE INTO offline_notes (note_id, book_id, chapter_number, book_name, \
             verse_number, content, created_at, updated_at, sync_state) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'synced')",
        )
        .bind(&note.note_id)
        .bind(note.book_id)
        .bind(note.chapter_number)
        .bind(&note.book_name)
        .bind(note.verse_number)
        .bind(&note.content)
        .bind(note.created_at)
        .bind(note.updated_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn pending_notes(pool: &Pool) -> Result<Vec<NoteRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {NOTE_COLUMNS} FROM offline_notes \
         WHERE sync_state != 'synced' ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(note_from_row).collect()
}

// ---- highlights ----

fn highlight_from_row(row: &SqliteRow) -> Result<HighlightRow> {
    let state_raw: String = row.get("sync_state");
    let sync_state = SyncState::parse(&state_raw)
        .ok_or_else(|| anyhow!("highlight row has unknown sync_state {state_raw}"))?;
    let color_raw: String = row.get("color");
    let color = HighlightColor::parse(&color_raw)
        .ok_or_else(|| anyhow!("highlight row has unknown color {color_raw}"))?;
    Ok(HighlightRow {
        highlight: Highlight {
            highlight_id: row.get("highlight_id"),
            book_id: row.get("book_id"),
            chapter_number: row.get("chapter_number"),
            start_verse: row.get("start_verse"),
            end_verse: row.get("end_verse"),
            color,
            start_char: row.get("start_char"),
            end_char: row.get("end_char"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        },
        sync_state,
    })
}

const HIGHLIGHT_COLUMNS: &str = "highlight_id, book_id, chapter_number, start_verse, end_verse, \
     color, start_char, end_char, created_at, updated_at, sync_state";

#[instrument(skip_all)]
pub async fn insert_highlight(pool: &Pool, highlight: &Highlight, state: SyncState) -> Result<()> {
    sqlx::query(
        "INSERT INTO offline_highlights (highlight_id, book_id, chapter_number, start_verse, \
         end_verse, color, start_char, end_char, created_at, updated_at, sync_state) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(highlight.highlight_id)
    .bind(highlight.book_id)
    .bind(highlight.chapter_number)
    .bind(highlight.start_verse)
    .bind(highlight.end_verse)
    .bind(highlight.color.as_str())
    .bind(highlight.start_char)
    .bind(highlight.end_char)
    .bind(highlight.created_at)
    .bind(highlight.updated_at)
    .bind(state.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_highlight(pool: &Pool, highlight_id: i64) -> Result<Option<HighlightRow>> {
    let row = sqlx::query(&format!(
        "SELECT {HIGHLIGHT_COLUMNS} FROM offline_highlights WHERE highlight_id = ?"
    ))
    .bind(highlight_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(highlight_from_row).transpose()
}

pub async fn highlights_for_chapter(
    pool: &Pool,
    book_id: i64,
    chapter_number: i64,
) -> Result<Vec<HighlightRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {HIGHLIGHT_COLUMNS} FROM offline_highlights \
         WHERE book_id = ? AND chapter_number = ? AND sync_state != 'pending_delete' \
         ORDER BY start_verse ASC, created_at ASC"
    ))
    .bind(book_id)
    .bind(chapter_number)
    .fetch_all(pool)
    .await?;
    rows.iter().map(highlight_from_row).collect()
}

#[instrument(skip_all)]
pub async fn update_highlight_color(
    pool: &Pool,
    highlight_id: i64,
    color: HighlightColor,
    updated_at: DateTime<Utc>,
    state: SyncState,
) -> Result<()> {
    sqlx::query(
        "UPDATE offline_highlights SET color = ?, updated_at = ?, sync_state = ? \
         WHERE highlight_id = ?",
    )
    .bind(color.as_str())
    .bind(updated_at)
    .bind(state.as_str())
    .bind(highlight_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_highlight_sync_state(
    pool: &Pool,
    highlight_id: i64,
    state: SyncState,
) -> Result<()> {
    sqlx::query("UPDATE offline_highlights SET sync_state = ? WHERE highlight_id = ?")
        .bind(state.as_str())
        .bind(highlight_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_highlight(pool: &Pool, highlight_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM offline_highlights WHERE highlight_id = ?")
        .bind(highlight_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn adopt_highlight_id(pool: &Pool, local_id: i64, server: &Highlight) -> Result<()> {
    sqlx::query(
        "UPDATE offline_highlights SET highlight_id = ?, book_id = ?, chapter_number = ?, \
         start_verse = ?, end_verse = ?, color = ?, start_char = ?, end_char = ?, \
         created_at = ?, updated_at = ?, sync_state = 'synced' WHERE highlight_id = ?",
    )
    .bind(server.highlight_id)
    .bind(server.book_id)
    .bind(server.chapter_number)
    .bind(server.start_verse)
    .bind(server.end_verse)
    .bind(server.color.as_str())
    .bind(server.start_char)
    .bind(server.end_char)
    .bind(server.created_at)
    .bind(server.updated_at)
    .bind(local_id)
    .execute(pool)
    .await
    .context("failed to adopt server highlight id")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn replace_highlights(pool: &Pool, highlights: &[Highlight]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM offline_highlights WHERE sync_state = 'synced'")
        .execute(&mut *tx)
        .await?;
    for h in highlights {
        sqlx::query(
            "INSERT OR IGNORE INTO offline_highlights (highlight_id, book_id, chapter_number, \
             start_verse, end_verse, color, start_char, end_char, created_at, updated_at, \
             sync_state) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'synced')",
        )
        .bind(h.highlight_id)
        .bind(h.book_id)
        .bind(h.chapter_number)
        .bind(h.start_verse)
        .bind(h.end_verse)
        .bind(h.color.as_str())
        .bind(h.start_char)
        .bind(h.end_char)
        .bind(h.created_at)
        .bind(h.updated_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn pending_highlights(pool: &Pool) -> Result<Vec<HighlightRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {HIGHLIGHT_COLUMNS} FROM offline_highlights \
         WHERE sync_state != 'synced' ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(highlight_from_row).collect()
}

// ---- bookmarks ----

fn bookmark_from_row(row: &SqliteRow) -> Result<BookmarkRow> {
    let state_raw: String = row.get("sync_state");
    let sync_state = SyncState::parse(&state_raw)
        .ok_or_else(|| anyhow!("bookmark row has unknown sync_state {state_raw}"))?;
    let insight_raw: String = row.get("insight_type");
    let insight = if insight_raw.is_empty() {
        None
    } else {
        Some(
            InsightKind::parse(&insight_raw)
                .ok_or_else(|| anyhow!("bookmark row has unknown insight_type {insight_raw}"))?,
        )
    };
    Ok(BookmarkRow {
        key: BookmarkKey {
            book_id: row.get("book_id"),
            chapter_number: row.get("chapter_number"),
            insight,
        },
        favorite_id: row.get("favorite_id"),
        created_at: row.get("created_at"),
        sync_state,
    })
}

const BOOKMARK_COLUMNS: &str =
    "book_id, chapter_number, insight_type, favorite_id, created_at, sync_state";

#[instrument(skip_all)]
pub async fn insert_bookmark(
    pool: &Pool,
    key: &BookmarkKey,
    favorite_id: Option<i64>,
    created_at: DateTime<Utc>,
    state: SyncState,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO offline_bookmarks (book_id, chapter_number, insight_type, favorite_id, \
         created_at, sync_state) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(key.book_id)
    .bind(key.chapter_number)
    .bind(key.insight_column())
    .bind(favorite_id)
    .bind(created_at)
    .bind(state.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_bookmark(pool: &Pool, key: &BookmarkKey) -> Result<Option<BookmarkRow>> {
    let row = sqlx::query(&format!(
        "SELECT {BOOKMARK_COLUMNS} FROM offline_bookmarks \
         WHERE book_id = ? AND chapter_number = ? AND insight_type = ?"
    ))
    .bind(key.book_id)
    .bind(key.chapter_number)
    .bind(key.insight_column())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(bookmark_from_row).transpose()
}

pub async fn bookmarks_for_chapter(
    pool: &Pool,
    book_id: i64,
    chapter_number: i64,
) -> Result<Vec<BookmarkRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {BOOKMARK_COLUMNS} FROM offline_bookmarks \
         WHERE book_id = ? AND chapter_number = ? AND sync_state != 'pending_delete' \
         ORDER BY insight_type ASC"
    ))
    .bind(book_id)
    .bind(chapter_number)
    .fetch_all(pool)
    .await?;
    rows.iter().map(bookmark_from_row).collect()
}

pub async fn all_bookmarks(pool: &Pool) -> Result<Vec<BookmarkRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {BOOKMARK_COLUMNS} FROM offline_bookmarks \
         WHERE sync_state != 'pending_delete' ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(bookmark_from_row).collect()
}

/// Record the id the server assigned to a bookmark and settle the row.
#[instrument(skip_all)]
pub async fn set_bookmark_favorite(pool: &Pool, key: &BookmarkKey, favorite_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE offline_bookmarks SET favorite_id = ?, sync_state = 'synced' \
         WHERE book_id = ? AND chapter_number = ? AND insight_type = ?",
    )
    .bind(favorite_id)
    .bind(key.book_id)
    .bind(key.chapter_number)
    .bind(key.insight_column())
    .execute(pool)
    .await
    .context("failed to persist favorite id")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_bookmark_sync_state(
    pool: &Pool,
    key: &BookmarkKey,
    state: SyncState,
) -> Result<()> {
    sqlx::query(
        "UPDATE offline_bookmarks SET sync_state = ? \
         WHERE book_id = ? AND chapter_number = ? AND insight_type = ?",
    )
    .bind(state.as_str())
    .bind(key.book_id)
    .bind(key.chapter_number)
    .bind(key.insight_column())
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_bookmark(pool: &Pool, key: &BookmarkKey) -> Result<()> {
    sqlx::query(
        "DELETE FROM offline_bookmarks WHERE book_id = ? AND chapter_number = ? AND insight_type = ?",
    )
    .bind(key.book_id)
    .bind(key.chapter_number)
    .bind(key.insight_column())
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn replace_bookmarks(pool: &Pool, rows: &[BookmarkRow]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM offline_bookmarks WHERE sync_state = 'synced'")
        .execute(&mut *tx)
        .await?;
    for b in rows {
        sqlx::query(
            "INSERT OR IGNORE INTO offline_bookmarks (book_id, chapter_number, insight_type, \
             favorite_id, created_at, sync_state) VALUES (?, ?, ?, ?, ?, 'synced')",
        )
        .bind(b.key.book_id)
        .bind(b.key.chapter_number)
        .bind(b.key.insight_column())
        .bind(b.favorite_id)
        .bind(b.created_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn pending_bookmarks(pool: &Pool) -> Result<Vec<BookmarkRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {BOOKMARK_COLUMNS} FROM offline_bookmarks \
         WHERE sync_state != 'synced' ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(bookmark_from_row).collect()
}

/// Rows in any pending state across the three user tables. The reconcile
/// pass polls this to decide whether it still has work.
pub async fn count_pending(pool: &Pool) -> Result<i64> {
    let notes: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM offline_notes WHERE sync_state != 'synced'")
            .fetch_one(pool)
            .await?;
    let highlights: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM offline_highlights WHERE sync_state != 'synced'")
            .fetch_one(pool)
            .await?;
    let bookmarks: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM offline_bookmarks WHERE sync_state != 'synced'")
            .fetch_one(pool)
            .await?;
    Ok(notes + highlights + bookmarks)
}

// ---- downloadable content ----
//
// Bulk loads render multi-row INSERT literals instead of binding each value;
// a bible download is ~31k rows x 5 columns, far past SQLite's default
// bind-variable limit if issued as one parameterized statement per chunk.

async fn execute_bulk(pool: &Pool, bulk: &BulkInsert) -> Result<u64> {
    if bulk.is_empty() {
        return Ok(0);
    }
    let mut inserted = 0u64;
    let mut tx = pool.begin().await?;
    for stmt in bulk.statements() {
        inserted += sqlx::query(&stmt).execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

#[instrument(skip_all)]
pub async fn load_verses(pool: &Pool, version_key: &str, verses: &[Verse]) -> Result<u64> {
    let mut bulk = BulkInsert::new(
        "offline_verses",
        &[
            "version_key",
            "book_id",
            "chapter_number",
            "verse_number",
            "text",
        ],
        OnConflict::Ignore,
    );
    for v in verses {
        bulk.push_row(vec![
            version_key.into(),
            v.book_id.into(),
            v.chapter_number.into(),
            v.verse_number.into(),
            v.text.as_str().into(),
        ]);
    }
    execute_bulk(pool, &bulk).await
}

#[instrument(skip_all)]
pub async fn load_explanations(
    pool: &Pool,
    language_code: &str,
    entries: &[ExplanationRow],
) -> Result<u64> {
    let mut bulk = BulkInsert::new(
        "offline_explanations",
        &[
            "language_code",
            "explanation_id",
            "book_id",
            "chapter_number",
            "verse_start",
            "verse_end",
            "type",
            "explanation",
        ],
        OnConflict::Ignore,
    );
    for e in entries {
        bulk.push_row(vec![
            language_code.into(),
            e.explanation_id.into(),
            e.book_id.into(),
            e.chapter_number.into(),
            e.verse_start.into(),
            e.verse_end.into(),
            e.typ.as_str().into(),
            e.explanation.as_str().into(),
        ]);
    }
    execute_bulk(pool, &bulk).await
}

#[instrument(skip_all)]
pub async fn load_topics(pool: &Pool, rows: &TopicRows) -> Result<u64> {
    let mut topics = BulkInsert::new(
        "offline_topics",
        &[
            "language_code",
            "topic_id",
            "name",
            "content",
            "category",
            "sort_order",
        ],
        OnConflict::Ignore,
    );
    for t in &rows.topics {
        topics.push_row(vec![
            t.language_code.as_str().into(),
            t.topic_id.as_str().into(),
            t.name.as_str().into(),
            t.content.as_str().into(),
            t.category.as_str().into(),
            t.sort_order.into(),
        ]);
    }

    let mut references = BulkInsert::new(
        "offline_topic_references",
        &["topic_id", "reference_content"],
        OnConflict::Ignore,
    );
    for r in &rows.references {
        references.push_row(vec![
            r.topic_id.as_str().into(),
            r.reference_content.as_str().into(),
        ]);
    }

    let mut explanations = BulkInsert::new(
        "offline_topic_explanations",
        &["language_code", "topic_id", "type", "explanation"],
        OnConflict::Ignore,
    );
    for e in &rows.explanations {
        explanations.push_row(vec![
            e.language_code.as_str().into(),
            e.topic_id.as_str().into(),
            e.typ.as_str().into(),
            e.explanation.as_str().into(),
        ]);
    }

    let mut inserted = 0u64;
    let mut tx = pool.begin().await?;
    for bulk in [&topics, &references, &explanations] {
        for stmt in bulk.statements() {
            inserted += sqlx::query(&stmt).execute(&mut *tx).await?.rows_affected();
        }
    }
    tx.commit().await?;
    Ok(inserted)
}

fn verse_from_row(row: &SqliteRow) -> Verse {
    Verse {
        book_id: row.get("book_id"),
        chapter_number: row.get("chapter_number"),
        verse_number: row.get("verse_number"),
        text: row.get("text"),
    }
}

pub async fn verses_for_chapter(
    pool: &Pool,
    version_key: &str,
    book_id: i64,
    chapter_number: i64,
) -> Result<Vec<Verse>> {
    let rows = sqlx::query(
        "SELECT book_id, chapter_number, verse_number, text FROM offline_verses \
         WHERE version_key = ? AND book_id = ? AND chapter_number = ? ORDER BY verse_number ASC",
    )
    .bind(version_key)
    .bind(book_id)
    .bind(chapter_number)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(verse_from_row).collect())
}

/// Substring search across downloaded verse text. `%` and `_` in the query
/// match literally.
pub async fn search_verses(
    pool: &Pool,
    version_key: &str,
    query: &str,
    limit: i64,
) -> Result<Vec<Verse>> {
    let pattern = format!("%{}%", escape_like(query));
    let rows = sqlx::query(
        "SELECT book_id, chapter_number, verse_number, text FROM offline_verses \
         WHERE version_key = ? AND text LIKE ? ESCAPE '\\' \
         ORDER BY book_id ASC, chapter_number ASC, verse_number ASC LIMIT ?",
    )
    .bind(version_key)
    .bind(pattern)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(verse_from_row).collect())
}

pub async fn count_verses(pool: &Pool, version_key: &str) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM offline_verses WHERE version_key = ?")
            .bind(version_key)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

pub async fn explanations_for_chapter(
    pool: &Pool,
    language_code: &str,
    book_id: i64,
    chapter_number: i64,
) -> Result<Vec<ExplanationRow>> {
    let rows = sqlx::query(
        "SELECT explanation_id, book_id, chapter_number, verse_start, verse_end, type, explanation \
         FROM offline_explanations \
         WHERE language_code = ? AND book_id = ? AND chapter_number = ? \
         ORDER BY verse_start IS NULL, verse_start ASC, explanation_id ASC",
    )
    .bind(language_code)
    .bind(book_id)
    .bind(chapter_number)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| ExplanationRow {
            explanation_id: row.get("explanation_id"),
            book_id: row.get("book_id"),
            chapter_number: row.get("chapter_number"),
            verse_start: row.get("verse_start"),
            verse_end: row.get("verse_end"),
            typ: row.get("type"),
            explanation: row.get("explanation"),
        })
        .collect())
}

pub async fn topics_for_language(pool: &Pool, language_code: &str) -> Result<Vec<TopicRow>> {
    let rows = sqlx::query(
        "SELECT language_code, topic_id, name, content, category, sort_order FROM offline_topics \
         WHERE language_code = ? ORDER BY sort_order IS NULL, sort_order ASC, name ASC",
    )
    .bind(language_code)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| TopicRow {
            language_code: row.get("language_code"),
            topic_id: row.get("topic_id"),
            name: row.get("name"),
            content: row.get("content"),
            category: row.get("category"),
            sort_order: row.get("sort_order"),
        })
        .collect())
}

pub async fn topic_reference(pool: &Pool, topic_id: &str) -> Result<Option<TopicReferenceRow>> {
    let row = sqlx::query(
        "SELECT topic_id, reference_content FROM offline_topic_references WHERE topic_id = ?",
    )
    .bind(topic_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| TopicReferenceRow {
        topic_id: row.get("topic_id"),
        reference_content: row.get("reference_content"),
    }))
}

pub async fn topic_explanations(
    pool: &Pool,
    language_code: &str,
    topic_id: &str,
) -> Result<Vec<TopicExplanationRow>> {
    let rows = sqlx::query(
        "SELECT language_code, topic_id, type, explanation FROM offline_topic_explanations \
         WHERE language_code = ? AND topic_id = ? ORDER BY type ASC",
    )
    .bind(language_code)
    .bind(topic_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| TopicExplanationRow {
            language_code: row.get("language_code"),
            topic_id: row.get("topic_id"),
            typ: row.get("type"),
            explanation: row.get("explanation"),
        })
        .collect())
}

// ---- download metadata ----

#[instrument(skip_all)]
pub async fn record_download(
    pool: &Pool,
    resource_key: &str,
    last_updated_at: DateTime<Utc>,
    downloaded_at: DateTime<Utc>,
    size_bytes: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO offline_metadata (resource_key, last_updated_at, downloaded_at, \
         size_bytes) VALUES (?, ?, ?, ?)",
    )
    .bind(resource_key)
    .bind(last_updated_at)
    .bind(downloaded_at)
    .bind(size_bytes)
    .execute(pool)
    .await?;
    Ok(())
}

fn download_from_row(row: &SqliteRow) -> DownloadStatus {
    DownloadStatus {
        resource_key: row.get("resource_key"),
        last_updated_at: row.get("last_updated_at"),
        downloaded_at: row.get("downloaded_at"),
        size_bytes: row.get("size_bytes"),
    }
}

pub async fn download_status(pool: &Pool, resource_key: &str) -> Result<Option<DownloadStatus>> {
    let row = sqlx::query(
        "SELECT resource_key, last_updated_at, downloaded_at, size_bytes FROM offline_metadata \
         WHERE resource_key = ?",
    )
    .bind(resource_key)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(download_from_row))
}

pub async fn list_downloads(pool: &Pool) -> Result<Vec<DownloadStatus>> {
    let rows = sqlx::query(
        "SELECT resource_key, last_updated_at, downloaded_at, size_bytes FROM offline_metadata \
         ORDER BY resource_key ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(download_from_row).collect())
}

#[instrument(skip_all)]
pub async fn remove_download(pool: &Pool, resource_key: &str) -> Result<()> {
    sqlx::query("DELETE FROM offline_metadata WHERE resource_key = ?")
        .bind(resource_key)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn remove_verses(pool: &Pool, version_key: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM offline_verses WHERE version_key = ?")
        .bind(version_key)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn remove_explanations(pool: &Pool, language_code: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM offline_explanations WHERE language_code = ?")
        .bind(language_code)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Drop one language's topics and explanations, then garbage-collect
/// reference rows no remaining topic points at (references are shared
/// across languages).
#[instrument(skip_all)]
pub async fn remove_topics(pool: &Pool, language_code: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let topics = sqlx::query("DELETE FROM offline_topics WHERE language_code = ?")
        .bind(language_code)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM offline_topic_explanations WHERE language_code = ?")
        .bind(language_code)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "DELETE FROM offline_topic_references \
         WHERE topic_id NOT IN (SELECT DISTINCT topic_id FROM offline_topics)",
    )
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(topics.rows_affected())
}

// ---- wipes ----

/// Drop every user-owned row. Called on sign-out, after which the mirror
/// holds content only.
#[instrument(skip_all)]
pub async fn clear_user_data(pool: &Pool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM offline_notes").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM offline_highlights")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM offline_bookmarks")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Drop every downloaded content row plus its metadata.
#[instrument(skip_all)]
pub async fn clear_content(pool: &Pool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for table in [
        "offline_verses",
        "offline_explanations",
        "offline_topics",
        "offline_topic_references",
        "offline_topic_explanations",
        "offline_metadata",
    ] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}
