//! Row and view models returned by the offline repositories.
//!
//! Keep these structs focused on the data returned by queries. Business
//! logic lives in the service layer.

use chrono::{DateTime, Utc};

use crate::model::{BookmarkKey, Highlight, Note, SyncState};

/// Note row plus its replication state.
#[derive(Debug, Clone)]
pub struct NoteRow {
    pub note: Note,
    pub sync_state: SyncState,
}

/// Highlight row plus its replication state.
#[derive(Debug, Clone)]
pub struct HighlightRow {
    pub highlight: Highlight,
    pub sync_state: SyncState,
}

/// Bookmark row. `favorite_id` arrives with the server ack; bookmarks
/// created offline carry `None` until the reconcile pass reports them.
#[derive(Debug, Clone)]
pub struct BookmarkRow {
    pub key: BookmarkKey,
    pub favorite_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub sync_state: SyncState,
}

/// Commentary entry attached to a chapter or verse range.
#[derive(Debug, Clone)]
pub struct ExplanationRow {
    pub explanation_id: i64,
    pub book_id: i64,
    pub chapter_number: i64,
    pub verse_start: Option<i64>,
    pub verse_end: Option<i64>,
    pub typ: String,
    pub explanation: String,
}

/// Topic summary row.
#[derive(Debug, Clone)]
pub struct TopicRow {
    pub language_code: String,
    pub topic_id: String,
    pub name: String,
    pub content: String,
    pub category: String,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TopicReferenceRow {
    pub topic_id: String,
    pub reference_content: String,
}

#[derive(Debug, Clone)]
pub struct TopicExplanationRow {
    pub language_code: String,
    pub topic_id: String,
    pub typ: String,
    pub explanation: String,
}

/// The three row sets that make up one downloaded topics bundle.
#[derive(Debug, Clone, Default)]
pub struct TopicRows {
    pub topics: Vec<TopicRow>,
    pub references: Vec<TopicReferenceRow>,
    pub explanations: Vec<TopicExplanationRow>,
}

/// Download bookkeeping for one offline resource bundle.
#[derive(Debug, Clone)]
pub struct DownloadStatus {
    pub resource_key: String,
    pub last_updated_at: DateTime<Utc>,
    pub downloaded_at: DateTime<Utc>,
    pub size_bytes: i64,
}
