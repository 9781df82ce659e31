use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reconciliation state of a mirrored row. Rows are written as one of the
/// pending states during an optimistic mutation and settle to `Synced` once
/// the server acknowledges; rows still pending after a restart are replayed
/// by the reconcile pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::PendingCreate => "pending_create",
            SyncState::PendingUpdate => "pending_update",
            SyncState::PendingDelete => "pending_delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "synced" => Some(SyncState::Synced),
            "pending_create" => Some(SyncState::PendingCreate),
            "pending_update" => Some(SyncState::PendingUpdate),
            "pending_delete" => Some(SyncState::PendingDelete),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self, SyncState::Synced)
    }
}

/// The fixed highlight palette. Anything outside this set is rejected at the
/// parse boundary rather than stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    Yellow,
    Green,
    Blue,
    Pink,
    Orange,
}

impl HighlightColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightColor::Yellow => "yellow",
            HighlightColor::Green => "green",
            HighlightColor::Blue => "blue",
            HighlightColor::Pink => "pink",
            HighlightColor::Orange => "orange",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "yellow" => Some(HighlightColor::Yellow),
            "green" => Some(HighlightColor::Green),
            "blue" => Some(HighlightColor::Blue),
            "pink" => Some(HighlightColor::Pink),
            "orange" => Some(HighlightColor::Orange),
            _ => None,
        }
    }
}

/// Bookmarkable insight variants attached to a chapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Summary,
    Byline,
    Detailed,
}

impl InsightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::Summary => "summary",
            InsightKind::Byline => "byline",
            InsightKind::Detailed => "detailed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "summary" => Some(InsightKind::Summary),
            "byline" => Some(InsightKind::Byline),
            "detailed" => Some(InsightKind::Detailed),
            _ => None,
        }
    }
}

/// Natural key of a bookmark: a chapter, optionally narrowed to one of its
/// insight panels. Membership in the bookmark set is the only state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BookmarkKey {
    pub book_id: i64,
    pub chapter_number: i64,
    pub insight: Option<InsightKind>,
}

impl BookmarkKey {
    pub fn chapter(book_id: i64, chapter_number: i64) -> Self {
        Self {
            book_id,
            chapter_number,
            insight: None,
        }
    }

    pub fn insight(book_id: i64, chapter_number: i64, kind: InsightKind) -> Self {
        Self {
            book_id,
            chapter_number,
            insight: Some(kind),
        }
    }

    /// Column encoding of the insight discriminant; empty string means a
    /// plain chapter bookmark (keeps the composite primary key NULL-free).
    pub fn insight_column(&self) -> &'static str {
        self.insight.map(|k| k.as_str()).unwrap_or("")
    }
}

/// A user note, mirrored from the server. `note_id` is server-assigned;
/// notes created locally carry a placeholder id until the create is acked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub note_id: String,
    pub book_id: i64,
    pub chapter_number: i64,
    pub book_name: String,
    pub verse_number: Option<i64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Placeholder id for a note created before the server round-trip completes.
pub fn local_note_id() -> String {
    format!("local-{}", uuid::Uuid::new_v4())
}

pub fn is_local_note_id(id: &str) -> bool {
    id.starts_with("local-")
}

/// A verse-range highlight. Server ids are positive; local placeholders are
/// negative so the two can never collide.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Highlight {
    pub highlight_id: i64,
    pub book_id: i64,
    pub chapter_number: i64,
    pub start_verse: i64,
    pub end_verse: i64,
    pub color: HighlightColor,
    pub start_char: Option<i64>,
    pub end_char: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Placeholder id for a highlight awaiting its server id.
pub fn local_highlight_id(now: DateTime<Utc>) -> i64 {
    -now.timestamp_millis().abs()
}

pub fn is_local_highlight_id(id: i64) -> bool {
    id < 0
}

/// Last reading position within a chapter. One logical row per
/// `(book_id, chapter)`; each save replaces the previous one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadingPosition {
    pub book_id: i64,
    pub chapter: i64,
    pub verse: i64,
    pub scroll_position: f64,
    pub timestamp: DateTime<Utc>,
}

/// An unsaved note draft. Drafts live only in the local store and are never
/// pushed to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteDraft {
    pub content: String,
    pub saved_at: DateTime<Utc>,
    pub book_id: i64,
    pub chapter_number: i64,
    pub note_id: Option<String>,
}

/// A single verse of downloaded Bible text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verse {
    pub book_id: i64,
    pub chapter_number: i64,
    pub verse_number: i64,
    pub text: String,
}
