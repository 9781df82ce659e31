use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Request bodies.

#[derive(Serialize, Debug, Clone)]
pub struct NewNote {
    pub book_id: i64,
    pub chapter_number: i64,
    pub book_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verse_number: Option<i64>,
    pub content: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct NoteChange {
    pub content: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct NewHighlight {
    pub book_id: i64,
    pub chapter_number: i64,
    pub start_verse: i64,
    pub end_verse: i64,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_char: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_char: Option<i64>,
}

#[derive(Serialize, Debug, Clone)]
pub struct HighlightChange {
    pub color: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct NewFavorite {
    pub book_id: i64,
    pub chapter_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight_type: Option<String>,
}

/// Fire-and-forget reading-position report.
#[derive(Serialize, Debug, Clone)]
pub struct PositionUpdate {
    pub book_id: i64,
    pub chapter: i64,
    pub verse: i64,
    pub scroll_position: f64,
    pub timestamp: DateTime<Utc>,
}

// Response bodies.

#[derive(Deserialize, Debug, Clone)]
pub struct RemoteNote {
    pub note_id: String,
    pub book_id: i64,
    pub chapter_number: i64,
    pub book_name: String,
    pub verse_number: Option<i64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemoteHighlight {
    pub highlight_id: i64,
    pub book_id: i64,
    pub chapter_number: i64,
    pub start_verse: i64,
    pub end_verse: i64,
    pub color: String,
    pub start_char: Option<i64>,
    pub end_char: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemoteFavorite {
    pub favorite_id: i64,
    pub book_id: i64,
    pub chapter_number: i64,
    #[serde(default)]
    pub insight_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

// Offline content bundle shapes.

#[derive(Deserialize, Debug, Clone)]
pub struct OfflineManifest {
    pub bible_versions: Vec<ManifestVersion>,
    pub commentary_languages: Vec<ManifestLanguage>,
    pub topic_languages: Vec<ManifestLanguage>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ManifestVersion {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ManifestLanguage {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemoteVerse {
    pub book_id: i64,
    pub chapter_number: i64,
    pub verse_number: i64,
    pub text: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemoteExplanation {
    pub explanation_id: i64,
    pub book_id: i64,
    pub chapter_number: i64,
    pub verse_start: Option<i64>,
    pub verse_end: Option<i64>,
    #[serde(rename = "type")]
    pub typ: String,
    pub explanation: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TopicsBundle {
    pub topics: Vec<RemoteTopic>,
    pub references: Vec<RemoteTopicReference>,
    pub explanations: Vec<RemoteTopicExplanation>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemoteTopic {
    pub language_code: String,
    pub topic_id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub category: String,
    pub sort_order: Option<i64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemoteTopicReference {
    pub topic_id: String,
    pub reference_content: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemoteTopicExplanation {
    pub language_code: String,
    pub topic_id: String,
    #[serde(rename = "type")]
    pub typ: String,
    pub explanation: String,
}
