//! Offline mirror: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: row and view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into those models.
//!
//! External modules should import from `versemate_core::db`; the repository
//! API and commonly used row models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{BookmarkRow, DownloadStatus, ExplanationRow, HighlightRow, NoteRow, TopicRow};
