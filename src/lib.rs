//! Offline persistence and sync core for the VerseMate Bible reader.
//!
//! The crate keeps a SQLite mirror of the user's notes, highlights, and
//! bookmarks plus downloadable Bible text, commentaries, and topics, and
//! settles every interactive mutation optimistically against
//! `api.versemate.org`: apply locally, call the server, commit the ack or
//! roll back to the exact prior state. A background reconcile pass replays
//! whatever a crash or a fire-and-forget write left pending.
//!
//! The service modules (`notes`, `highlights`, `bookmarks`) are the surface
//! UI hooks consume; `store` holds the small key-value state (reading
//! positions, note drafts) that never needs SQL.
pub mod api;
pub mod auth;
pub mod bookmarks;
pub mod cache;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod highlights;
pub mod model;
pub mod notes;
pub mod optimistic;
pub mod progress;
pub mod sql;
pub mod store;
pub mod sync;
