//! Local store: namespaced key-value persistence for device-scoped state.
//!
//! Reading positions and note drafts live here rather than in the SQL
//! mirror; they are never server-authoritative and their writes must stay
//! fire-and-forget.

pub mod backend;
pub mod drafts;
pub mod kv;
pub mod positions;

pub use backend::{MemoryBackend, SqliteBackend, StorageBackend};
pub use drafts::{DraftSaver, DraftStore};
pub use kv::KvStore;
pub use positions::ReadingPositionStore;
