//! Bookmark service: optimistic chapter and insight bookmarks.
//!
//! A bookmark is pure membership keyed by [`BookmarkKey`]. Toggling applies
//! the change to the mirror and the chapter cache first, then settles
//! against the server; failures restore the exact prior state. All
//! mutations for one key run on its lane, so a double tap nets out to
//! where it started instead of interleaving.
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::model::{NewFavorite, RemoteFavorite};
use crate::api::SyncApi;
use crate::cache::{CacheStats, StateCache};
use crate::db::model::BookmarkRow;
use crate::db::repo::{self, Pool};
use crate::error::{ApiError, SyncError};
use crate::model::{BookmarkKey, InsightKind, SyncState};
use crate::optimistic::{InFlight, Mutation, MutationLanes};

type ChapterKey = (i64, i64);

pub struct BookmarkService {
    pool: Pool,
    api: Arc<dyn SyncApi>,
    cache: StateCache<ChapterKey, Vec<BookmarkRow>>,
    lanes: MutationLanes<BookmarkKey>,
    in_flight: InFlight<BookmarkKey>,
}

impl BookmarkService {
    pub fn new(pool: Pool, api: Arc<dyn SyncApi>) -> Self {
        Self {
            pool,
            api,
            cache: StateCache::new(),
            lanes: MutationLanes::new(),
            in_flight: InFlight::new(),
        }
    }

    /// Whether a settlement for this key is currently out.
    pub fn is_toggling(&self, key: &BookmarkKey) -> bool {
        self.in_flight.contains(key)
    }

    pub async fn is_bookmarked(&self, key: &BookmarkKey) -> Result<bool, SyncError> {
        let row = repo::get_bookmark(&self.pool, key).await?;
        Ok(matches!(row, Some(r) if r.sync_state != SyncState::PendingDelete))
    }

    pub async fn bookmarks_for_chapter(
        &self,
        book_id: i64,
        chapter_number: i64,
    ) -> Result<Vec<BookmarkRow>, SyncError> {
        let pool = self.pool.clone();
        self.cache
            .load(&(book_id, chapter_number), || async move {
                repo::bookmarks_for_chapter(&pool, book_id, chapter_number)
                    .await
                    .map_err(SyncError::from)
            })
            .await
    }

    pub async fn all_bookmarks(&self) -> Result<Vec<BookmarkRow>, SyncError> {
        Ok(repo::all_bookmarks(&self.pool).await?)
    }

    /// Flip membership for `key`. Returns the new membership. Two rapid
    /// toggles serialize on the key's lane and net out to the original
    /// state.
    pub async fn toggle(&self, key: &BookmarkKey) -> Result<bool, SyncError> {
        let _lane = self.lanes.lock(key).await;
        let _flag = self.in_flight.begin(key.clone());

        match repo::get_bookmark(&self.pool, key).await? {
            Some(row) if row.sync_state == SyncState::PendingDelete => {
                // Leftover tombstone; its delete never reached the server,
                // so membership there is still intact. Flip the row back.
                repo::set_bookmark_sync_state(&self.pool, key, SyncState::Synced).await?;
                self.cache.invalidate(&(key.book_id, key.chapter_number));
                Ok(true)
            }
            Some(row) => {
                self.remove(key, row).await?;
                Ok(false)
            }
            None => {
                self.add(key).await?;
                Ok(true)
            }
        }
    }

    async fn add(&self, key: &BookmarkKey) -> Result<(), SyncError> {
        let chapter = (key.book_id, key.chapter_number);
        let mut mutation: Mutation<()> = Mutation::new();
        mutation.begin(()).map_err(anyhow::Error::from)?;

        let created_at = Utc::now();
        repo::insert_bookmark(&self.pool, key, None, created_at, SyncState::PendingCreate).await?;
        let optimistic = BookmarkRow {
            key: key.clone(),
            favorite_id: None,
            created_at,
            sync_state: SyncState::PendingCreate,
        };
        self.cache.update(&chapter, |rows| rows.push(optimistic));

        let req = NewFavorite {
            book_id: key.book_id,
            chapter_number: key.chapter_number,
            insight_type: key.insight.map(|k| k.as_str().to_string()),
        };
        debug!(book_id = key.book_id, chapter = key.chapter_number, "adding bookmark");
        match self.api.create_favorite(&req).await {
            Ok(fav) => {
                repo::set_bookmark_favorite(&self.pool, key, fav.favorite_id).await?;
                self.cache.update(&chapter, |rows| {
                    if let Some(row) = rows.iter_mut().find(|r| r.key == *key) {
                        row.favorite_id = Some(fav.favorite_id);
                        row.sync_state = SyncState::Synced;
                    }
                });
                mutation.commit().map_err(anyhow::Error::from)?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "bookmark add rejected, rolling back");
                mutation.roll_back().map_err(anyhow::Error::from)?;
                repo::delete_bookmark(&self.pool, key).await?;
                self.cache.invalidate(&chapter);
                Err(e.into())
            }
        }
    }

    async fn remove(&self, key: &BookmarkKey, row: BookmarkRow) -> Result<(), SyncError> {
        let chapter = (key.book_id, key.chapter_number);

        let Some(favorite_id) = row.favorite_id else {
            // The server never acknowledged this bookmark; deleting the
            // local row is the whole operation.
            repo::delete_bookmark(&self.pool, key).await?;
            self.cache
                .update(&chapter, |rows| rows.retain(|r| r.key != *key));
            return Ok(());
        };

        let mut mutation: Mutation<BookmarkRow> = Mutation::new();
        mutation.begin(row).map_err(anyhow::Error::from)?;

        repo::set_bookmark_sync_state(&self.pool, key, SyncState::PendingDelete).await?;
        self.cache
            .update(&chapter, |rows| rows.retain(|r| r.key != *key));

        debug!(favorite_id, "removing bookmark");
        match self.api.delete_favorite(favorite_id).await {
            // Already gone server-side counts as settled.
            Ok(()) | Err(ApiError::Status { status: 404, .. }) => {
                repo::delete_bookmark(&self.pool, key).await?;
                mutation.commit().map_err(anyhow::Error::from)?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "bookmark remove rejected, rolling back");
                let snapshot = mutation.roll_back().map_err(anyhow::Error::from)?;
                repo::set_bookmark_sync_state(&self.pool, key, snapshot.sync_state).await?;
                self.cache.invalidate(&chapter);
                Err(e.into())
            }
        }
    }

    /// Rebuild the synced mirror rows from the server's favorites listing.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let favorites = self.api.list_favorites().await?;
        let rows: Vec<BookmarkRow> = favorites.iter().filter_map(remote_to_row).collect();
        repo::replace_bookmarks(&self.pool, &rows).await?;
        self.cache.clear();
        Ok(())
    }

    /// Replay rows left pending by a crash or a fire-and-forget write.
    /// Transient failures stop the sweep; permanent rejections skip the
    /// row and leave it for a later refresh.
    pub async fn flush_pending(&self) -> Result<usize, SyncError> {
        let pending = repo::pending_bookmarks(&self.pool).await?;
        let mut settled = 0;
        for stale in pending {
            let _lane = self.lanes.lock(&stale.key).await;
            let Some(row) = repo::get_bookmark(&self.pool, &stale.key).await? else {
                continue;
            };
            match row.sync_state {
                SyncState::Synced => continue,
                SyncState::PendingCreate | SyncState::PendingUpdate => {
                    let req = NewFavorite {
                        book_id: row.key.book_id,
                        chapter_number: row.key.chapter_number,
                        insight_type: row.key.insight.map(|k| k.as_str().to_string()),
                    };
                    match self.api.create_favorite(&req).await {
                        Ok(fav) => {
                            repo::set_bookmark_favorite(&self.pool, &row.key, fav.favorite_id)
                                .await?;
                        }
                        Err(e) if e.is_transient() || matches!(e, ApiError::Unauthorized) => {
                            return Err(e.into())
                        }
                        Err(e) => {
                            warn!(error = %e, "bookmark create replay rejected");
                            continue;
                        }
                    }
                }
                SyncState::PendingDelete => {
                    let outcome = match row.favorite_id {
                        // Never acked; nothing to delete remotely.
                        None => Ok(()),
                        Some(favorite_id) => match self.api.delete_favorite(favorite_id).await {
                            Ok(()) | Err(ApiError::Status { status: 404, .. }) => Ok(()),
                            Err(e) => Err(e),
                        },
                    };
                    match outcome {
                        Ok(()) => repo::delete_bookmark(&self.pool, &row.key).await?,
                        Err(e) if e.is_transient() || matches!(e, ApiError::Unauthorized) => {
                            return Err(e.into())
                        }
                        Err(e) => {
                            warn!(error = %e, "bookmark delete replay rejected");
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

fn remote_to_row(fav: &RemoteFavorite) -> Option<BookmarkRow> {
    let insight = match fav.insight_type.as_deref() {
        None | Some("") => None,
        Some(raw) => match InsightKind::parse(raw) {
            Some(kind) => Some(kind),
            None => {
                warn!(insight_type = raw, "skipping favorite with unknown insight type");
                return None;
            }
        },
    };
    Some(BookmarkRow {
        key: BookmarkKey {
            book_id: fav.book_id,
            chapter_number: fav.chapter_number,
            insight,
        },
        favorite_id: Some(fav.favorite_id),
        created_at: fav.created_at,
        sync_state: SyncState::Synced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn favorite(id: i64, insight_type: Option<&str>) -> RemoteFavorite {
        RemoteFavorite {
            favorite_id: id,
            book_id: 1,
            chapter_number: 2,
            insight_type: insight_type.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn remote_rows_map_insight_kinds() {
        let row = remote_to_row(&favorite(1, None)).unwrap();
        assert_eq!(row.key, BookmarkKey::chapter(1, 2));
        assert_eq!(row.favorite_id, Some(1));

        let row = remote_to_row(&favorite(2, Some("summary"))).unwrap();
        assert_eq!(row.key.insight, Some(InsightKind::Summary));

        let row = remote_to_row(&favorite(3, Some(""))).unwrap();
        assert_eq!(row.key.insight, None);
    }

    #[test]
    fn unknown_insight_kinds_are_skipped() {
        assert!(remote_to_row(&favorite(4, Some("margin"))).is_none());
    }
}
