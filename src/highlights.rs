//! Highlight service: optimistic verse-range highlights.
//!
//! Highlights created offline carry a negative placeholder id until the
//! server ack supplies the real one; every read and edit goes through the
//! same row either way. Edits to a row whose create has not settled stay
//! local and ride along with the eventual create.
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::model::{HighlightChange, NewHighlight, RemoteHighlight};
use crate::api::SyncApi;
use crate::cache::{CacheStats, StateCache};
use crate::db::model::HighlightRow;
use crate::db::repo::{self, Pool};
use crate::error::{ApiError, SyncError};
use crate::model::{local_highlight_id, Highlight, HighlightColor, SyncState};
use crate::optimistic::{InFlight, Mutation, MutationLanes};

type ChapterKey = (i64, i64);

pub struct HighlightService {
    pool: Pool,
    api: Arc<dyn SyncApi>,
    cache: StateCache<ChapterKey, Vec<HighlightRow>>,
    lanes: MutationLanes<i64>,
    in_flight: InFlight<i64>,
}

impl HighlightService {
    pub fn new(pool: Pool, api: Arc<dyn SyncApi>) -> Self {
        Self {
            pool,
            api,
            cache: StateCache::new(),
            lanes: MutationLanes::new(),
            in_flight: InFlight::new(),
        }
    }

    pub fn is_saving(&self, highlight_id: i64) -> bool {
        self.in_flight.contains(&highlight_id)
    }

    pub async fn highlights_for_chapter(
        &self,
        book_id: i64,
        chapter_number: i64,
    ) -> Result<Vec<HighlightRow>, SyncError> {
        let pool = self.pool.clone();
        self.cache
            .load(&(book_id, chapter_number), || async move {
                repo::highlights_for_chapter(&pool, book_id, chapter_number)
                    .await
                    .map_err(SyncError::from)
            })
            .await
    }

    /// Create a highlight over an inclusive verse range. The row is visible
    /// immediately under a placeholder id and adopts the server id on ack.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        book_id: i64,
        chapter_number: i64,
        start_verse: i64,
        end_verse: i64,
        color: HighlightColor,
        start_char: Option<i64>,
        end_char: Option<i64>,
    ) -> Result<Highlight, SyncError> {
        validate_range(start_verse, end_verse, start_char, end_char)?;

        let now = Utc::now();
        let local = Highlight {
            highlight_id: local_highlight_id(now),
            book_id,
            chapter_number,
            start_verse,
            end_verse,
            color,
            start_char,
            end_char,
            created_at: now,
            updated_at: now,
        };
        let chapter = (book_id, chapter_number);

        let _lane = self.lanes.lock(&local.highlight_id).await;
        let _flag = self.in_flight.begin(local.highlight_id);

        let mut mutation: Mutation<()> = Mutation::new();
        mutation.begin(()).map_err(anyhow::Error::from)?;

        repo::insert_highlight(&self.pool, &local, SyncState::PendingCreate).await?;
        self.cache.update(&chapter, |rows| {
            rows.push(HighlightRow {
                highlight: local.clone(),
                sync_state: SyncState::PendingCreate,
            })
        });

        let req = NewHighlight {
            book_id,
            chapter_number,
            start_verse,
            end_verse,
            color: color.as_str().to_string(),
            start_char,
            end_char,
        };
        debug!(book_id, chapter_number, start_verse, end_verse, "creating highlight");
        let ack = self.api.create_highlight(&req).await.and_then(|remote| {
            remote_to_highlight(&remote)
                .ok_or_else(|| ApiError::Decode(format!("unknown highlight color {}", remote.color)))
        });
        match ack {
            Ok(server) => {
                repo::adopt_highlight_id(&self.pool, local.highlight_id, &server).await?;
                self.cache.update(&chapter, |rows| {
                    if let Some(row) = rows
                        .iter_mut()
                        .find(|r| r.highlight.highlight_id == local.highlight_id)
                    {
                        row.highlight = server.clone();
                        row.sync_state = SyncState::Synced;
                    }
                });
                mutation.commit().map_err(anyhow::Error::from)?;
                Ok(server)
            }
            Err(e) => {
                warn!(error = %e, "highlight create rejected, rolling back");
                mutation.roll_back().map_err(anyhow::Error::from)?;
                repo::delete_highlight(&self.pool, local.highlight_id).await?;
                self.cache.invalidate(&chapter);
                Err(e.into())
            }
        }
    }

    /// Recolor an existing highlight. Rolls back to the exact prior color
    /// and timestamps when the server rejects the change.
    pub async fn change_color(
        &self,
        highlight_id: i64,
        color: HighlightColor,
    ) -> Result<(), SyncError> {
        let _lane = self.lanes.lock(&highlight_id).await;
        let _flag = self.in_flight.begin(highlight_id);

        let row = repo::get_highlight(&self.pool, highlight_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("highlight {highlight_id}")))?;
        let chapter = (row.highlight.book_id, row.highlight.chapter_number);

        if row.sync_state == SyncState::PendingCreate {
            // The create has not settled. Fold the recolor into the local
            // row; the eventual create carries the new color.
            repo::update_highlight_color(
                &self.pool,
                highlight_id,
                color,
                Utc::now(),
                SyncState::PendingCreate,
            )
            .await?;
            self.cache.invalidate(&chapter);
            return Ok(());
        }

        let mut mutation: Mutation<HighlightRow> = Mutation::new();
        mutation.begin(row.clone()).map_err(anyhow::Error::from)?;

        repo::update_highlight_color(
            &self.pool,
            highlight_id,
            color,
            Utc::now(),
            SyncState::PendingUpdate,
        )
        .await?;
        self.cache.update(&chapter, |rows| {
            if let Some(r) = rows
                .iter_mut()
                .find(|r| r.highlight.highlight_id == highlight_id)
            {
                r.highlight.color = color;
                r.sync_state = SyncState::PendingUpdate;
            }
        });

        let change = HighlightChange {
            color: color.as_str().to_string(),
        };
        debug!(highlight_id, color = color.as_str(), "recoloring highlight");
        let ack = self
            .api
            .update_highlight(highlight_id, &change)
            .await
            .and_then(|remote| {
                remote_to_highlight(&remote).ok_or_else(|| {
                    ApiError::Decode(format!("unknown highlight color {}", remote.color))
                })
            });
        match ack {
            Ok(server) => {
                repo::adopt_highlight_id(&self.pool, highlight_id, &server).await?;
                self.cache.update(&chapter, |rows| {
                    if let Some(r) = rows
                        .iter_mut()
                        .find(|r| r.highlight.highlight_id == highlight_id)
                    {
                        r.highlight = server.clone();
                        r.sync_state = SyncState::Synced;
                    }
                });
                mutation.commit().map_err(anyhow::Error::from)?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "highlight recolor rejected, rolling back");
                let snapshot = mutation.roll_back().map_err(anyhow::Error::from)?;
                repo::update_highlight_color(
                    &self.pool,
                    highlight_id,
                    snapshot.highlight.color,
                    snapshot.highlight.updated_at,
                    snapshot.sync_state,
                )
                .await?;
                self.cache.invalidate(&chapter);
                Err(e.into())
            }
        }
    }

    /// Delete a highlight. Rows whose create never settled are dropped
    /// locally without a server round-trip.
    pub async fn remove(&self, highlight_id: i64) -> Result<(), SyncError> {
        let _lane = self.lanes.lock(&highlight_id).await;
        let _flag = self.in_flight.begin(highlight_id);

        let Some(row) = repo::get_highlight(&self.pool, highlight_id).await? else {
            return Ok(());
        };
        let chapter = (row.highlight.book_id, row.highlight.chapter_number);

        match row.sync_state {
            SyncState::PendingDelete => return Ok(()),
            SyncState::PendingCreate => {
                repo::delete_highlight(&self.pool, highlight_id).await?;
                self.cache.update(&chapter, |rows| {
                    rows.retain(|r| r.highlight.highlight_id != highlight_id)
                });
                return Ok(());
            }
            SyncState::Synced | SyncState::PendingUpdate => {}
        }

        let mut mutation: Mutation<HighlightRow> = Mutation::new();
        mutation.begin(row).map_err(anyhow::Error::from)?;

        repo::set_highlight_sync_state(&self.pool, highlight_id, SyncState::PendingDelete).await?;
        self.cache.update(&chapter, |rows| {
            rows.retain(|r| r.highlight.highlight_id != highlight_id)
        });

        debug!(highlight_id, "deleting highlight");
        match self.api.delete_highlight(highlight_id).await {
            // Already gone server-side counts as settled.
            Ok(()) | Err(ApiError::Status { status: 404, .. }) => {
                repo::delete_highlight(&self.pool, highlight_id).await?;
                mutation.commit().map_err(anyhow::Error::from)?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "highlight delete rejected, rolling back");
                let snapshot = mutation.roll_back().map_err(anyhow::Error::from)?;
                repo::set_highlight_sync_state(&self.pool, highlight_id, snapshot.sync_state)
                    .await?;
                self.cache.invalidate(&chapter);
                Err(e.into())
            }
        }
    }

    /// Rebuild the synced mirror rows from the server's highlight listing.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let remote = self.api.list_highlights().await?;
        let highlights: Vec<Highlight> = remote
            .iter()
            .filter_map(|r| match remote_to_highlight(r) {
                Some(h) => Some(h),
                None => {
                    warn!(
                        highlight_id = r.highlight_id,
                        color = %r.color,
                        "skipping highlight with unknown color"
                    );
                    None
                }
            })
            .collect();
        repo::replace_highlights(&self.pool, &highlights).await?;
        self.cache.clear();
        Ok(())
    }

    /// Replay rows left pending by a crash or a fire-and-forget write.
    /// Transient failures stop the sweep; permanent rejections skip the
    /// row and leave it for a later refresh.
    pub async fn flush_pending(&self) -> Result<usize, SyncError> {
        let pending = repo::pending_highlights(&self.pool).await?;
        let mut settled = 0;
        for stale in pending {
            let id = stale.highlight.highlight_id;
            let _lane = self.lanes.lock(&id).await;
            let Some(row) = repo::get_highlight(&self.pool, id).await? else {
                continue;
            };
            match row.sync_state {
                SyncState::Synced => continue,
                SyncState::PendingCreate => {
                    let req = NewHighlight {
                        book_id: row.highlight.book_id,
                        chapter_number: row.highlight.chapter_number,
                        start_verse: row.highlight.start_verse,
                        end_verse: row.highlight.end_verse,
                        color: row.highlight.color.as_str().to_string(),
                        start_char: row.highlight.start_char,
                        end_char: row.highlight.end_char,
                    };
                    let ack = self.api.create_highlight(&req).await.and_then(|remote| {
                        remote_to_highlight(&remote).ok_or_else(|| {
                            ApiError::Decode(format!("unknown highlight color {}", remote.color))
                        })
                    });
                    match ack {
                        Ok(server) => repo::adopt_highlight_id(&self.pool, id, &server).await?,
                        Err(e) if e.is_transient() || matches!(e, ApiError::Unauthorized) => {
                            return Err(e.into())
                        }
                        Err(e) => {
                            warn!(error = %e, highlight_id = id, "highlight create replay rejected");
                            continue;
                        }
                    }
                }
                SyncState::PendingUpdate => {
                    let change = HighlightChange {
                        color: row.highlight.color.as_str().to_string(),
                    };
                    let ack = self
                        .api
                        .update_highlight(id, &change)
                        .await
                        .and_then(|remote| {
                            remote_to_highlight(&remote).ok_or_else(|| {
                                ApiError::Decode(format!(
                                    "unknown highlight color {}",
                                    remote.color
                                ))
                            })
                        });
                    match ack {
                        Ok(server) => repo::adopt_highlight_id(&self.pool, id, &server).await?,
                        // Deleted on another device; the server listing wins.
                        Err(ApiError::Status { status: 404, .. }) => {
                            repo::delete_highlight(&self.pool, id).await?;
                        }
                        Err(e) if e.is_transient() || matches!(e, ApiError::Unauthorized) => {
                            return Err(e.into())
                        }
                        Err(e) => {
                            warn!(error = %e, highlight_id = id, "highlight update replay rejected");
                            continue;
                        }
                    }
                }
                SyncState::PendingDelete => match self.api.delete_highlight(id).await {
                    Ok(()) | Err(ApiError::Status { status: 404, .. }) => {
                        repo::delete_highlight(&self.pool, id).await?;
                    }
                    Err(e) if e.is_transient() || matches!(e, ApiError::Unauthorized) => {
                        return Err(e.into())
                    }
                    Err(e) => {
                        warn!(error = %e, highlight_id = id, "highlight delete replay rejected");
                        continue;
                    }
                },
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

fn validate_range(
    start_verse: i64,
    end_verse: i64,
    start_char: Option<i64>,
    end_char: Option<i64>,
) -> Result<(), SyncError> {
    if start_verse < 1 {
        return Err(SyncError::Validation(format!(
            "start verse must be positive, got {start_verse}"
        )));
    }
    if end_verse < start_verse {
        return Err(SyncError::Validation(format!(
            "verse range {start_verse}-{end_verse} is inverted"
        )));
    }
    if let (Some(s), Some(e)) = (start_char, end_char) {
        if s < 0 || e < s {
            return Err(SyncError::Validation(format!(
                "character range {s}-{e} is invalid"
            )));
        }
    }
    Ok(())
}

pub(crate) fn remote_to_highlight(remote: &RemoteHighlight) -> Option<Highlight> {
    let color = HighlightColor::parse(&remote.color)?;
    Some(Highlight {
        highlight_id: remote.highlight_id,
        book_id: remote.book_id,
        chapter_number: remote.chapter_number,
        start_verse: remote.start_verse,
        end_verse: remote.end_verse,
        color,
        start_char: remote.start_char,
        end_char: remote.end_char,
        created_at: remote.created_at,
        updated_at: remote.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verse_ranges_are_validated() {
        assert!(validate_range(1, 1, None, None).is_ok());
        assert!(validate_range(3, 7, Some(0), Some(12)).is_ok());
        assert!(matches!(
            validate_range(0, 1, None, None),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            validate_range(5, 2, None, None),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            validate_range(1, 1, Some(9), Some(3)),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn unknown_remote_colors_do_not_map() {
        let remote = RemoteHighlight {
            highlight_id: 7,
            book_id: 1,
            chapter_number: 2,
            start_verse: 3,
            end_verse: 4,
            color: "chartreuse".into(),
            start_char: None,
            end_char: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(remote_to_highlight(&remote).is_none());
        let remote = RemoteHighlight {
            color: "yellow".into(),
            ..remote
        };
        assert_eq!(
            remote_to_highlight(&remote).map(|h| h.color),
            Some(HighlightColor::Yellow)
        );
    }
}
