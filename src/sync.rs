//! Reconcile pass: pushes everything still marked pending to the server.
//!
//! Interactive mutations roll back on failure, so under normal use nothing
//! is ever pending for long. What this pass drains is the durable residue:
//! rows a crash stranded mid-settlement and fire-and-forget writes
//! (reading positions) that never block the UI. One pass sweeps each
//! service's pending rows under the same per-key lanes the services use,
//! then reports unsynced positions.
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::model::PositionUpdate;
use crate::api::SyncApi;
use crate::bookmarks::BookmarkService;
use crate::db::repo::{self, Pool};
use crate::error::{ApiError, SyncError};
use crate::highlights::HighlightService;
use crate::notes::NoteService;
use crate::store::ReadingPositionStore;

/// What a single flush pass accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Settlements pushed this pass (mirror rows plus position reports).
    pub settled: usize,
    /// Mirror rows still pending afterwards.
    pub remaining: i64,
}

pub struct SyncWorker {
    pool: Pool,
    api: Arc<dyn SyncApi>,
    notes: Arc<NoteService>,
    highlights: Arc<HighlightService>,
    bookmarks: Arc<BookmarkService>,
    positions: ReadingPositionStore,
}

impl SyncWorker {
    pub fn new(
        pool: Pool,
        api: Arc<dyn SyncApi>,
        notes: Arc<NoteService>,
        highlights: Arc<HighlightService>,
        bookmarks: Arc<BookmarkService>,
        positions: ReadingPositionStore,
    ) -> Self {
        Self {
            pool,
            api,
            notes,
            highlights,
            bookmarks,
            positions,
        }
    }

    /// One sweep over everything pending. Stops early on a transient
    /// failure or an expired session; whatever settled before the stop
    /// stays settled.
    pub async fn flush_once(&self) -> Result<FlushOutcome, SyncError> {
        let mut settled = 0;
        settled += self.notes.flush_pending().await?;
        settled += self.highlights.flush_pending().await?;
        settled += self.bookmarks.flush_pending().await?;
        settled += self.report_positions().await?;
        let remaining = repo::count_pending(&self.pool).await?;
        Ok(FlushOutcome { settled, remaining })
    }

    async fn report_positions(&self) -> Result<usize, SyncError> {
        let mut reported = 0;
        for position in self.positions.unsynced().await {
            let update = PositionUpdate {
                book_id: position.book_id,
                chapter: position.chapter,
                verse: position.verse,
                scroll_position: position.scroll_position,
                timestamp: position.timestamp,
            };
            match self.api.report_position(&update).await {
                Ok(()) => {
                    self.positions.mark_synced(&position).await;
                    reported += 1;
                }
                Err(e) if e.is_transient() || matches!(e, ApiError::Unauthorized) => {
                    return Err(e.into())
                }
                Err(e) => {
                    // Positions are advisory; a permanent reject is not
                    // worth replaying forever.
                    warn!(error = %e, book_id = position.book_id, "position report rejected");
                    self.positions.mark_synced(&position).await;
                }
            }
        }
        Ok(reported)
    }

    pub async fn pending_count(&self) -> Result<i64, SyncError> {
        Ok(repo::count_pending(&self.pool).await?)
    }

    /// Poll loop. Sleeps `poll_interval` between idle passes and backs off
    /// exponentially, capped at `max_backoff_secs`, after failed ones.
    pub async fn run(self, poll_interval: Duration, max_backoff_secs: u64) {
        let mut attempt: u32 = 0;
        loop {
            match self.flush_once().await {
                Ok(outcome) => {
                    attempt = 0;
                    if outcome.settled > 0 {
                        info!(
                            settled = outcome.settled,
                            remaining = outcome.remaining,
                            "flush pass settled pending work"
                        );
                    }
                    if outcome.settled == 0 || outcome.remaining == 0 {
                        tokio::time::sleep(poll_interval).await;
                    }
                }
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    let delay = backoff_delay(attempt, max_backoff_secs);
                    warn!(
                        ?err,
                        attempt,
                        delay_secs = delay.as_secs(),
                        "flush pass failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub fn spawn(
        self,
        poll_interval: Duration,
        max_backoff_secs: u64,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(poll_interval, max_backoff_secs))
    }
}

/// 5s doubling per consecutive failure, capped. `attempt` is 1-based.
fn backoff_delay(attempt: u32, max_cap_secs: u64) -> Duration {
    let secs = 5u64.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    let secs = if max_cap_secs == 0 {
        secs
    } else {
        secs.min(max_cap_secs)
    };
    Duration::from_secs(secs)
}
