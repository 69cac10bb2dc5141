//! The batched write-behind flush pipeline.
//!
//! A periodic task drains dirty per-player deltas to storage. The pass
//! over all loaded players is split into fixed-size batches processed
//! sequentially inside one structured loop, so concurrent database load
//! stays bounded no matter how many players are online. Per-player
//! failures are logged and counted but never abort the pass -- the
//! delta was already captured and cleared, and that best-effort loss is
//! the documented policy (observable through [`PassRuntime::flush_failures`]).
//!
//! An async mutex serializes flush passes: a timer-triggered pass and an
//! admin-triggered flush-and-wait queue behind each other instead of
//! interleaving chunked writes for the same players.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use questline_db::{DbError, ProgressStore};
use questline_types::PlayerId;

use crate::runtime::PassRuntime;

/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Players in the point-in-time snapshot the pass worked through.
    pub players: usize,
    /// Players that had a dirty delta and were written.
    pub flushed: usize,
    /// Write failures during this pass (deltas lost, counted globally).
    pub failures: u64,
}

impl PassRuntime {
    /// Trigger an asynchronous flush pass and return immediately.
    ///
    /// The periodic timer uses this; admin flows that need a durability
    /// guarantee use [`Self::flush_all_and_wait`].
    pub fn flush_all(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let _ = runtime.flush_all_and_wait().await;
        });
    }

    /// Flush every loaded player and resolve once every batch has been
    /// attempted.
    ///
    /// Takes a point-in-time snapshot of the loaded player ids, splits
    /// it into batches of `flush.max_players_per_batch`, and works the
    /// batches sequentially. Returns a summary; per-player failures are
    /// reflected there rather than as an error. With storage offline the
    /// pass is a no-op (in-memory state, including dirty flags, is
    /// preserved).
    pub async fn flush_all_and_wait(&self) -> FlushSummary {
        let _pass = self.flush_lock.lock().await;

        if !self.db.is_available() {
            return FlushSummary::default();
        }

        let players = self.loaded_players();
        if players.is_empty() {
            return FlushSummary::default();
        }

        let batch_size = self.config.flush.max_players_per_batch();
        let failures_before = self.flush_failures.load(Ordering::Acquire);
        let mut flushed = 0_usize;

        for batch in players.chunks(batch_size) {
            for &player in batch {
                match self.flush_player_now(player).await {
                    Ok(true) => flushed = flushed.saturating_add(1),
                    Ok(false) => {}
                    Err(e) => self.note_flush_failure(player, &e),
                }
            }
            // Batch boundary: give other tasks a turn before the next
            // slice of players.
            tokio::task::yield_now().await;
        }

        let failures = self
            .flush_failures
            .load(Ordering::Acquire)
            .saturating_sub(failures_before);

        tracing::debug!(
            players = players.len(),
            flushed,
            failures,
            "Flush pass complete"
        );

        FlushSummary {
            players: players.len(),
            flushed,
            failures,
        }
    }

    /// Flush one player's delta now.
    ///
    /// Returns `Ok(true)` when a dirty delta was written, `Ok(false)`
    /// when there was nothing to write (clean delta or unloaded player).
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when the write fails. The delta was already
    /// cleared by the snapshot; the caller records the loss through
    /// [`Self::note_flush_failure`].
    pub(crate) async fn flush_player_now(&self, player: PlayerId) -> Result<bool, DbError> {
        let Some(state) = self.state(player) else {
            return Ok(false);
        };

        let delta = state.snapshot_and_clear();
        if delta.is_clean() {
            return Ok(false);
        }

        ProgressStore::new(self.db.pool())
            .flush_delta(&self.server_id, self.season, player, &delta)
            .await?;
        Ok(true)
    }

    /// Record a lost delta: warn and bump the failure counter.
    pub(crate) fn note_flush_failure(&self, player: PlayerId, error: &DbError) {
        let total = self
            .flush_failures
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);
        tracing::warn!(%player, error = %error, total_failures = total, "Player flush failed; delta lost");
    }

    /// Total per-player flush failures since this runtime started.
    pub fn flush_failures(&self) -> u64 {
        self.flush_failures.load(Ordering::Acquire)
    }

    /// Spawn the periodic flush task (suppressed in maintenance mode).
    pub(crate) fn spawn_periodic_flush(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let period = Duration::from_secs(self.config.flush.interval_seconds());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    () = runtime.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if !runtime.gate.is_maintenance() {
                            let _ = runtime.flush_all_and_wait().await;
                        }
                    }
                }
            }
            tracing::debug!("Periodic flush task stopped");
        });
    }
}
