//! Season archive: backup, purge, and restore.
//!
//! Goals, in order: ops safety for season rollovers, bounded work
//! (keyset-paginated reads, chunked inserts, bounded deletes), and no
//! unbounded transactions or long locks. Purge is intentionally not
//! atomic across the four tables -- a crash mid-purge leaves some tables
//! purged and others not, which is accepted and documented.
//!
//! A backup batch moves through RUNNING -> OK | FAILED. Only OK batches
//! are restore-eligible; a FAILED batch's partial archive is kept for
//! forensics.

use chrono::{DateTime, Utc};
use questline_types::{BatchId, BatchStatus};
use rand::Rng;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;
use crate::progress_store::{ProgressStore, cursor_start, season_db};

/// Longest error message recorded on a failed batch row.
const MAX_BATCH_ERROR_LEN: usize = 2000;

/// Result of a completed backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupReport {
    /// The batch everything was archived under.
    pub batch_id: BatchId,
    /// Progress rows archived.
    pub progress_rows: u64,
    /// Step rows archived.
    pub step_rows: u64,
    /// Claim rows archived.
    pub claim_rows: u64,
    /// Period rows archived.
    pub period_rows: u64,
}

/// Result of a completed purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeReport {
    /// Progress rows deleted.
    pub progress_deleted: u64,
    /// Step rows deleted.
    pub step_deleted: u64,
    /// Claim rows deleted.
    pub claim_deleted: u64,
    /// Period rows deleted.
    pub period_deleted: u64,
}

/// Result of a completed restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    /// The batch that was restored.
    pub batch_id: BatchId,
    /// Progress rows written back.
    pub progress_restored: u64,
    /// Step rows written back.
    pub step_restored: u64,
    /// Claim rows written back.
    pub claim_restored: u64,
    /// Period rows written back.
    pub period_restored: u64,
}

/// One row of the backup batch control table.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    /// Batch id.
    pub batch_id: BatchId,
    /// Server the batch belongs to.
    pub server_id: String,
    /// Season the batch archived.
    pub season: u32,
    /// Raw status string; parse with [`BatchStatus::from_db_str`].
    pub status: String,
    /// Who started the backup.
    pub created_by: Option<String>,
    /// Free-form operator note.
    pub note: Option<String>,
    /// When the batch row was created.
    pub created_at: DateTime<Utc>,
    /// Error message for FAILED batches.
    pub error: Option<String>,
}

impl BatchSummary {
    /// Whether this batch can be restored from.
    pub fn is_restorable(&self) -> bool {
        BatchStatus::from_db_str(&self.status) == Some(BatchStatus::Ok)
    }
}

/// A backup that failed mid-flight.
///
/// The batch row is left with status FAILED and the partial archive is
/// retained; the error here is the cause.
#[derive(Debug, thiserror::Error)]
#[error("backup batch {batch_id} failed: {source}")]
pub struct BackupError {
    /// The batch that failed.
    pub batch_id: BatchId,
    /// The underlying failure.
    pub source: DbError,
}

/// Reasons a restore is refused or fails.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    /// No batch row exists for the id.
    #[error("unknown batch {0}")]
    UnknownBatch(BatchId),

    /// The batch exists but is not status OK.
    #[error("batch {batch_id} is not restorable (status={status})")]
    NotRestorable {
        /// The refused batch.
        batch_id: BatchId,
        /// Its current status.
        status: String,
    },

    /// The target scope already holds live rows and overwrite was not set.
    #[error("target {server_id} season {season} already has data; use overwrite")]
    LiveDataExists {
        /// Target server.
        server_id: String,
        /// Target season.
        season: u32,
    },

    /// Every archive kind restored zero rows.
    #[error("archive for batch {0} is empty")]
    ArchiveEmpty(BatchId),

    /// A storage operation failed.
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Operations on the archive and control tables.
pub struct ArchiveStore<'a> {
    pool: &'a PgPool,
}

#[derive(sqlx::FromRow)]
struct BatchRow {
    batch_id: i64,
    server_id: String,
    season: i32,
    status: String,
    created_by: Option<String>,
    note: Option<String>,
    created_at: DateTime<Utc>,
    error: Option<String>,
}

impl From<BatchRow> for BatchSummary {
    fn from(row: BatchRow) -> Self {
        Self {
            batch_id: BatchId::from_raw(row.batch_id),
            server_id: row.server_id,
            season: u32::try_from(row.season.max(0)).unwrap_or(0),
            status: row.status,
            created_by: row.created_by,
            note: row.note,
            created_at: row.created_at,
            error: row.error,
        }
    }
}

impl<'a> ArchiveStore<'a> {
    /// Create a store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Allocate a collision-resistant, roughly time-ordered batch id.
    pub fn allocate_batch_id() -> BatchId {
        let millis = Utc::now().timestamp_millis();
        let entropy: u16 = rand::rng().random();
        BatchId::compose(millis, entropy)
    }

    /// Archive every live row of `(server_id, season)` under a new batch.
    ///
    /// Scans each of the four row kinds with keyset pagination and
    /// bulk-inserts each page into the matching archive table. On success
    /// the batch row flips to OK; on failure to FAILED with a truncated
    /// error message, and the partial archive stays for forensics.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] carrying the failed batch id and cause.
    pub async fn backup_season(
        &self,
        server_id: &str,
        season: u32,
        created_by: Option<&str>,
        note: Option<&str>,
        chunk: usize,
    ) -> Result<BackupReport, BackupError> {
        let batch_id = Self::allocate_batch_id();
        let archived_at = Utc::now();

        let fail = |source: DbError| BackupError { batch_id, source };

        sqlx::query(
            r"INSERT INTO questline_backup_batches
                (batch_id, server_id, season, created_by, note, status)
              VALUES ($1, $2, $3, $4, $5, 'RUNNING')",
        )
        .bind(batch_id.into_inner())
        .bind(server_id)
        .bind(season_db(season))
        .bind(sanitize(created_by, 64))
        .bind(sanitize(note, 255))
        .execute(self.pool)
        .await
        .map_err(|e| fail(e.into()))?;

        let copied = self
            .copy_all(batch_id, archived_at, server_id, season, chunk)
            .await;

        match copied {
            Ok(report) => {
                sqlx::query(
                    r"UPDATE questline_backup_batches SET status = 'OK' WHERE batch_id = $1",
                )
                .bind(batch_id.into_inner())
                .execute(self.pool)
                .await
                .map_err(|e| fail(e.into()))?;

                tracing::info!(
                    %batch_id,
                    server_id,
                    season,
                    progress = report.progress_rows,
                    steps = report.step_rows,
                    claims = report.claim_rows,
                    periods = report.period_rows,
                    "Season backup complete"
                );
                Ok(report)
            }
            Err(source) => {
                let message = truncate(&source.to_string(), MAX_BATCH_ERROR_LEN);
                // Best effort: the batch row may itself be unreachable.
                let _ = sqlx::query(
                    r"UPDATE questline_backup_batches
                      SET status = 'FAILED', error = $2 WHERE batch_id = $1",
                )
                .bind(batch_id.into_inner())
                .bind(message)
                .execute(self.pool)
                .await;

                tracing::warn!(%batch_id, server_id, season, error = %source, "Season backup failed");
                Err(fail(source))
            }
        }
    }

    async fn copy_all(
        &self,
        batch_id: BatchId,
        archived_at: DateTime<Utc>,
        server_id: &str,
        season: u32,
        chunk: usize,
    ) -> Result<BackupReport, DbError> {
        let progress_rows = self
            .copy_progress(batch_id, archived_at, server_id, season, chunk)
            .await?;
        let step_rows = self
            .copy_steps(batch_id, archived_at, server_id, season, chunk)
            .await?;
        let claim_rows = self
            .copy_claims(batch_id, archived_at, server_id, season, chunk)
            .await?;
        let period_rows = self
            .copy_periods(batch_id, archived_at, server_id, season, chunk)
            .await?;

        Ok(BackupReport {
            batch_id,
            progress_rows,
            step_rows,
            claim_rows,
            period_rows,
        })
    }

    async fn copy_progress(
        &self,
        batch_id: BatchId,
        archived_at: DateTime<Utc>,
        server_id: &str,
        season: u32,
        chunk: usize,
    ) -> Result<u64, DbError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            player: Uuid,
            tier: i32,
            points: i64,
            updated_at: DateTime<Utc>,
        }

        let limit = page_limit(chunk);
        let mut cursor = cursor_start();
        let mut total = 0_u64;

        loop {
            let rows = sqlx::query_as::<_, Row>(
                r"SELECT player, tier, points, updated_at FROM questline_progress
                  WHERE server_id = $1 AND season = $2 AND player > $3
                  ORDER BY player LIMIT $4",
            )
            .bind(server_id)
            .bind(season_db(season))
            .bind(cursor)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

            if rows.is_empty() {
                break;
            }

            let players: Vec<Uuid> = rows.iter().map(|r| r.player).collect();
            let tiers: Vec<i32> = rows.iter().map(|r| r.tier).collect();
            let points: Vec<i64> = rows.iter().map(|r| r.points).collect();
            let updated: Vec<DateTime<Utc>> = rows.iter().map(|r| r.updated_at).collect();

            sqlx::query(
                r"INSERT INTO questline_progress_archive
                    (batch_id, archived_at, server_id, season, player, tier, points, updated_at)
                  SELECT $1, $2, $3, $4, p, t, pts, u
                  FROM UNNEST($5::UUID[], $6::INT[], $7::BIGINT[], $8::TIMESTAMPTZ[]) AS r(p, t, pts, u)",
            )
            .bind(batch_id.into_inner())
            .bind(archived_at)
            .bind(server_id)
            .bind(season_db(season))
            .bind(&players)
            .bind(&tiers)
            .bind(&points)
            .bind(&updated)
            .execute(self.pool)
            .await?;

            total = total.saturating_add(u64::try_from(rows.len()).unwrap_or(u64::MAX));
            if let Some(last) = rows.last() {
                cursor = last.player;
            }
            if rows.len() < chunk {
                break;
            }
        }
        Ok(total)
    }

    async fn copy_steps(
        &self,
        batch_id: BatchId,
        archived_at: DateTime<Utc>,
        server_id: &str,
        season: u32,
        chunk: usize,
    ) -> Result<u64, DbError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            player: Uuid,
            quest_id: String,
            step_idx: i32,
            progress: i64,
            updated_at: DateTime<Utc>,
        }

        let limit = page_limit(chunk);
        let mut cursor_player = cursor_start();
        let mut cursor_quest = String::new();
        let mut total = 0_u64;

        loop {
            let rows = sqlx::query_as::<_, Row>(
                r"SELECT player, quest_id, step_idx, progress, updated_at
                  FROM questline_step_progress
                  WHERE server_id = $1 AND season = $2 AND (player, quest_id) > ($3, $4)
                  ORDER BY player, quest_id LIMIT $5",
            )
            .bind(server_id)
            .bind(season_db(season))
            .bind(cursor_player)
            .bind(&cursor_quest)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

            if rows.is_empty() {
                break;
            }

            let players: Vec<Uuid> = rows.iter().map(|r| r.player).collect();
            let quests: Vec<String> = rows.iter().map(|r| r.quest_id.clone()).collect();
            let steps: Vec<i32> = rows.iter().map(|r| r.step_idx).collect();
            let progress: Vec<i64> = rows.iter().map(|r| r.progress).collect();
            let updated: Vec<DateTime<Utc>> = rows.iter().map(|r| r.updated_at).collect();

            sqlx::query(
                r"INSERT INTO questline_step_progress_archive
                    (batch_id, archived_at, server_id, season, player, quest_id, step_idx, progress, updated_at)
                  SELECT $1, $2, $3, $4, p, q, s, pr, u
                  FROM UNNEST($5::UUID[], $6::VARCHAR[], $7::INT[], $8::BIGINT[], $9::TIMESTAMPTZ[]) AS r(p, q, s, pr, u)",
            )
            .bind(batch_id.into_inner())
            .bind(archived_at)
            .bind(server_id)
            .bind(season_db(season))
            .bind(&players)
            .bind(&quests)
            .bind(&steps)
            .bind(&progress)
            .bind(&updated)
            .execute(self.pool)
            .await?;

            total = total.saturating_add(u64::try_from(rows.len()).unwrap_or(u64::MAX));
            if let Some(last) = rows.last() {
                cursor_player = last.player;
                cursor_quest.clone_from(&last.quest_id);
            }
            if rows.len() < chunk {
                break;
            }
        }
        Ok(total)
    }

    async fn copy_claims(
        &self,
        batch_id: BatchId,
        archived_at: DateTime<Utc>,
        server_id: &str,
        season: u32,
        chunk: usize,
    ) -> Result<u64, DbError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            player: Uuid,
            tier: i32,
            track: String,
            claimed_at: DateTime<Utc>,
        }

        let limit = page_limit(chunk);
        let mut cursor_player = cursor_start();
        let mut cursor_tier = i32::MIN;
        let mut cursor_track = String::new();
        let mut total = 0_u64;

        loop {
            let rows = sqlx::query_as::<_, Row>(
                r"SELECT player, tier, track, claimed_at FROM questline_claims
                  WHERE server_id = $1 AND season = $2
                    AND (player, tier, track) > ($3, $4, $5)
                  ORDER BY player, tier, track LIMIT $6",
            )
            .bind(server_id)
            .bind(season_db(season))
            .bind(cursor_player)
            .bind(cursor_tier)
            .bind(&cursor_track)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

            if rows.is_empty() {
                break;
            }

            let players: Vec<Uuid> = rows.iter().map(|r| r.player).collect();
            let tiers: Vec<i32> = rows.iter().map(|r| r.tier).collect();
            let tracks: Vec<String> = rows.iter().map(|r| r.track.clone()).collect();
            let claimed: Vec<DateTime<Utc>> = rows.iter().map(|r| r.claimed_at).collect();

            sqlx::query(
                r"INSERT INTO questline_claims_archive
                    (batch_id, archived_at, server_id, season, player, tier, track, claimed_at)
                  SELECT $1, $2, $3, $4, p, t, k, c
                  FROM UNNEST($5::UUID[], $6::INT[], $7::VARCHAR[], $8::TIMESTAMPTZ[]) AS r(p, t, k, c)",
            )
            .bind(batch_id.into_inner())
            .bind(archived_at)
            .bind(server_id)
            .bind(season_db(season))
            .bind(&players)
            .bind(&tiers)
            .bind(&tracks)
            .bind(&claimed)
            .execute(self.pool)
            .await?;

            total = total.saturating_add(u64::try_from(rows.len()).unwrap_or(u64::MAX));
            if let Some(last) = rows.last() {
                cursor_player = last.player;
                cursor_tier = last.tier;
                cursor_track.clone_from(&last.track);
            }
            if rows.len() < chunk {
                break;
            }
        }
        Ok(total)
    }

    async fn copy_periods(
        &self,
        batch_id: BatchId,
        archived_at: DateTime<Utc>,
        server_id: &str,
        season: u32,
        chunk: usize,
    ) -> Result<u64, DbError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            player: Uuid,
            daily_day: i64,
            weekly_week: i64,
            updated_at: DateTime<Utc>,
        }

        let limit = page_limit(chunk);
        let mut cursor = cursor_start();
        let mut total = 0_u64;

        loop {
            let rows = sqlx::query_as::<_, Row>(
                r"SELECT player, daily_day, weekly_week, updated_at FROM questline_periods
                  WHERE server_id = $1 AND season = $2 AND player > $3
                  ORDER BY player LIMIT $4",
            )
            .bind(server_id)
            .bind(season_db(season))
            .bind(cursor)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

            if rows.is_empty() {
                break;
            }

            let players: Vec<Uuid> = rows.iter().map(|r| r.player).collect();
            let days: Vec<i64> = rows.iter().map(|r| r.daily_day).collect();
            let weeks: Vec<i64> = rows.iter().map(|r| r.weekly_week).collect();
            let updated: Vec<DateTime<Utc>> = rows.iter().map(|r| r.updated_at).collect();

            sqlx::query(
                r"INSERT INTO questline_periods_archive
                    (batch_id, archived_at, server_id, season, player, daily_day, weekly_week, updated_at)
                  SELECT $1, $2, $3, $4, p, d, w, u
                  FROM UNNEST($5::UUID[], $6::BIGINT[], $7::BIGINT[], $8::TIMESTAMPTZ[]) AS r(p, d, w, u)",
            )
            .bind(batch_id.into_inner())
            .bind(archived_at)
            .bind(server_id)
            .bind(season_db(season))
            .bind(&players)
            .bind(&days)
            .bind(&weeks)
            .bind(&updated)
            .execute(self.pool)
            .await?;

            total = total.saturating_add(u64::try_from(rows.len()).unwrap_or(u64::MAX));
            if let Some(last) = rows.last() {
                cursor = last.player;
            }
            if rows.len() < chunk {
                break;
            }
        }
        Ok(total)
    }

    /// Delete every live row of `(server_id, season)` in bounded steps.
    ///
    /// Each statement deletes at most `delete_limit` rows (via a ctid
    /// subquery); the loop for a table ends when a statement affects
    /// fewer rows than the limit. Termination is structural -- no
    /// unbounded transaction, no long lock -- at the cost of not being
    /// atomic across tables.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if a delete fails; earlier tables
    /// may already be purged at that point.
    pub async fn purge_season(
        &self,
        server_id: &str,
        season: u32,
        delete_limit: u64,
    ) -> Result<PurgeReport, DbError> {
        let progress_deleted = self
            .delete_loop("questline_progress", server_id, season, delete_limit)
            .await?;
        let step_deleted = self
            .delete_loop("questline_step_progress", server_id, season, delete_limit)
            .await?;
        let claim_deleted = self
            .delete_loop("questline_claims", server_id, season, delete_limit)
            .await?;
        let period_deleted = self
            .delete_loop("questline_periods", server_id, season, delete_limit)
            .await?;

        tracing::info!(
            server_id,
            season,
            progress = progress_deleted,
            steps = step_deleted,
            claims = claim_deleted,
            periods = period_deleted,
            "Season purge complete"
        );

        Ok(PurgeReport {
            progress_deleted,
            step_deleted,
            claim_deleted,
            period_deleted,
        })
    }

    async fn delete_loop(
        &self,
        table: &str,
        server_id: &str,
        season: u32,
        delete_limit: u64,
    ) -> Result<u64, DbError> {
        // Postgres DELETE has no LIMIT; bound each statement through a
        // ctid subquery instead.
        let sql = format!(
            "DELETE FROM {table} WHERE ctid IN (
                 SELECT ctid FROM {table}
                 WHERE server_id = $1 AND season = $2 LIMIT $3)"
        );
        let limit_i64 = i64::try_from(delete_limit).unwrap_or(i64::MAX);

        let mut total = 0_u64;
        loop {
            let affected = sqlx::query(&sql)
                .bind(server_id)
                .bind(season_db(season))
                .bind(limit_i64)
                .execute(self.pool)
                .await?
                .rows_affected();

            total = total.saturating_add(affected);
            if affected < delete_limit {
                break;
            }
        }
        Ok(total)
    }

    /// Restore a batch's archive back into the live tables.
    ///
    /// Refuses unknown and non-OK batches, and refuses to write into a
    /// scope with live rows unless `overwrite` is set (in which case the
    /// scope is purged first). The copy itself is an idempotent upsert,
    /// so a half-finished restore can simply be re-run.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError`] on refusal or storage failure, including
    /// [`RestoreError::ArchiveEmpty`] when all four kinds restored zero
    /// rows.
    pub async fn restore_batch(
        &self,
        batch_id: BatchId,
        overwrite: bool,
        chunk: usize,
        delete_limit: u64,
    ) -> Result<RestoreReport, RestoreError> {
        let batch = self
            .find_batch(batch_id)
            .await?
            .ok_or(RestoreError::UnknownBatch(batch_id))?;

        if !batch.is_restorable() {
            return Err(RestoreError::NotRestorable {
                batch_id,
                status: batch.status,
            });
        }

        let server_id = batch.server_id;
        let season = batch.season;

        let progress = ProgressStore::new(self.pool);
        if progress.has_live_rows(&server_id, season).await? {
            if !overwrite {
                return Err(RestoreError::LiveDataExists { server_id, season });
            }
            let _ = self
                .purge_season(&server_id, season, delete_limit)
                .await?;
        }

        let progress_restored = self
            .restore_progress(batch_id, &server_id, season, chunk)
            .await?;
        let step_restored = self
            .restore_steps(batch_id, &server_id, season, chunk)
            .await?;
        let claim_restored = self
            .restore_claims(batch_id, &server_id, season, chunk)
            .await?;
        let period_restored = self
            .restore_periods(batch_id, &server_id, season, chunk)
            .await?;

        if progress_restored == 0
            && step_restored == 0
            && claim_restored == 0
            && period_restored == 0
        {
            return Err(RestoreError::ArchiveEmpty(batch_id));
        }

        tracing::info!(
            %batch_id,
            server_id,
            season,
            progress = progress_restored,
            steps = step_restored,
            claims = claim_restored,
            periods = period_restored,
            "Batch restore complete"
        );

        Ok(RestoreReport {
            batch_id,
            progress_restored,
            step_restored,
            claim_restored,
            period_restored,
        })
    }

    async fn restore_progress(
        &self,
        batch_id: BatchId,
        server_id: &str,
        season: u32,
        chunk: usize,
    ) -> Result<u64, DbError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: i64,
            player: Uuid,
            tier: i32,
            points: i64,
        }

        let limit = page_limit(chunk);
        let mut cursor = 0_i64;
        let mut total = 0_u64;

        loop {
            let rows = sqlx::query_as::<_, Row>(
                r"SELECT id, player, tier, points FROM questline_progress_archive
                  WHERE batch_id = $1 AND id > $2 ORDER BY id LIMIT $3",
            )
            .bind(batch_id.into_inner())
            .bind(cursor)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

            if rows.is_empty() {
                break;
            }

            let players: Vec<Uuid> = rows.iter().map(|r| r.player).collect();
            let tiers: Vec<i32> = rows.iter().map(|r| r.tier).collect();
            let points: Vec<i64> = rows.iter().map(|r| r.points).collect();

            let affected = sqlx::query(
                r"INSERT INTO questline_progress (server_id, season, player, tier, points)
                  SELECT $1, $2, p, t, pts
                  FROM UNNEST($3::UUID[], $4::INT[], $5::BIGINT[]) AS r(p, t, pts)
                  ON CONFLICT (server_id, season, player) DO UPDATE SET
                    tier = EXCLUDED.tier,
                    points = EXCLUDED.points,
                    updated_at = now()",
            )
            .bind(server_id)
            .bind(season_db(season))
            .bind(&players)
            .bind(&tiers)
            .bind(&points)
            .execute(self.pool)
            .await?
            .rows_affected();

            total = total.saturating_add(affected);
            if let Some(last) = rows.last() {
                cursor = last.id;
            }
            if rows.len() < chunk {
                break;
            }
        }
        Ok(total)
    }

    async fn restore_steps(
        &self,
        batch_id: BatchId,
        server_id: &str,
        season: u32,
        chunk: usize,
    ) -> Result<u64, DbError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: i64,
            player: Uuid,
            quest_id: String,
            step_idx: i32,
            progress: i64,
        }

        let limit = page_limit(chunk);
        let mut cursor = 0_i64;
        let mut total = 0_u64;

        loop {
            let rows = sqlx::query_as::<_, Row>(
                r"SELECT id, player, quest_id, step_idx, progress
                  FROM questline_step_progress_archive
                  WHERE batch_id = $1 AND id > $2 ORDER BY id LIMIT $3",
            )
            .bind(batch_id.into_inner())
            .bind(cursor)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

            if rows.is_empty() {
                break;
            }

            let players: Vec<Uuid> = rows.iter().map(|r| r.player).collect();
            let quests: Vec<String> = rows.iter().map(|r| r.quest_id.clone()).collect();
            let steps: Vec<i32> = rows.iter().map(|r| r.step_idx).collect();
            let progress: Vec<i64> = rows.iter().map(|r| r.progress).collect();

            let affected = sqlx::query(
                r"INSERT INTO questline_step_progress
                    (server_id, season, player, quest_id, step_idx, progress)
                  SELECT $1, $2, p, q, s, pr
                  FROM UNNEST($3::UUID[], $4::VARCHAR[], $5::INT[], $6::BIGINT[]) AS r(p, q, s, pr)
                  ON CONFLICT (server_id, season, player, quest_id) DO UPDATE SET
                    step_idx = EXCLUDED.step_idx,
                    progress = EXCLUDED.progress,
                    updated_at = now()",
            )
            .bind(server_id)
            .bind(season_db(season))
            .bind(&players)
            .bind(&quests)
            .bind(&steps)
            .bind(&progress)
            .execute(self.pool)
            .await?
            .rows_affected();

            total = total.saturating_add(affected);
            if let Some(last) = rows.last() {
                cursor = last.id;
            }
            if rows.len() < chunk {
                break;
            }
        }
        Ok(total)
    }

    async fn restore_claims(
        &self,
        batch_id: BatchId,
        server_id: &str,
        season: u32,
        chunk: usize,
    ) -> Result<u64, DbError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: i64,
            player: Uuid,
            tier: i32,
            track: String,
            claimed_at: Option<DateTime<Utc>>,
        }

        let limit = page_limit(chunk);
        let mut cursor = 0_i64;
        let mut total = 0_u64;

        loop {
            let rows = sqlx::query_as::<_, Row>(
                r"SELECT id, player, tier, track, claimed_at FROM questline_claims_archive
                  WHERE batch_id = $1 AND id > $2 ORDER BY id LIMIT $3",
            )
            .bind(batch_id.into_inner())
            .bind(cursor)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

            if rows.is_empty() {
                break;
            }

            let players: Vec<Uuid> = rows.iter().map(|r| r.player).collect();
            let tiers: Vec<i32> = rows.iter().map(|r| r.tier).collect();
            let tracks: Vec<String> = rows.iter().map(|r| r.track.clone()).collect();
            let claimed: Vec<DateTime<Utc>> = rows
                .iter()
                .map(|r| r.claimed_at.unwrap_or_else(Utc::now))
                .collect();

            let affected = sqlx::query(
                r"INSERT INTO questline_claims (server_id, season, player, tier, track, claimed_at)
                  SELECT $1, $2, p, t, k, c
                  FROM UNNEST($3::UUID[], $4::INT[], $5::VARCHAR[], $6::TIMESTAMPTZ[]) AS r(p, t, k, c)
                  ON CONFLICT (server_id, season, player, tier, track) DO UPDATE SET
                    claimed_at = EXCLUDED.claimed_at",
            )
            .bind(server_id)
            .bind(season_db(season))
            .bind(&players)
            .bind(&tiers)
            .bind(&tracks)
            .bind(&claimed)
            .execute(self.pool)
            .await?
            .rows_affected();

            total = total.saturating_add(affected);
            if let Some(last) = rows.last() {
                cursor = last.id;
            }
            if rows.len() < chunk {
                break;
            }
        }
        Ok(total)
    }

    async fn restore_periods(
        &self,
        batch_id: BatchId,
        server_id: &str,
        season: u32,
        chunk: usize,
    ) -> Result<u64, DbError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: i64,
            player: Uuid,
            daily_day: i64,
            weekly_week: i64,
        }

        let limit = page_limit(chunk);
        let mut cursor = 0_i64;
        let mut total = 0_u64;

        loop {
            let rows = sqlx::query_as::<_, Row>(
                r"SELECT id, player, daily_day, weekly_week FROM questline_periods_archive
                  WHERE batch_id = $1 AND id > $2 ORDER BY id LIMIT $3",
            )
            .bind(batch_id.into_inner())
            .bind(cursor)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

            if rows.is_empty() {
                break;
            }

            let players: Vec<Uuid> = rows.iter().map(|r| r.player).collect();
            let days: Vec<i64> = rows.iter().map(|r| r.daily_day).collect();
            let weeks: Vec<i64> = rows.iter().map(|r| r.weekly_week).collect();

            let affected = sqlx::query(
                r"INSERT INTO questline_periods (server_id, season, player, daily_day, weekly_week)
                  SELECT $1, $2, p, d, w
                  FROM UNNEST($3::UUID[], $4::BIGINT[], $5::BIGINT[]) AS r(p, d, w)
                  ON CONFLICT (server_id, season, player) DO UPDATE SET
                    daily_day = EXCLUDED.daily_day,
                    weekly_week = EXCLUDED.weekly_week,
                    updated_at = now()",
            )
            .bind(server_id)
            .bind(season_db(season))
            .bind(&players)
            .bind(&days)
            .bind(&weeks)
            .execute(self.pool)
            .await?
            .rows_affected();

            total = total.saturating_add(affected);
            if let Some(last) = rows.last() {
                cursor = last.id;
            }
            if rows.len() < chunk {
                break;
            }
        }
        Ok(total)
    }

    /// Look up one batch row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn find_batch(&self, batch_id: BatchId) -> Result<Option<BatchSummary>, DbError> {
        let row = sqlx::query_as::<_, BatchRow>(
            r"SELECT batch_id, server_id, season, status, created_by, note, created_at, error
              FROM questline_backup_batches WHERE batch_id = $1",
        )
        .bind(batch_id.into_inner())
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(BatchSummary::from))
    }

    /// The most recent batches for a server, newest first.
    ///
    /// `limit` is clamped to 1..=50.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn list_batches(
        &self,
        server_id: &str,
        limit: usize,
    ) -> Result<Vec<BatchSummary>, DbError> {
        let clamped = i64::try_from(limit.clamp(1, 50)).unwrap_or(50);
        let rows = sqlx::query_as::<_, BatchRow>(
            r"SELECT batch_id, server_id, season, status, created_by, note, created_at, error
              FROM questline_backup_batches
              WHERE server_id = $1
              ORDER BY created_at DESC LIMIT $2",
        )
        .bind(server_id)
        .bind(clamped)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(BatchSummary::from).collect())
    }
}

/// Keyset page limit as bound (`BIGINT`).
fn page_limit(chunk: usize) -> i64 {
    i64::try_from(chunk.max(1)).unwrap_or(i64::MAX)
}

/// Trim, drop-if-empty, and truncate an operator-supplied string.
fn sanitize(value: Option<&str>, max_len: usize) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(truncate(trimmed, max_len))
}

/// Truncate a string to at most `max_len` bytes on a char boundary.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_owned();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    s.get(..end).unwrap_or_default().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_batch_ids_are_distinct() {
        let a = ArchiveStore::allocate_batch_id();
        let b = ArchiveStore::allocate_batch_id();
        // Same millisecond is likely; the entropy bits still separate them
        // with overwhelming probability.
        assert_ne!(a, b);
    }

    #[test]
    fn sanitize_trims_and_drops_blank() {
        assert_eq!(sanitize(Some("  ops  "), 64).as_deref(), Some("ops"));
        assert_eq!(sanitize(Some("   "), 64), None);
        assert_eq!(sanitize(None, 64), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abcdef", 4), "abcd");
        assert_eq!(truncate("ab", 4), "ab");
        // 'é' is two bytes; cutting inside it must back off.
        assert_eq!(truncate("aé", 2), "a");
    }

    #[test]
    fn batch_summary_restorable_only_when_ok() {
        let mut summary = BatchSummary {
            batch_id: BatchId::from_raw(1),
            server_id: String::from("s"),
            season: 1,
            status: String::from("OK"),
            created_by: None,
            note: None,
            created_at: Utc::now(),
            error: None,
        };
        assert!(summary.is_restorable());
        summary.status = String::from("RUNNING");
        assert!(!summary.is_restorable());
        summary.status = String::from("FAILED");
        assert!(!summary.is_restorable());
    }
}
