//! Live progression persistence: player load and delta flush.
//!
//! One repository method per entity kind; chunk sizes and bulk-statement
//! construction stay internal to this module. All calls run on the async
//! pool -- never on the ingestion path.

use questline_core::{DeltaSnapshot, PeriodMarker};
use questline_types::{PlayerId, RewardTrack};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;

/// Rows per multi-row step upsert.
const STEP_CHUNK: usize = 100;

/// Rows per multi-row claim insert.
const CLAIM_CHUNK: usize = 200;

/// A player's persisted rows, as loaded from storage.
#[derive(Debug, Default)]
pub struct LoadedPlayer {
    /// Persisted tier (0 when no progress row exists).
    pub tier: u32,
    /// Persisted points (0 when no progress row exists).
    pub points: u64,
    /// Persisted step positions per quest.
    pub steps: Vec<LoadedStep>,
    /// Persisted claims.
    pub claims: Vec<(RewardTrack, u32)>,
}

/// One persisted quest step position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedStep {
    /// Quest id.
    pub quest_id: String,
    /// Step index the player is on.
    pub step_idx: u32,
    /// Progress within the step.
    pub progress: u64,
}

/// Operations on the live progression tables.
pub struct ProgressStore<'a> {
    pool: &'a PgPool,
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    tier: i32,
    points: i64,
}

#[derive(sqlx::FromRow)]
struct StepRow {
    quest_id: String,
    step_idx: i32,
    progress: i64,
}

#[derive(sqlx::FromRow)]
struct ClaimRow {
    tier: i32,
    track: String,
}

#[derive(sqlx::FromRow)]
struct PeriodRow {
    daily_day: i64,
    weekly_week: i64,
}

impl<'a> ProgressStore<'a> {
    /// Create a store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Load a player's progress, step and claim rows.
    ///
    /// Missing rows yield zeroed defaults; the caller self-heals quest
    /// state the catalog knows about but storage does not.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if any query fails.
    pub async fn load_player(
        &self,
        server_id: &str,
        season: u32,
        player: PlayerId,
    ) -> Result<LoadedPlayer, DbError> {
        let season_i32 = season_db(season);
        let uuid = player.into_inner();

        let progress = sqlx::query_as::<_, ProgressRow>(
            r"SELECT tier, points FROM questline_progress
              WHERE server_id = $1 AND season = $2 AND player = $3",
        )
        .bind(server_id)
        .bind(season_i32)
        .bind(uuid)
        .fetch_optional(self.pool)
        .await?;

        let steps = sqlx::query_as::<_, StepRow>(
            r"SELECT quest_id, step_idx, progress FROM questline_step_progress
              WHERE server_id = $1 AND season = $2 AND player = $3",
        )
        .bind(server_id)
        .bind(season_i32)
        .bind(uuid)
        .fetch_all(self.pool)
        .await?;

        let claims = sqlx::query_as::<_, ClaimRow>(
            r"SELECT tier, track FROM questline_claims
              WHERE server_id = $1 AND season = $2 AND player = $3",
        )
        .bind(server_id)
        .bind(season_i32)
        .bind(uuid)
        .fetch_all(self.pool)
        .await?;

        let (tier, points) = progress.map_or((0, 0), |row| {
            (
                u32::try_from(row.tier.max(0)).unwrap_or(0),
                u64::try_from(row.points.max(0)).unwrap_or(0),
            )
        });

        Ok(LoadedPlayer {
            tier,
            points,
            steps: steps
                .into_iter()
                .map(|row| LoadedStep {
                    quest_id: row.quest_id,
                    step_idx: u32::try_from(row.step_idx.max(0)).unwrap_or(0),
                    progress: u64::try_from(row.progress.max(0)).unwrap_or(0),
                })
                .collect(),
            claims: claims
                .into_iter()
                .map(|row| {
                    (
                        RewardTrack::from_db_str(&row.track),
                        u32::try_from(row.tier.max(0)).unwrap_or(0),
                    )
                })
                .collect(),
        })
    }

    /// Write one player's captured delta.
    ///
    /// Issues at most: one progress upsert, `ceil(steps / 100)` multi-row
    /// step upserts, and `ceil(claims / 200)` insert-if-absent claim
    /// statements. A clean delta is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if any statement fails. The delta
    /// was already cleared by the snapshot; the caller decides whether
    /// that loss is acceptable (see the flusher's failure counter).
    pub async fn flush_delta(
        &self,
        server_id: &str,
        season: u32,
        player: PlayerId,
        delta: &DeltaSnapshot,
    ) -> Result<(), DbError> {
        if delta.is_clean() {
            return Ok(());
        }

        let season_i32 = season_db(season);
        let uuid = player.into_inner();

        if delta.write_progress {
            sqlx::query(
                r"INSERT INTO questline_progress (server_id, season, player, tier, points)
                  VALUES ($1, $2, $3, $4, $5)
                  ON CONFLICT (server_id, season, player) DO UPDATE SET
                    tier = EXCLUDED.tier,
                    points = EXCLUDED.points,
                    updated_at = now()",
            )
            .bind(server_id)
            .bind(season_i32)
            .bind(uuid)
            .bind(tier_db(delta.tier))
            .bind(points_db(delta.points))
            .execute(self.pool)
            .await?;
        }

        if !delta.dirty_steps.is_empty() {
            let entries: Vec<(&String, &questline_core::StepSnap)> =
                delta.dirty_steps.iter().collect();

            for chunk in entries.chunks(STEP_CHUNK) {
                let mut quest_ids = Vec::with_capacity(chunk.len());
                let mut step_idxs = Vec::with_capacity(chunk.len());
                let mut progresses = Vec::with_capacity(chunk.len());
                for (quest_id, snap) in chunk {
                    quest_ids.push((*quest_id).clone());
                    step_idxs.push(tier_db(snap.step_idx));
                    progresses.push(points_db(snap.progress));
                }

                sqlx::query(
                    r"INSERT INTO questline_step_progress
                        (server_id, season, player, quest_id, step_idx, progress)
                      SELECT $1, $2, $3, q, s, p
                      FROM UNNEST($4::VARCHAR[], $5::INT[], $6::BIGINT[]) AS t(q, s, p)
                      ON CONFLICT (server_id, season, player, quest_id) DO UPDATE SET
                        step_idx = EXCLUDED.step_idx,
                        progress = EXCLUDED.progress,
                        updated_at = now()",
                )
                .bind(server_id)
                .bind(season_i32)
                .bind(uuid)
                .bind(&quest_ids)
                .bind(&step_idxs)
                .bind(&progresses)
                .execute(self.pool)
                .await?;
            }
        }

        if !delta.new_claims.is_empty() {
            for chunk in delta.new_claims.chunks(CLAIM_CHUNK) {
                let mut tiers = Vec::with_capacity(chunk.len());
                let mut tracks = Vec::with_capacity(chunk.len());
                for claim in chunk {
                    tiers.push(tier_db(claim.tier));
                    tracks.push(claim.track.as_db_str().to_owned());
                }

                // Insert-if-absent: a claim, once created, is never
                // updated or deleted by normal flow.
                sqlx::query(
                    r"INSERT INTO questline_claims (server_id, season, player, tier, track)
                      SELECT $1, $2, $3, t, k
                      FROM UNNEST($4::INT[], $5::VARCHAR[]) AS c(t, k)
                      ON CONFLICT DO NOTHING",
                )
                .bind(server_id)
                .bind(season_i32)
                .bind(uuid)
                .bind(&tiers)
                .bind(&tracks)
                .execute(self.pool)
                .await?;
            }
        }

        tracing::debug!(
            %player,
            write_progress = delta.write_progress,
            steps = delta.dirty_steps.len(),
            claims = delta.new_claims.len(),
            "Flushed player delta"
        );

        Ok(())
    }

    /// Load a player's period marker. Missing rows yield zero tokens,
    /// which always mismatch "now" and trigger a first-load reset.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn load_period(
        &self,
        server_id: &str,
        season: u32,
        player: PlayerId,
    ) -> Result<PeriodMarker, DbError> {
        let row = sqlx::query_as::<_, PeriodRow>(
            r"SELECT daily_day, weekly_week FROM questline_periods
              WHERE server_id = $1 AND season = $2 AND player = $3",
        )
        .bind(server_id)
        .bind(season_db(season))
        .bind(player.into_inner())
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map_or_else(PeriodMarker::default, |r| PeriodMarker {
            daily_day: r.daily_day,
            weekly_week: r.weekly_week,
        }))
    }

    /// Upsert a player's period marker.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the statement fails.
    pub async fn upsert_period(
        &self,
        server_id: &str,
        season: u32,
        player: PlayerId,
        marker: PeriodMarker,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO questline_periods (server_id, season, player, daily_day, weekly_week)
              VALUES ($1, $2, $3, $4, $5)
              ON CONFLICT (server_id, season, player) DO UPDATE SET
                daily_day = EXCLUDED.daily_day,
                weekly_week = EXCLUDED.weekly_week,
                updated_at = now()",
        )
        .bind(server_id)
        .bind(season_db(season))
        .bind(player.into_inner())
        .bind(marker.daily_day)
        .bind(marker.weekly_week)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Whether any live row exists for the scope, across all four tables.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if a query fails.
    pub async fn has_live_rows(&self, server_id: &str, season: u32) -> Result<bool, DbError> {
        let season_i32 = season_db(season);
        for table in [
            "questline_progress",
            "questline_step_progress",
            "questline_claims",
            "questline_periods",
        ] {
            let sql =
                format!("SELECT 1 FROM {table} WHERE server_id = $1 AND season = $2 LIMIT 1");
            let found: Option<(i32,)> = sqlx::query_as(&sql)
                .bind(server_id)
                .bind(season_i32)
                .fetch_optional(self.pool)
                .await?;
            if found.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Season as stored (`INT`).
pub(crate) fn season_db(season: u32) -> i32 {
    i32::try_from(season).unwrap_or(i32::MAX)
}

/// Tier / step index as stored (`INT`).
pub(crate) fn tier_db(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Points / progress as stored (`BIGINT`).
pub(crate) fn points_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Placeholder uuid used as the first keyset cursor (sorts before any
/// real player id).
pub(crate) const fn cursor_start() -> Uuid {
    Uuid::nil()
}
