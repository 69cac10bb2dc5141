//! Admin job coordination: the single-flight gate, maintenance mode, and
//! the destructive season-lifecycle operations (backup, purge, restore,
//! rollover).
//!
//! # Gate semantics
//!
//! One compare-and-set gate covers the whole runtime: only one
//! destructive operation runs at a time, and a second attempt is
//! rejected synchronously with zero side effects. A separate maintenance
//! flag suppresses the periodic flush and premium-refresh tasks while a
//! destructive operation touches the *active* season, so nothing races
//! the bulk copy/delete.
//!
//! # Rollover protocol
//!
//! maintenance on -> unsubscribe ingestion -> flush-and-wait -> stop the
//! runtime *without* a second flush -> optional backup (+ optional file
//! snapshot) -> optional purge of the old season -> persist the new
//! season number atomically -> maintenance off -> restart. Any stage
//! failure aborts, restarts the runtime in its prior configuration, and
//! surfaces the error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use questline_core::{PassConfig, QuestCatalog, RewardCatalog};
use questline_db::{
    ArchiveStore, BackupReport, BatchSummary, PostgresConfig, PostgresPool, PurgeReport,
    RestoreReport,
};
use questline_types::{BatchId, PlayerId};

use crate::batch_files;
use crate::error::AdminError;
use crate::flusher::FlushSummary;
use crate::runtime::PassRuntime;
use crate::sources::{BoosterSource, EntitlementSource, EventSource};

/// Single-flight gate plus maintenance flag for destructive operations.
#[derive(Debug, Default)]
pub struct AdminGate {
    job_running: AtomicBool,
    maintenance: AtomicBool,
}

impl AdminGate {
    /// Create a fresh gate (no job running, no maintenance).
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Try to claim the gate. Returns a guard on success, `None` when
    /// another job holds it. The guard releases the gate on drop.
    pub fn try_begin(self: &Arc<Self>) -> Option<AdminJobGuard> {
        if self
            .job_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(AdminJobGuard {
                gate: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Whether a destructive job currently holds the gate.
    pub fn is_job_running(&self) -> bool {
        self.job_running.load(Ordering::Acquire)
    }

    /// Enter maintenance mode; the guard clears it on drop.
    pub fn enter_maintenance(self: &Arc<Self>) -> MaintenanceGuard {
        self.maintenance.store(true, Ordering::Release);
        MaintenanceGuard {
            gate: Arc::clone(self),
        }
    }

    /// Whether maintenance mode suppresses the periodic tasks.
    pub fn is_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::Acquire)
    }
}

/// RAII claim on the single-flight gate.
#[must_use = "dropping the guard releases the admin gate"]
#[derive(Debug)]
pub struct AdminJobGuard {
    gate: Arc<AdminGate>,
}

impl Drop for AdminJobGuard {
    fn drop(&mut self) {
        self.gate.job_running.store(false, Ordering::Release);
    }
}

/// RAII maintenance-mode flag.
#[must_use = "dropping the guard ends maintenance mode"]
#[derive(Debug)]
pub struct MaintenanceGuard {
    gate: Arc<AdminGate>,
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        self.gate.maintenance.store(false, Ordering::Release);
    }
}

/// Result of a completed rollover.
#[derive(Debug, Clone, Copy)]
pub struct RolloverReport {
    /// The season that was closed out.
    pub old_season: u32,
    /// The season now active.
    pub new_season: u32,
    /// The final flush pass before the destructive stages.
    pub flush: FlushSummary,
    /// The backup stage, when configured.
    pub backup: Option<BackupReport>,
    /// The purge stage, when configured.
    pub purge: Option<PurgeReport>,
}

/// Owns the runtime lifecycle and the destructive admin operations.
///
/// One coordinator per process; it rebuilds the [`PassRuntime`] whenever
/// the season context changes (rollover, restore-with-files, manual
/// restart).
pub struct Coordinator {
    config_path: PathBuf,
    data_dir: PathBuf,
    config: tokio::sync::RwLock<PassConfig>,
    db: PostgresPool,
    gate: Arc<AdminGate>,
    entitlements: Arc<dyn EntitlementSource>,
    boosters: Arc<dyn BoosterSource>,
    events: Arc<dyn EventSource>,
    runtime: tokio::sync::RwLock<Option<Arc<PassRuntime>>>,
}

impl Coordinator {
    /// Build a coordinator from a config file and the collaborator seams.
    ///
    /// The database pool is created lazily; the runtime starts offline
    /// and recovers when the storage probe succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError`] when the config cannot be loaded or the
    /// database URL is invalid.
    pub fn new(
        config_path: &Path,
        entitlements: Arc<dyn EntitlementSource>,
        boosters: Arc<dyn BoosterSource>,
        events: Arc<dyn EventSource>,
    ) -> Result<Self, AdminError> {
        let config = PassConfig::from_file(config_path)?;
        let data_dir = config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let pg = PostgresConfig::new(&config.storage.database_url)
            .with_max_connections(config.storage.max_connections);
        let db = PostgresPool::connect_lazy(&pg)?;

        Ok(Self {
            config_path: config_path.to_path_buf(),
            data_dir,
            config: tokio::sync::RwLock::new(config),
            db,
            gate: AdminGate::new(),
            entitlements,
            boosters,
            events,
            runtime: tokio::sync::RwLock::new(None),
        })
    }

    /// The shared admin gate (for hosts that surface its state).
    pub fn gate(&self) -> &Arc<AdminGate> {
        &self.gate
    }

    /// The database pool.
    pub const fn db(&self) -> &PostgresPool {
        &self.db
    }

    /// The currently running runtime, if any.
    pub async fn runtime(&self) -> Option<Arc<PassRuntime>> {
        self.runtime.read().await.clone()
    }

    /// A snapshot of the current configuration.
    pub async fn config(&self) -> PassConfig {
        self.config.read().await.clone()
    }

    /// Start the runtime (initial start or after [`Self::stop`]).
    ///
    /// # Errors
    ///
    /// Returns [`AdminError`] when catalogs cannot be loaded or the
    /// season configuration is invalid.
    pub async fn start(&self) -> Result<(), AdminError> {
        // Best effort: an offline database is allowed at start; the
        // runtime's probe task keeps retrying.
        let _ = self.db.probe().await;
        self.start_runtime(Vec::new()).await
    }

    /// Stop the runtime, optionally flushing deltas first.
    pub async fn stop(&self, flush: bool) {
        if let Some(runtime) = self.runtime.write().await.take() {
            runtime.stop(flush).await;
        }
    }

    async fn start_runtime(&self, players: Vec<PlayerId>) -> Result<(), AdminError> {
        let config = self.config.read().await.clone();
        let quests =
            QuestCatalog::from_file(&self.resolve(&config.catalogs.quests))?.into_quests();
        let tiers =
            RewardCatalog::from_file(&self.resolve(&config.catalogs.rewards))?.into_table();

        let runtime = PassRuntime::new(
            config,
            quests,
            tiers,
            self.db.clone(),
            Arc::clone(&self.entitlements),
            Arc::clone(&self.boosters),
            Arc::clone(&self.gate),
        )?;

        runtime.start();
        runtime.subscribe(self.events.subscribe());
        for player in players {
            runtime.on_join(player);
        }

        *self.runtime.write().await = Some(runtime);
        Ok(())
    }

    /// Restart after a failed destructive stage, preserving the player
    /// set. Never leaves the system offline: a failed restart is logged
    /// and the next admin action can retry.
    async fn recover(&self, players: Vec<PlayerId>) {
        if let Err(e) = self.start_runtime(players).await {
            tracing::error!(error = %e, "Runtime restart after failed admin job also failed");
        }
    }

    /// Archive a season (default: the active one) under a new batch.
    ///
    /// Runs live -- no maintenance mode; the keyset scan tolerates
    /// concurrent writes, and rows written mid-backup simply land in the
    /// next one.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError`] on refusal (gate, disabled backups,
    /// offline storage) or when the archive copy fails (the batch row
    /// then records FAILED).
    pub async fn backup(
        &self,
        season: Option<u32>,
        created_by: Option<&str>,
        note: Option<&str>,
    ) -> Result<BackupReport, AdminError> {
        let config = self.config.read().await.clone();
        if !config.backups.enabled {
            return Err(AdminError::BackupsDisabled);
        }
        let _job = self.gate.try_begin().ok_or(AdminError::JobAlreadyRunning)?;
        if !self.db.is_available() {
            return Err(AdminError::StorageUnavailable);
        }

        let season = season.unwrap_or_else(|| config.season.season());
        if season == 0 {
            return Err(AdminError::InvalidSeason(season));
        }

        let report = ArchiveStore::new(self.db.pool())
            .backup_season(
                &config.server.id,
                season,
                created_by,
                note,
                config.backups.chunk_size(),
            )
            .await?;

        if config.backups.files_enabled {
            self.snapshot_files(&config, report.batch_id);
        }

        Ok(report)
    }

    /// Delete a season's live rows.
    ///
    /// Requires `confirm`; rejected before any I/O otherwise. Purging
    /// the *active* season enters maintenance: ingestion pauses, deltas
    /// are flushed and the runtime stops (no second flush) so in-memory
    /// state cannot re-create rows mid-delete; the runtime restarts
    /// afterwards either way. Other seasons purge without downtime.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError`] on refusal or delete failure.
    pub async fn purge(&self, season: u32, confirm: bool) -> Result<PurgeReport, AdminError> {
        if !confirm {
            return Err(AdminError::ConfirmationRequired);
        }
        if season == 0 {
            return Err(AdminError::InvalidSeason(season));
        }
        let _job = self.gate.try_begin().ok_or(AdminError::JobAlreadyRunning)?;
        if !self.db.is_available() {
            return Err(AdminError::StorageUnavailable);
        }

        let config = self.config.read().await.clone();
        let delete_limit = config.rollover.delete_limit();
        let server_id = config.server.id.clone();

        if season != config.season.season() {
            // Inactive seasons have no in-memory state to race.
            return Ok(ArchiveStore::new(self.db.pool())
                .purge_season(&server_id, season, delete_limit)
                .await?);
        }

        let _maintenance = self.gate.enter_maintenance();
        let players = match self.runtime().await {
            Some(runtime) => {
                runtime.pause_ingestion();
                let flush = runtime.flush_all_and_wait().await;
                tracing::info!(
                    flushed = flush.flushed,
                    failures = flush.failures,
                    "Pre-purge flush complete"
                );
                let players = runtime.loaded_players();
                self.stop(false).await;
                players
            }
            None => Vec::new(),
        };

        let result = ArchiveStore::new(self.db.pool())
            .purge_season(&server_id, season, delete_limit)
            .await;

        self.recover(players).await;
        Ok(result?)
    }

    /// Restore a backup batch into its live tables.
    ///
    /// Requires `confirm`. The runtime always stops (without flushing)
    /// for the duration and restarts afterwards, so restored rows are
    /// never clobbered by stale in-memory deltas. With `include_files`,
    /// the batch's config/catalog snapshot is restored first and the
    /// configuration reloaded from disk.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError`] on refusal, missing file snapshot, or
    /// restore failure (including `overwrite` refusals from the store).
    pub async fn restore(
        &self,
        batch_id: BatchId,
        overwrite: bool,
        include_files: bool,
        confirm: bool,
    ) -> Result<RestoreReport, AdminError> {
        if !confirm {
            return Err(AdminError::ConfirmationRequired);
        }
        let _job = self.gate.try_begin().ok_or(AdminError::JobAlreadyRunning)?;
        if !self.db.is_available() {
            return Err(AdminError::StorageUnavailable);
        }

        let config = self.config.read().await.clone();
        let _maintenance = self.gate.enter_maintenance();

        let players = match self.runtime().await {
            Some(runtime) => {
                let players = runtime.loaded_players();
                self.stop(false).await;
                players
            }
            None => Vec::new(),
        };

        if include_files {
            let backups_dir = self.data_dir.join(&config.backups.files_dir);
            let quests_path = self.resolve(&config.catalogs.quests);
            let rewards_path = self.resolve(&config.catalogs.rewards);
            let targets: Vec<&Path> =
                vec![&self.config_path, &quests_path, &rewards_path];
            if let Err(e) = batch_files::restore_batch_files(&backups_dir, batch_id, &targets) {
                self.recover(players).await;
                return Err(AdminError::BatchFiles(e));
            }
        }

        let result = ArchiveStore::new(self.db.pool())
            .restore_batch(
                batch_id,
                overwrite,
                config.backups.chunk_size(),
                config.rollover.delete_limit(),
            )
            .await;

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                self.recover(players).await;
                return Err(e.into());
            }
        };

        if include_files {
            // The restored files are now the source of truth.
            match PassConfig::from_file(&self.config_path) {
                Ok(reloaded) => *self.config.write().await = reloaded,
                Err(e) => {
                    tracing::warn!(error = %e, "Restored config failed to load; keeping previous");
                }
            }
        }

        self.recover(players).await;
        Ok(report)
    }

    /// Roll the pass over to the next season.
    ///
    /// See the module docs for the protocol. Per-player flush failures
    /// during the final flush do not abort (they are the same accepted
    /// loss as any flush); stage failures do, restarting the runtime on
    /// the old season.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError`] on refusal or stage failure.
    pub async fn rollover(&self, created_by: Option<&str>) -> Result<RolloverReport, AdminError> {
        let _job = self.gate.try_begin().ok_or(AdminError::JobAlreadyRunning)?;
        if !self.db.is_available() {
            return Err(AdminError::StorageUnavailable);
        }

        let config = self.config.read().await.clone();
        let old_season = config.season.season();
        let old_week = config.season.pass_week();
        let new_season = old_season.saturating_add(1);
        let server_id = config.server.id.clone();

        let maintenance = self.gate.enter_maintenance();

        let runtime = self.runtime().await.ok_or(AdminError::RuntimeNotRunning)?;
        let players = runtime.loaded_players();
        runtime.pause_ingestion();
        let flush = runtime.flush_all_and_wait().await;
        if flush.failures > 0 {
            tracing::warn!(
                failures = flush.failures,
                "Deltas lost in pre-rollover flush"
            );
        }
        // Already flushed; a second flush on stop would race the backup.
        self.stop(false).await;

        let archive = ArchiveStore::new(self.db.pool());

        let backup = if config.backups.enabled && config.rollover.backup_before_change {
            match archive
                .backup_season(
                    &server_id,
                    old_season,
                    created_by,
                    Some("rollover"),
                    config.backups.chunk_size(),
                )
                .await
            {
                Ok(report) => {
                    if config.backups.files_enabled {
                        self.snapshot_files(&config, report.batch_id);
                    }
                    Some(report)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Rollover aborted: backup failed");
                    self.recover(players).await;
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let purge = if config.rollover.purge_old_season {
            match archive
                .purge_season(&server_id, old_season, config.rollover.delete_limit())
                .await
            {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!(error = %e, "Rollover aborted: purge failed (backup batch may still exist)");
                    self.recover(players).await;
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        // Persist the new season; revert in memory if the write fails.
        {
            let mut live = self.config.write().await;
            live.apply_rollover(new_season);
            if let Err(e) = live.save_to_file(&self.config_path) {
                live.season.current = old_season;
                live.season.week = old_week;
                drop(live);
                tracing::warn!(error = %e, "Rollover aborted: config save failed");
                self.recover(players).await;
                return Err(e.into());
            }
        }

        drop(maintenance);
        self.start_runtime(players).await?;

        tracing::info!(old_season, new_season, "Season rollover complete");
        Ok(RolloverReport {
            old_season,
            new_season,
            flush,
            backup,
            purge,
        })
    }

    /// The most recent backup batches for this server, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError`] when storage is offline or the query fails.
    pub async fn list_batches(&self, limit: usize) -> Result<Vec<BatchSummary>, AdminError> {
        if !self.db.is_available() {
            return Err(AdminError::StorageUnavailable);
        }
        let config = self.config.read().await.clone();
        Ok(ArchiveStore::new(self.db.pool())
            .list_batches(&config.server.id, limit)
            .await?)
    }

    /// Whether a batch also has a config/catalog file snapshot.
    pub async fn batch_has_files(&self, batch_id: BatchId) -> bool {
        let config = self.config.read().await;
        let backups_dir = self.data_dir.join(&config.backups.files_dir);
        batch_files::has_batch_files(&backups_dir, batch_id)
    }

    /// Best-effort file snapshot next to a DB batch.
    fn snapshot_files(&self, config: &PassConfig, batch_id: BatchId) {
        let backups_dir = self.data_dir.join(&config.backups.files_dir);
        let quests_path = self.resolve(&config.catalogs.quests);
        let rewards_path = self.resolve(&config.catalogs.rewards);
        let files: Vec<&Path> = vec![&self.config_path, &quests_path, &rewards_path];

        match batch_files::snapshot_batch_files(
            &backups_dir,
            batch_id,
            &files,
            config.backups.files_keep,
        ) {
            Ok(dir) => tracing::debug!(%batch_id, dir = %dir.display(), "Batch files snapshotted"),
            Err(e) => tracing::warn!(%batch_id, error = %e, "Batch file snapshot skipped"),
        }
    }

    /// Resolve a configured path relative to the config file's directory.
    fn resolve(&self, configured: &str) -> PathBuf {
        let path = Path::new(configured);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_is_single_flight() {
        let gate = AdminGate::new();
        let first = gate.try_begin();
        assert!(first.is_some());
        assert!(gate.is_job_running());

        // Second attempt while the first guard lives: rejected.
        assert!(gate.try_begin().is_none());

        drop(first);
        assert!(!gate.is_job_running());
        assert!(gate.try_begin().is_some());
    }

    #[test]
    fn maintenance_clears_on_drop() {
        let gate = AdminGate::new();
        assert!(!gate.is_maintenance());
        {
            let _guard = gate.enter_maintenance();
            assert!(gate.is_maintenance());
        }
        assert!(!gate.is_maintenance());
    }

    #[test]
    fn maintenance_is_independent_of_the_job_gate() {
        let gate = AdminGate::new();
        let _job = gate.try_begin();
        assert!(!gate.is_maintenance());
        let _m = gate.enter_maintenance();
        assert!(gate.is_maintenance());
        assert!(gate.is_job_running());
    }
}
