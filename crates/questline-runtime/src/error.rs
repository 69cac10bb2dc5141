//! Error types for the live runtime and admin coordinator.

use questline_core::{CatalogError, ConfigError, PeriodError};
use questline_db::{BackupError, DbError, RestoreError};
use questline_types::PlayerId;

/// Errors from runtime operations (load, flush, claims plumbing).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The player's state is not loaded into the live map.
    #[error("state for player {0} is not loaded")]
    StateNotLoaded(PlayerId),

    /// The period clock could not be built.
    #[error(transparent)]
    Period(#[from] PeriodError),

    /// A storage operation failed.
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Reasons a claim is refused.
///
/// All of these are normal gameplay outcomes, not faults; the admin/UI
/// collaborator turns them into user-facing messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    /// Tier numbers start at 1.
    #[error("invalid tier {0}")]
    InvalidTier(u32),

    /// The player's state is not loaded yet.
    #[error("state for player {0} is not loaded")]
    StateNotLoaded(PlayerId),

    /// The player has not reached the tier.
    #[error("tier {tier} not reached (current {current})")]
    TierNotReached {
        /// The requested tier.
        tier: u32,
        /// The player's current tier.
        current: u32,
    },

    /// The tier table does not configure the tier.
    #[error("no rewards configured for tier {0}")]
    UnknownTier(u32),

    /// Every requested lane was already claimed (or premium-gated).
    #[error("already claimed")]
    AlreadyClaimed,
}

/// Errors from destructive admin operations.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// Another destructive operation holds the single-flight gate.
    #[error("another admin job is running")]
    JobAlreadyRunning,

    /// The operation requires an explicit confirmation.
    #[error("refusing without confirmation")]
    ConfirmationRequired,

    /// Backups are disabled in configuration.
    #[error("backups are disabled")]
    BackupsDisabled,

    /// Season numbers start at 1.
    #[error("invalid season {0}")]
    InvalidSeason(u32),

    /// The runtime is not running.
    #[error("runtime is not running")]
    RuntimeNotRunning,

    /// Storage is offline; the operation was refused before any I/O.
    #[error("storage unavailable")]
    StorageUnavailable,

    /// Batch file snapshot/restore failed.
    #[error("batch file operation failed: {0}")]
    BatchFiles(#[from] std::io::Error),

    /// Configuration could not be loaded or persisted.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A catalog could not be loaded.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The runtime could not be (re)constructed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A storage operation failed.
    #[error(transparent)]
    Db(#[from] DbError),

    /// The backup stage failed (batch row holds the error).
    #[error(transparent)]
    Backup(#[from] BackupError),

    /// The restore stage failed or was refused.
    #[error(transparent)]
    Restore(#[from] RestoreError),
}
