//! `PostgreSQL` data layer for the Questline progression core.
//!
//! Two concerns live here: the **live stores** the flush pipeline writes
//! through (progress, steps, claims, periods), and the **archive
//! pipeline** behind season lifecycle operations (backup, purge,
//! restore). Everything is scoped by `(server_id, season)`, and every
//! write path is chunked or bounded so live traffic and bulk operations
//! can share one database without long locks.
//!
//! # Architecture
//!
//! ```text
//! Flusher                       Admin coordinator
//!    |                              |
//!    +-- ProgressStore              +-- ArchiveStore
//!        |-- flush_delta                |-- backup_season  (keyset copy)
//!        |-- load_player                |-- purge_season   (bounded deletes)
//!        +-- load/upsert_period        |-- restore_batch  (id-paged upsert)
//!                                       +-- list/find_batch
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- connection pool, lazy connect, availability probe
//! - [`progress_store`] -- live row load and delta flush
//! - [`archive_store`] -- backup/purge/restore and batch control rows
//! - [`error`] -- shared error type

pub mod archive_store;
pub mod error;
pub mod postgres;
pub mod progress_store;

// Re-export primary types for convenience.
pub use archive_store::{
    ArchiveStore, BackupError, BackupReport, BatchSummary, PurgeReport, RestoreError,
    RestoreReport,
};
pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use progress_store::{LoadedPlayer, LoadedStep, ProgressStore};
