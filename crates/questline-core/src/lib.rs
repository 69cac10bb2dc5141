//! Progression state machine for the Questline reward track.
//!
//! This crate is the pure heart of the system: no I/O, no async. It owns
//! the quest/tier state machine, per-player dirty-delta tracking, cadence
//! period tokens, and the typed configuration and catalogs everything is
//! built from.
//!
//! # Architecture
//!
//! ```text
//! ProgressEvent
//!     |
//!     +-- QuestIndex.candidates()      (event shape -> quest defs)
//!     |
//!     +-- ProgressEngine.apply()       (advance steps, award points)
//!         |-- PlayerProgress           (mutexed state + dirty deltas)
//!         +-- RewardsTable             (points -> tier, binary search)
//! ```
//!
//! The flush pipeline (in `questline-runtime`) drains deltas captured by
//! [`PlayerProgress::snapshot_and_clear`] and hands them to the data
//! layer; nothing in this crate blocks or allocates beyond the maps the
//! state itself needs.
//!
//! # Modules
//!
//! - [`config`] -- typed YAML configuration with clamped accessors
//! - [`catalog`] -- quest and reward-tier catalog loading
//! - [`tiers`] -- the points -> tier resolver
//! - [`index`] -- event shape -> candidate quest lookup
//! - [`state`] -- per-player progress and delta tracking
//! - [`engine`] -- event application (the state machine proper)
//! - [`period`] -- daily/weekly cadence tokens

pub mod catalog;
pub mod config;
pub mod engine;
pub mod index;
pub mod period;
pub mod state;
pub mod tiers;

pub use catalog::{CatalogError, QuestCatalog, RewardCatalog};
pub use config::{ConfigError, PassConfig};
pub use engine::{CompletedQuest, ProgressEngine};
pub use index::QuestIndex;
pub use period::{PeriodClock, PeriodError, PeriodMarker, WeekResetMode};
pub use state::{ClaimSnap, DeltaSnapshot, PlayerProgress, StepSnap};
pub use tiers::RewardsTable;
