//! Shared type definitions for the Questline progression core.
//!
//! This crate holds the vocabulary every other Questline crate speaks:
//! strongly-typed identifiers, the quest/reward data model, the enums
//! describing cadence and reward tracks, and the progress event shape
//! delivered by the host's event source.
//!
//! # Modules
//!
//! - [`ids`] -- newtype identifiers (`PlayerId`, `BatchId`)
//! - [`enums`] -- cadence, track, batch status, booster kind
//! - [`quest`] -- immutable quest and reward-tier definitions
//! - [`event`] -- the progress event delivered by the host

pub mod enums;
pub mod event;
pub mod ids;
pub mod quest;

// Re-export primary types for convenience.
pub use enums::{BatchStatus, BoosterKind, QuestCadence, RewardTrack};
pub use event::ProgressEvent;
pub use ids::{BatchId, PlayerId};
pub use quest::{QuestDef, QuestStep, RewardTier};
