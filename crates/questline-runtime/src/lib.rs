//! Live Questline runtime: concurrent player state, event ingestion, the
//! batched delta flusher, and the admin coordinator for season lifecycle
//! operations.
//!
//! # Architecture
//!
//! ```text
//! host events ──mpsc──> PassRuntime.apply_event   (in-memory only)
//!                           |
//!        periodic timer ──> flush pass ──> questline-db ProgressStore
//!                           |
//! Coordinator ── gate/maintenance ──> backup / purge / restore / rollover
//!                                        (questline-db ArchiveStore)
//! ```
//!
//! The [`PassRuntime`] is a per-season context; the [`Coordinator`]
//! rebuilds it on rollover. Collaborator seams ([`EntitlementSource`],
//! [`BoosterSource`], [`EventSource`]) keep entitlements, boosters and
//! the event feed outside the core.
//!
//! # Modules
//!
//! - [`runtime`] -- the live per-season runtime
//! - [`flusher`] -- the batched write-behind flush pipeline
//! - [`admin`] -- single-flight gate, maintenance mode, lifecycle ops
//! - [`sources`] -- collaborator traits and defaults
//! - [`error`] -- error types

pub mod admin;
mod batch_files;
pub mod error;
pub mod flusher;
pub mod runtime;
pub mod sources;

// Re-export primary types for convenience.
pub use admin::{AdminGate, AdminJobGuard, Coordinator, MaintenanceGuard, RolloverReport};
pub use error::{AdminError, ClaimError, EngineError};
pub use flusher::FlushSummary;
pub use runtime::PassRuntime;
pub use sources::{
    BoosterSource, ChannelEvents, EntitlementSource, EventSource, NoBoosters, NoEntitlements,
};
