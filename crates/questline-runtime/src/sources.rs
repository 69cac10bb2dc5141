//! Collaborator seams: entitlements and boosters.
//!
//! The core never decides who owns premium or how multipliers are sold;
//! it asks these traits. Hosts plug in their own implementations; the
//! no-op defaults make the runtime usable in tests and single-player
//! setups.

use async_trait::async_trait;
use questline_types::{BoosterKind, PlayerId};

/// External premium entitlement source.
///
/// Queried per player on load and on the periodic refresh. A failed
/// query leaves the cached premium flag untouched.
#[async_trait]
pub trait EntitlementSource: Send + Sync {
    /// Whether the player holds the entitlement.
    async fn is_premium(&self, entitlement_key: &str, player: PlayerId) -> anyhow::Result<bool>;
}

/// External booster source.
///
/// Multipliers are read synchronously on the ingestion path, so
/// implementations must answer from memory (a cache the host refreshes
/// however it likes).
pub trait BoosterSource: Send + Sync {
    /// The player's active multiplier for the given kind (1.0 = none).
    fn multiplier(&self, player: PlayerId, kind: BoosterKind) -> f64;
}

/// Entitlement source that grants premium to no one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEntitlements;

#[async_trait]
impl EntitlementSource for NoEntitlements {
    async fn is_premium(&self, _entitlement_key: &str, _player: PlayerId) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Booster source with every multiplier at 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBoosters;

impl BoosterSource for NoBoosters {
    fn multiplier(&self, _player: PlayerId, _kind: BoosterKind) -> f64 {
        1.0
    }
}

/// The host's gameplay event feed.
///
/// The runtime subscribes once on start and drops the receiver when
/// ingestion pauses or the runtime stops; a season rollover subscribes
/// again on the restarted runtime.
pub trait EventSource: Send + Sync {
    /// Open a fresh subscription to the event feed.
    fn subscribe(&self) -> tokio::sync::mpsc::Receiver<questline_types::ProgressEvent>;
}

/// In-process [`EventSource`] that fans events out to every live
/// subscription. Useful as the default wiring and in tests.
#[derive(Debug, Default)]
pub struct ChannelEvents {
    senders: parking_lot::Mutex<Vec<tokio::sync::mpsc::Sender<questline_types::ProgressEvent>>>,
}

impl ChannelEvents {
    /// Subscription channel depth.
    const CHANNEL_DEPTH: usize = 1024;

    /// Create an event hub with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every live subscriber, dropping closed ones.
    pub fn emit(&self, event: &questline_types::ProgressEvent) {
        let mut senders = self.senders.lock();
        senders.retain(|sender| sender.try_send(event.clone()).is_ok());
    }

    /// Number of live subscriptions (closed ones linger until the next
    /// [`Self::emit`]).
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().len()
    }
}

impl EventSource for ChannelEvents {
    fn subscribe(&self) -> tokio::sync::mpsc::Receiver<questline_types::ProgressEvent> {
        let (tx, rx) = tokio::sync::mpsc::channel(Self::CHANNEL_DEPTH);
        self.senders.lock().push(tx);
        rx
    }
}
