//! The progress event delivered by the host's event source.

use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;

/// One gameplay event as delivered by the host.
///
/// `event_type`, `key` and `value` are matched case-insensitively against
/// quest step filters; `amount` is the quantity the event represents
/// (blocks broken, mobs killed, ...). The core never interprets the
/// strings beyond filter matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Event type, e.g. `block_break` or `mob_kill`.
    pub event_type: String,

    /// The player the event belongs to.
    pub player: PlayerId,

    /// Quantity carried by the event. Zero-amount events are ignored.
    pub amount: u64,

    /// Optional discriminator key, e.g. `block`. Blank when absent.
    pub key: String,

    /// Optional discriminator value, e.g. `gold_ore`. Blank when absent.
    pub value: String,
}

impl ProgressEvent {
    /// Convenience constructor for events without key/value discriminators.
    pub fn bare(event_type: impl Into<String>, player: PlayerId, amount: u64) -> Self {
        Self {
            event_type: event_type.into(),
            player,
            amount,
            key: String::new(),
            value: String::new(),
        }
    }

    /// Return a copy of the event with a different amount.
    ///
    /// Used by the runtime when a progress booster scales the amount
    /// before quest matching.
    pub fn with_amount(&self, amount: u64) -> Self {
        let mut scaled = self.clone();
        scaled.amount = amount;
        scaled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_event_has_blank_discriminators() {
        let event = ProgressEvent::bare("fish_catch", PlayerId::new(), 3);
        assert!(event.key.is_empty());
        assert!(event.value.is_empty());
        assert_eq!(event.amount, 3);
    }

    #[test]
    fn with_amount_only_changes_amount() {
        let event = ProgressEvent {
            event_type: String::from("block_break"),
            player: PlayerId::new(),
            amount: 2,
            key: String::from("block"),
            value: String::from("stone"),
        };
        let scaled = event.with_amount(4);
        assert_eq!(scaled.amount, 4);
        assert_eq!(scaled.event_type, event.event_type);
        assert_eq!(scaled.key, event.key);
    }
}
