//! Type-safe identifier wrappers.
//!
//! Players are identified by UUID (the host supplies them; `new()` exists
//! for tests and tooling). Backup batches are identified by an `i64`
//! composed of millisecond time in the high bits and random entropy in the
//! low bits, so ids allocated in rapid succession stay collision-resistant
//! while remaining roughly time-ordered.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_uuid_id! {
    /// Unique identifier for a player. Supplied by the host platform.
    PlayerId
}

/// Number of low bits reserved for random entropy in a [`BatchId`].
const BATCH_ID_ENTROPY_BITS: u32 = 10;

/// Identifier for one backup archival run.
///
/// Composed as `(unix_millis << 10) | entropy`, so ids are monotonic at
/// millisecond granularity and two backups started within the same
/// millisecond still differ with high probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(pub i64);

impl BatchId {
    /// Compose a batch id from millisecond time and random entropy.
    ///
    /// Only the low [`BATCH_ID_ENTROPY_BITS`] bits of `entropy` are used.
    pub const fn compose(unix_millis: i64, entropy: u16) -> Self {
        let mask = (1_i64).wrapping_shl(BATCH_ID_ENTROPY_BITS).wrapping_sub(1);
        Self(unix_millis.wrapping_shl(BATCH_ID_ENTROPY_BITS) | (entropy as i64 & mask))
    }

    /// Wrap a raw database value.
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Return the raw `i64` value (the database representation).
    pub const fn into_inner(self) -> i64 {
        self.0
    }

    /// Extract the millisecond timestamp the id was composed from.
    pub const fn unix_millis(self) -> i64 {
        self.0 >> BATCH_ID_ENTROPY_BITS
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_id_display_matches_uuid() {
        let id = PlayerId::new();
        assert_eq!(id.to_string(), id.into_inner().to_string());
    }

    #[test]
    fn player_id_roundtrip_serde() {
        let original = PlayerId::new();
        let json = serde_json::to_string(&original).ok();
        assert!(json.is_some());
        let restored: Result<PlayerId, _> =
            serde_json::from_str(json.as_deref().unwrap_or(""));
        assert!(restored.is_ok());
    }

    #[test]
    fn batch_id_composition_roundtrips_time() {
        let millis = 1_754_000_000_123_i64;
        let id = BatchId::compose(millis, 0x3FF);
        assert_eq!(id.unix_millis(), millis);
    }

    #[test]
    fn batch_ids_order_by_time() {
        let earlier = BatchId::compose(1_000, 900);
        let later = BatchId::compose(1_001, 0);
        assert!(earlier < later);
    }

    #[test]
    fn batch_id_entropy_is_masked() {
        // Entropy wider than 10 bits must not bleed into the time bits.
        let a = BatchId::compose(42, 0);
        let b = BatchId::compose(42, u16::MAX);
        assert_eq!(a.unix_millis(), b.unix_millis());
    }
}
