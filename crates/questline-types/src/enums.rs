//! Enumerations shared across the progression core.

use serde::{Deserialize, Serialize};

/// Availability cadence of a quest: when it resets and when it is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestCadence {
    /// Never resets for the lifetime of the season.
    Season,
    /// Resets when the player's daily period token changes.
    Daily,
    /// Resets when the player's weekly period token changes.
    Weekly,
}

/// Reward lane within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardTrack {
    /// Available to every player who reached the tier.
    Free,
    /// Gated on the premium entitlement.
    Premium,
}

impl RewardTrack {
    /// Database representation of the track.
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::Premium => "PREMIUM",
        }
    }

    /// Parse the database representation (case-insensitive).
    ///
    /// Unknown values map to [`RewardTrack::Free`]; the claims table only
    /// ever holds values written through [`Self::as_db_str`].
    pub fn from_db_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("PREMIUM") {
            Self::Premium
        } else {
            Self::Free
        }
    }
}

/// Lifecycle status of a backup batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// The backup is in progress. Not restore-eligible.
    Running,
    /// The backup completed; all four row kinds were archived.
    Ok,
    /// The backup failed; a partial archive may remain for forensics.
    Failed,
}

impl BatchStatus {
    /// Database representation of the status.
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Ok => "OK",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the database representation (case-insensitive).
    ///
    /// Returns `None` for unknown values so callers can refuse rather
    /// than misread a corrupted control row.
    pub fn from_db_str(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("RUNNING") {
            Some(Self::Running)
        } else if s.eq_ignore_ascii_case("OK") {
            Some(Self::Ok)
        } else if s.eq_ignore_ascii_case("FAILED") {
            Some(Self::Failed)
        } else {
            None
        }
    }
}

/// Kind of multiplier queried from the external booster source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoosterKind {
    /// Multiplies incoming event amounts before quest matching.
    Progress,
    /// Multiplies awarded points on quest completion.
    Points,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_db_roundtrip() {
        assert_eq!(RewardTrack::from_db_str("PREMIUM"), RewardTrack::Premium);
        assert_eq!(RewardTrack::from_db_str("premium"), RewardTrack::Premium);
        assert_eq!(RewardTrack::from_db_str("FREE"), RewardTrack::Free);
        assert_eq!(RewardTrack::from_db_str("garbage"), RewardTrack::Free);
    }

    #[test]
    fn status_db_roundtrip() {
        assert_eq!(BatchStatus::from_db_str("ok"), Some(BatchStatus::Ok));
        assert_eq!(
            BatchStatus::from_db_str("RUNNING"),
            Some(BatchStatus::Running)
        );
        assert_eq!(BatchStatus::from_db_str("nope"), None);
    }

    #[test]
    fn cadence_serde_uses_lowercase() {
        let json = serde_json::to_string(&QuestCadence::Weekly).ok();
        assert_eq!(json.as_deref(), Some("\"weekly\""));
    }
}
