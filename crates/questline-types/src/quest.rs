//! Immutable quest and reward-tier definitions.
//!
//! Quest definitions are loaded once per runtime instantiation from the
//! quest catalog and never mutated afterwards. A quest is an ordered list
//! of steps; each step filters incoming events by type and optional
//! key/value, and requires a cumulative amount before the quest advances.

use serde::{Deserialize, Serialize};

use crate::enums::QuestCadence;

/// One step of a multi-step quest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestStep {
    /// Event type this step listens for (matched case-insensitively).
    #[serde(rename = "type")]
    pub event_type: String,

    /// Optional key filter. Blank means "any key".
    #[serde(default)]
    pub key: String,

    /// Optional value filter. Blank means "any value".
    #[serde(default)]
    pub value: String,

    /// Cumulative amount required to complete the step. Minimum 1.
    pub required: u64,
}

impl QuestStep {
    /// Whether the step carries a key filter.
    pub fn has_key_filter(&self) -> bool {
        !self.key.trim().is_empty()
    }

    /// Whether the step carries a value filter.
    pub fn has_value_filter(&self) -> bool {
        !self.value.trim().is_empty()
    }
}

/// Definition of a quest in the season catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestDef {
    /// Stable quest identifier (the step-progress table key).
    pub id: String,

    /// Display name for menus and logs.
    pub name: String,

    /// Points awarded on completion of the final step.
    pub points: u64,

    /// Whether only premium players can progress this quest.
    #[serde(default)]
    pub premium_only: bool,

    /// Extra points awarded to premium players on completion.
    #[serde(default)]
    pub premium_bonus_points: u64,

    /// Reset cadence of the quest.
    pub cadence: QuestCadence,

    /// For weekly quests: the pass weeks the quest is active in.
    /// Empty means "every week".
    #[serde(default)]
    pub available_weeks: Vec<u32>,

    /// Ordered steps. A quest with no steps can never complete.
    pub steps: Vec<QuestStep>,
}

impl QuestDef {
    /// Whether the quest is active in the given pass week.
    ///
    /// Only weekly quests with an explicit week schedule are ever
    /// excluded; everything else is always active.
    pub fn active_in_week(&self, week: u32) -> bool {
        if self.cadence != QuestCadence::Weekly {
            return true;
        }
        if self.available_weeks.is_empty() {
            return true;
        }
        self.available_weeks.contains(&week)
    }
}

/// One row of the season's tier table.
///
/// Reward content (items, commands, cosmetics) is collaborator territory;
/// the core keeps only what eligibility decisions need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTier {
    /// Tier number, 1-based.
    pub tier: u32,

    /// Points required to reach this tier.
    pub points_required: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weekly_quest(weeks: Vec<u32>) -> QuestDef {
        QuestDef {
            id: String::from("mine_gold"),
            name: String::from("Gold Rush"),
            points: 100,
            premium_only: false,
            premium_bonus_points: 0,
            cadence: QuestCadence::Weekly,
            available_weeks: weeks,
            steps: vec![QuestStep {
                event_type: String::from("block_break"),
                key: String::from("block"),
                value: String::from("gold_ore"),
                required: 10,
            }],
        }
    }

    #[test]
    fn weekly_quest_with_schedule_is_windowed() {
        let quest = weekly_quest(vec![2, 3]);
        assert!(!quest.active_in_week(1));
        assert!(quest.active_in_week(2));
        assert!(quest.active_in_week(3));
        assert!(!quest.active_in_week(4));
    }

    #[test]
    fn weekly_quest_without_schedule_is_always_active() {
        let quest = weekly_quest(Vec::new());
        assert!(quest.active_in_week(1));
        assert!(quest.active_in_week(99));
    }

    #[test]
    fn season_quest_ignores_week_schedule() {
        let mut quest = weekly_quest(vec![5]);
        quest.cadence = QuestCadence::Season;
        assert!(quest.active_in_week(1));
    }

    #[test]
    fn blank_filters_are_detected() {
        let step = QuestStep {
            event_type: String::from("fish_catch"),
            key: String::new(),
            value: String::from("  "),
            required: 1,
        };
        assert!(!step.has_key_filter());
        assert!(!step.has_value_filter());
    }
}
