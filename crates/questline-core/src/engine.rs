//! Event application: the quest/tier state machine.
//!
//! For each incoming event and each candidate quest: the quest is skipped
//! when its cadence window excludes the current pass week or when it is
//! premium-only and the player lacks premium. Otherwise the current step
//! must match the event's type and any non-blank key/value filters
//! (case-insensitive). Progress below the step requirement persists
//! progress only; reaching the requirement advances the step with
//! progress reset to 0 -- overshoot above `required` is discarded, not
//! carried into the next step. Completing the final step awards points
//! (base + premium bonus, times the points booster, floored, minimum 1)
//! and recomputes the tier, which this path only ever raises.

use questline_types::{ProgressEvent, QuestCadence, QuestDef, QuestStep};

use crate::index::QuestIndex;
use crate::state::PlayerProgress;
use crate::tiers::RewardsTable;

/// A quest completed by an event, reported to the caller so the
/// reward/notification collaborators can react.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedQuest {
    /// The completed quest.
    pub quest_id: String,
    /// Points actually awarded (after bonus and booster).
    pub awarded_points: u64,
    /// The new tier, when the completion raised it.
    pub new_tier: Option<u32>,
}

/// The progression engine for one season context.
///
/// Holds the immutable quest index, tier table and current pass week;
/// all mutable state lives in the per-player [`PlayerProgress`].
#[derive(Debug)]
pub struct ProgressEngine {
    index: QuestIndex,
    tiers: RewardsTable,
    week: u32,
}

impl ProgressEngine {
    /// Build an engine from the season's catalogs.
    pub const fn new(index: QuestIndex, tiers: RewardsTable, week: u32) -> Self {
        Self { index, tiers, week }
    }

    /// The quest index.
    pub const fn index(&self) -> &QuestIndex {
        &self.index
    }

    /// The tier table.
    pub const fn tiers(&self) -> &RewardsTable {
        &self.tiers
    }

    /// The current pass week.
    pub const fn week(&self) -> u32 {
        self.week
    }

    /// Apply one event to a player's state.
    ///
    /// The event's `amount` is expected to already carry any progress
    /// booster applied by the caller; `points_multiplier` is the caller's
    /// points booster, applied on quest completion. Returns the quests
    /// the event completed (usually none).
    pub fn apply(
        &self,
        state: &PlayerProgress,
        event: &ProgressEvent,
        points_multiplier: f64,
    ) -> Vec<CompletedQuest> {
        if event.amount == 0 {
            return Vec::new();
        }

        let mut completed = Vec::new();
        for quest in self.index.candidates(event) {
            if !quest.active_in_week(self.week) {
                continue;
            }
            if quest.premium_only && !state.premium() {
                continue;
            }
            if let Some(done) = self.apply_quest(state, event, quest, points_multiplier) {
                completed.push(done);
            }
        }
        completed
    }

    /// Advance one quest by one event. Returns the completion, if any.
    fn apply_quest(
        &self,
        state: &PlayerProgress,
        event: &ProgressEvent,
        quest: &QuestDef,
        points_multiplier: f64,
    ) -> Option<CompletedQuest> {
        let step_count = u32::try_from(quest.steps.len()).unwrap_or(u32::MAX);
        let cur = state.quest(&quest.id);
        if cur.step_idx >= step_count {
            return None;
        }

        let step = quest.steps.get(usize::try_from(cur.step_idx).ok()?)?;
        if !step_matches(step, event) {
            return None;
        }

        let next = cur.progress.saturating_add(event.amount);
        if next < step.required {
            state.set_quest(&quest.id, cur.step_idx, next);
            return None;
        }

        // Overshoot beyond `required` is dropped here on purpose: the
        // next step starts at 0 no matter how large the event was.
        let next_idx = cur.step_idx.saturating_add(1);
        state.set_quest(&quest.id, next_idx, 0);

        if next_idx >= step_count {
            Some(self.award_points(state, quest, points_multiplier))
        } else {
            None
        }
    }

    /// Award completion points and recompute the tier (raise-only).
    fn award_points(
        &self,
        state: &PlayerProgress,
        quest: &QuestDef,
        points_multiplier: f64,
    ) -> CompletedQuest {
        if quest.points == 0 {
            return CompletedQuest {
                quest_id: quest.id.clone(),
                awarded_points: 0,
                new_tier: None,
            };
        }

        let mut base = quest.points;
        if state.premium() && quest.premium_bonus_points > 0 {
            base = base.saturating_add(quest.premium_bonus_points);
        }

        let awarded = boosted_amount(base, points_multiplier);
        state.add_points(awarded);

        let new_tier = self.tiers.tier_for_points(state.points());
        let old_tier = state.tier();
        let raised = if new_tier > old_tier {
            state.set_tier(new_tier);
            Some(new_tier)
        } else {
            None
        };

        tracing::debug!(
            quest_id = quest.id.as_str(),
            awarded,
            new_tier = raised,
            "Quest completed"
        );

        CompletedQuest {
            quest_id: quest.id.clone(),
            awarded_points: awarded,
            new_tier: raised,
        }
    }

    /// Reset every quest of the given cadence to (0, 0).
    ///
    /// Returns how many quests were reset. The caller is responsible for
    /// persisting the new period marker together with these deltas.
    pub fn reset_quests_of_cadence(&self, state: &PlayerProgress, cadence: QuestCadence) -> usize {
        let mut reset = 0_usize;
        for quest in self.index.all() {
            if quest.cadence == cadence {
                state.reset_quest(&quest.id);
                reset = reset.saturating_add(1);
            }
        }
        reset
    }

    /// Recompute the tier from points and write it when it differs.
    ///
    /// Load-path self-healing: unlike the award path this may also lower
    /// the tier, because the tier table itself may have changed between
    /// sessions. Returns the corrected tier when a write happened.
    pub fn resync_tier(&self, state: &PlayerProgress) -> Option<u32> {
        let expected = self.tiers.tier_for_points(state.points());
        if expected == state.tier() {
            return None;
        }
        state.set_tier(expected);
        Some(expected)
    }
}

/// Whether a step's filters accept the event.
fn step_matches(step: &QuestStep, event: &ProgressEvent) -> bool {
    if !step
        .event_type
        .trim()
        .eq_ignore_ascii_case(event.event_type.trim())
    {
        return false;
    }
    if step.has_key_filter() && !step.key.trim().eq_ignore_ascii_case(event.key.trim()) {
        return false;
    }
    if step.has_value_filter() && !step.value.trim().eq_ignore_ascii_case(event.value.trim()) {
        return false;
    }
    true
}

/// Apply a multiplier to an amount: floor, minimum 1.
///
/// Used for both booster kinds (progress amounts and awarded points).
// Precision loss at the extremes is acceptable: multipliers are small
// human-configured factors and amounts far below 2^52.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn boosted_amount(base: u64, multiplier: f64) -> u64 {
    let scaled = ((base as f64) * multiplier).floor();
    if scaled.is_nan() || scaled < 1.0 {
        1
    } else if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}

#[cfg(test)]
mod tests {
    use questline_types::{PlayerId, RewardTier};

    use super::*;

    fn step(event_type: &str, required: u64) -> QuestStep {
        QuestStep {
            event_type: event_type.to_owned(),
            key: String::new(),
            value: String::new(),
            required,
        }
    }

    fn quest(id: &str, points: u64, steps: Vec<QuestStep>) -> QuestDef {
        QuestDef {
            id: id.to_owned(),
            name: id.to_owned(),
            points,
            premium_only: false,
            premium_bonus_points: 0,
            cadence: QuestCadence::Season,
            available_weeks: Vec::new(),
            steps,
        }
    }

    fn engine(quests: Vec<QuestDef>, tiers: &[(u32, u64)], week: u32) -> ProgressEngine {
        let table = RewardsTable::new(
            tiers
                .iter()
                .map(|&(tier, points_required)| RewardTier {
                    tier,
                    points_required,
                })
                .collect(),
        );
        ProgressEngine::new(QuestIndex::new(quests), table, week)
    }

    fn event(event_type: &str, amount: u64) -> ProgressEvent {
        ProgressEvent::bare(event_type, PlayerId::new(), amount)
    }

    #[test]
    fn overshoot_is_dropped_not_carried() {
        // 10-required step fed 4,4,4: advances on the third event with
        // progress reset to 0, not 2.
        let eng = engine(
            vec![quest(
                "q",
                0,
                vec![step("block_break", 10), step("block_break", 10)],
            )],
            &[],
            1,
        );
        let state = PlayerProgress::new();

        let _ = eng.apply(&state, &event("block_break", 4), 1.0);
        assert_eq!(state.quest("q").progress, 4);
        let _ = eng.apply(&state, &event("block_break", 4), 1.0);
        assert_eq!(state.quest("q").progress, 8);
        let _ = eng.apply(&state, &event("block_break", 4), 1.0);

        let snap = state.quest("q");
        assert_eq!(snap.step_idx, 1);
        assert_eq!(snap.progress, 0);
    }

    #[test]
    fn progress_never_reaches_required_without_advancing() {
        let eng = engine(vec![quest("q", 0, vec![step("e", 10)])], &[], 1);
        let state = PlayerProgress::new();
        for _ in 0..50 {
            let _ = eng.apply(&state, &event("e", 3), 1.0);
            let snap = state.quest("q");
            if snap.step_idx == 0 {
                assert!(snap.progress < 10);
            } else {
                assert_eq!(snap.progress, 0);
            }
        }
    }

    #[test]
    fn completing_final_step_awards_points_and_raises_tier() {
        let eng = engine(
            vec![quest("q", 100, vec![step("e", 1)])],
            &[(1, 100), (2, 250)],
            1,
        );
        let state = PlayerProgress::new();

        let completed = eng.apply(&state, &event("e", 1), 1.0);
        assert_eq!(completed.len(), 1);
        assert_eq!(state.points(), 100);
        assert_eq!(state.tier(), 1);
        assert_eq!(
            completed.first().map(|c| c.new_tier),
            Some(Some(1))
        );
    }

    #[test]
    fn completed_quest_stops_accumulating() {
        let eng = engine(vec![quest("q", 10, vec![step("e", 1)])], &[], 1);
        let state = PlayerProgress::new();
        let _ = eng.apply(&state, &event("e", 1), 1.0);
        assert_eq!(state.points(), 10);
        // Further events are ignored; no double award.
        let _ = eng.apply(&state, &event("e", 1), 1.0);
        assert_eq!(state.points(), 10);
    }

    #[test]
    fn premium_only_quest_requires_premium() {
        let mut q = quest("vip", 10, vec![step("e", 1)]);
        q.premium_only = true;
        let eng = engine(vec![q], &[], 1);
        let state = PlayerProgress::new();

        let _ = eng.apply(&state, &event("e", 1), 1.0);
        assert_eq!(state.points(), 0);

        state.set_premium(true);
        let _ = eng.apply(&state, &event("e", 1), 1.0);
        assert_eq!(state.points(), 10);
    }

    #[test]
    fn premium_bonus_applies_only_to_premium() {
        let mut q = quest("q", 100, vec![step("e", 1)]);
        q.premium_bonus_points = 50;
        let eng = engine(vec![q], &[], 1);

        let free = PlayerProgress::new();
        let _ = eng.apply(&free, &event("e", 1), 1.0);
        assert_eq!(free.points(), 100);

        let premium = PlayerProgress::new();
        premium.set_premium(true);
        let _ = eng.apply(&premium, &event("e", 1), 1.0);
        assert_eq!(premium.points(), 150);
    }

    #[test]
    fn points_booster_floors_with_minimum_one() {
        let eng = engine(vec![quest("q", 10, vec![step("e", 1)])], &[], 1);
        let state = PlayerProgress::new();
        let _ = eng.apply(&state, &event("e", 1), 1.55);
        // floor(10 * 1.55) = 15
        assert_eq!(state.points(), 15);
    }

    #[test]
    fn boosted_amount_has_floor_and_minimum() {
        assert_eq!(boosted_amount(10, 1.55), 15);
        assert_eq!(boosted_amount(10, 0.01), 1);
        assert_eq!(boosted_amount(1, 0.0), 1);
        assert_eq!(boosted_amount(7, 1.0), 7);
    }

    #[test]
    fn weekly_quest_outside_window_is_skipped() {
        let mut q = quest("weekly", 10, vec![step("e", 1)]);
        q.cadence = QuestCadence::Weekly;
        q.available_weeks = vec![2, 3];
        let eng = engine(vec![q], &[], 1);
        let state = PlayerProgress::new();
        let _ = eng.apply(&state, &event("e", 1), 1.0);
        assert_eq!(state.points(), 0);
    }

    #[test]
    fn weekly_quest_inside_window_progresses() {
        let mut q = quest("weekly", 10, vec![step("e", 1)]);
        q.cadence = QuestCadence::Weekly;
        q.available_weeks = vec![2, 3];
        let eng = engine(vec![q], &[], 2);
        let state = PlayerProgress::new();
        let _ = eng.apply(&state, &event("e", 1), 1.0);
        assert_eq!(state.points(), 10);
    }

    #[test]
    fn zero_amount_events_are_ignored() {
        let eng = engine(vec![quest("q", 10, vec![step("e", 1)])], &[], 1);
        let state = PlayerProgress::new();
        assert!(eng.apply(&state, &event("e", 0), 1.0).is_empty());
        assert_eq!(state.quest("q").progress, 0);
    }

    #[test]
    fn tier_is_never_lowered_by_awards() {
        let eng = engine(
            vec![quest("q", 10, vec![step("e", 1)])],
            &[(1, 5), (2, 100)],
            1,
        );
        let state = PlayerProgress::new();
        state.seed_progress(2, 0); // admin gave tier 2 with no points
        let _ = eng.apply(&state, &event("e", 1), 1.0);
        assert_eq!(state.tier(), 2);
    }

    #[test]
    fn resync_tier_heals_in_both_directions() {
        let eng = engine(Vec::new(), &[(1, 100)], 1);

        let under = PlayerProgress::new();
        under.seed_progress(0, 500);
        assert_eq!(eng.resync_tier(&under), Some(1));

        let over = PlayerProgress::new();
        over.seed_progress(1, 10);
        assert_eq!(eng.resync_tier(&over), Some(0));

        let exact = PlayerProgress::new();
        exact.seed_progress(1, 100);
        assert_eq!(eng.resync_tier(&exact), None);
    }

    #[test]
    fn cadence_reset_targets_only_matching_quests() {
        let mut daily = quest("daily", 10, vec![step("e", 5)]);
        daily.cadence = QuestCadence::Daily;
        let season = quest("season", 10, vec![step("e", 5)]);
        let eng = engine(vec![daily, season], &[], 1);

        let state = PlayerProgress::new();
        state.seed_quest("daily", 0, 3);
        state.seed_quest("season", 0, 3);

        let reset = eng.reset_quests_of_cadence(&state, QuestCadence::Daily);
        assert_eq!(reset, 1);
        assert_eq!(state.quest("daily").progress, 0);
        assert_eq!(state.quest("season").progress, 3);
    }

    #[test]
    fn key_and_value_filters_must_match() {
        let q = QuestDef {
            id: String::from("gold"),
            name: String::from("gold"),
            points: 10,
            premium_only: false,
            premium_bonus_points: 0,
            cadence: QuestCadence::Season,
            available_weeks: Vec::new(),
            steps: vec![QuestStep {
                event_type: String::from("block_break"),
                key: String::from("block"),
                value: String::from("gold_ore"),
                required: 1,
            }],
        };
        let eng = engine(vec![q], &[], 1);
        let state = PlayerProgress::new();

        let mut wrong = ProgressEvent::bare("block_break", PlayerId::new(), 1);
        wrong.key = String::from("block");
        wrong.value = String::from("iron_ore");
        let _ = eng.apply(&state, &wrong, 1.0);
        assert_eq!(state.points(), 0);

        let mut right = ProgressEvent::bare("block_break", PlayerId::new(), 1);
        right.key = String::from("BLOCK");
        right.value = String::from("Gold_Ore");
        let _ = eng.apply(&state, &right, 1.0);
        assert_eq!(state.points(), 10);
    }
}
