//! Event shape -> candidate quest lookup.
//!
//! Keying rules:
//! - step key blank            => indexed as `(type, "", "")`
//! - step key set, value blank => `(type, key, "")`
//! - both set                  => `(type, key, value)`
//!
//! On event:
//! - probe `(type, event.key, event.value)`
//! - probe `(type, event.key, "")`
//! - probe `(type, "", "")`
//!
//! The common case hits exactly one bucket; the merge/dedup path only
//! runs when a quest's steps span multiple key shapes.

use std::collections::HashMap;

use questline_types::{ProgressEvent, QuestDef};

/// Normalized lookup key: trimmed, uppercased components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    event_type: String,
    key: String,
    value: String,
}

impl Key {
    fn from(event_type: &str, key: &str, value: &str) -> Self {
        Self {
            event_type: norm(event_type),
            key: norm(key),
            value: norm(value),
        }
    }
}

/// Normalize a filter component for case-insensitive comparison.
pub(crate) fn norm(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Global quest index built once per runtime instantiation.
#[derive(Debug, Default)]
pub struct QuestIndex {
    index: HashMap<Key, Vec<usize>>,
    all: Vec<QuestDef>,
}

impl QuestIndex {
    /// Build the index from the quest catalog.
    pub fn new(quests: Vec<QuestDef>) -> Self {
        let mut index: HashMap<Key, Vec<usize>> = HashMap::new();
        for (pos, quest) in quests.iter().enumerate() {
            for step in &quest.steps {
                let key = Key::from(&step.event_type, &step.key, &step.value);
                let bucket = index.entry(key).or_default();
                // A quest with several same-shaped steps only needs one slot.
                if bucket.last() != Some(&pos) {
                    bucket.push(pos);
                }
            }
        }
        Self { index, all: quests }
    }

    /// Quests whose step shapes could match the event.
    ///
    /// The returned candidates still have to pass the per-step filter in
    /// the engine; the index only narrows by shape.
    pub fn candidates(&self, event: &ProgressEvent) -> Vec<&QuestDef> {
        let exact = Key::from(&event.event_type, &event.key, &event.value);
        let keyed = Key::from(&event.event_type, &event.key, "");
        let bare = Key::from(&event.event_type, "", "");

        let a = self.index.get(&exact);
        let b = if keyed == exact {
            None
        } else {
            self.index.get(&keyed)
        };
        let c = if bare == exact || bare == keyed {
            None
        } else {
            self.index.get(&bare)
        };

        let mut seen: Vec<usize> = Vec::new();
        for bucket in [a, b, c].into_iter().flatten() {
            for &pos in bucket {
                if !seen.contains(&pos) {
                    seen.push(pos);
                }
            }
        }

        seen.into_iter().filter_map(|pos| self.all.get(pos)).collect()
    }

    /// All quests in catalog order.
    pub fn all(&self) -> &[QuestDef] {
        &self.all
    }

    /// Look up a quest by id.
    pub fn quest(&self, id: &str) -> Option<&QuestDef> {
        self.all.iter().find(|q| q.id == id)
    }
}

#[cfg(test)]
mod tests {
    use questline_types::{PlayerId, QuestCadence, QuestStep};

    use super::*;

    fn quest(id: &str, steps: Vec<QuestStep>) -> QuestDef {
        QuestDef {
            id: id.to_owned(),
            name: id.to_owned(),
            points: 10,
            premium_only: false,
            premium_bonus_points: 0,
            cadence: QuestCadence::Season,
            available_weeks: Vec::new(),
            steps,
        }
    }

    fn step(event_type: &str, key: &str, value: &str) -> QuestStep {
        QuestStep {
            event_type: event_type.to_owned(),
            key: key.to_owned(),
            value: value.to_owned(),
            required: 1,
        }
    }

    fn event(event_type: &str, key: &str, value: &str) -> ProgressEvent {
        ProgressEvent {
            event_type: event_type.to_owned(),
            player: PlayerId::new(),
            amount: 1,
            key: key.to_owned(),
            value: value.to_owned(),
        }
    }

    #[test]
    fn exact_shape_matches() {
        let idx = QuestIndex::new(vec![quest(
            "gold",
            vec![step("block_break", "block", "gold_ore")],
        )]);
        let found = idx.candidates(&event("block_break", "block", "gold_ore"));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn match_is_case_insensitive() {
        let idx = QuestIndex::new(vec![quest(
            "gold",
            vec![step("BLOCK_BREAK", "Block", "Gold_Ore")],
        )]);
        let found = idx.candidates(&event("block_break", "block", "gold_ore"));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn bare_shape_catches_filtered_events() {
        // A step with no filters listens to every event of its type.
        let idx = QuestIndex::new(vec![quest("any_break", vec![step("block_break", "", "")])]);
        let found = idx.candidates(&event("block_break", "block", "stone"));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn keyed_shape_catches_any_value() {
        let idx = QuestIndex::new(vec![quest("ore", vec![step("block_break", "block", "")])]);
        let found = idx.candidates(&event("block_break", "block", "iron_ore"));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn unrelated_event_type_finds_nothing() {
        let idx = QuestIndex::new(vec![quest(
            "gold",
            vec![step("block_break", "block", "gold_ore")],
        )]);
        assert!(idx.candidates(&event("mob_kill", "", "")).is_empty());
    }

    #[test]
    fn quest_spanning_shapes_is_deduplicated() {
        // One quest with a filtered step and a bare step: a matching event
        // probes both buckets, but the quest must appear once.
        let idx = QuestIndex::new(vec![quest(
            "mixed",
            vec![
                step("block_break", "block", "gold_ore"),
                step("block_break", "", ""),
            ],
        )]);
        let found = idx.candidates(&event("block_break", "block", "gold_ore"));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn bare_event_does_not_probe_duplicate_buckets() {
        let idx = QuestIndex::new(vec![quest("any", vec![step("fish_catch", "", "")])]);
        let found = idx.candidates(&event("fish_catch", "", ""));
        assert_eq!(found.len(), 1);
    }
}
