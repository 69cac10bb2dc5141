//! Per-player progression state and dirty-delta tracking.
//!
//! Threading: event application runs on the host's ingestion path;
//! load/flush run on the async pool. A small per-player mutex guards the
//! inner state, and the flusher captures writes through
//! [`PlayerProgress::snapshot_and_clear`], which presents a consistent
//! once-only view of the dirty fields. Mutations landing after the
//! snapshot belong to the next flush cycle, never to none.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use questline_types::RewardTrack;

/// In-memory step position for one quest.
#[derive(Debug, Default)]
struct StepState {
    step_idx: u32,
    progress: u64,
    dirty: bool,
}

/// Snapshot of one quest's step position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSnap {
    /// Index of the step the player is on (may equal the step count when
    /// the quest is complete).
    pub step_idx: u32,
    /// Progress accumulated within the current step.
    pub progress: u64,
}

/// A claim made since the last flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClaimSnap {
    /// The claimed tier.
    pub tier: u32,
    /// The claimed reward lane.
    pub track: RewardTrack,
}

/// Snapshot of a player's unwritten mutations.
///
/// Produced by [`PlayerProgress::snapshot_and_clear`]; consumed by the
/// flush pipeline. Once captured, the same mutation is never captured
/// again.
#[derive(Debug, Clone, Default)]
pub struct DeltaSnapshot {
    /// Whether tier/points changed and the progress row needs an upsert.
    pub write_progress: bool,
    /// Tier at snapshot time (only meaningful when `write_progress`).
    pub tier: u32,
    /// Points at snapshot time (only meaningful when `write_progress`).
    pub points: u64,
    /// Dirty step states, full-replace per quest.
    pub dirty_steps: HashMap<String, StepSnap>,
    /// Claims made since the last flush (append-only inserts).
    pub new_claims: Vec<ClaimSnap>,
}

impl DeltaSnapshot {
    /// Whether the snapshot carries nothing to write.
    pub fn is_clean(&self) -> bool {
        !self.write_progress && self.dirty_steps.is_empty() && self.new_claims.is_empty()
    }
}

/// Inner state guarded by the per-player mutex.
#[derive(Debug, Default)]
struct ProgressInner {
    points: u64,
    tier: u32,
    dirty_progress: bool,
    quests: HashMap<String, StepState>,
    claimed_free: BTreeSet<u32>,
    claimed_premium: BTreeSet<u32>,
    dirty_claims: BTreeSet<ClaimSnap>,
}

impl ProgressInner {
    fn claim_set(&mut self, track: RewardTrack) -> &mut BTreeSet<u32> {
        match track {
            RewardTrack::Free => &mut self.claimed_free,
            RewardTrack::Premium => &mut self.claimed_premium,
        }
    }
}

/// Per-player progression state.
///
/// `seed_*` methods populate state from storage without marking it dirty;
/// `set_*`/`add_*`/`mark_*` methods mutate live state and flag the
/// corresponding delta for the next flush.
#[derive(Debug, Default)]
pub struct PlayerProgress {
    /// Premium entitlement, refreshed periodically from the external
    /// entitlement source. Lock-free so the ingestion path can read it
    /// without touching the mutex.
    premium: AtomicBool,

    inner: Mutex<ProgressInner>,
}

impl PlayerProgress {
    /// Fresh state for a player with no stored rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current point total.
    pub fn points(&self) -> u64 {
        self.inner.lock().points
    }

    /// Current tier.
    pub fn tier(&self) -> u32 {
        self.inner.lock().tier
    }

    /// Cached premium entitlement.
    pub fn premium(&self) -> bool {
        self.premium.load(Ordering::Acquire)
    }

    /// Update the cached premium entitlement.
    pub fn set_premium(&self, premium: bool) {
        self.premium.store(premium, Ordering::Release);
    }

    /// Seed tier/points from storage (load path, not dirty).
    pub fn seed_progress(&self, tier: u32, points: u64) {
        let mut inner = self.inner.lock();
        inner.tier = tier;
        inner.points = points;
        inner.dirty_progress = false;
    }

    /// Set the tier and mark progress dirty.
    pub fn set_tier(&self, tier: u32) {
        let mut inner = self.inner.lock();
        inner.tier = tier;
        inner.dirty_progress = true;
    }

    /// Add points and mark progress dirty. Zero deltas are ignored.
    pub fn add_points(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.points = inner.points.saturating_add(delta);
        inner.dirty_progress = true;
    }

    /// Adjust points by a signed delta and mark progress dirty.
    ///
    /// The admin-override path: unlike [`Self::add_points`] this can
    /// lower the total (saturating at zero). Callers are expected to
    /// resync the tier afterwards.
    pub fn adjust_points(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.points = if delta >= 0 {
            inner.points.saturating_add(delta.unsigned_abs())
        } else {
            inner.points.saturating_sub(delta.unsigned_abs())
        };
        inner.dirty_progress = true;
    }

    /// Seed a claim from storage (load path, not dirty).
    pub fn seed_claim(&self, track: RewardTrack, tier: u32) {
        let mut inner = self.inner.lock();
        inner.claim_set(track).insert(tier);
    }

    /// Whether the player already claimed `(tier, track)`.
    pub fn has_claim(&self, track: RewardTrack, tier: u32) -> bool {
        let inner = self.inner.lock();
        match track {
            RewardTrack::Free => inner.claimed_free.contains(&tier),
            RewardTrack::Premium => inner.claimed_premium.contains(&tier),
        }
    }

    /// Record a claim and queue it for insert.
    ///
    /// Returns `false` when the claim already existed (nothing queued),
    /// which is what makes claims unique per (tier, track).
    pub fn mark_claim(&self, track: RewardTrack, tier: u32) -> bool {
        let mut inner = self.inner.lock();
        let added = inner.claim_set(track).insert(tier);
        if added {
            inner.dirty_claims.insert(ClaimSnap { tier, track });
        }
        added
    }

    /// Ensure a quest has step state (self-healing when the catalog grew
    /// after the player's last save). Not dirty.
    pub fn ensure_quest(&self, quest_id: &str) {
        let mut inner = self.inner.lock();
        if !inner.quests.contains_key(quest_id) {
            inner
                .quests
                .insert(quest_id.to_owned(), StepState::default());
        }
    }

    /// Seed quest step state from storage (load path, not dirty).
    pub fn seed_quest(&self, quest_id: &str, step_idx: u32, progress: u64) {
        let mut inner = self.inner.lock();
        let entry = inner.quests.entry(quest_id.to_owned()).or_default();
        entry.step_idx = step_idx;
        entry.progress = progress;
        entry.dirty = false;
    }

    /// Read the current step position for a quest (creating it if missing).
    pub fn quest(&self, quest_id: &str) -> StepSnap {
        let mut inner = self.inner.lock();
        let entry = inner.quests.entry(quest_id.to_owned()).or_default();
        StepSnap {
            step_idx: entry.step_idx,
            progress: entry.progress,
        }
    }

    /// Write a quest step position and mark it dirty.
    pub fn set_quest(&self, quest_id: &str, step_idx: u32, progress: u64) {
        let mut inner = self.inner.lock();
        let entry = inner.quests.entry(quest_id.to_owned()).or_default();
        entry.step_idx = step_idx;
        entry.progress = progress;
        entry.dirty = true;
    }

    /// Reset a quest to step 0 / progress 0 (cadence rollover).
    pub fn reset_quest(&self, quest_id: &str) {
        self.set_quest(quest_id, 0, 0);
    }

    /// Ids of every quest with in-memory state.
    pub fn quest_ids(&self) -> Vec<String> {
        self.inner.lock().quests.keys().cloned().collect()
    }

    /// Capture the dirty delta and clear the dirty flags atomically.
    ///
    /// This is the once-only contract the flusher depends on: two calls
    /// with no mutation in between yield an empty second snapshot, and a
    /// mutation concurrent with the call lands in exactly one of the two
    /// snapshots.
    pub fn snapshot_and_clear(&self) -> DeltaSnapshot {
        let mut inner = self.inner.lock();

        let write_progress = inner.dirty_progress;
        inner.dirty_progress = false;
        let tier = inner.tier;
        let points = inner.points;

        let mut dirty_steps = HashMap::new();
        for (quest_id, step) in &mut inner.quests {
            if !step.dirty {
                continue;
            }
            step.dirty = false;
            dirty_steps.insert(
                quest_id.clone(),
                StepSnap {
                    step_idx: step.step_idx,
                    progress: step.progress,
                },
            );
        }

        let new_claims: Vec<ClaimSnap> = inner.dirty_claims.iter().copied().collect();
        inner.dirty_claims.clear();

        DeltaSnapshot {
            write_progress,
            tier,
            points,
            dirty_steps,
            new_claims,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_clean() {
        let state = PlayerProgress::new();
        assert_eq!(state.points(), 0);
        assert_eq!(state.tier(), 0);
        assert!(state.snapshot_and_clear().is_clean());
    }

    #[test]
    fn seeding_does_not_dirty() {
        let state = PlayerProgress::new();
        state.seed_progress(3, 750);
        state.seed_quest("q1", 2, 5);
        state.seed_claim(RewardTrack::Free, 1);
        assert_eq!(state.tier(), 3);
        assert_eq!(state.points(), 750);
        assert!(state.snapshot_and_clear().is_clean());
    }

    #[test]
    fn mutations_are_captured_once() {
        let state = PlayerProgress::new();
        state.add_points(100);
        state.set_quest("q1", 1, 4);
        state.mark_claim(RewardTrack::Premium, 2);

        let first = state.snapshot_and_clear();
        assert!(first.write_progress);
        assert_eq!(first.points, 100);
        assert_eq!(
            first.dirty_steps.get("q1"),
            Some(&StepSnap {
                step_idx: 1,
                progress: 4
            })
        );
        assert_eq!(
            first.new_claims,
            vec![ClaimSnap {
                tier: 2,
                track: RewardTrack::Premium
            }]
        );

        // No mutation in between: second snapshot is a no-op.
        let second = state.snapshot_and_clear();
        assert!(second.is_clean());
    }

    #[test]
    fn mutation_after_snapshot_lands_in_next_cycle() {
        let state = PlayerProgress::new();
        state.add_points(10);
        let _ = state.snapshot_and_clear();

        state.add_points(5);
        let next = state.snapshot_and_clear();
        assert!(next.write_progress);
        assert_eq!(next.points, 15);
    }

    #[test]
    fn duplicate_claim_is_rejected_and_not_requeued() {
        let state = PlayerProgress::new();
        assert!(state.mark_claim(RewardTrack::Free, 1));
        assert!(!state.mark_claim(RewardTrack::Free, 1));

        let delta = state.snapshot_and_clear();
        assert_eq!(delta.new_claims.len(), 1);
    }

    #[test]
    fn claim_tracks_are_independent() {
        let state = PlayerProgress::new();
        assert!(state.mark_claim(RewardTrack::Free, 1));
        assert!(state.mark_claim(RewardTrack::Premium, 1));
        assert!(state.has_claim(RewardTrack::Free, 1));
        assert!(state.has_claim(RewardTrack::Premium, 1));
        assert!(!state.has_claim(RewardTrack::Free, 2));
    }

    #[test]
    fn seeded_claim_is_not_flushed() {
        let state = PlayerProgress::new();
        state.seed_claim(RewardTrack::Free, 1);
        // Marking the same claim again adds nothing.
        assert!(!state.mark_claim(RewardTrack::Free, 1));
        assert!(state.snapshot_and_clear().new_claims.is_empty());
    }

    #[test]
    fn ensure_quest_creates_zero_state() {
        let state = PlayerProgress::new();
        state.ensure_quest("q9");
        let snap = state.quest("q9");
        assert_eq!(snap.step_idx, 0);
        assert_eq!(snap.progress, 0);
        assert!(state.snapshot_and_clear().is_clean());
    }

    #[test]
    fn reset_quest_is_dirty() {
        let state = PlayerProgress::new();
        state.seed_quest("daily", 2, 7);
        state.reset_quest("daily");
        let delta = state.snapshot_and_clear();
        assert_eq!(
            delta.dirty_steps.get("daily"),
            Some(&StepSnap {
                step_idx: 0,
                progress: 0
            })
        );
    }

    #[test]
    fn adjust_points_can_lower_but_not_underflow() {
        let state = PlayerProgress::new();
        state.seed_progress(1, 100);
        state.adjust_points(-40);
        assert_eq!(state.points(), 60);
        state.adjust_points(-500);
        assert_eq!(state.points(), 0);
        state.adjust_points(25);
        assert_eq!(state.points(), 25);
        assert!(state.snapshot_and_clear().write_progress);
    }

    #[test]
    fn points_saturate_instead_of_wrapping() {
        let state = PlayerProgress::new();
        state.seed_progress(0, u64::MAX - 1);
        state.add_points(10);
        assert_eq!(state.points(), u64::MAX);
    }
}
