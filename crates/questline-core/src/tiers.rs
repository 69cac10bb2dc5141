//! The points -> tier resolver.
//!
//! Tier numbers are 1-based and contiguous up to the highest configured
//! tier. The resolver is called on every point award and on every player
//! load (to self-heal when the tier table changed between sessions), so
//! lookup is a binary search over a dense threshold array.

use questline_types::RewardTier;

/// Immutable tier table for the season.
///
/// Construction sorts the input, drops out-of-range tier numbers, and
/// enforces monotonic non-decreasing requirements as a failsafe against a
/// hand-edited catalog where a higher tier asks for fewer points than a
/// lower one.
#[derive(Debug, Clone)]
pub struct RewardsTable {
    /// Sorted tier rows as configured (after the monotonic failsafe).
    tiers: Vec<RewardTier>,

    /// `required_by_tier[t]` = points required for tier `t`; index 0 unused.
    required_by_tier: Vec<u64>,
}

impl RewardsTable {
    /// Build a table from catalog rows.
    pub fn new(rows: Vec<RewardTier>) -> Self {
        let mut sorted = rows;
        sorted.sort_by_key(|t| t.tier);

        let max = sorted.last().map_or(0, |t| t.tier);
        let len = usize::try_from(max).unwrap_or(0).saturating_add(1);
        let mut required_by_tier = vec![0_u64; len];

        for row in &sorted {
            let idx = usize::try_from(row.tier).unwrap_or(usize::MAX);
            if row.tier == 0 || idx >= required_by_tier.len() {
                continue;
            }
            if let Some(slot) = required_by_tier.get_mut(idx) {
                *slot = row.points_required;
            }
        }

        // Monotonic failsafe: a tier never requires less than the one below.
        let mut last = 0_u64;
        for slot in required_by_tier.iter_mut().skip(1) {
            if *slot < last {
                *slot = last;
            }
            last = *slot;
        }

        // Reflect the failsafe back into the public rows.
        let mut tiers = sorted;
        for row in &mut tiers {
            let idx = usize::try_from(row.tier).unwrap_or(usize::MAX);
            if let Some(required) = required_by_tier.get(idx) {
                row.points_required = *required;
            }
        }

        Self {
            tiers,
            required_by_tier,
        }
    }

    /// Highest configured tier number (0 when the table is empty).
    pub fn max_tier(&self) -> u32 {
        let len = self.required_by_tier.len();
        u32::try_from(len.saturating_sub(1)).unwrap_or(u32::MAX)
    }

    /// Points required to reach `tier`, or `u64::MAX` for unknown tiers.
    pub fn points_required(&self, tier: u32) -> u64 {
        if tier == 0 {
            return u64::MAX;
        }
        let idx = usize::try_from(tier).unwrap_or(usize::MAX);
        self.required_by_tier.get(idx).copied().unwrap_or(u64::MAX)
    }

    /// Whether the table configures the given tier.
    pub fn has_tier(&self, tier: u32) -> bool {
        tier >= 1 && tier <= self.max_tier()
    }

    /// Resolve the tier for a point total.
    ///
    /// Returns the maximum tier whose requirement is `<= points`, or 0
    /// when no tier qualifies. Binary search over the threshold array;
    /// monotonicity is guaranteed by construction.
    pub fn tier_for_points(&self, points: u64) -> u32 {
        if self.required_by_tier.len() <= 1 {
            return 0;
        }

        let mut lo = 1_usize;
        let mut hi = self.required_by_tier.len().saturating_sub(1);
        let mut answer = 0_usize;

        while lo <= hi {
            let mid = lo.midpoint(hi);
            let required = self.required_by_tier.get(mid).copied().unwrap_or(u64::MAX);
            if points >= required {
                answer = mid;
                lo = mid.saturating_add(1);
            } else {
                if mid == 0 {
                    break;
                }
                hi = mid.saturating_sub(1);
            }
        }

        u32::try_from(answer).unwrap_or(u32::MAX)
    }

    /// All configured tier rows, sorted ascending.
    pub fn all(&self) -> &[RewardTier] {
        &self.tiers
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn table(rows: &[(u32, u64)]) -> RewardsTable {
        RewardsTable::new(
            rows.iter()
                .map(|&(tier, points_required)| RewardTier {
                    tier,
                    points_required,
                })
                .collect(),
        )
    }

    #[test]
    fn empty_table_resolves_zero() {
        let t = table(&[]);
        assert_eq!(t.tier_for_points(0), 0);
        assert_eq!(t.tier_for_points(1_000_000), 0);
        assert_eq!(t.max_tier(), 0);
    }

    #[test]
    fn boundary_cases_from_two_tier_table() {
        let t = table(&[(1, 100), (2, 250)]);
        assert_eq!(t.tier_for_points(0), 0);
        assert_eq!(t.tier_for_points(99), 0);
        assert_eq!(t.tier_for_points(100), 1);
        assert_eq!(t.tier_for_points(249), 1);
        assert_eq!(t.tier_for_points(250), 2);
        assert_eq!(t.tier_for_points(u64::MAX), 2);
    }

    #[test]
    fn resolver_is_monotonic_in_points() {
        let t = table(&[(1, 10), (2, 50), (3, 75), (4, 200), (5, 1000)]);
        let mut last = 0;
        for points in 0..1100 {
            let tier = t.tier_for_points(points);
            assert!(tier >= last, "tier dropped at points={points}");
            last = tier;
        }
        assert_eq!(last, 5);
    }

    #[test]
    fn monotonic_failsafe_raises_bad_rows() {
        // Tier 2 misconfigured below tier 1; it must be raised, not honored.
        let t = table(&[(1, 100), (2, 50), (3, 300)]);
        assert_eq!(t.points_required(2), 100);
        assert_eq!(t.tier_for_points(100), 2);
        assert_eq!(t.tier_for_points(99), 0);
        assert_eq!(t.tier_for_points(300), 3);
    }

    #[test]
    fn tier_zero_rows_are_dropped() {
        let t = table(&[(0, 5), (1, 10)]);
        assert_eq!(t.max_tier(), 1);
        assert_eq!(t.tier_for_points(5), 0);
        assert_eq!(t.tier_for_points(10), 1);
    }

    #[test]
    fn has_tier_respects_range() {
        let t = table(&[(1, 100), (2, 250)]);
        assert!(t.has_tier(1));
        assert!(t.has_tier(2));
        assert!(!t.has_tier(0));
        assert!(!t.has_tier(3));
    }
}
