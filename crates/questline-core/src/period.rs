//! Daily/weekly cadence period tokens.
//!
//! A player's persisted [`PeriodMarker`] is compared against "now" tokens
//! on load; a mismatch triggers a cadence reset of the matching quests.
//! Tokens, not timestamps: the daily token is the epoch-day in the
//! configured timezone, the weekly token is either the admin-controlled
//! pass week counter or an ISO calendar week id (YYYYWW).

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Errors that can occur building the period clock.
#[derive(Debug, thiserror::Error)]
pub enum PeriodError {
    /// The configured timezone string could not be parsed.
    #[error("invalid timezone offset: {raw:?} (expected \"UTC\" or \"+HH:MM\")")]
    InvalidTimezone {
        /// The offending configuration value.
        raw: String,
    },
}

/// How the weekly reset token is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekResetMode {
    /// Weekly quests reset when the admin advances the pass week.
    PassWeek,
    /// Weekly quests reset on ISO calendar week boundaries.
    Iso,
}

impl Default for WeekResetMode {
    fn default() -> Self {
        Self::PassWeek
    }
}

/// Per-player persisted period tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeriodMarker {
    /// Epoch-day (in the configured timezone) of the last daily reset.
    pub daily_day: i64,
    /// Weekly token of the last weekly reset.
    pub weekly_week: i64,
}

/// Derives "now" period tokens for cadence reset decisions.
#[derive(Debug, Clone)]
pub struct PeriodClock {
    offset: FixedOffset,
    mode: WeekResetMode,
    pass_week: u32,
}

impl PeriodClock {
    /// Build a clock from a timezone offset string, reset mode and the
    /// current pass week.
    ///
    /// Accepted timezone forms: `UTC` (or blank) and fixed offsets like
    /// `+02:00` / `-05:30`. The pack runs on fixed offsets rather than a
    /// tz database; DST-shifting zones are out of scope.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::InvalidTimezone`] when the string parses as
    /// neither form.
    pub fn new(timezone: &str, mode: WeekResetMode, pass_week: u32) -> Result<Self, PeriodError> {
        let trimmed = timezone.trim();
        let offset = if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("utc") {
            FixedOffset::east_opt(0).ok_or_else(|| PeriodError::InvalidTimezone {
                raw: timezone.to_owned(),
            })?
        } else {
            trimmed
                .parse::<FixedOffset>()
                .map_err(|_err| PeriodError::InvalidTimezone {
                    raw: timezone.to_owned(),
                })?
        };

        Ok(Self {
            offset,
            mode,
            pass_week,
        })
    }

    /// The configured pass week.
    pub const fn pass_week(&self) -> u32 {
        self.pass_week
    }

    /// Current daily token: epoch-day in the configured timezone.
    pub fn daily_token(&self) -> i64 {
        self.daily_token_at(Utc::now())
    }

    /// Daily token for an explicit instant (test seam).
    pub fn daily_token_at(&self, now: DateTime<Utc>) -> i64 {
        let local = now.with_timezone(&self.offset).date_naive();
        local
            .signed_duration_since(NaiveDate::default())
            .num_days()
    }

    /// Current weekly token, per the configured reset mode.
    pub fn weekly_token(&self) -> i64 {
        self.weekly_token_at(Utc::now())
    }

    /// Weekly token for an explicit instant (test seam).
    ///
    /// Pass-week mode ignores the instant entirely: weekly resets then
    /// happen only when an admin advances the week counter.
    pub fn weekly_token_at(&self, now: DateTime<Utc>) -> i64 {
        match self.mode {
            WeekResetMode::PassWeek => i64::from(self.pass_week),
            WeekResetMode::Iso => {
                let local = now.with_timezone(&self.offset).date_naive();
                let iso = local.iso_week();
                i64::from(iso.year())
                    .saturating_mul(100)
                    .saturating_add(i64::from(iso.week()))
            }
        }
    }

    /// Both tokens for "now", as a marker.
    pub fn now_marker(&self) -> PeriodMarker {
        let now = Utc::now();
        PeriodMarker {
            daily_day: self.daily_token_at(now),
            weekly_week: self.weekly_token_at(now),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn utc_daily_token_is_epoch_day() {
        let clock = PeriodClock::new("UTC", WeekResetMode::PassWeek, 1).unwrap();
        // 1970-01-01 is epoch day 0; 1970-01-02 is day 1.
        assert_eq!(clock.daily_token_at(at(1970, 1, 1, 12)), 0);
        assert_eq!(clock.daily_token_at(at(1970, 1, 2, 0)), 1);
    }

    #[test]
    fn offset_shifts_the_day_boundary() {
        let east = PeriodClock::new("+02:00", WeekResetMode::PassWeek, 1).unwrap();
        let west = PeriodClock::new("-05:00", WeekResetMode::PassWeek, 1).unwrap();
        // 23:00 UTC: already tomorrow at +02:00, still today at -05:00.
        let instant = at(1970, 1, 1, 23);
        assert_eq!(east.daily_token_at(instant), 1);
        assert_eq!(west.daily_token_at(instant), 0);
    }

    #[test]
    fn pass_week_mode_uses_admin_counter() {
        let clock = PeriodClock::new("UTC", WeekResetMode::PassWeek, 7).unwrap();
        assert_eq!(clock.weekly_token_at(at(2026, 1, 1, 0)), 7);
        assert_eq!(clock.weekly_token_at(at(2026, 8, 1, 0)), 7);
    }

    #[test]
    fn iso_mode_encodes_year_and_week() {
        let clock = PeriodClock::new("UTC", WeekResetMode::Iso, 1).unwrap();
        // 2026-01-05 is a Monday in ISO week 2 of 2026.
        assert_eq!(clock.weekly_token_at(at(2026, 1, 5, 0)), 2026_02);
    }

    #[test]
    fn iso_week_year_can_differ_from_calendar_year() {
        let clock = PeriodClock::new("UTC", WeekResetMode::Iso, 1).unwrap();
        // 2027-01-01 falls in ISO week 53 of 2026.
        assert_eq!(clock.weekly_token_at(at(2027, 1, 1, 0)), 2026_53);
    }

    #[test]
    fn invalid_timezone_is_rejected() {
        assert!(PeriodClock::new("Mars/Olympus", WeekResetMode::PassWeek, 1).is_err());
    }

    #[test]
    fn blank_timezone_defaults_to_utc() {
        let clock = PeriodClock::new("  ", WeekResetMode::PassWeek, 1).unwrap();
        assert_eq!(clock.daily_token_at(at(1970, 1, 1, 12)), 0);
    }
}
