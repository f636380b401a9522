//! Pure lockout policy math: sliding window and exponential backoff.
//!
//! Kept free of storage so the escalation rules can be tested exhaustively.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Lock duration for the Nth offense: base doubles per repeat offense,
/// capped at the configured maximum. `offense_count` is 1-based.
#[must_use]
pub fn lock_duration(offense_count: i32, base: Duration, max: Duration) -> Duration {
    let mut duration = base;
    for _ in 1..offense_count {
        duration = match duration.checked_mul(2) {
            Some(doubled) => doubled,
            None => return max,
        };
        if duration >= max {
            return max;
        }
    }
    duration.min(max)
}

/// Offense counter for a lock applied at `now`. A lockout that re-triggers
/// within the repeat-offense window of the previous unlock escalates;
/// otherwise the identifier starts over at 1.
#[must_use]
pub fn next_offense_count(
    previous_offenses: i32,
    last_cleared_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    repeat_window: Duration,
) -> i32 {
    let repeat_window = ChronoDuration::from_std(repeat_window)
        .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 2));
    match last_cleared_at {
        Some(cleared_at) if now.signed_duration_since(cleared_at) <= repeat_window => {
            previous_offenses.saturating_add(1).max(1)
        }
        _ => 1,
    }
}

/// A failure window that started longer than `window` ago no longer counts.
#[must_use]
pub fn window_expired(window_start: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    let window = ChronoDuration::from_std(window)
        .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 2));
    now.signed_duration_since(window_start) > window
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(15 * 60);
    const MAX: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn duration_doubles_per_offense() {
        assert_eq!(lock_duration(1, BASE, MAX), Duration::from_secs(900));
        assert_eq!(lock_duration(2, BASE, MAX), Duration::from_secs(1800));
        assert_eq!(lock_duration(3, BASE, MAX), Duration::from_secs(3600));
        assert_eq!(lock_duration(4, BASE, MAX), Duration::from_secs(7200));
    }

    #[test]
    fn duration_caps_at_max() {
        // 15m * 2^7 = 32h, past the 24h cap.
        assert_eq!(lock_duration(8, BASE, MAX), MAX);
        assert_eq!(lock_duration(100, BASE, MAX), MAX);
    }

    #[test]
    fn escalation_is_strictly_increasing_until_cap() {
        let mut previous = Duration::ZERO;
        for offense in 1..=7 {
            let current = lock_duration(offense, BASE, MAX);
            assert!(current > previous, "offense {offense} did not escalate");
            previous = current;
        }
    }

    #[test]
    fn zero_or_negative_offense_behaves_like_first() {
        assert_eq!(lock_duration(0, BASE, MAX), BASE);
        assert_eq!(lock_duration(-3, BASE, MAX), BASE);
    }

    #[test]
    fn repeat_offense_inside_window_escalates() {
        let now = Utc::now();
        let cleared = now - ChronoDuration::hours(1);
        assert_eq!(
            next_offense_count(2, Some(cleared), now, Duration::from_secs(24 * 60 * 60)),
            3
        );
    }

    #[test]
    fn offense_counter_resets_outside_window() {
        let now = Utc::now();
        let cleared = now - ChronoDuration::days(3);
        assert_eq!(
            next_offense_count(5, Some(cleared), now, Duration::from_secs(24 * 60 * 60)),
            1
        );
    }

    #[test]
    fn first_ever_lock_counts_one() {
        let now = Utc::now();
        assert_eq!(
            next_offense_count(0, None, now, Duration::from_secs(24 * 60 * 60)),
            1
        );
    }

    #[test]
    fn window_expiry_boundary() {
        let now = Utc::now();
        let window = Duration::from_secs(600);
        assert!(!window_expired(now - ChronoDuration::seconds(599), now, window));
        assert!(window_expired(now - ChronoDuration::seconds(601), now, window));
    }
}
