// Wall-clock helpers shared by the scrape and storage paths.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Millisecond timestamp of `t`. Times before the epoch clamp to 0.
pub fn unix_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Current wall clock in epoch milliseconds.
pub fn now_millis() -> i64 {
    unix_millis(SystemTime::now())
}

/// Nanoseconds since the epoch, used to seed the per-suite start offset.
pub fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

/// Start offset for a periodic loop: `now mod interval`, always in
/// `[0, interval)`. Spreads loops started at the same instant across the
/// full period.
pub fn jitter_delay(now_nanos: u128, interval: Duration) -> Duration {
    let interval_nanos = interval.as_nanos();
    if interval_nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((now_nanos % interval_nanos) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_below_interval() {
        let interval = Duration::from_secs(10);
        for now in [0u128, 1, 999_999_999, 10_000_000_000, 123_456_789_012_345] {
            let d = jitter_delay(now, interval);
            assert!(d < interval, "jitter {:?} not below {:?}", d, interval);
        }
    }

    #[test]
    fn jitter_zero_interval_is_zero() {
        assert_eq!(jitter_delay(42, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn unix_millis_epoch_is_zero() {
        assert_eq!(unix_millis(UNIX_EPOCH), 0);
        assert_eq!(
            unix_millis(UNIX_EPOCH + Duration::from_millis(1_500)),
            1_500
        );
    }
}
