// src/utils/timing.rs
use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for "never": about thirty years.
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + after`, saturating at `start + FAR_FUTURE` instead of overflowing.
pub fn deadline_after(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after.min(FAR_FUTURE))
        .unwrap_or(start)
}

/// Period for `tokio::time::interval`, which must be non-zero and must not overflow
/// when added to the current time.
pub fn clamp_period(period: Duration) -> Duration {
    period.clamp(Duration::from_millis(1), FAR_FUTURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_saturates_on_huge_durations() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(deadline_after(now, Duration::MAX), now + FAR_FUTURE);
    }

    #[test]
    fn test_period_is_clamped() {
        assert_eq!(clamp_period(Duration::ZERO), Duration::from_millis(1));
        assert_eq!(clamp_period(Duration::MAX), FAR_FUTURE);
        assert_eq!(clamp_period(Duration::from_secs(60)), Duration::from_secs(60));
    }
}
