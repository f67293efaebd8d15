//! Cancellation refund tiers.

use chrono::{DateTime, Duration, Utc};

use crate::models::{CancellationActor, RefundTier};

/// Client cancellations at least this far ahead get a full refund.
pub const FULL_REFUND_NOTICE_HOURS: i64 = 48;

/// Client cancellations at least this far ahead get half back.
pub const HALF_REFUND_NOTICE_HOURS: i64 = 24;

/// Refund tier for a cancellation made `time_until_start` before the lesson.
///
/// Instructor and platform cancellations always refund in full. Negative
/// durations (lesson already started) count as short notice.
pub fn refund_tier(actor: CancellationActor, time_until_start: Duration) -> RefundTier {
    match actor {
        CancellationActor::Instructor | CancellationActor::System => RefundTier::Full,
        CancellationActor::Client => {
            if time_until_start >= Duration::hours(FULL_REFUND_NOTICE_HOURS) {
                RefundTier::Full
            } else if time_until_start >= Duration::hours(HALF_REFUND_NOTICE_HOURS) {
                RefundTier::Half
            } else {
                RefundTier::None
            }
        }
    }
}

/// Refund tier for a cancellation at `now` of a lesson starting at `starts_at`.
pub fn refund_tier_at(
    actor: CancellationActor,
    starts_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> RefundTier {
    refund_tier(actor, starts_at - now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(d: Duration) -> RefundTier {
        refund_tier(CancellationActor::Client, d)
    }

    #[test]
    fn test_client_boundaries() {
        assert_eq!(client(Duration::hours(48)), RefundTier::Full);
        assert_eq!(
            client(Duration::hours(47) + Duration::minutes(59)),
            RefundTier::Half
        );
        assert_eq!(client(Duration::hours(24)), RefundTier::Half);
        assert_eq!(
            client(Duration::hours(23) + Duration::minutes(59)),
            RefundTier::None
        );
    }

    #[test]
    fn test_client_far_and_past() {
        assert_eq!(client(Duration::days(30)), RefundTier::Full);
        assert_eq!(client(Duration::zero()), RefundTier::None);
        assert_eq!(client(Duration::hours(-3)), RefundTier::None);
    }

    #[test]
    fn test_instructor_and_system_always_full() {
        for d in [Duration::days(10), Duration::hours(1), Duration::hours(-1)] {
            assert_eq!(refund_tier(CancellationActor::Instructor, d), RefundTier::Full);
            assert_eq!(refund_tier(CancellationActor::System, d), RefundTier::Full);
        }
    }

    #[test]
    fn test_refund_tier_at() {
        let now = Utc::now();
        assert_eq!(
            refund_tier_at(CancellationActor::Client, now + Duration::hours(30), now),
            RefundTier::Half
        );
        assert_eq!(RefundTier::Half.percent(), 50);
    }
}
