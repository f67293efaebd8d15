//! Revenue and platform statistics models.

use serde::Serialize;
use uuid::Uuid;

use crate::models::booking::BookingResponse;
use crate::models::lesson::LessonResponse;

/// One paid booking as seen by the revenue aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevenueLine {
    pub booking_id: Uuid,
    pub unit_price_cents: i64,
    pub participants: i32,
}

impl RevenueLine {
    pub fn amount_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.participants)
    }
}

/// Revenue derived from paid bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RevenueStats {
    pub paid_bookings: i64,
    pub total_revenue_cents: i64,
    pub commission_cents: i64,
    pub instructor_net_cents: i64,
    pub commission_rate_bps: u32,
}

/// Platform-wide counters for the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PlatformStats {
    pub bookable_lessons: i64,
    pub active_bookings: i64,
    pub paid_bookings: i64,
    pub revenue: RevenueStats,
}

/// A booking whose lesson starts soon.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ReminderResponse {
    pub booking: BookingResponse,
    pub lesson: LessonResponse,
}
