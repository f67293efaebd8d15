//! Revenue aggregation over paid bookings.

use crate::models::{RevenueLine, RevenueStats};

/// Default platform commission, 10% in basis points.
pub const DEFAULT_COMMISSION_RATE_BPS: u32 = 1_000;

const BPS_DENOMINATOR: i64 = 10_000;

/// Commission on `amount_cents`, rounded half up to the cent.
pub fn commission_cents(amount_cents: i64, rate_bps: u32) -> i64 {
    (amount_cents * i64::from(rate_bps) + BPS_DENOMINATOR / 2) / BPS_DENOMINATOR
}

/// Computes revenue statistics from paid booking lines.
///
/// Instructor net is total minus commission so the three figures always add
/// up exactly.
pub fn compute_revenue_stats<'a, I>(lines: I, rate_bps: u32) -> RevenueStats
where
    I: IntoIterator<Item = &'a RevenueLine>,
{
    let (paid_bookings, total_revenue_cents) = lines
        .into_iter()
        .fold((0i64, 0i64), |(count, total), line| {
            (count + 1, total + line.amount_cents())
        });

    let commission = commission_cents(total_revenue_cents, rate_bps);

    RevenueStats {
        paid_bookings,
        total_revenue_cents,
        commission_cents: commission,
        instructor_net_cents: total_revenue_cents - commission,
        commission_rate_bps: rate_bps,
    }
}
