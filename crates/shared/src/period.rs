//! Billing period arithmetic
//!
//! Periods are calendar based: a monthly period ends on the same day of the
//! next month (clamped to the month's length), a yearly one twelve months on.

use time::{Date, Duration, Month, OffsetDateTime};

use crate::types::BillingCycle;

/// One day in milliseconds
pub const MILLIS_PER_DAY: i128 = 86_400_000;

/// Add whole calendar months, clamping the day to the target month's length
pub fn add_months(dt: OffsetDateTime, months: u32) -> OffsetDateTime {
    let date = dt.date();
    let index = i64::from(date.year()) * 12 + i64::from(u8::from(date.month())) - 1 + i64::from(months);
    let year = index.div_euclid(12) as i32;
    let month_number = (index.rem_euclid(12) + 1) as u8;

    let shifted = Month::try_from(month_number).and_then(|month| {
        let day = date.day().min(time::util::days_in_year_month(year, month));
        Date::from_calendar_date(year, month, day)
    });

    match shifted {
        Ok(new_date) => dt.replace_date(new_date),
        // Only reachable outside time's supported year range
        Err(_) => dt + Duration::days(30 * i64::from(months)),
    }
}

/// End of a period that starts at `start` for the given cycle
pub fn period_end(start: OffsetDateTime, cycle: BillingCycle) -> OffsetDateTime {
    add_months(start, cycle.months())
}

/// Whole days between two instants, rounded up (`ceil((to - from) / 1 day)`).
/// Negative when `to` is before `from`.
pub fn days_ceil(from: OffsetDateTime, to: OffsetDateTime) -> i64 {
    let millis = (to - from).whole_milliseconds();
    let days = millis / MILLIS_PER_DAY;
    if millis % MILLIS_PER_DAY > 0 {
        (days + 1) as i64
    } else {
        days as i64
    }
}

/// Advance a lapsed window by whole cycles until it covers `now`.
/// A window that already covers `now` is returned unchanged.
pub fn roll_forward(
    start: OffsetDateTime,
    end: OffsetDateTime,
    months: u32,
    now: OffsetDateTime,
) -> (OffsetDateTime, OffsetDateTime) {
    let months = months.max(1);
    let (mut start, mut end) = (start, end);
    while end < now {
        start = end;
        end = add_months(end, months);
    }
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_add_months_clamps_day() {
        let jan31 = datetime!(2025-01-31 12:00 UTC);
        assert_eq!(add_months(jan31, 1), datetime!(2025-02-28 12:00 UTC));
        assert_eq!(add_months(jan31, 13), datetime!(2026-02-28 12:00 UTC));
        assert_eq!(
            add_months(datetime!(2024-01-31 00:00 UTC), 1),
            datetime!(2024-02-29 00:00 UTC)
        );
    }

    #[test]
    fn test_add_months_crosses_year() {
        let nov = datetime!(2025-11-15 08:30 UTC);
        assert_eq!(add_months(nov, 2), datetime!(2026-01-15 08:30 UTC));
    }

    #[test]
    fn test_period_end_by_cycle() {
        let start = datetime!(2025-01-01 00:00 UTC);
        assert_eq!(
            period_end(start, BillingCycle::Monthly),
            datetime!(2025-02-01 00:00 UTC)
        );
        assert_eq!(
            period_end(start, BillingCycle::Yearly),
            datetime!(2026-01-01 00:00 UTC)
        );
    }

    #[test]
    fn test_days_ceil() {
        let start = datetime!(2025-01-01 00:00 UTC);
        assert_eq!(days_ceil(start, datetime!(2025-02-01 00:00 UTC)), 31);
        assert_eq!(days_ceil(start, datetime!(2025-01-01 00:00:01 UTC)), 1);
        assert_eq!(days_ceil(start, start), 0);
        assert_eq!(days_ceil(datetime!(2025-01-03 00:00 UTC), start), -2);
    }

    #[test]
    fn test_roll_forward() {
        let start = datetime!(2025-01-01 00:00 UTC);
        let end = datetime!(2025-02-01 00:00 UTC);
        let now = datetime!(2025-03-10 00:00 UTC);
        assert_eq!(
            roll_forward(start, end, 1, now),
            (datetime!(2025-03-01 00:00 UTC), datetime!(2025-04-01 00:00 UTC))
        );
        assert_eq!(roll_forward(start, end, 1, start), (start, end));
    }
}
