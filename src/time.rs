//! UTC period arithmetic for wallet/subscription rollover. Isolated from
//! the managers that call it so month-end and leap-year edges are unit
//! tested on their own.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

use crate::model::Cycle;

/// Computes `(periodStart, periodEnd)` for a freshly opened wallet/period,
/// anchored at `now`.
pub fn compute_period(now: DateTime<Utc>, cycle: Cycle) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = match cycle {
        Cycle::Monthly => first_of_next_month(now),
        Cycle::Yearly => same_day_next_year(now),
    };
    (now, end)
}

/// Midnight UTC on the 1st of the month following `now`.
pub fn first_of_next_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let date = NaiveDate::from_ymd_opt(year, month, 1).expect("first-of-month is always valid");
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
}

/// One year ahead of `now`, same month/day/time-of-day, clamped to the
/// last valid day of the target month (handles Feb 29 on non-leap years).
pub fn same_day_next_year(now: DateTime<Utc>) -> DateTime<Utc> {
    let target_year = now.year() + 1;
    let day = now.day().min(days_in_month(target_year, now.month()));
    let date = NaiveDate::from_ymd_opt(target_year, now.month(), day).expect("clamped day is always valid");
    Utc.from_utc_datetime(&date.and_time(now.time()))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("first-of-month is always valid");
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("first-of-next-month is always valid");
    (next_first - first).num_days() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec).unwrap()
    }

    #[test]
    fn first_of_next_month_rolls_over_mid_month() {
        let now = dt(2026, 3, 15, 9, 30, 0);
        assert_eq!(first_of_next_month(now), dt(2026, 4, 1, 0, 0, 0));
    }

    #[test]
    fn first_of_next_month_wraps_year_in_december() {
        let now = dt(2026, 12, 31, 23, 59, 59);
        assert_eq!(first_of_next_month(now), dt(2027, 1, 1, 0, 0, 0));
    }

    #[test]
    fn same_day_next_year_preserves_day_and_time() {
        let now = dt(2026, 7, 28, 14, 0, 0);
        assert_eq!(same_day_next_year(now), dt(2027, 7, 28, 14, 0, 0));
    }

    #[test]
    fn same_day_next_year_clamps_leap_day() {
        let now = dt(2024, 2, 29, 0, 0, 0);
        assert_eq!(same_day_next_year(now), dt(2025, 2, 28, 0, 0, 0));
    }
}
