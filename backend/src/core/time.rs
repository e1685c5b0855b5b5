//! Time management for the commission engine
//!
//! Jobs run on wall-clock time supplied by a [`Clock`]. Production code uses
//! [`SystemClock`]; tests pin time with [`FixedClock`] so that due dates and
//! lease expiries are deterministic.
//!
//! Schedule arithmetic lives here as well:
//! - monthly installments keep the trigger's day-of-month, clamped to month end
//! - reward installments are spaced a fixed number of days apart

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use std::sync::Mutex;

/// Source of the current instant
///
/// # Example
/// ```
/// use mlm_commission_core::core::time::{Clock, FixedClock};
/// use chrono::{TimeZone, Utc};
///
/// let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap());
/// assert_eq!(clock.today().to_string(), "2024-01-15");
/// ```
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date (UTC)
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    current: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(at),
        }
    }

    /// Move the clock to an absolute instant
    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut current) = self.current.lock() {
            *current = at;
        }
    }

    /// Advance the clock by `delta`
    pub fn advance(&self, delta: Duration) {
        if let Ok(mut current) = self.current.lock() {
            *current += delta;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Dates of `count` consecutive monthly installments following `start`
///
/// The first installment falls in the month after `start`. Days that do not
/// exist in a target month are clamped to its last day (Jan 31 → Feb 28/29).
///
/// # Example
/// ```
/// use mlm_commission_core::core::time::monthly_installment_dates;
/// use chrono::NaiveDate;
///
/// let start = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
/// let dates = monthly_installment_dates(start, 2);
/// assert_eq!(dates[0], NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
/// assert_eq!(dates[1], NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
/// ```
pub fn monthly_installment_dates(start: NaiveDate, count: u32) -> Vec<NaiveDate> {
    (1..=count)
        .filter_map(|offset| start.checked_add_months(Months::new(offset)))
        .collect()
}

/// Dates of `count` installments spaced `interval_days` apart after `start`
///
/// Installment `k` (1-based) is due on `start + k * interval_days`.
pub fn interval_installment_dates(start: NaiveDate, count: u32, interval_days: u32) -> Vec<NaiveDate> {
    (1..=count)
        .filter_map(|k| {
            start.checked_add_signed(Duration::days(i64::from(k) * i64::from(interval_days)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_monthly_dates_start_next_month() {
        let dates = monthly_installment_dates(date(2024, 3, 10), 10);

        assert_eq!(dates.len(), 10);
        assert_eq!(dates[0], date(2024, 4, 10));
        assert_eq!(dates[9], date(2025, 1, 10));
    }

    #[test]
    fn test_monthly_dates_clamp_to_month_end() {
        let dates = monthly_installment_dates(date(2023, 1, 31), 3);

        assert_eq!(dates, vec![date(2023, 2, 28), date(2023, 3, 31), date(2023, 4, 30)]);
    }

    #[test]
    fn test_interval_dates() {
        let dates = interval_installment_dates(date(2024, 1, 1), 3, 30);

        assert_eq!(dates, vec![date(2024, 1, 31), date(2024, 3, 1), date(2024, 3, 31)]);
    }

    #[test]
    fn test_fixed_clock_advance() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        clock.advance(Duration::days(2));

        assert_eq!(clock.today(), date(2024, 1, 3));
    }
}
