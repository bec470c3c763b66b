use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Source of "now" for window computations. Injected so cycles and tests
/// agree on a single instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Start of the current credential cycle: Aug 1 of this year once the day of
/// year reaches `reset_day_of_year`, otherwise Aug 1 of the previous year.
pub fn validity_window_start(now: DateTime<Utc>, reset_day_of_year: u32) -> DateTime<Utc> {
    let year = if now.ordinal() >= reset_day_of_year {
        now.year()
    } else {
        now.year() - 1
    };

    NaiveDate::from_ymd_opt(year, 8, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn window_rolls_over_on_reset_day() {
        // 2025 is not a leap year: day 213 is Aug 1
        assert_eq!(
            validity_window_start(at(2025, 8, 1), 213),
            Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            validity_window_start(at(2025, 7, 31), 213),
            Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn early_year_uses_previous_august() {
        assert_eq!(
            validity_window_start(at(2026, 1, 15), 213),
            Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            validity_window_start(at(2026, 10, 14), 213),
            Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn fixed_clock_is_stable() {
        let clock = FixedClock(at(2024, 9, 1));
        assert_eq!(clock.now(), clock.now());
    }
}
