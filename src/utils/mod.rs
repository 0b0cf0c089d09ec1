use chrono::{Datelike, NaiveDate};

pub mod metrics;
pub mod validation;

/// Completed years between `birth_date` and `as_of`.
pub fn age_in_years(birth_date: NaiveDate, as_of: NaiveDate) -> i32 {
    let mut years = as_of.year() - birth_date.year();
    if (as_of.month(), as_of.day()) < (birth_date.month(), birth_date.day()) {
        years -= 1;
    }
    years
}

/// Decade bucket of an age: 0, 10, 20, ...
pub fn age_group(birth_date: NaiveDate, as_of: NaiveDate) -> i32 {
    (age_in_years(birth_date, as_of) / 10) * 10
}

pub fn millis(duration: std::time::Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn age_counts_completed_years_only() {
        assert_eq!(age_in_years(date(1990, 6, 15), date(2024, 6, 14)), 33);
        assert_eq!(age_in_years(date(1990, 6, 15), date(2024, 6, 15)), 34);
        assert_eq!(age_in_years(date(2000, 2, 29), date(2021, 2, 28)), 20);
    }

    #[test]
    fn age_group_floors_to_decade() {
        assert_eq!(age_group(date(1990, 1, 1), date(2024, 12, 31)), 30);
        assert_eq!(age_group(date(2016, 5, 1), date(2024, 12, 31)), 0);
        assert_eq!(age_group(date(1984, 1, 1), date(2024, 1, 1)), 40);
    }
}
