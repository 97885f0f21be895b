use crate::error::{PlanningError, Result};
use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Builds the month key (first day of the month) for a calendar year and month.
pub fn month_start(year: i32, month: u32) -> Result<NaiveDate> {
    if !(1..=12).contains(&month) {
        return Err(PlanningError::InvalidMonth { year, month });
    }
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        PlanningError::DateError(format!("Year {} is out of range", year))
    })
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(date.day0() as u64)
}

pub fn next_month(date: NaiveDate) -> Result<NaiveDate> {
    add_months(date, 1)
}

pub fn prev_month(date: NaiveDate) -> Result<NaiveDate> {
    add_months(date, -1)
}

/// Moves a month key forwards or backwards. The result is always the first of a month.
pub fn add_months(date: NaiveDate, months: i32) -> Result<NaiveDate> {
    let start = first_of_month(date);
    let moved = if months >= 0 {
        start.checked_add_months(Months::new(months as u32))
    } else {
        start.checked_sub_months(Months::new(months.unsigned_abs()))
    };

    moved.ok_or_else(|| {
        PlanningError::DateError(format!(
            "Moving {} by {} months leaves the supported calendar",
            start, months
        ))
    })
}

pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let year_diff = end.year() - start.year();
    let month_diff = end.month() as i32 - start.month() as i32;
    year_diff * 12 + month_diff
}

/// Month keys of the half-open range `[start, end)`.
pub fn get_months_in_period(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut months = Vec::new();
    let end = first_of_month(end);

    let mut current = first_of_month(start);
    while current < end {
        months.push(current);
        match current.checked_add_months(Months::new(1)) {
            Some(next) => current = next,
            None => break,
        }
    }

    months
}

/// Whole months elapsed since the birth month. The birthday month itself counts as a
/// full year boundary, days are ignored.
pub fn months_since_birth(birth_date: NaiveDate, month: NaiveDate) -> i32 {
    months_between(birth_date, month)
}

pub fn age_in_years(birth_date: NaiveDate, month: NaiveDate) -> i32 {
    months_since_birth(birth_date, month).div_euclid(12)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeBreakdown {
    pub years: i32,
    pub months: i32,
}

impl AgeBreakdown {
    /// Age at `date` as years and months, borrowing a year when the month difference
    /// is negative.
    pub fn between(birth_date: NaiveDate, date: NaiveDate) -> Self {
        let mut years = date.year() - birth_date.year();
        let mut months = date.month() as i32 - birth_date.month() as i32;

        if months < 0 {
            years -= 1;
            months += 12;
        }

        Self { years, months }
    }

    pub fn total_months(&self) -> i32 {
        self.years * 12 + self.months
    }
}

/// Parses a month string in the format "YYYY-MM" into its month key.
pub fn parse_month_string(month: &str) -> Result<NaiveDate> {
    let start_str = format!("{}-01", month.trim());
    NaiveDate::parse_from_str(&start_str, "%Y-%m-%d").map_err(|_| {
        PlanningError::DateError(format!(
            "Invalid month format: {}. Expected YYYY-MM",
            month
        ))
    })
}
