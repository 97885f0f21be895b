//! Splitting a date range across micro-plan segments.
//!
//! Rates are resolved per calendar month rather than per segment average, so a
//! segment change in the middle of a range is weighted by the months it governs.

use crate::error::{PlanningError, Result};
use crate::rate_provider::InflationSeries;
use crate::rates::{annual_percent_to_monthly, compound_rates, round_rate, validate_rate};
use crate::schema::MicroInvestmentPlan;
use crate::utils::{first_of_month, get_months_in_period, months_between};
use chrono::NaiveDate;
use std::collections::BTreeSet;

/// A stretch of months governed by a single micro plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment<'a> {
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
    pub months: i32,
    pub plan: &'a MicroInvestmentPlan,
}

/// The plan in force for `month`: the latest one whose effective month is not after
/// it. Months before the first segment use the earliest plan.
pub fn active_plan_at(
    month: NaiveDate,
    plans: &[MicroInvestmentPlan],
) -> Option<&MicroInvestmentPlan> {
    let month = first_of_month(month);
    plans
        .iter()
        .filter(|p| p.effective_month() <= month)
        .max_by_key(|p| p.effective_month())
        .or_else(|| plans.iter().min_by_key(|p| p.effective_month()))
}

/// Splits `[start, end)` at every effective date inside the range.
pub fn split_range(
    start: NaiveDate,
    end: NaiveDate,
    plans: &[MicroInvestmentPlan],
) -> Vec<Segment<'_>> {
    let start = first_of_month(start);
    let end = first_of_month(end);
    if end <= start || plans.is_empty() {
        return Vec::new();
    }

    let mut boundaries: BTreeSet<NaiveDate> = plans
        .iter()
        .map(|p| p.effective_month())
        .filter(|d| *d > start && *d < end)
        .collect();
    boundaries.insert(start);
    boundaries.insert(end);

    let points: Vec<NaiveDate> = boundaries.into_iter().collect();
    points
        .windows(2)
        .filter_map(|pair| {
            active_plan_at(pair[0], plans).map(|plan| Segment {
                start: pair[0],
                end: pair[1],
                months: months_between(pair[0], pair[1]),
                plan,
            })
        })
        .collect()
}

/// Inflation for one month: the published figure when there is one, otherwise the
/// active plan's annual assumption converted to monthly.
pub fn monthly_inflation_rate(
    month: NaiveDate,
    inflation: &InflationSeries,
    plans: &[MicroInvestmentPlan],
) -> f64 {
    inflation.monthly_rate(month).unwrap_or_else(|| {
        active_plan_at(month, plans)
            .map(|p| annual_percent_to_monthly(p.inflation))
            .unwrap_or(0.0)
    })
}

/// Cumulative price factor `Π(1 + rate_m)` over `[start, end)`.
pub fn inflation_factor(
    start: NaiveDate,
    end: NaiveDate,
    inflation: &InflationSeries,
    plans: &[MicroInvestmentPlan],
) -> f64 {
    get_months_in_period(start, end)
        .into_iter()
        .map(|month| 1.0 + monthly_inflation_rate(month, inflation, plans))
        .product()
}

/// Duration-weighted average deposit over `[reference_date, plan_end_date)`.
///
/// With `adjust_for_inflation` each segment's deposit is expressed in money of
/// `reference_date`, deflated by the inflation accumulated up to the segment start.
pub fn average_monthly_contribution(
    reference_date: NaiveDate,
    plan_end_date: NaiveDate,
    plans: &[MicroInvestmentPlan],
    active_plan: &MicroInvestmentPlan,
    adjust_for_inflation: bool,
    inflation: &InflationSeries,
) -> f64 {
    let total_months = months_between(reference_date, plan_end_date);
    let segments = split_range(reference_date, plan_end_date, plans);
    if total_months <= 0 || segments.is_empty() {
        return active_plan.monthly_deposit;
    }

    let weighted: f64 = segments
        .iter()
        .map(|segment| {
            let deposit = if adjust_for_inflation {
                segment.plan.monthly_deposit
                    / inflation_factor(reference_date, segment.start, inflation, plans)
            } else {
                segment.plan.monthly_deposit
            };
            deposit * segment.months as f64
        })
        .sum();

    weighted / total_months as f64
}

/// Single monthly rate equivalent to compounding each month's expected return over
/// `[start, end)`.
pub fn effective_monthly_return(
    start: NaiveDate,
    end: NaiveDate,
    plans: &[MicroInvestmentPlan],
) -> f64 {
    let months = get_months_in_period(start, end);
    if months.is_empty() {
        return active_plan_at(start, plans)
            .map(|p| annual_percent_to_monthly(p.expected_return))
            .unwrap_or(0.0);
    }

    let monthly_rates: Vec<f64> = months
        .iter()
        .map(|month| {
            active_plan_at(*month, plans)
                .map(|p| annual_percent_to_monthly(p.expected_return))
                .unwrap_or(0.0)
        })
        .collect();

    let total = compound_rates(&monthly_rates);
    round_rate((1.0 + total).powf(1.0 / months.len() as f64) - 1.0)
}

/// Checks that the segments tile the timeline: at least one, effective months strictly
/// increasing, sane numbers.
pub fn validate_micro_plans(plans: &[MicroInvestmentPlan]) -> Result<()> {
    if plans.is_empty() {
        return Err(PlanningError::NoMicroPlans);
    }

    let mut previous: Option<NaiveDate> = None;
    for plan in plans {
        let month = plan.effective_month();
        if let Some(previous) = previous {
            if month == previous {
                return Err(PlanningError::ValidationError {
                    entity: "micro plan".to_string(),
                    details: format!(
                        "More than one micro plan takes effect in {}",
                        month.format("%Y-%m")
                    ),
                });
            }
            if month < previous {
                return Err(PlanningError::ValidationError {
                    entity: "micro plan".to_string(),
                    details: format!(
                        "Micro plan effective {} is listed after one effective {}",
                        month.format("%Y-%m"),
                        previous.format("%Y-%m")
                    ),
                });
            }
        }
        previous = Some(month);

        validate_rate(plan.expected_return / 100.0, "expected return")?;
        validate_rate(plan.inflation / 100.0, "inflation")?;

        if !plan.monthly_deposit.is_finite() {
            return Err(PlanningError::ValidationError {
                entity: "micro plan".to_string(),
                details: format!(
                    "Monthly deposit of the plan effective {} is not a number",
                    plan.effective_date
                ),
            });
        }
    }

    Ok(())
}
