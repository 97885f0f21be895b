//! Annual/monthly rate conversion and composition.
//!
//! Every rate leaving this module is rounded to [`RATE_PRECISION`] decimal places so
//! long compounding chains stay reproducible across runs.

use crate::error::{PlanningError, Result};

pub const RATE_PRECISION: i32 = 10;

const RATE_SCALE: f64 = 1e10;

pub fn round_rate(rate: f64) -> f64 {
    (rate * RATE_SCALE).round() / RATE_SCALE
}

/// `Π(1 + r_i) - 1`. An empty slice composes to zero.
pub fn compound_rates(rates: &[f64]) -> f64 {
    let product: f64 = rates.iter().map(|r| 1.0 + r).product();
    round_rate(product - 1.0)
}

pub fn yearly_to_monthly(annual_rate: f64) -> f64 {
    round_rate((1.0 + annual_rate).powf(1.0 / 12.0) - 1.0)
}

pub fn monthly_to_yearly(monthly_rate: f64) -> f64 {
    round_rate((1.0 + monthly_rate).powi(12) - 1.0)
}

/// Effective annual rate of a nominal rate compounded `periods_per_year` times.
pub fn effective_annual_rate(nominal_rate: f64, periods_per_year: u32) -> Result<f64> {
    if periods_per_year == 0 {
        return Err(PlanningError::InvalidRate(
            "Compounding periods per year must be positive".to_string(),
        ));
    }
    let n = periods_per_year as f64;
    Ok(round_rate((1.0 + nominal_rate / n).powf(n) - 1.0))
}

pub fn percent_to_rate(percent: f64) -> f64 {
    round_rate(percent / 100.0)
}

/// Monthly rate for an annual percentage such as `12.0` for 12 %/yr.
pub fn annual_percent_to_monthly(percent: f64) -> f64 {
    yearly_to_monthly(percent / 100.0)
}

pub fn validate_rate(rate: f64, label: &str) -> Result<()> {
    if !rate.is_finite() {
        return Err(PlanningError::InvalidRate(format!(
            "{} is not a finite number",
            label
        )));
    }
    if rate <= -1.0 {
        return Err(PlanningError::InvalidRate(format!(
            "{} of {} would wipe out the whole balance",
            label, rate
        )));
    }
    Ok(())
}
