//! Spreadsheet-compatible annuity solvers.
//!
//! Sign convention follows the spreadsheet functions: money the planner pays out
//! (deposits, the current balance handed to the investment) is negative, money
//! received is positive. Callers negate at the call site.

use crate::error::{PlanningError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaymentTiming {
    /// Payments at the end of each period (spreadsheet `type = 0`).
    #[default]
    End,
    /// Payments at the beginning of each period (spreadsheet `type = 1`).
    Start,
}

impl PaymentTiming {
    fn factor(self, rate: f64) -> f64 {
        match self {
            PaymentTiming::End => 1.0,
            PaymentTiming::Start => 1.0 + rate,
        }
    }
}

fn check_rate(rate: f64, function: &'static str) -> Result<()> {
    if !rate.is_finite() || rate <= -1.0 {
        return Err(PlanningError::InvalidRate(format!(
            "{} called with rate {}",
            function, rate
        )));
    }
    Ok(())
}

/// Number of periods needed for `pv` plus a stream of `payment`s to reach `fv`.
pub fn nper(rate: f64, payment: f64, pv: f64, fv: f64, timing: PaymentTiming) -> Result<f64> {
    check_rate(rate, "nper")?;

    if rate == 0.0 {
        if payment == 0.0 {
            return Err(PlanningError::UnreachableGoal {
                function: "nper",
                details: "zero rate and zero payment never move the balance".to_string(),
            });
        }
        return Ok(-(pv + fv) / payment);
    }

    let adjusted_payment = payment * timing.factor(rate);
    let numerator = adjusted_payment - fv * rate;
    let denominator = pv * rate + adjusted_payment;

    if denominator == 0.0 {
        return Err(PlanningError::UnreachableGoal {
            function: "nper",
            details: "payments exactly offset the return on the balance".to_string(),
        });
    }

    let ratio = numerator / denominator;
    if ratio <= 0.0 || !ratio.is_finite() {
        return Err(PlanningError::UnreachableGoal {
            function: "nper",
            details: format!(
                "target {:.2} cannot be reached with payment {:.2} and balance {:.2} at rate {}",
                fv, payment, pv, rate
            ),
        });
    }

    Ok(ratio.ln() / (1.0 + rate).ln())
}

/// Payment per period that turns `pv` into `fv` over `periods`.
pub fn pmt(rate: f64, periods: i64, pv: f64, fv: f64, timing: PaymentTiming) -> Result<f64> {
    check_rate(rate, "pmt")?;
    if periods <= 0 {
        return Err(PlanningError::InvalidPeriods(periods));
    }
    let n = periods as f64;

    if rate == 0.0 {
        return Ok(-(pv + fv) / n);
    }

    let growth = (1.0 + rate).powf(n);
    Ok(-(rate * (fv + pv * growth)) / (timing.factor(rate) * (growth - 1.0)))
}

/// Present value of `periods` payments plus a lump sum `fv` at the end.
pub fn pv(rate: f64, periods: i64, payment: f64, fv: f64, timing: PaymentTiming) -> Result<f64> {
    check_rate(rate, "pv")?;
    if periods < 0 {
        return Err(PlanningError::InvalidPeriods(periods));
    }
    let n = periods as f64;

    if rate == 0.0 {
        return Ok(-(fv + payment * n));
    }

    let growth = (1.0 + rate).powf(n);
    Ok(-(fv + payment * timing.factor(rate) * (growth - 1.0) / rate) / growth)
}

/// Future value of `pv` plus `periods` payments.
pub fn fv(rate: f64, periods: i64, payment: f64, pv: f64, timing: PaymentTiming) -> Result<f64> {
    check_rate(rate, "fv")?;
    if periods < 0 {
        return Err(PlanningError::InvalidPeriods(periods));
    }
    let n = periods as f64;

    if rate == 0.0 {
        return Ok(-(pv + payment * n));
    }

    let growth = (1.0 + rate).powf(n);
    Ok(-(pv * growth + payment * timing.factor(rate) * (growth - 1.0) / rate))
}
