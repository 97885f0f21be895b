//! # Retirement Projection
//!
//! A month-by-month retirement planning engine. It reconciles the months a saver has
//! actually recorded with the trajectory the plan promised, and projects both forward
//! until the plan's limit age.
//!
//! ## Core Concepts
//!
//! - **Investment Plan**: Start date, end of accumulation, retirement and limit ages, desired income
//! - **Micro Plans**: Time-bounded segments of deposit, expected return and inflation assumptions
//! - **Financial Records**: Actual month-end balances that override the projected balance
//! - **Goals and Events**: One-off or installment cash flows leaving or entering the portfolio
//! - **Planned vs Projected**: The original plan against a recomputation from the latest actual balance
//!
//! ## Example
//!
//! ```rust,ignore
//! use retirement_projection::*;
//! use chrono::NaiveDate;
//!
//! let snapshot = PlanningSnapshot::from_json(&std::fs::read_to_string("plan.json")?)?;
//! let provider = PublishedSeriesProvider::from_json(&std::fs::read_to_string("ipca.json")?)?;
//! let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
//!
//! let projection = project_plan(&snapshot, &provider, &ProjectionConfig::default(), today)?;
//! let progress = calculate_plan_progress(
//!     &snapshot,
//!     &provider,
//!     &ProjectionConfig::default(),
//!     &ProgressRequest::new(today),
//! )?;
//! ```

pub mod annuity;
pub mod engine;
pub mod error;
pub mod goals;
pub mod progress;
pub mod rate_provider;
pub mod rates;
pub mod schema;
pub mod segments;
pub mod utils;

pub use annuity::{fv, nper, pmt, pv, PaymentTiming};
pub use engine::{
    aggregate_yearly, is_retired, limit_month, validate_plan, Phase, ProjectionConfig,
    ProjectionEngine, ProjectionInputs, ProjectionRecord, ProjectionResult,
    YearlyProjectionRecord,
};
pub use error::{PlanningError, Result};
pub use goals::{expand, expand_all, net_impact_by_month, ItemFilter, ProcessedEntry};
pub use progress::{
    latest_snapshot, required_retirement_capital, sustainable_income, HistoricalSnapshot,
    PlanProgress, PlanProgressCalculator, ProgressRequest, RetirementTargets, Track,
    TrackProgress,
};
pub use rate_provider::{
    ConstantNominalProvider, InflationSeries, MonthlyRate, PublishedSeriesProvider, RateProvider,
};
pub use rates::*;
pub use schema::*;
pub use segments::{
    active_plan_at, average_monthly_contribution, effective_monthly_return, split_range, Segment,
};
pub use utils::*;

use chrono::NaiveDate;
use log::{debug, info};
use std::collections::BTreeSet;

pub struct PlanningProcessor;

impl PlanningProcessor {
    /// Monthly and yearly projection of the snapshot. `Ok(None)` when the snapshot has
    /// no plan or no birth date.
    pub fn project(
        snapshot: &PlanningSnapshot,
        provider: &dyn RateProvider,
        config: &ProjectionConfig,
        reference_date: NaiveDate,
    ) -> Result<Option<ProjectionResult>> {
        validate_snapshot_integrity(snapshot)?;

        let (plan, birth_date) = match (&snapshot.plan, snapshot.birth_date) {
            (Some(plan), Some(birth_date)) => (plan, birth_date),
            _ => {
                debug!("Snapshot has no plan or birth date, nothing to project");
                return Ok(None);
            }
        };

        info!(
            "Processing retirement projection as of {} for a {:?} plan",
            reference_date, plan.plan_type
        );
        debug!(
            "Snapshot contains {} micro plans, {} records, {} goals and {} events",
            snapshot.micro_plans.len(),
            snapshot.records.len(),
            snapshot.goals.len(),
            snapshot.events.len()
        );

        let inflation = resolve_inflation(plan, birth_date, provider)?;
        let inputs = ProjectionInputs {
            plan,
            birth_date,
            micro_plans: &snapshot.micro_plans,
            records: &snapshot.records,
            goals: &snapshot.goals,
            events: &snapshot.events,
            inflation: &inflation,
            reference_date,
        };

        ProjectionEngine::new(config.clone()).run(&inputs).map(Some)
    }

    /// Planned vs projected progress towards retirement.
    pub fn progress(
        snapshot: &PlanningSnapshot,
        provider: &dyn RateProvider,
        config: &ProjectionConfig,
        request: &ProgressRequest,
    ) -> Result<Option<PlanProgress>> {
        validate_snapshot_integrity(snapshot)?;

        let (plan, birth_date) = match (&snapshot.plan, snapshot.birth_date) {
            (Some(plan), Some(birth_date)) => (plan, birth_date),
            _ => {
                debug!("Snapshot has no plan or birth date, no progress to report");
                return Ok(None);
            }
        };

        let inflation = resolve_inflation(plan, birth_date, provider)?;
        PlanProgressCalculator::new(snapshot, &inflation, config).calculate(request)
    }
}

pub fn project_plan(
    snapshot: &PlanningSnapshot,
    provider: &dyn RateProvider,
    config: &ProjectionConfig,
    reference_date: NaiveDate,
) -> Result<Option<ProjectionResult>> {
    PlanningProcessor::project(snapshot, provider, config, reference_date)
}

pub fn calculate_plan_progress(
    snapshot: &PlanningSnapshot,
    provider: &dyn RateProvider,
    config: &ProjectionConfig,
    request: &ProgressRequest,
) -> Result<Option<PlanProgress>> {
    PlanningProcessor::progress(snapshot, provider, config, request)
}

/// Published inflation for the whole simulated range, fetched once.
fn resolve_inflation(
    plan: &InvestmentPlan,
    birth_date: NaiveDate,
    provider: &dyn RateProvider,
) -> Result<InflationSeries> {
    validate_plan(plan)?;
    let start = first_of_month(plan.plan_initial_date);
    let end = limit_month(plan, birth_date)?;
    InflationSeries::resolve(provider, plan.currency, start, end.max(start))
}

fn validate_snapshot_integrity(snapshot: &PlanningSnapshot) -> Result<()> {
    let mut seen = BTreeSet::new();
    for record in &snapshot.records {
        let month = record
            .month_key()
            .map_err(|e| PlanningError::ValidationError {
                entity: "financial record".to_string(),
                details: format!(
                    "Record {}-{} has an invalid month: {}",
                    record.record_year, record.record_month, e
                ),
            })?;

        if !seen.insert(month) {
            return Err(PlanningError::ValidationError {
                entity: "financial record".to_string(),
                details: format!("More than one record for {}", month.format("%Y-%m")),
            });
        }

        if !record.ending_balance.is_finite() || !record.monthly_contribution.is_finite() {
            return Err(PlanningError::ValidationError {
                entity: "financial record".to_string(),
                details: format!("Record for {} holds a non-numeric value", month.format("%Y-%m")),
            });
        }
    }

    let items = snapshot
        .goals
        .iter()
        .map(|g| ("goal", g))
        .chain(snapshot.events.iter().map(|e| ("event", e)));
    for (entity, item) in items {
        if month_start(item.year, item.month).is_err() {
            return Err(PlanningError::ValidationError {
                entity: format!("{} '{}'", entity, item.id),
                details: format!("Month {} is outside 1..=12", item.month),
            });
        }

        if !item.asset_value.is_finite() || item.asset_value < 0.0 {
            return Err(PlanningError::ValidationError {
                entity: format!("{} '{}'", entity, item.id),
                details: format!(
                    "Asset value must be a non-negative number, got {}",
                    item.asset_value
                ),
            });
        }
    }

    Ok(())
}
