use crate::error::{PlanningError, Result};
use crate::goals::{expand_all, net_impact_by_month, ItemFilter};
use crate::rate_provider::InflationSeries;
use crate::rates::{annual_percent_to_monthly, compound_rates};
use crate::schema::{
    FinancialRecord, Goal, InvestmentPlan, MicroInvestmentPlan, ProjectedEvent, MAX_LIMIT_AGE,
};
use crate::segments::{active_plan_at, validate_micro_plans};
use crate::utils::{add_months, age_in_years, first_of_month, get_months_in_period, months_since_birth};
use chrono::{Datelike, NaiveDate};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Month covered by actual records (or a past month without one).
    Historical,
    Accumulation,
    /// First month of withdrawals.
    RetirementTransition,
    Withdrawal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Blend time-segmented micro plans. When off, the plan active at the reference
    /// date governs every month.
    #[serde(default = "default_use_micro_plans")]
    pub use_micro_plans: bool,
}

fn default_use_micro_plans() -> bool {
    true
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            use_micro_plans: default_use_micro_plans(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRecord {
    pub month: NaiveDate,
    pub age: i32,
    pub phase: Phase,
    pub contribution: f64,
    pub withdrawal: f64,
    /// Actual balance. `None` for a past month with no financial record.
    pub balance: Option<f64>,
    pub planned_balance: f64,
    pub is_historical: bool,
    pub retirement: bool,
    pub retirement_transition: bool,
    pub returns: f64,
    pub goals_events_impact: f64,
    pub difference_from_planned_balance: Option<f64>,
    pub inflation_rate: f64,
    pub inflation_from_series: bool,
    pub monthly_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyProjectionRecord {
    pub year: i32,
    pub age: i32,
    pub contribution: f64,
    pub withdrawal: f64,
    pub returns: f64,
    pub goals_events_impact: f64,
    pub ending_balance: Option<f64>,
    pub ending_planned_balance: f64,
    pub inflation_rate: f64,
    pub is_retirement_year: bool,
    pub retired: bool,
    pub historical_months: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionResult {
    pub monthly: Vec<ProjectionRecord>,
    pub yearly: Vec<YearlyProjectionRecord>,
}

/// Values carried from one month to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    pub actual_balance: f64,
    pub planned_balance: f64,
    pub monthly_deposit: f64,
    pub monthly_withdrawal: f64,
    /// Effective month of the segment that set `monthly_deposit`.
    pub segment_start: NaiveDate,
    pub retired: bool,
}

impl SimulationState {
    pub fn initial(plan: &InvestmentPlan, segment: &MicroInvestmentPlan) -> Self {
        Self {
            actual_balance: plan.initial_amount,
            planned_balance: plan.initial_amount,
            monthly_deposit: segment.monthly_deposit,
            monthly_withdrawal: plan.desired_income,
            segment_start: segment.effective_month(),
            retired: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonthSource<'a> {
    Record(&'a FinancialRecord),
    /// Chronologically past, but nothing was recorded.
    Gap,
    Projected,
}

#[derive(Debug, Clone)]
pub struct MonthInputs<'a> {
    pub month: NaiveDate,
    pub age: i32,
    pub segment: &'a MicroInvestmentPlan,
    pub published_inflation: Option<f64>,
    pub source: MonthSource<'a>,
    pub goals_events_delta: f64,
    pub retired: bool,
    pub adjust_contribution_for_inflation: bool,
    pub adjust_income_for_inflation: bool,
}

/// Withdrawals start the month after the birthday on which `final_age` is reached.
pub fn is_retired(birth_date: NaiveDate, month: NaiveDate, final_age: u32) -> bool {
    months_since_birth(birth_date, month) > final_age as i32 * 12
}

/// Advances the simulation by one month.
pub fn step_month(
    state: &SimulationState,
    inputs: &MonthInputs,
) -> (SimulationState, ProjectionRecord) {
    let segment = inputs.segment;
    let retired = inputs.retired;

    let (inflation_rate, inflation_from_series) = match inputs.published_inflation {
        Some(rate) => (rate, true),
        None => (annual_percent_to_monthly(segment.inflation), false),
    };
    let return_rate = annual_percent_to_monthly(segment.expected_return);
    let monthly_rate = compound_rates(&[return_rate, inflation_rate]);
    let growth = 1.0 + monthly_rate;

    let segment_start = segment.effective_month();
    let mut deposit = if segment_start != state.segment_start {
        segment.monthly_deposit
    } else {
        state.monthly_deposit
    };
    if inputs.adjust_contribution_for_inflation && !retired {
        deposit *= 1.0 + inflation_rate;
    }

    let mut withdrawal = state.monthly_withdrawal;
    if inputs.adjust_income_for_inflation {
        withdrawal *= 1.0 + inflation_rate;
    }

    let (contribution, withdrawn) = if retired {
        (0.0, withdrawal)
    } else {
        (deposit, 0.0)
    };
    let advance = |balance: f64| (balance + contribution - withdrawn) * growth;

    let planned_balance = advance(state.planned_balance);
    let retirement_transition = retired && !state.retired;

    let mut record = ProjectionRecord {
        month: inputs.month,
        age: inputs.age,
        phase: Phase::Historical,
        contribution: 0.0,
        withdrawal: 0.0,
        balance: None,
        planned_balance,
        is_historical: false,
        retirement: retired,
        retirement_transition,
        returns: 0.0,
        goals_events_impact: 0.0,
        difference_from_planned_balance: None,
        inflation_rate,
        inflation_from_series,
        monthly_rate,
    };

    let actual_balance = match inputs.source {
        MonthSource::Record(financial) => {
            record.is_historical = true;
            record.contribution = financial.monthly_contribution;
            record.balance = Some(financial.ending_balance);
            record.returns =
                financial.ending_balance - state.actual_balance - financial.monthly_contribution;
            financial.ending_balance
        }
        MonthSource::Gap => state.actual_balance,
        MonthSource::Projected => {
            let before = state.actual_balance + inputs.goals_events_delta;
            let after = advance(before);

            record.phase = match (retired, retirement_transition) {
                (true, true) => Phase::RetirementTransition,
                (true, false) => Phase::Withdrawal,
                _ => Phase::Accumulation,
            };
            record.contribution = contribution;
            record.withdrawal = withdrawn;
            record.balance = Some(after);
            record.goals_events_impact = inputs.goals_events_delta;
            record.returns = after - (before + contribution - withdrawn);
            after
        }
    };

    record.difference_from_planned_balance = record.balance.map(|b| b - planned_balance);

    let next = SimulationState {
        actual_balance,
        planned_balance,
        monthly_deposit: deposit,
        monthly_withdrawal: withdrawal,
        segment_start,
        retired,
    };

    (next, record)
}

pub fn validate_plan(plan: &InvestmentPlan) -> Result<()> {
    if plan.limit_age > MAX_LIMIT_AGE {
        return Err(PlanningError::ValidationError {
            entity: "investment plan".to_string(),
            details: format!(
                "limit age {} exceeds the maximum of {}",
                plan.limit_age, MAX_LIMIT_AGE
            ),
        });
    }

    if plan.limit_age <= plan.final_age {
        return Err(PlanningError::ValidationError {
            entity: "investment plan".to_string(),
            details: format!(
                "limit age {} must be greater than final age {}",
                plan.limit_age, plan.final_age
            ),
        });
    }

    if plan.plan_end_accumulation_date < plan.plan_initial_date {
        return Err(PlanningError::ValidationError {
            entity: "investment plan".to_string(),
            details: format!(
                "accumulation ends {} before the plan starts {}",
                plan.plan_end_accumulation_date, plan.plan_initial_date
            ),
        });
    }

    if !plan.initial_amount.is_finite() || !plan.desired_income.is_finite() {
        return Err(PlanningError::ValidationError {
            entity: "investment plan".to_string(),
            details: "initial amount and desired income must be numbers".to_string(),
        });
    }

    Ok(())
}

/// First month the person is `limit_age` years old. The projection stops before it.
pub fn limit_month(plan: &InvestmentPlan, birth_date: NaiveDate) -> Result<NaiveDate> {
    let months = i32::try_from(plan.limit_age)
        .ok()
        .and_then(|age| age.checked_mul(12))
        .ok_or_else(|| PlanningError::ValidationError {
            entity: "investment plan".to_string(),
            details: format!("limit age {} is out of range", plan.limit_age),
        })?;
    add_months(birth_date, months)
}

pub fn index_records(records: &[FinancialRecord]) -> Result<BTreeMap<NaiveDate, &FinancialRecord>> {
    let mut index = BTreeMap::new();
    for record in records {
        index.insert(record.month_key()?, record);
    }
    Ok(index)
}

/// Everything one projection run reads. Nothing here is mutated.
#[derive(Debug, Clone)]
pub struct ProjectionInputs<'a> {
    pub plan: &'a InvestmentPlan,
    pub birth_date: NaiveDate,
    pub micro_plans: &'a [MicroInvestmentPlan],
    pub records: &'a [FinancialRecord],
    pub goals: &'a [Goal],
    pub events: &'a [ProjectedEvent],
    pub inflation: &'a InflationSeries,
    /// Months before this one are in the past.
    pub reference_date: NaiveDate,
}

pub struct ProjectionEngine {
    config: ProjectionConfig,
}

impl ProjectionEngine {
    pub fn new(config: ProjectionConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, inputs: &ProjectionInputs) -> Result<ProjectionResult> {
        validate_plan(inputs.plan)?;
        validate_micro_plans(inputs.micro_plans)?;

        let plan = inputs.plan;
        let active = active_plan_at(inputs.reference_date, inputs.micro_plans)
            .ok_or(PlanningError::NoMicroPlans)?;
        let plans: &[MicroInvestmentPlan] = if self.config.use_micro_plans {
            inputs.micro_plans
        } else {
            std::slice::from_ref(active)
        };

        let records = index_records(inputs.records)?;
        let entries = expand_all(inputs.goals, inputs.events, ItemFilter::PendingOnly, false)?;
        let deltas = net_impact_by_month(&entries);

        let start = first_of_month(plan.plan_initial_date);
        let end = limit_month(plan, inputs.birth_date)?;
        let reference_month = first_of_month(inputs.reference_date);

        info!(
            "Projecting {:?} plan from {} until {} ({} records, {} micro plans)",
            plan.plan_type,
            start,
            end,
            records.len(),
            plans.len()
        );

        let first_segment = active_plan_at(start, plans).ok_or(PlanningError::NoMicroPlans)?;
        let mut state = SimulationState::initial(plan, first_segment);
        let mut monthly = Vec::new();

        for month in get_months_in_period(start, end) {
            let segment = active_plan_at(month, plans).ok_or(PlanningError::NoMicroPlans)?;
            let source = match records.get(&month) {
                Some(record) => MonthSource::Record(record),
                None if month < reference_month => MonthSource::Gap,
                None => MonthSource::Projected,
            };

            let month_inputs = MonthInputs {
                month,
                age: age_in_years(inputs.birth_date, month),
                segment,
                published_inflation: inputs.inflation.monthly_rate(month),
                source,
                goals_events_delta: deltas.get(&month).copied().unwrap_or(0.0),
                retired: is_retired(inputs.birth_date, month, plan.final_age),
                adjust_contribution_for_inflation: plan.adjust_contribution_for_inflation,
                adjust_income_for_inflation: plan.adjust_income_for_inflation,
            };

            let (next, record) = step_month(&state, &month_inputs);
            state = next;
            monthly.push(record);
        }

        let gaps: Vec<String> = monthly
            .iter()
            .filter(|r| r.phase == Phase::Historical && !r.is_historical)
            .map(|r| r.month.format("%Y-%m").to_string())
            .collect();
        if !gaps.is_empty() {
            warn!(
                "No financial record for {} past month(s): {}",
                gaps.len(),
                gaps.join(", ")
            );
        }

        let fallback_months = monthly.iter().filter(|r| !r.inflation_from_series).count();
        debug!(
            "Projected {} months, {} used the plan's nominal inflation",
            monthly.len(),
            fallback_months
        );

        let yearly = aggregate_yearly(&monthly);
        Ok(ProjectionResult { monthly, yearly })
    }
}

/// Rolls monthly records up into calendar years.
pub fn aggregate_yearly(records: &[ProjectionRecord]) -> Vec<YearlyProjectionRecord> {
    let mut by_year: BTreeMap<i32, Vec<&ProjectionRecord>> = BTreeMap::new();
    for record in records {
        by_year.entry(record.month.year()).or_default().push(record);
    }

    by_year
        .into_iter()
        .filter_map(|(year, months)| {
            let last = months.last()?;
            let inflation_rates: Vec<f64> = months.iter().map(|r| r.inflation_rate).collect();

            Some(YearlyProjectionRecord {
                year,
                age: last.age,
                contribution: months.iter().map(|r| r.contribution).sum(),
                withdrawal: months.iter().map(|r| r.withdrawal).sum(),
                returns: months.iter().map(|r| r.returns).sum(),
                goals_events_impact: months.iter().map(|r| r.goals_events_impact).sum(),
                ending_balance: months.iter().rev().find_map(|r| r.balance),
                ending_planned_balance: last.planned_balance,
                inflation_rate: compound_rates(&inflation_rates),
                is_retirement_year: months.iter().any(|r| r.retirement_transition),
                retired: last.retirement,
                historical_months: months.iter().filter(|r| r.is_historical).count() as u32,
            })
        })
        .collect()
}
