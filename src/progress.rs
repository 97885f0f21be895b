use crate::annuity::{fv, nper, pmt, pv, PaymentTiming};
use crate::engine::{index_records, limit_month, validate_plan, ProjectionConfig};
use crate::error::{PlanningError, Result};
use crate::goals::{expand_all, ItemFilter, ProcessedEntry};
use crate::rate_provider::InflationSeries;
use crate::schema::{
    FinancialRecord, InvestmentPlan, MicroInvestmentPlan, PlanType, PlanningSnapshot,
};
use crate::segments::{
    active_plan_at, average_monthly_contribution, effective_monthly_return, validate_micro_plans,
};
use crate::utils::{add_months, first_of_month, months_between, next_month, AgeBreakdown};
use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Track {
    /// The original plan from its start date, with every goal and event.
    Planned,
    /// Recomputed from the latest actual balance, with pending items only.
    Projected,
}

/// Capital needed at the end of accumulation, in money of the plan start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RetirementTargets {
    pub planned: Option<f64>,
    pub projected: Option<f64>,
}

/// The last month covered by a financial record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSnapshot {
    pub month: NaiveDate,
    pub balance: f64,
    pub contribution: f64,
}

/// Latest record in or before the month of `reference_date`.
pub fn latest_snapshot(
    records: &[FinancialRecord],
    reference_date: NaiveDate,
) -> Result<Option<HistoricalSnapshot>> {
    let reference_month = first_of_month(reference_date);
    let index = index_records(records)?;

    Ok(index
        .range(..=reference_month)
        .next_back()
        .map(|(month, record)| HistoricalSnapshot {
            month: *month,
            balance: record.ending_balance,
            contribution: record.monthly_contribution,
        }))
}

#[derive(Debug, Clone)]
pub struct ProgressRequest {
    pub reference_date: NaiveDate,
    pub targets: RetirementTargets,
    /// Supplied by the future-value collaborator; defaults to the planned target.
    pub investment_goal: Option<f64>,
    /// Derived from the records when absent.
    pub last_snapshot: Option<HistoricalSnapshot>,
}

impl ProgressRequest {
    pub fn new(reference_date: NaiveDate) -> Self {
        Self {
            reference_date,
            targets: RetirementTargets::default(),
            investment_goal: None,
            last_snapshot: None,
        }
    }

    pub fn with_targets(mut self, targets: RetirementTargets) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_investment_goal(mut self, goal: f64) -> Self {
        self.investment_goal = Some(goal);
        self
    }

    pub fn with_last_snapshot(mut self, snapshot: HistoricalSnapshot) -> Self {
        self.last_snapshot = Some(snapshot);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackProgress {
    pub track: Track,
    pub reference_date: NaiveDate,
    pub starting_balance: f64,
    /// Starting balance net of discounted goals/events before retirement.
    pub adjusted_balance: f64,
    /// Target net of discounted goals/events after retirement.
    pub target_future_value: f64,
    pub effective_monthly_rate: f64,
    pub monthly_contribution: f64,
    pub months_to_retirement: u32,
    pub retirement_date: NaiveDate,
    pub retirement_age: AgeBreakdown,
    /// `None` once the accumulation phase is over.
    pub required_monthly_contribution: Option<f64>,
    pub capital_at_retirement: f64,
    pub withdrawal_months: i32,
    pub sustainable_monthly_income: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub planned: TrackProgress,
    pub projected: TrackProgress,
    pub is_ahead_of_schedule: bool,
    pub current_balance: f64,
    pub investment_goal: f64,
    /// Percent of the investment goal already accumulated.
    pub current_progress: f64,
    pub meets_desired_income: bool,
}

/// Capital that funds `desired_income` over `withdrawal_months` under the plan type.
pub fn required_retirement_capital(
    plan: &InvestmentPlan,
    monthly_rate: f64,
    withdrawal_months: i32,
) -> Result<f64> {
    match plan.plan_type {
        PlanType::PreserveCapital => {
            if monthly_rate <= 0.0 {
                return Err(PlanningError::UnreachableGoal {
                    function: "required_retirement_capital",
                    details: "preserving capital needs a positive real return".to_string(),
                });
            }
            Ok(plan.desired_income / monthly_rate)
        }
        PlanType::SpendToZero => pv(
            monthly_rate,
            withdrawal_months as i64,
            -plan.desired_income,
            0.0,
            PaymentTiming::End,
        ),
        PlanType::Legacy => pv(
            monthly_rate,
            withdrawal_months as i64,
            -plan.desired_income,
            -plan.legacy_amount,
            PaymentTiming::End,
        ),
    }
}

/// Monthly income `capital` can sustain over `withdrawal_months`.
pub fn sustainable_income(
    plan: &InvestmentPlan,
    monthly_rate: f64,
    withdrawal_months: i32,
    capital: f64,
) -> Result<f64> {
    let income = match plan.plan_type {
        PlanType::PreserveCapital => capital * monthly_rate,
        PlanType::SpendToZero | PlanType::Legacy if withdrawal_months <= 0 => 0.0,
        PlanType::SpendToZero => pmt(
            monthly_rate,
            withdrawal_months as i64,
            -capital,
            0.0,
            PaymentTiming::End,
        )?,
        PlanType::Legacy => pmt(
            monthly_rate,
            withdrawal_months as i64,
            -capital,
            plan.legacy_amount,
            PaymentTiming::End,
        )?,
    };

    if income < 0.0 {
        return Err(PlanningError::UnreachableGoal {
            function: "pmt",
            details: format!(
                "capital of {:.2} cannot fund any income under a {:?} plan",
                capital, plan.plan_type
            ),
        });
    }

    Ok(income)
}

fn discount(amount: f64, monthly_rate: f64, months: i32) -> f64 {
    amount / (1.0 + monthly_rate).powi(months.max(0))
}

struct TrackContext<'a> {
    plan: &'a InvestmentPlan,
    birth_date: NaiveDate,
    plans: &'a [MicroInvestmentPlan],
    active: &'a MicroInvestmentPlan,
    inflation: &'a InflationSeries,
}

impl TrackContext<'_> {
    fn calculate(
        &self,
        track: Track,
        start: NaiveDate,
        balance: f64,
        entries: &[ProcessedEntry],
        target: Option<f64>,
    ) -> Result<TrackProgress> {
        let plan = self.plan;
        let retirement_month = first_of_month(plan.plan_end_accumulation_date);
        let last_month = limit_month(plan, self.birth_date)?;

        let horizon = months_between(start, retirement_month).max(0);
        let withdrawal_start = retirement_month.max(start);
        let withdrawal_months = months_between(withdrawal_start, last_month).max(0);

        let rate_window_end = if horizon > 0 { retirement_month } else { last_month };
        let rate = effective_monthly_return(start, rate_window_end, self.plans);
        let contribution = average_monthly_contribution(
            start,
            retirement_month,
            self.plans,
            self.active,
            plan.adjust_contribution_for_inflation,
            self.inflation,
        );

        let (before, after): (Vec<&ProcessedEntry>, Vec<&ProcessedEntry>) =
            entries.iter().partition(|e| e.date < retirement_month);
        let pre_retirement_impact: f64 = before
            .iter()
            .map(|e| discount(e.signed_amount(), rate, months_between(start, e.date)))
            .sum();
        let post_retirement_impact: f64 = after
            .iter()
            .map(|e| discount(e.signed_amount(), rate, months_between(retirement_month, e.date)))
            .sum();

        let adjusted_balance = balance + pre_retirement_impact;
        let target_value = match target {
            Some(value) => value,
            None => required_retirement_capital(plan, rate, withdrawal_months)?,
        };
        let target_future_value = target_value - post_retirement_impact;

        let months_left = months_between(start, last_month).max(0);
        let months_to_retirement = if adjusted_balance >= target_future_value {
            0
        } else {
            let periods = nper(
                rate,
                -contribution,
                -adjusted_balance,
                target_future_value,
                PaymentTiming::End,
            )?
            .max(0.0)
            .ceil();
            if periods > months_left as f64 {
                return Err(PlanningError::UnreachableGoal {
                    function: "nper",
                    details: format!(
                        "target {:.2} needs {} months, only {} remain before the limit age",
                        target_future_value, periods, months_left
                    ),
                });
            }
            periods as u32
        };

        let required_monthly_contribution = if horizon > 0 {
            Some(-pmt(
                rate,
                horizon as i64,
                -adjusted_balance,
                target_future_value,
                PaymentTiming::End,
            )?)
        } else {
            None
        };

        let accumulated = if horizon > 0 {
            fv(
                rate,
                horizon as i64,
                -contribution,
                -adjusted_balance,
                PaymentTiming::End,
            )?
        } else {
            adjusted_balance
        };
        let capital_at_retirement = accumulated + post_retirement_impact;
        let sustainable_monthly_income =
            sustainable_income(plan, rate, withdrawal_months, capital_at_retirement)?;

        let retirement_date = add_months(start, months_to_retirement as i32)?;

        debug!(
            "{:?} track: rate {}, contribution {:.2}, {} months to retirement",
            track, rate, contribution, months_to_retirement
        );

        Ok(TrackProgress {
            track,
            reference_date: start,
            starting_balance: balance,
            adjusted_balance,
            target_future_value,
            effective_monthly_rate: rate,
            monthly_contribution: contribution,
            months_to_retirement,
            retirement_date,
            retirement_age: AgeBreakdown::between(self.birth_date, retirement_date),
            required_monthly_contribution,
            capital_at_retirement,
            withdrawal_months,
            sustainable_monthly_income,
        })
    }
}

pub struct PlanProgressCalculator<'a> {
    snapshot: &'a PlanningSnapshot,
    inflation: &'a InflationSeries,
    config: &'a ProjectionConfig,
}

impl<'a> PlanProgressCalculator<'a> {
    pub fn new(
        snapshot: &'a PlanningSnapshot,
        inflation: &'a InflationSeries,
        config: &'a ProjectionConfig,
    ) -> Self {
        Self {
            snapshot,
            inflation,
            config,
        }
    }

    /// Planned vs projected progress. Returns `Ok(None)` when the snapshot has no
    /// plan or no birth date.
    pub fn calculate(&self, request: &ProgressRequest) -> Result<Option<PlanProgress>> {
        let (plan, birth_date) = match (&self.snapshot.plan, self.snapshot.birth_date) {
            (Some(plan), Some(birth_date)) => (plan, birth_date),
            _ => {
                debug!("Skipping plan progress: plan or birth date missing");
                return Ok(None);
            }
        };

        validate_plan(plan)?;
        validate_micro_plans(&self.snapshot.micro_plans)?;

        let retirement_month = first_of_month(plan.plan_end_accumulation_date);
        let last_month = limit_month(plan, birth_date)?;
        if retirement_month >= last_month {
            return Err(PlanningError::ValidationError {
                entity: "investment plan".to_string(),
                details: format!(
                    "accumulation ends {} but the limit age is reached in {}, leaving no withdrawal months",
                    retirement_month.format("%Y-%m"),
                    last_month.format("%Y-%m")
                ),
            });
        }

        let active = active_plan_at(request.reference_date, &self.snapshot.micro_plans)
            .ok_or(PlanningError::NoMicroPlans)?;
        let plans: &[MicroInvestmentPlan] = if self.config.use_micro_plans {
            &self.snapshot.micro_plans
        } else {
            std::slice::from_ref(active)
        };

        info!(
            "Calculating plan progress as of {} ({:?}, {:?})",
            request.reference_date, plan.plan_type, plan.currency
        );

        let context = TrackContext {
            plan,
            birth_date,
            plans,
            active,
            inflation: self.inflation,
        };

        let all_entries =
            expand_all(&self.snapshot.goals, &self.snapshot.events, ItemFilter::All, true)?;
        let planned = context.calculate(
            Track::Planned,
            first_of_month(plan.plan_initial_date),
            plan.initial_amount,
            &all_entries,
            request.targets.planned,
        )?;

        let last_snapshot = match request.last_snapshot {
            Some(snapshot) => Some(snapshot),
            None => latest_snapshot(&self.snapshot.records, request.reference_date)?,
        };
        let (projected_start, current_balance) = match last_snapshot {
            Some(snapshot) => (next_month(snapshot.month)?, snapshot.balance),
            None => (first_of_month(plan.plan_initial_date), plan.initial_amount),
        };

        let pending_entries = expand_all(
            &self.snapshot.goals,
            &self.snapshot.events,
            ItemFilter::PendingOnly,
            false,
        )?;
        let pending_entries: Vec<ProcessedEntry> = pending_entries
            .into_iter()
            .filter(|e| e.date >= projected_start)
            .collect();
        let projected = context.calculate(
            Track::Projected,
            projected_start,
            current_balance,
            &pending_entries,
            request.targets.projected,
        )?;

        let investment_goal = request
            .investment_goal
            .unwrap_or(planned.target_future_value);
        let current_progress = if investment_goal > 0.0 {
            current_balance / investment_goal * 100.0
        } else {
            0.0
        };

        Ok(Some(PlanProgress {
            is_ahead_of_schedule: planned.retirement_date > projected.retirement_date,
            meets_desired_income: projected.sustainable_monthly_income >= plan.desired_income,
            planned,
            projected,
            current_balance,
            investment_goal,
            current_progress,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CashFlowItem, Currency, ItemStatus, PaymentMode};

    fn ym(year: i32, month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, 1).unwrap()
    }

    fn snapshot(plan_type: PlanType, expected_return: f64) -> PlanningSnapshot {
        PlanningSnapshot {
            plan: Some(InvestmentPlan {
                plan_initial_date: ym(2024, 1),
                plan_end_accumulation_date: ym(2034, 1),
                initial_amount: 100_000.0,
                final_age: 54,
                limit_age: 100,
                desired_income: 2_000.0,
                adjust_contribution_for_inflation: false,
                adjust_income_for_inflation: false,
                plan_type,
                legacy_amount: 0.0,
                currency: Currency::Brl,
            }),
            birth_date: Some(ym(1980, 1)),
            micro_plans: vec![MicroInvestmentPlan {
                effective_date: ym(2024, 1),
                monthly_deposit: 1_000.0,
                expected_return,
                inflation: 0.0,
            }],
            records: vec![],
            goals: vec![],
            events: vec![],
        }
    }

    fn goal(id: &str, year: i32, month: u32, value: f64, status: ItemStatus) -> CashFlowItem {
        CashFlowItem {
            id: id.to_string(),
            name: id.to_string(),
            year,
            month,
            asset_value: value,
            payment_mode: PaymentMode::None,
            installment_count: None,
            installment_interval: None,
            status,
            financial_record_link: None,
        }
    }

    fn calculate(snapshot: &PlanningSnapshot, request: &ProgressRequest) -> Result<Option<PlanProgress>> {
        let inflation = InflationSeries::empty(Currency::Brl);
        let config = ProjectionConfig::default();
        PlanProgressCalculator::new(snapshot, &inflation, &config).calculate(request)
    }

    fn targets(value: f64) -> RetirementTargets {
        RetirementTargets {
            planned: Some(value),
            projected: Some(value),
        }
    }

    #[test]
    fn test_missing_inputs_yield_no_result() {
        let mut no_birth = snapshot(PlanType::SpendToZero, 0.0);
        no_birth.birth_date = None;
        assert!(calculate(&no_birth, &ProgressRequest::new(ym(2024, 1)))
            .unwrap()
            .is_none());

        let mut no_plan = snapshot(PlanType::SpendToZero, 0.0);
        no_plan.plan = None;
        assert!(calculate(&no_plan, &ProgressRequest::new(ym(2024, 1)))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_zero_rate_planned_track() {
        let snapshot = snapshot(PlanType::SpendToZero, 0.0);
        let request = ProgressRequest::new(ym(2024, 1)).with_targets(targets(300_000.0));
        let progress = calculate(&snapshot, &request).unwrap().unwrap();
        let planned = &progress.planned;

        assert_eq!(planned.effective_monthly_rate, 0.0);
        assert_eq!(planned.months_to_retirement, 200);
        assert_eq!(planned.retirement_date, ym(2040, 9));
        assert_eq!(planned.retirement_age, AgeBreakdown { years: 60, months: 8 });

        let required = planned.required_monthly_contribution.unwrap();
        assert!((required - 200_000.0 / 120.0).abs() < 1e-9);

        assert!((planned.capital_at_retirement - 220_000.0).abs() < 1e-9);
        assert_eq!(planned.withdrawal_months, 552);
        assert!((planned.sustainable_monthly_income - 220_000.0 / 552.0).abs() < 1e-9);
    }

    #[test]
    fn test_goals_split_between_tracks() {
        let mut snapshot = snapshot(PlanType::SpendToZero, 0.0);
        snapshot.goals = vec![
            goal("house", 2030, 1, 12_000.0, ItemStatus::Completed),
            goal("boat", 2040, 1, 20_000.0, ItemStatus::Pending),
        ];
        let request = ProgressRequest::new(ym(2024, 1)).with_targets(targets(300_000.0));
        let progress = calculate(&snapshot, &request).unwrap().unwrap();

        assert!((progress.planned.adjusted_balance - 88_000.0).abs() < 1e-9);
        assert!((progress.planned.target_future_value - 320_000.0).abs() < 1e-9);

        assert!((progress.projected.adjusted_balance - 100_000.0).abs() < 1e-9);
        assert!((progress.projected.target_future_value - 320_000.0).abs() < 1e-9);
        assert!(progress.planned.months_to_retirement > progress.projected.months_to_retirement);
    }

    #[test]
    fn test_projected_track_starts_after_last_record() {
        let mut snapshot = snapshot(PlanType::SpendToZero, 0.0);
        snapshot.records = vec![
            FinancialRecord {
                record_year: 2025,
                record_month: 11,
                ending_balance: 140_000.0,
                monthly_contribution: 1_000.0,
            },
            FinancialRecord {
                record_year: 2025,
                record_month: 12,
                ending_balance: 150_000.0,
                monthly_contribution: 1_000.0,
            },
        ];
        let request = ProgressRequest::new(ym(2026, 1))
            .with_targets(targets(300_000.0))
            .with_investment_goal(400_000.0);
        let progress = calculate(&snapshot, &request).unwrap().unwrap();

        let projected = &progress.projected;
        assert_eq!(projected.reference_date, ym(2026, 1));
        assert_eq!(projected.months_to_retirement, 150);
        assert_eq!(projected.retirement_date, ym(2038, 7));
        assert!(progress.is_ahead_of_schedule);
        assert!((progress.current_progress - 37.5).abs() < 1e-9);
        assert_eq!(progress.current_balance, 150_000.0);
    }

    #[test]
    fn test_target_already_reached_needs_no_months() {
        let snapshot = snapshot(PlanType::SpendToZero, 0.0);
        let request = ProgressRequest::new(ym(2024, 1)).with_targets(targets(50_000.0));
        let progress = calculate(&snapshot, &request).unwrap().unwrap();
        assert_eq!(progress.planned.months_to_retirement, 0);
        assert_eq!(progress.planned.retirement_date, ym(2024, 1));
    }

    #[test]
    fn test_default_target_funds_desired_income() {
        let snapshot = snapshot(PlanType::SpendToZero, 4.0);
        let progress = calculate(&snapshot, &ProgressRequest::new(ym(2024, 1)))
            .unwrap()
            .unwrap();
        let planned = &progress.planned;

        let target = required_retirement_capital(
            snapshot.plan.as_ref().unwrap(),
            planned.effective_monthly_rate,
            planned.withdrawal_months,
        )
        .unwrap();
        assert!((planned.target_future_value - target).abs() < 1e-6);

        let income = sustainable_income(
            snapshot.plan.as_ref().unwrap(),
            planned.effective_monthly_rate,
            planned.withdrawal_months,
            target,
        )
        .unwrap();
        assert!((income - 2_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_preserve_capital_withdraws_only_returns() {
        let snapshot = snapshot(PlanType::PreserveCapital, 6.0);
        let progress = calculate(&snapshot, &ProgressRequest::new(ym(2024, 1)))
            .unwrap()
            .unwrap();
        let planned = &progress.planned;
        let expected = planned.capital_at_retirement * planned.effective_monthly_rate;
        assert!((planned.sustainable_monthly_income - expected).abs() < 1e-9);
    }

    #[test]
    fn test_unreachable_legacy_is_an_error() {
        let mut snapshot = snapshot(PlanType::Legacy, 0.0);
        if let Some(plan) = snapshot.plan.as_mut() {
            plan.legacy_amount = 10_000_000.0;
        }
        let request = ProgressRequest::new(ym(2024, 1)).with_targets(targets(300_000.0));
        let result = calculate(&snapshot, &request);
        assert!(matches!(result, Err(PlanningError::UnreachableGoal { .. })));
    }

    #[test]
    fn test_unreachable_retirement_propagates() {
        let mut snapshot = snapshot(PlanType::SpendToZero, 0.0);
        snapshot.micro_plans[0].monthly_deposit = 0.0;
        let request = ProgressRequest::new(ym(2024, 1)).with_targets(targets(300_000.0));
        let result = calculate(&snapshot, &request);
        assert!(matches!(
            result,
            Err(PlanningError::UnreachableGoal { function: "nper", .. })
        ));
    }

    #[test]
    fn test_retirement_beyond_limit_age_is_unreachable() {
        let mut snapshot = snapshot(PlanType::SpendToZero, 0.0);
        snapshot.micro_plans[0].monthly_deposit = 0.01;
        let request = ProgressRequest::new(ym(2024, 1)).with_targets(targets(300_000.0));

        let result = calculate(&snapshot, &request);
        assert!(matches!(
            result,
            Err(PlanningError::UnreachableGoal { function: "nper", .. })
        ));
    }

    #[test]
    fn test_retirement_on_last_possible_month_is_accepted() {
        let mut snapshot = snapshot(PlanType::SpendToZero, 0.0);
        snapshot.micro_plans[0].monthly_deposit = 250.0;
        // 168 000 more at 250 a month takes the 672 months left before age 100.
        let request = ProgressRequest::new(ym(2024, 1)).with_targets(targets(268_000.0));

        let progress = calculate(&snapshot, &request).unwrap().unwrap();
        assert_eq!(progress.planned.months_to_retirement, 672);
        assert_eq!(progress.planned.retirement_date, ym(2080, 1));
    }

    #[test]
    fn test_accumulation_ending_at_limit_age_is_rejected() {
        let mut snapshot = snapshot(PlanType::SpendToZero, 0.0);
        if let Some(plan) = snapshot.plan.as_mut() {
            plan.plan_end_accumulation_date = ym(2080, 1);
        }

        let result = calculate(&snapshot, &ProgressRequest::new(ym(2024, 1)));
        assert!(matches!(result, Err(PlanningError::ValidationError { .. })));
    }

    #[test]
    fn test_no_withdrawal_months_sustain_no_income() {
        let snapshot = snapshot(PlanType::Legacy, 0.0);
        let plan = snapshot.plan.as_ref().unwrap();
        assert_eq!(sustainable_income(plan, 0.004, 0, 500_000.0).unwrap(), 0.0);
    }

    #[test]
    fn test_latest_snapshot_respects_reference_date() {
        let records = vec![
            FinancialRecord {
                record_year: 2024,
                record_month: 3,
                ending_balance: 1.0,
                monthly_contribution: 0.0,
            },
            FinancialRecord {
                record_year: 2024,
                record_month: 6,
                ending_balance: 2.0,
                monthly_contribution: 0.0,
            },
        ];
        let latest = latest_snapshot(&records, ym(2024, 5)).unwrap().unwrap();
        assert_eq!(latest.month, ym(2024, 3));
        assert!(latest_snapshot(&records, ym(2024, 1)).unwrap().is_none());
    }
}
