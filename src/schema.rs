use crate::error::Result;
use crate::utils::{first_of_month, month_start};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT_AGE: u32 = 100;
pub const MAX_LIMIT_AGE: u32 = 150;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[schemars(description = "Brazilian real, inflation tracked by the IPCA series")]
    Brl,
    #[schemars(description = "US dollar, inflation tracked by the US CPI series")]
    Usd,
    #[schemars(description = "Euro, inflation tracked by the euro area HICP series")]
    Eur,
}

impl Default for Currency {
    fn default() -> Self {
        Self::Brl
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum PlanType {
    #[schemars(description = "Spend the whole balance so it reaches zero at the limit age")]
    SpendToZero,

    #[schemars(description = "Leave `legacy_amount` behind at the limit age")]
    Legacy,

    #[schemars(description = "Withdraw only the real return, the principal is never touched")]
    PreserveCapital,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    #[schemars(description = "A single payment at the item's month")]
    None,

    #[schemars(description = "The value is split evenly over `installment_count` payments")]
    Installment,

    #[schemars(description = "The full value is paid `installment_count` times")]
    Repeat,
}

impl Default for PaymentMode {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Completed,
}

impl Default for ItemStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CashFlowKind {
    /// Money leaving the portfolio (a purchase, a trip).
    Goal,
    /// Money entering the portfolio (an inheritance, a sale).
    Event,
}

impl CashFlowKind {
    pub fn sign(self) -> f64 {
        match self {
            CashFlowKind::Goal => -1.0,
            CashFlowKind::Event => 1.0,
        }
    }
}

/// A time-bounded set of plan assumptions, effective from `effective_date` until the
/// next segment starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct MicroInvestmentPlan {
    #[schemars(description = "First day the assumptions apply. The whole calendar month is governed by this segment.")]
    pub effective_date: NaiveDate,

    #[schemars(description = "Monthly deposit made while accumulating")]
    pub monthly_deposit: f64,

    #[schemars(description = "Expected real return in percent per year (e.g. 5.0 for 5 %/yr)")]
    pub expected_return: f64,

    #[schemars(description = "Assumed inflation in percent per year, used when no CPI figure is published")]
    pub inflation: f64,
}

impl MicroInvestmentPlan {
    pub fn effective_month(&self) -> NaiveDate {
        first_of_month(self.effective_date)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct InvestmentPlan {
    pub plan_initial_date: NaiveDate,

    #[schemars(description = "Month the accumulation phase is planned to end")]
    pub plan_end_accumulation_date: NaiveDate,

    pub initial_amount: f64,

    #[schemars(description = "Age at which withdrawals start")]
    pub final_age: u32,

    #[serde(default = "default_limit_age")]
    #[schemars(description = "Age at which the projection stops. Defaults to 100, at most 150.")]
    pub limit_age: u32,

    #[schemars(description = "Desired monthly income during retirement, in money of the plan start")]
    pub desired_income: f64,

    #[serde(default)]
    pub adjust_contribution_for_inflation: bool,

    #[serde(default)]
    pub adjust_income_for_inflation: bool,

    pub plan_type: PlanType,

    #[serde(default)]
    #[schemars(description = "Amount to leave behind when `plan_type` is legacy")]
    pub legacy_amount: f64,

    #[serde(default)]
    #[schemars(description = "Selects which CPI series is used for inflation")]
    pub currency: Currency,
}

fn default_limit_age() -> u32 {
    DEFAULT_LIMIT_AGE
}

/// Actual month-end figures for one calendar month.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct FinancialRecord {
    pub record_year: i32,
    pub record_month: u32,
    pub ending_balance: f64,
    pub monthly_contribution: f64,
}

impl FinancialRecord {
    pub fn month_key(&self) -> Result<NaiveDate> {
        month_start(self.record_year, self.record_month)
    }
}

/// A goal (outflow) or projected event (inflow).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CashFlowItem {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub year: i32,
    pub month: u32,

    #[schemars(description = "Total value of the goal or event")]
    pub asset_value: f64,

    #[serde(default)]
    pub payment_mode: PaymentMode,

    #[serde(default)]
    pub installment_count: Option<u32>,

    #[serde(default)]
    #[schemars(description = "Months between two installments. Defaults to 1.")]
    pub installment_interval: Option<u32>,

    #[serde(default)]
    pub status: ItemStatus,

    #[serde(default)]
    #[schemars(description = "Set when the item is already reflected in a financial record")]
    pub financial_record_link: Option<String>,
}

pub type Goal = CashFlowItem;
pub type ProjectedEvent = CashFlowItem;

/// Everything the persistence layer hands over for one planning run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PlanningSnapshot {
    #[serde(default)]
    pub plan: Option<InvestmentPlan>,

    #[serde(default)]
    pub birth_date: Option<NaiveDate>,

    #[serde(default)]
    pub micro_plans: Vec<MicroInvestmentPlan>,

    #[serde(default)]
    pub records: Vec<FinancialRecord>,

    #[serde(default)]
    pub goals: Vec<Goal>,

    #[serde(default)]
    pub events: Vec<ProjectedEvent>,
}

impl PlanningSnapshot {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PlanningSnapshot)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation() {
        let schema_json = PlanningSnapshot::schema_as_json().unwrap();
        assert!(schema_json.contains("micro_plans"));
        assert!(schema_json.contains("plan_end_accumulation_date"));
        assert!(schema_json.contains("installment_interval"));
    }

    #[test]
    fn test_deserialization_applies_defaults() {
        let json = r#"{
            "plan": {
                "plan_initial_date": "2024-01-01",
                "plan_end_accumulation_date": "2044-01-01",
                "initial_amount": 50000.0,
                "final_age": 60,
                "desired_income": 8000.0,
                "plan_type": "preserve-capital",
                "currency": "USD"
            },
            "birth_date": "1984-05-10",
            "goals": [
                { "id": "car", "year": 2026, "month": 3, "asset_value": 40000.0 }
            ]
        }"#;

        let snapshot = PlanningSnapshot::from_json(json).unwrap();
        let plan = snapshot.plan.unwrap();
        assert_eq!(plan.limit_age, DEFAULT_LIMIT_AGE);
        assert_eq!(plan.plan_type, PlanType::PreserveCapital);
        assert_eq!(plan.currency, Currency::Usd);
        assert!(!plan.adjust_income_for_inflation);

        let goal = &snapshot.goals[0];
        assert_eq!(goal.payment_mode, PaymentMode::None);
        assert_eq!(goal.status, ItemStatus::Pending);
        assert!(snapshot.micro_plans.is_empty());
    }

    #[test]
    fn test_record_month_key() {
        let record = FinancialRecord {
            record_year: 2024,
            record_month: 13,
            ending_balance: 0.0,
            monthly_contribution: 0.0,
        };
        assert!(record.month_key().is_err());
    }
}
