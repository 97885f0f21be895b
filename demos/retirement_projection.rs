use chrono::NaiveDate;
use retirement_projection::*;

fn main() -> anyhow::Result<()> {
    println!("📈 Retirement Projection Demo\n");
    println!("A saver born in 1984 with a few recorded months, a changed deposit in 2026");
    println!("and a car bought in installments. Actual and planned balances are reported side by side.\n");

    let snapshot = PlanningSnapshot {
        plan: Some(InvestmentPlan {
            plan_initial_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            plan_end_accumulation_date: NaiveDate::from_ymd_opt(2049, 5, 1).unwrap(),
            initial_amount: 80_000.0,
            final_age: 65,
            limit_age: 95,
            desired_income: 7_000.0,
            adjust_contribution_for_inflation: true,
            adjust_income_for_inflation: true,
            plan_type: PlanType::Legacy,
            legacy_amount: 250_000.0,
            currency: Currency::Brl,
        }),
        birth_date: NaiveDate::from_ymd_opt(1984, 4, 22),
        micro_plans: vec![
            MicroInvestmentPlan {
                effective_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                monthly_deposit: 2_000.0,
                expected_return: 5.0,
                inflation: 4.0,
            },
            MicroInvestmentPlan {
                effective_date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
                monthly_deposit: 3_000.0,
                expected_return: 4.5,
                inflation: 3.5,
            },
        ],
        records: vec![
            FinancialRecord {
                record_year: 2025,
                record_month: 1,
                ending_balance: 82_400.0,
                monthly_contribution: 2_000.0,
            },
            FinancialRecord {
                record_year: 2025,
                record_month: 3,
                ending_balance: 86_100.0,
                monthly_contribution: 2_000.0,
            },
        ],
        goals: vec![CashFlowItem {
            id: "car".to_string(),
            name: "Car".to_string(),
            year: 2027,
            month: 10,
            asset_value: 60_000.0,
            payment_mode: PaymentMode::Installment,
            installment_count: Some(12),
            installment_interval: None,
            status: ItemStatus::Pending,
            financial_record_link: None,
        }],
        events: vec![],
    };

    let provider = PublishedSeriesProvider::new().with_series(
        Currency::Brl,
        vec![
            MonthlyRate {
                date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                monthly_rate_percent: 0.16,
            },
            MonthlyRate {
                date: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
                monthly_rate_percent: 1.31,
            },
            MonthlyRate {
                date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                monthly_rate_percent: 0.56,
            },
        ],
    );

    let today = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
    let config = ProjectionConfig::default();

    let Some(projection) = project_plan(&snapshot, &provider, &config, today)? else {
        println!("Nothing to project.");
        return Ok(());
    };

    println!("=== Yearly Summary ===\n");
    println!(
        "{:<6} {:>4} {:>14} {:>14} {:>16} {:>16}",
        "Year", "Age", "Contributed", "Withdrawn", "Balance", "Planned"
    );
    for year in projection.yearly.iter().step_by(5) {
        let balance = year
            .ending_balance
            .map(|b| format!("{:.2}", b))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:>4} {:>14.2} {:>14.2} {:>16} {:>16.2}{}",
            year.year,
            year.age,
            year.contribution,
            year.withdrawal,
            balance,
            year.ending_planned_balance,
            if year.is_retirement_year { "  ← retirement" } else { "" }
        );
    }

    let gaps = projection
        .monthly
        .iter()
        .filter(|r| r.phase == Phase::Historical && r.balance.is_none())
        .count();
    println!("\nPast months without a record: {}", gaps);

    let request = ProgressRequest::new(today);
    if let Some(progress) = calculate_plan_progress(&snapshot, &provider, &config, &request)? {
        println!("\n=== Plan Progress ===\n");
        for track in [&progress.planned, &progress.projected] {
            println!("{:?}:", track.track);
            println!("  Retirement date:        {}", track.retirement_date);
            println!(
                "  Age at retirement:      {}y {}m",
                track.retirement_age.years, track.retirement_age.months
            );
            println!("  Capital at retirement:  {:.2}", track.capital_at_retirement);
            println!("  Sustainable income:     {:.2}", track.sustainable_monthly_income);
            if let Some(required) = track.required_monthly_contribution {
                println!("  Required contribution:  {:.2}", required);
            }
        }
        println!(
            "\nProgress: {:.1}% of {:.2}",
            progress.current_progress, progress.investment_goal
        );
        println!(
            "Ahead of schedule: {}  Meets desired income: {}",
            if progress.is_ahead_of_schedule { "✓" } else { "✗" },
            if progress.meets_desired_income { "✓" } else { "✗" }
        );
    }

    Ok(())
}
