use crate::error::Result;
use crate::schema::{CashFlowItem, CashFlowKind, ItemStatus, PaymentMode};
use crate::utils::month_start;
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One month's share of a goal or event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEntry {
    pub source_id: String,
    pub kind: CashFlowKind,
    pub date: NaiveDate,
    /// Always positive; the direction comes from `kind`.
    pub amount: f64,
    /// 1-based position within an installment plan, `None` for single payments.
    pub installment_number: Option<u32>,
}

impl ProcessedEntry {
    /// Effect on the balance: goals subtract, events add.
    pub fn signed_amount(&self) -> f64 {
        self.kind.sign() * self.amount
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFilter {
    All,
    PendingOnly,
}

impl ItemFilter {
    fn accepts(self, item: &CashFlowItem) -> bool {
        match self {
            ItemFilter::All => true,
            ItemFilter::PendingOnly => item.status == ItemStatus::Pending,
        }
    }
}

/// Expands a goal or event into its monthly entries.
///
/// Items linked to a financial record are already part of the actual balance and are
/// skipped unless `ignore_financial_links` is set.
pub fn expand(
    item: &CashFlowItem,
    kind: CashFlowKind,
    ignore_financial_links: bool,
) -> Result<Vec<ProcessedEntry>> {
    if item.financial_record_link.is_some() && !ignore_financial_links {
        return Ok(Vec::new());
    }

    let count = item.installment_count.unwrap_or(0);
    if item.payment_mode == PaymentMode::None || count == 0 {
        return Ok(vec![ProcessedEntry {
            source_id: item.id.clone(),
            kind,
            date: month_start(item.year, item.month)?,
            amount: item.asset_value,
            installment_number: None,
        }]);
    }

    // Validates the starting month before any wrap-around arithmetic.
    month_start(item.year, item.month)?;

    let interval = item.installment_interval.filter(|i| *i > 0).unwrap_or(1);
    let amount = match item.payment_mode {
        PaymentMode::Installment => item.asset_value / count as f64,
        _ => item.asset_value,
    };

    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count {
        let offset = (item.month - 1 + i * interval) as i32;
        let month = (offset % 12) as u32 + 1;
        let year = item.year + offset / 12;

        entries.push(ProcessedEntry {
            source_id: item.id.clone(),
            kind,
            date: month_start(year, month)?,
            amount,
            installment_number: Some(i + 1),
        });
    }

    Ok(entries)
}

/// Expands every goal and event accepted by `filter`, ordered by month.
pub fn expand_all(
    goals: &[CashFlowItem],
    events: &[CashFlowItem],
    filter: ItemFilter,
    ignore_financial_links: bool,
) -> Result<Vec<ProcessedEntry>> {
    let mut entries = Vec::new();

    for goal in goals.iter().filter(|g| filter.accepts(g)) {
        entries.extend(expand(goal, CashFlowKind::Goal, ignore_financial_links)?);
    }
    for event in events.iter().filter(|e| filter.accepts(e)) {
        entries.extend(expand(event, CashFlowKind::Event, ignore_financial_links)?);
    }

    entries.sort_by_key(|e| e.date);

    debug!(
        "Expanded {} goals and {} events into {} monthly entries",
        goals.len(),
        events.len(),
        entries.len()
    );

    Ok(entries)
}

/// Net balance change per month.
pub fn net_impact_by_month(entries: &[ProcessedEntry]) -> BTreeMap<NaiveDate, f64> {
    let mut impact: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for entry in entries {
        *impact.entry(entry.date).or_default() += entry.signed_amount();
    }
    impact
}
