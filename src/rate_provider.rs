use crate::error::{PlanningError, Result};
use crate::rates::percent_to_rate;
use crate::schema::Currency;
use crate::utils::first_of_month;
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One published monthly inflation figure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonthlyRate {
    pub date: NaiveDate,
    /// Monthly change in percent, e.g. `0.44` for 0.44 % in the month.
    pub monthly_rate_percent: f64,
}

/// Source of published CPI/IPCA figures.
///
/// Months the provider does not publish are simply absent from the result; the
/// projection then falls back to the micro plan's nominal inflation.
pub trait RateProvider {
    fn monthly_rates(
        &self,
        currency: Currency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MonthlyRate>>;
}

/// Series fetched by the host application and handed over in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishedSeriesProvider {
    series: BTreeMap<Currency, Vec<MonthlyRate>>,
}

impl PublishedSeriesProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, currency: Currency, rates: Vec<MonthlyRate>) -> Self {
        self.series.insert(currency, rates);
        self
    }

    /// Loads `{ "BRL": [{ "date": "2024-01-01", "monthly_rate_percent": 0.42 }, ...] }`.
    pub fn from_json(json: &str) -> Result<Self> {
        let series: BTreeMap<Currency, Vec<MonthlyRate>> = serde_json::from_str(json)?;
        Ok(Self { series })
    }
}

impl RateProvider for PublishedSeriesProvider {
    fn monthly_rates(
        &self,
        currency: Currency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MonthlyRate>> {
        if end < start {
            return Err(PlanningError::RateProviderError(format!(
                "requested range {} .. {} is inverted",
                start, end
            )));
        }

        let start = first_of_month(start);
        let rates = self
            .series
            .get(&currency)
            .map(|rates| {
                rates
                    .iter()
                    .filter(|r| first_of_month(r.date) >= start && r.date < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(rates)
    }
}

/// Publishes nothing: every month uses the plan's own inflation assumption.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantNominalProvider;

impl RateProvider for ConstantNominalProvider {
    fn monthly_rates(
        &self,
        _currency: Currency,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<MonthlyRate>> {
        Ok(Vec::new())
    }
}

/// Month-keyed lookup of published inflation, resolved once before a simulation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InflationSeries {
    currency: Currency,
    rates: BTreeMap<NaiveDate, f64>,
}

impl InflationSeries {
    pub fn empty(currency: Currency) -> Self {
        Self {
            currency,
            rates: BTreeMap::new(),
        }
    }

    pub fn resolve(
        provider: &dyn RateProvider,
        currency: Currency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self> {
        let published = provider.monthly_rates(currency, start, end)?;
        debug!(
            "Resolved {} published {:?} inflation figures between {} and {}",
            published.len(),
            currency,
            start,
            end
        );
        Ok(Self::from_rates(currency, &published))
    }

    pub fn from_rates(currency: Currency, published: &[MonthlyRate]) -> Self {
        let rates = published
            .iter()
            .map(|r| (first_of_month(r.date), percent_to_rate(r.monthly_rate_percent)))
            .collect();
        Self { currency, rates }
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Published monthly rate as a decimal fraction, if any.
    pub fn monthly_rate(&self, month: NaiveDate) -> Option<f64> {
        self.rates.get(&first_of_month(month)).copied()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ym(year: i32, month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, 1).unwrap()
    }

    #[test]
    fn test_published_series_filters_range_and_currency() {
        let provider = PublishedSeriesProvider::new()
            .with_series(
                Currency::Brl,
                vec![
                    MonthlyRate { date: ym(2024, 1), monthly_rate_percent: 0.42 },
                    MonthlyRate { date: ym(2024, 2), monthly_rate_percent: 0.83 },
                    MonthlyRate { date: ym(2024, 3), monthly_rate_percent: 0.16 },
                ],
            )
            .with_series(
                Currency::Usd,
                vec![MonthlyRate { date: ym(2024, 2), monthly_rate_percent: 0.4 }],
            );

        let brl = provider
            .monthly_rates(Currency::Brl, ym(2024, 2), ym(2024, 4))
            .unwrap();
        assert_eq!(brl.len(), 2);
        assert_eq!(brl[0].date, ym(2024, 2));

        let eur = provider
            .monthly_rates(Currency::Eur, ym(2024, 1), ym(2025, 1))
            .unwrap();
        assert!(eur.is_empty());

        assert!(provider
            .monthly_rates(Currency::Brl, ym(2024, 4), ym(2024, 1))
            .is_err());
    }

    #[test]
    fn test_series_lookup_converts_percent() {
        let series = InflationSeries::from_rates(
            Currency::Brl,
            &[MonthlyRate {
                date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
                monthly_rate_percent: 0.16,
            }],
        );

        assert_eq!(series.monthly_rate(ym(2024, 3)), Some(0.0016));
        assert_eq!(series.monthly_rate(ym(2024, 4)), None);
    }

    #[test]
    fn test_constant_nominal_publishes_nothing() {
        let series = InflationSeries::resolve(
            &ConstantNominalProvider,
            Currency::Usd,
            ym(2024, 1),
            ym(2030, 1),
        )
        .unwrap();
        assert!(series.is_empty());
        assert_eq!(series.currency(), Currency::Usd);
    }

    #[test]
    fn test_provider_from_json() {
        let json = r#"{ "EUR": [{ "date": "2024-05-01", "monthly_rate_percent": 0.2 }] }"#;
        let provider = PublishedSeriesProvider::from_json(json).unwrap();
        let series =
            InflationSeries::resolve(&provider, Currency::Eur, ym(2024, 1), ym(2025, 1)).unwrap();
        assert_eq!(series.monthly_rate(ym(2024, 5)), Some(0.002));
    }
}
