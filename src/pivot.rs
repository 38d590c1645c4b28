//! Per-indicator entity × period matrices
//!
//! Every matrix of one run shares the same row universe (entities observed at the
//! latest period, first-appearance order) and column universe (all periods,
//! ascending), so the rendered sheets line up with each other.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::dataset::{LongFormDataset, Period};
use crate::utils::extract_date_from_filename;

/// What to do with indicators found in the data but not in the reference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownIndicatorPolicy {
    /// Append them alphabetically after the reference order
    #[default]
    AppendSorted,
    Fail,
}

impl FromStr for UnknownIndicatorPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append_sorted" | "append-sorted" | "append" => Ok(Self::AppendSorted),
            "fail" | "error" => Ok(Self::Fail),
            _ => Err(ConfigError::InvalidVar {
                var: "UNKNOWN_INDICATOR_POLICY",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Error, Debug)]
pub enum PivotError {
    #[error("Indicators not in the reference order: {}", .0.join(", "))]
    UnknownIndicators(Vec<String>),
}

/// Sheet order of indicators
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorOrder(Vec<String>);

impl IndicatorOrder {
    /// Left-to-right header order, blanks skipped, duplicates collapsed to first occurrence
    pub fn from_headers<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut order: Vec<String> = Vec::new();
        for header in headers {
            let header = header.as_ref().trim();
            if !header.is_empty() && !order.iter().any(|h| h == header) {
                order.push(header.to_string());
            }
        }
        Self(order)
    }

    pub fn alphabetical(dataset: &LongFormDataset) -> Self {
        Self(dataset.indicators_sorted())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Final indicator list for a dataset under `policy`
    pub fn reconcile(
        &self,
        dataset: &LongFormDataset,
        policy: UnknownIndicatorPolicy,
    ) -> Result<Vec<String>, PivotError> {
        let unknown: Vec<String> = dataset
            .indicators_sorted()
            .into_iter()
            .filter(|indicator| !self.0.contains(indicator))
            .collect();

        if unknown.is_empty() {
            return Ok(self.0.clone());
        }

        match policy {
            UnknownIndicatorPolicy::Fail => Err(PivotError::UnknownIndicators(unknown)),
            UnknownIndicatorPolicy::AppendSorted => {
                warn!(
                    "{} indicators not in the reference order, appending: {:?}",
                    unknown.len(),
                    unknown
                );
                let mut indicators = self.0.clone();
                indicators.extend(unknown);
                Ok(indicators)
            }
        }
    }
}

/// Values of one indicator; rows follow `PivotSet::entities`, columns `PivotSet::periods`
#[derive(Debug, Clone, PartialEq)]
pub struct PivotMatrix {
    pub indicator: String,
    pub values: Vec<Vec<Option<f64>>>,
}

impl PivotMatrix {
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.values.get(row).and_then(|r| r.get(col)).copied().flatten()
    }

    pub fn row(&self, row: usize) -> &[Option<f64>] {
        self.values.get(row).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PivotSet {
    pub entities: Vec<String>,
    pub periods: Vec<Period>,
    pub matrices: Vec<PivotMatrix>,
}

impl PivotSet {
    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn get(&self, indicator: &str) -> Option<&PivotMatrix> {
        self.matrices.iter().find(|m| m.indicator == indicator)
    }

    pub fn value(&self, indicator: &str, entity: &str, period: &Period) -> Option<f64> {
        let row = self.entities.iter().position(|e| e == entity)?;
        let col = self.periods.iter().position(|p| p == period)?;
        self.get(indicator)?.get(row, col)
    }
}

/// Build one matrix per indicator
///
/// `order` comes from the header row of the latest source file; without it the
/// indicators are sorted alphabetically. Duplicate observations are averaged.
pub fn build_pivots(
    dataset: &LongFormDataset,
    order: Option<&IndicatorOrder>,
    policy: UnknownIndicatorPolicy,
) -> Result<PivotSet, PivotError> {
    let Some(max_period) = dataset.max_period() else {
        info!("Empty dataset, no pivots to build");
        return Ok(PivotSet::default());
    };

    let entities = dataset.entities_at(max_period);
    let periods = dataset.periods();
    let indicators = match order {
        Some(order) if !order.is_empty() => order.reconcile(dataset, policy)?,
        _ => {
            debug!("No reference indicator order, using alphabetical");
            dataset.indicators_sorted()
        }
    };

    let entity_idx: HashMap<&str, usize> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| (e.as_str(), i))
        .collect();
    let period_idx: HashMap<&Period, usize> =
        periods.iter().enumerate().map(|(i, p)| (p, i)).collect();
    let indicator_idx: HashMap<&str, usize> = indicators
        .iter()
        .enumerate()
        .map(|(i, ind)| (ind.as_str(), i))
        .collect();

    // (sum, count) per indicator, entity, period
    let cells = entities.len() * periods.len();
    let mut sums = vec![vec![(0.0_f64, 0_u32); cells]; indicators.len()];
    let mut outside_universe = 0;

    for record in dataset.records() {
        let (Some(&ind), Some(&row), Some(&col)) = (
            indicator_idx.get(record.indicator.as_str()),
            entity_idx.get(record.entity.as_str()),
            period_idx.get(&record.period),
        ) else {
            outside_universe += 1;
            continue;
        };
        let cell = &mut sums[ind][row * periods.len() + col];
        cell.0 += record.value;
        cell.1 += 1;
    }

    if outside_universe > 0 {
        debug!(
            "{} records fall outside the entity universe of {}",
            outside_universe, max_period
        );
    }

    let matrices = indicators
        .into_iter()
        .zip(sums)
        .map(|(indicator, cells)| PivotMatrix {
            indicator,
            values: cells
                .chunks(periods.len().max(1))
                .take(entities.len())
                .map(|row| {
                    row.iter()
                        .map(|&(sum, count)| (count > 0).then(|| sum / f64::from(count)))
                        .collect()
                })
                .collect(),
        })
        .collect::<Vec<_>>();

    info!(
        "Built {} pivots: {} entities × {} periods",
        matrices.len(),
        entities.len(),
        periods.len()
    );

    Ok(PivotSet {
        entities,
        periods,
        matrices,
    })
}

/// Source whose filename date is the greatest, compared as dates
///
/// Names without a date are ignored; ties go to the greater name.
pub fn latest_source<'a, I>(names: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    names
        .into_iter()
        .filter_map(|name| extract_date_from_filename(name).map(|date| (date, name)))
        .max()
        .map(|(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LongRecord;

    fn record(entity: &str, indicator: &str, period: &str, value: f64) -> LongRecord {
        LongRecord::new(entity, indicator, Period::new(period), value).unwrap()
    }

    fn deposits() -> LongFormDataset {
        LongFormDataset::from_records(vec![
            record("Москва", "Вклады", "2024-01", 100.0),
            record("Москва", "Вклады", "2024-02", 110.0),
            record("СПб", "Вклады", "2024-02", 90.0),
        ])
    }

    #[test]
    fn test_build_pivots_example() {
        let pivots = build_pivots(&deposits(), None, UnknownIndicatorPolicy::AppendSorted).unwrap();

        assert_eq!(pivots.entities, vec!["Москва", "СПб"]);
        assert_eq!(pivots.periods, vec![Period::new("2024-01"), Period::new("2024-02")]);
        let matrix = pivots.get("Вклады").unwrap();
        assert_eq!(matrix.row(0), &[Some(100.0), Some(110.0)]);
        assert_eq!(matrix.row(1), &[None, Some(90.0)]);
    }

    #[test]
    fn test_empty_dataset_gives_no_pivots() {
        let order = IndicatorOrder::from_headers(["Вклады"]);
        let pivots = build_pivots(
            &LongFormDataset::empty(),
            Some(&order),
            UnknownIndicatorPolicy::Fail,
        )
        .unwrap();
        assert!(pivots.is_empty());
    }

    #[test]
    fn test_duplicates_are_averaged() {
        let dataset = LongFormDataset::from_records(vec![
            record("Москва", "Вклады", "2024-01", 100.0),
            record("Москва", "Вклады", "2024-01", 50.0),
        ]);
        let pivots = build_pivots(&dataset, None, UnknownIndicatorPolicy::AppendSorted).unwrap();
        assert_eq!(
            pivots.value("Вклады", "Москва", &Period::new("2024-01")),
            Some(75.0)
        );
    }

    #[test]
    fn test_entity_universe_is_latest_period_only() {
        let dataset = LongFormDataset::from_records(vec![
            record("Тверь", "Вклады", "2024-01", 1.0),
            record("Москва", "Вклады", "2024-02", 2.0),
        ]);
        let pivots = build_pivots(&dataset, None, UnknownIndicatorPolicy::AppendSorted).unwrap();
        assert_eq!(pivots.entities, vec!["Москва"]);
        assert_eq!(pivots.periods.len(), 2);
    }

    #[test]
    fn test_shared_shape_across_indicators() {
        let dataset = LongFormDataset::from_records(vec![
            record("Москва", "Вклады", "2024-01", 1.0),
            record("СПб", "Кредиты", "2024-02", 2.0),
            record("Москва", "Кредиты", "2024-02", 3.0),
        ]);
        let pivots = build_pivots(&dataset, None, UnknownIndicatorPolicy::AppendSorted).unwrap();
        for matrix in &pivots.matrices {
            assert_eq!(matrix.values.len(), pivots.entities.len());
            assert!(matrix.values.iter().all(|row| row.len() == pivots.periods.len()));
        }
    }

    #[test]
    fn test_order_from_headers_dedupes() {
        let order = IndicatorOrder::from_headers(["Б", "А", "Б", " ", "В"]);
        assert_eq!(order.as_slice(), &["Б", "А", "В"]);
    }

    #[test]
    fn test_unknown_indicators_appended_sorted() {
        let dataset = LongFormDataset::from_records(vec![
            record("Москва", "Я", "2024-01", 1.0),
            record("Москва", "Б", "2024-01", 1.0),
            record("Москва", "А", "2024-01", 1.0),
        ]);
        let order = IndicatorOrder::from_headers(["Я"]);
        let pivots = build_pivots(&dataset, Some(&order), UnknownIndicatorPolicy::AppendSorted).unwrap();
        let names: Vec<&str> = pivots.matrices.iter().map(|m| m.indicator.as_str()).collect();
        assert_eq!(names, vec!["Я", "А", "Б"]);
    }

    #[test]
    fn test_unknown_indicators_fail_policy() {
        let order = IndicatorOrder::from_headers(["Кредиты"]);
        let result = build_pivots(&deposits(), Some(&order), UnknownIndicatorPolicy::Fail);
        match result {
            Err(PivotError::UnknownIndicators(names)) => assert_eq!(names, vec!["Вклады"]),
            other => panic!("Expected UnknownIndicators, got {other:?}"),
        }
    }

    #[test]
    fn test_ordered_indicator_without_data_is_all_missing() {
        let order = IndicatorOrder::from_headers(["Кредиты", "Вклады"]);
        let pivots = build_pivots(&deposits(), Some(&order), UnknownIndicatorPolicy::Fail).unwrap();
        assert_eq!(pivots.matrices[0].indicator, "Кредиты");
        assert!(pivots.matrices[0]
            .values
            .iter()
            .all(|row| row.iter().all(Option::is_none)));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "append_sorted".parse::<UnknownIndicatorPolicy>().unwrap(),
            UnknownIndicatorPolicy::AppendSorted
        );
        assert_eq!("FAIL".parse::<UnknownIndicatorPolicy>().unwrap(), UnknownIndicatorPolicy::Fail);
        assert!("ignore".parse::<UnknownIndicatorPolicy>().is_err());
    }

    #[test]
    fn test_latest_source_compares_dates() {
        let names = ["31012023.xlsx", "01032024.xlsx", "readme.xlsx"];
        assert_eq!(latest_source(names), Some("01032024.xlsx"));
        assert_eq!(latest_source(["notes.xlsx"]), None);
    }
}
