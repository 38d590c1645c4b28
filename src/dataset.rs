use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Reporting period of an observation
///
/// Stored as text so that date-like tokens which are not calendar dates (a
/// filename stem, for instance) survive; periods built from dates are always
/// `YYYY-MM-DD`, which keeps lexicographic and chronological order identical.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Period(String);

impl Period {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format("%Y-%m-%d").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0, "%Y-%m-%d").ok()
    }
}

impl From<NaiveDate> for Period {
    fn from(date: NaiveDate) -> Self {
        Self::from_date(date)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One observation: entity (region or bank) × indicator × period → value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRecord {
    pub entity: String,
    pub indicator: String,
    pub period: Period,
    pub value: f64,
}

impl LongRecord {
    /// Build a record, refusing missing values and blank keys
    pub fn new(
        entity: impl Into<String>,
        indicator: impl Into<String>,
        period: Period,
        value: f64,
    ) -> Option<Self> {
        let entity = entity.into();
        let indicator = indicator.into();
        if !value.is_finite() || entity.is_empty() || indicator.is_empty() || period.0.is_empty() {
            return None;
        }
        Some(Self {
            entity,
            indicator,
            period,
            value,
        })
    }
}

/// Long-form records produced from one source file
#[derive(Debug, Clone, Default)]
pub struct ParsedFragment {
    pub source: String,
    pub records: Vec<LongRecord>,
}

/// Union of all parsed fragments for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LongFormDataset {
    records: Vec<LongRecord>,
}

impl LongFormDataset {
    /// Canonical column set, also reported for an empty dataset
    pub const COLUMNS: [&'static str; 4] = ["entity", "indicator", "period", "value"];

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<LongRecord>) -> Self {
        Self { records }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        &Self::COLUMNS
    }

    pub fn records(&self) -> &[LongRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All distinct periods, ascending
    pub fn periods(&self) -> Vec<Period> {
        self.records
            .iter()
            .map(|r| r.period.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn max_period(&self) -> Option<&Period> {
        self.records.iter().map(|r| &r.period).max()
    }

    /// Distinct entities observed at `period`, in order of first appearance
    pub fn entities_at(&self, period: &Period) -> Vec<String> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter(|r| &r.period == period)
            .filter(|r| seen.insert(r.entity.as_str()))
            .map(|r| r.entity.clone())
            .collect()
    }

    /// Distinct indicators, lexicographic
    pub fn indicators_sorted(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|r| r.indicator.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Write the records as a JSON array
    pub fn write_json<W: Write>(&self, writer: W) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, &self.records)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        self.write_json(&mut writer)?;
        writer.flush()
    }
}

/// Concatenate per-file fragments into one dataset
///
/// Fragments are collected first and concatenated once, ordered by source name,
/// so the result does not depend on the order in which files finished parsing.
/// No fragments (or only empty ones) yields an empty dataset, not an error.
pub fn aggregate(fragments: impl IntoIterator<Item = ParsedFragment>) -> LongFormDataset {
    let mut fragments: Vec<ParsedFragment> = fragments.into_iter().collect();
    fragments.sort_by(|a, b| a.source.cmp(&b.source));

    let total: usize = fragments.iter().map(|f| f.records.len()).sum();
    let mut records = Vec::with_capacity(total);
    for fragment in fragments {
        debug!(
            "Appending {} records from {}",
            fragment.records.len(),
            fragment.source
        );
        records.extend(fragment.records);
    }

    info!("Aggregated {} long-form records", records.len());
    LongFormDataset { records }
}
