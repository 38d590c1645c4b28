use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::ConfigError;
use crate::dataset::{LongRecord, ParsedFragment, Period};
use crate::importers::recipe::{LayoutRecipe, PeriodRule};
use crate::names::NameNormalizer;
use crate::utils::{extract_date_from_filename, parse_day_first_date, strip_footnote};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to open workbook: {0}")]
    WorkbookOpen(String),

    #[error("Workbook has no sheets")]
    NoSheets,

    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    #[error("Header row {row} is beyond the end of sheet {sheet}")]
    MissingHeader { sheet: String, row: usize },

    #[error("No indicator columns in header row {row} of sheet {sheet}")]
    NoIndicators { sheet: String, row: usize },

    #[error("No sheet is named by a period")]
    NoPeriodSheets,

    #[error("Cannot determine period for {0}")]
    NoPeriod(String),
}

/// One spreadsheet as fetched: display name (used for the period) and raw bytes
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            bytes: std::fs::read(path)?,
        })
    }
}

/// A file that could not be parsed; the run carries on without it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub records: Vec<LongRecord>,
    pub warning: Option<ParseWarning>,
}

impl ParseOutcome {
    pub fn into_fragment(self, source: impl Into<String>) -> ParsedFragment {
        ParsedFragment {
            source: source.into(),
            records: self.records,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::String(s) => Cell::Text(s.clone()),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => match dt.as_datetime() {
                Some(datetime) => Cell::Text(datetime.date().format("%Y-%m-%d").to_string()),
                None => Cell::Number(dt.as_f64()),
            },
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(_) | Data::Empty => Cell::Empty,
        }
    }
}

impl Cell {
    /// Label text: footnote markers stripped, `None` when blank
    pub fn as_label(&self) -> Option<String> {
        let label = match self {
            Cell::Empty => return None,
            Cell::Text(s) if is_code(s) => s.trim().to_string(),
            Cell::Text(s) => strip_footnote(s),
            // Numeric codes are kept whole
            Cell::Number(n) => format_number(*n),
        };
        (!label.is_empty()).then_some(label)
    }

    /// Numeric value; empty cells, dashes and other text are missing
    pub fn as_value(&self) -> Option<f64> {
        match self {
            Cell::Empty => None,
            Cell::Number(n) => n.is_finite().then_some(*n),
            Cell::Text(s) => parse_number(s),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }
}

/// Region and bank codes stored as text, e.g. `45` or `0045`
fn is_code(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Parse publisher-formatted numeric text (`1 234,5`, NBSP separators)
pub fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "-" | "\u{2013}" | "\u{2014}" | "x" | "X" | "\u{0445}" | "\u{0425}" => None,
        _ => cleaned.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

/// Cells of one sheet in absolute coordinates, (0, 0) being `A1`
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    rows: Vec<Vec<Cell>>,
}

impl RawTable {
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    /// calamine ranges start at the first used cell; pad back to `A1`
    pub fn from_range(range: &Range<Data>) -> Self {
        let Some((start_row, start_col)) = range.start() else {
            return Self::default();
        };

        let mut rows = vec![Vec::new(); start_row as usize];
        for row in range.rows() {
            let mut cells = vec![Cell::Empty; start_col as usize];
            cells.extend(row.iter().map(Cell::from));
            rows.push(cells);
        }
        Self { rows }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn get(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(col))
            .unwrap_or(&Cell::Empty)
    }

    fn row_is_empty(&self, row: usize) -> bool {
        self.rows
            .get(row)
            .map_or(true, |cells| cells.iter().all(Cell::is_empty))
    }
}

/// Turns wide spreadsheets into long-form records according to a recipe
pub struct SheetParser {
    recipe: LayoutRecipe,
    names: Option<NameNormalizer>,
}

impl SheetParser {
    pub fn new(recipe: LayoutRecipe) -> Result<Self, ConfigError> {
        recipe.validate()?;
        let names = recipe.entity_names.map(NameNormalizer::new);
        Ok(Self { recipe, names })
    }

    pub fn recipe(&self) -> &LayoutRecipe {
        &self.recipe
    }

    /// Parse one file; a failure becomes a warning with no records
    #[instrument(skip(self, source), fields(source = %source.name, recipe = %self.recipe.name))]
    pub fn parse(&self, source: &SourceFile) -> ParseOutcome {
        match self.parse_source(source) {
            Ok(records) => {
                info!("Parsed {} records from {}", records.len(), source.name);
                ParseOutcome {
                    records,
                    warning: None,
                }
            }
            Err(e) => {
                warn!("Skipping {}: {}", source.name, e);
                ParseOutcome {
                    records: Vec::new(),
                    warning: Some(ParseWarning {
                        source: source.name.clone(),
                        message: e.to_string(),
                    }),
                }
            }
        }
    }

    pub fn parse_source(&self, source: &SourceFile) -> Result<Vec<LongRecord>, ParseError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(source.bytes.as_slice()))
            .map_err(|e| ParseError::WorkbookOpen(e.to_string()))?;
        let sheet_names = workbook.sheet_names();

        if self.recipe.period == PeriodRule::SheetName {
            let mut records = Vec::new();
            let mut period_sheets = 0;
            for sheet in &sheet_names {
                let Some(date) = parse_day_first_date(sheet) else {
                    debug!("Sheet {} is not named by a period, skipping", sheet);
                    continue;
                };
                period_sheets += 1;

                let result = workbook
                    .worksheet_range(sheet)
                    .map_err(|_| ParseError::SheetNotFound(sheet.clone()))
                    .and_then(|range| {
                        self.table_records(&RawTable::from_range(&range), sheet, &Period::from(date))
                    });
                match result {
                    Ok(mut sheet_records) => records.append(&mut sheet_records),
                    Err(e) => warn!("Skipping sheet {} of {}: {}", sheet, source.name, e),
                }
            }

            if period_sheets == 0 {
                return Err(ParseError::NoPeriodSheets);
            }
            return Ok(records);
        }

        let period = self.file_period(&source.name)?;
        let sheet = self.flat_sheet_name(&sheet_names)?;
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|_| ParseError::SheetNotFound(sheet.clone()))?;
        self.table_records(&RawTable::from_range(&range), &sheet, &period)
    }

    /// Indicator names from the header row, first occurrence kept
    ///
    /// For one-sheet-per-period workbooks the most recent period sheet is used.
    pub fn header_indicators(&self, source: &SourceFile) -> Result<Vec<String>, ParseError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(source.bytes.as_slice()))
            .map_err(|e| ParseError::WorkbookOpen(e.to_string()))?;
        let sheet_names = workbook.sheet_names();

        let sheet = if self.recipe.period == PeriodRule::SheetName {
            sheet_names
                .iter()
                .filter_map(|name| parse_day_first_date(name).map(|date| (date, name)))
                .max_by_key(|(date, _)| *date)
                .map(|(_, name)| name.clone())
                .ok_or(ParseError::NoPeriodSheets)?
        } else {
            self.flat_sheet_name(&sheet_names)?
        };

        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|_| ParseError::SheetNotFound(sheet.clone()))?;
        let table = RawTable::from_range(&range);

        let mut indicators: Vec<String> = Vec::new();
        for (_, name) in self.indicator_columns(&table, &sheet)? {
            if !indicators.contains(&name) {
                indicators.push(name);
            }
        }
        Ok(indicators)
    }

    /// Long-form records of one sheet
    pub fn table_records(
        &self,
        table: &RawTable,
        sheet: &str,
        period: &Period,
    ) -> Result<Vec<LongRecord>, ParseError> {
        let indicators = self.indicator_columns(table, sheet)?;
        let header_row = self.recipe.header_row;

        let mut end = table.height();
        while end > header_row + 1 && table.row_is_empty(end - 1) {
            end -= 1;
        }
        let end = end.saturating_sub(self.recipe.footer_rows).max(header_row + 1);

        let mut records = Vec::new();
        let mut skipped_rows = 0;
        for row in header_row + 1..end {
            let Some(entity) = self.row_entity(table, row) else {
                skipped_rows += 1;
                continue;
            };

            for (col, indicator) in &indicators {
                let Some(value) = table.get(row, *col).as_value() else {
                    continue;
                };
                if let Some(record) = LongRecord::new(entity.clone(), indicator.clone(), period.clone(), value) {
                    records.push(record);
                }
            }
        }

        debug!(
            "Sheet {}: {} indicators, {} records, {} rows without entity",
            sheet,
            indicators.len(),
            records.len(),
            skipped_rows
        );
        Ok(records)
    }

    fn indicator_columns(&self, table: &RawTable, sheet: &str) -> Result<Vec<(usize, String)>, ParseError> {
        let header_row = self.recipe.header_row;
        if header_row >= table.height() {
            return Err(ParseError::MissingHeader {
                sheet: sheet.to_string(),
                row: header_row,
            });
        }

        let last = match self.recipe.last_column {
            Some(last) => last.min(table.width().saturating_sub(1)),
            None => table.width().saturating_sub(1),
        };
        let columns: Vec<(usize, String)> = (self.recipe.first_column..=last)
            .filter(|col| self.recipe.is_value_column(*col))
            .filter_map(|col| table.get(header_row, col).as_label().map(|name| (col, name)))
            .collect();

        if columns.is_empty() {
            return Err(ParseError::NoIndicators {
                sheet: sheet.to_string(),
                row: header_row,
            });
        }
        Ok(columns)
    }

    /// Entity of a data row: entity cell, else the fallback cell of the same row
    fn row_entity(&self, table: &RawTable, row: usize) -> Option<String> {
        let raw = table.get(row, self.recipe.entity_column).as_label().or_else(|| {
            self.recipe
                .entity_fallback_column
                .and_then(|col| table.get(row, col).as_label())
        })?;

        let entity = match self.recipe.total_label(&raw) {
            Some(label) => label.to_string(),
            None => raw,
        };

        match &self.names {
            Some(names) => names.normalize_str(&entity),
            None => Some(entity),
        }
    }

    fn file_period(&self, name: &str) -> Result<Period, ParseError> {
        let stem = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().trim().to_string())
            .unwrap_or_default();

        let period = match &self.recipe.period {
            PeriodRule::FileName => extract_date_from_filename(name)
                .map(Period::from)
                .unwrap_or_else(|| Period::new(stem)),
            PeriodRule::FileStem => Period::new(stem),
            PeriodRule::Fixed { period } => Period::new(period.trim()),
            PeriodRule::SheetName => return Err(ParseError::NoPeriod(name.to_string())),
        };

        if period.as_str().is_empty() {
            return Err(ParseError::NoPeriod(name.to_string()));
        }
        Ok(period)
    }

    fn flat_sheet_name(&self, sheet_names: &[String]) -> Result<String, ParseError> {
        match &self.recipe.sheet {
            Some(wanted) => sheet_names
                .iter()
                .find(|name| name.trim() == wanted.trim())
                .cloned()
                .ok_or_else(|| ParseError::SheetNotFound(wanted.clone())),
            None => sheet_names.first().cloned().ok_or(ParseError::NoSheets),
        }
    }
}

/// Parse one file with a recipe
///
/// Only configuration mistakes are errors; a bad file yields a warning.
pub fn parse(source: &SourceFile, recipe: &LayoutRecipe) -> Result<ParseOutcome, ConfigError> {
    Ok(SheetParser::new(recipe.clone())?.parse(source))
}
