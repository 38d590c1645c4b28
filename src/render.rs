//! Styled xlsx output: one sheet per pivot
//!
//! Layout is planned first (`SheetPlan`, pure data) and written afterwards, so
//! the naming and ordering rules can be checked without touching xlsx.

use rust_xlsxwriter::{Color, ColNum, Format, FormatAlign, FormatBorder, RowNum, Workbook, XlsxError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::pivot::PivotSet;

pub const MAX_SHEET_NAME_LEN: usize = 31;
const FALLBACK_SHEET_NAME: &str = "SHEET";

const TITLE_ROW: RowNum = 1;
const HEADER_ROW: RowNum = 3;
const FIRST_DATA_ROW: RowNum = 4;
const FIRST_COLUMN_WIDTH: f64 = 25.0;
const OTHER_COLUMN_WIDTH: f64 = 11.0;

const HEADER_FILL: u32 = 0xBDD7EE;
const HIGHLIGHT_FILL: u32 = 0xD8F5DC;
const BORDER_COLOR: u32 = 0xD3D3D3;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to write workbook: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("Failed to create output directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sheet {0} does not fit in a worksheet")]
    TooLarge(String),
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Header of the first column
    pub entity_header: String,
    /// Rows whose entity contains one of these are highlighted
    pub highlight_markers: Vec<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            entity_header: "Регион".to_string(),
            highlight_markers: vec![" ФО".to_string(), "Итого по РФ".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanRow {
    pub entity: String,
    pub values: Vec<Option<f64>>,
    pub highlight: bool,
}

/// Everything needed to write one sheet
#[derive(Debug, Clone, PartialEq)]
pub struct SheetPlan {
    pub sheet_name: String,
    pub title: String,
    pub header: Vec<String>,
    pub rows: Vec<PlanRow>,
}

/// Uppercase initials of the words (letters and spaces only), at most 31 characters
pub fn abbreviate_sheet_name(indicator: &str) -> String {
    let letters: String = indicator
        .chars()
        .filter(|c| c.is_alphabetic() || *c == ' ')
        .collect();
    let abbreviation: String = letters
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .take(MAX_SHEET_NAME_LEN)
        .collect();

    if abbreviation.is_empty() {
        FALLBACK_SHEET_NAME.to_string()
    } else {
        abbreviation
    }
}

/// Sheet names for indicators in order; repeated abbreviations get a numeric suffix
pub fn unique_sheet_names<'a, I>(indicators: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    // Excel compares sheet names case-insensitively
    let mut used: HashSet<String> = HashSet::new();
    let mut names = Vec::new();

    for indicator in indicators {
        let base = abbreviate_sheet_name(indicator);
        let mut name = base.clone();
        let mut n = 2;
        while used.contains(&name.to_lowercase()) {
            let suffix = n.to_string();
            let keep = MAX_SHEET_NAME_LEN - suffix.len();
            name = base.chars().take(keep).collect::<String>() + &suffix;
            n += 1;
        }
        used.insert(name.to_lowercase());
        names.push(name);
    }
    names
}

pub fn plan_workbook(pivots: &PivotSet, options: &RenderOptions) -> Vec<SheetPlan> {
    let sheet_names = unique_sheet_names(pivots.matrices.iter().map(|m| m.indicator.as_str()));

    let header: Vec<String> = std::iter::once(options.entity_header.clone())
        .chain(pivots.periods.iter().map(|p| p.to_string()))
        .collect();

    pivots
        .matrices
        .iter()
        .zip(sheet_names)
        .map(|(matrix, sheet_name)| SheetPlan {
            sheet_name,
            title: matrix.indicator.to_uppercase(),
            header: header.clone(),
            rows: pivots
                .entities
                .iter()
                .enumerate()
                .map(|(idx, entity)| PlanRow {
                    entity: entity.clone(),
                    values: matrix.row(idx).to_vec(),
                    highlight: options
                        .highlight_markers
                        .iter()
                        .any(|marker| entity.contains(marker.as_str())),
                })
                .collect(),
        })
        .collect()
}

struct Styles {
    title: Format,
    header: Format,
    entity: Format,
    entity_highlight: Format,
    value: Format,
    value_highlight: Format,
}

impl Styles {
    fn new() -> Self {
        let base = Format::new()
            .set_font_name("Arial")
            .set_font_size(10)
            .set_align(FormatAlign::VerticalCenter)
            .set_border(FormatBorder::Thin)
            .set_border_color(Color::RGB(BORDER_COLOR));

        let entity = base.clone().set_bold().set_align(FormatAlign::Left);
        let value = base
            .clone()
            .set_align(FormatAlign::Right)
            .set_num_format("#,##0");

        Self {
            title: Format::new()
                .set_font_name("Times New Roman")
                .set_font_size(10)
                .set_bold(),
            header: base
                .clone()
                .set_bold()
                .set_font_color(Color::Black)
                .set_background_color(Color::RGB(HEADER_FILL))
                .set_align(FormatAlign::Center),
            entity_highlight: entity.clone().set_background_color(Color::RGB(HIGHLIGHT_FILL)),
            entity,
            value_highlight: value.clone().set_background_color(Color::RGB(HIGHLIGHT_FILL)),
            value,
        }
    }
}

/// Build the workbook in memory
pub fn render_workbook(plans: &[SheetPlan]) -> Result<Workbook, RenderError> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();

    for plan in plans {
        let too_large = || RenderError::TooLarge(plan.sheet_name.clone());
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&plan.sheet_name)?;

        worksheet.write_string_with_format(TITLE_ROW, 0, &plan.title, &styles.title)?;

        for (col, text) in plan.header.iter().enumerate() {
            let col = ColNum::try_from(col).map_err(|_| too_large())?;
            worksheet.write_string_with_format(HEADER_ROW, col, text, &styles.header)?;
        }

        for (idx, row) in plan.rows.iter().enumerate() {
            let row_num = RowNum::try_from(idx)
                .ok()
                .and_then(|idx| idx.checked_add(FIRST_DATA_ROW))
                .ok_or_else(too_large)?;
            let (entity_format, value_format) = if row.highlight {
                (&styles.entity_highlight, &styles.value_highlight)
            } else {
                (&styles.entity, &styles.value)
            };

            worksheet.write_string_with_format(row_num, 0, &row.entity, entity_format)?;
            for (col, value) in row.values.iter().enumerate() {
                let col = ColNum::try_from(col + 1).map_err(|_| too_large())?;
                match value {
                    Some(v) => worksheet.write_number_with_format(row_num, col, *v, value_format)?,
                    None => worksheet.write_blank(row_num, col, value_format)?,
                };
            }
        }

        let columns = plan.header.len().max(1);
        worksheet.set_column_width(0, FIRST_COLUMN_WIDTH)?;
        for col in 1..columns {
            let col = ColNum::try_from(col).map_err(|_| too_large())?;
            worksheet.set_column_width(col, OTHER_COLUMN_WIDTH)?;
        }
        worksheet.set_freeze_panes(FIRST_DATA_ROW, 1)?;
        worksheet.set_screen_gridlines(false);

        debug!(
            "Planned sheet {} with {} rows",
            plan.sheet_name,
            plan.rows.len()
        );
    }

    Ok(workbook)
}

pub fn workbook_bytes(plans: &[SheetPlan]) -> Result<Vec<u8>, RenderError> {
    Ok(render_workbook(plans)?.save_to_buffer()?)
}

/// Write the workbook to `path`, creating parent directories
#[instrument(skip(plans), fields(sheets = plans.len()))]
pub fn save_workbook(plans: &[SheetPlan], path: &Path) -> Result<PathBuf, RenderError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| RenderError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }

    let mut workbook = render_workbook(plans)?;
    workbook.save(path)?;
    info!("Saved workbook with {} sheets to {}", plans.len(), path.display());
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Period;
    use crate::pivot::PivotMatrix;

    fn pivots() -> PivotSet {
        PivotSet {
            entities: vec![
                "Центральный ФО".to_string(),
                "Москва".to_string(),
                "Итого по РФ".to_string(),
            ],
            periods: vec![Period::new("2024-01-01"), Period::new("2024-02-01")],
            matrices: vec![
                PivotMatrix {
                    indicator: "Объем средств на счетах эскроу".to_string(),
                    values: vec![
                        vec![Some(1.0), Some(2.0)],
                        vec![None, Some(3.0)],
                        vec![Some(4.0), Some(5.0)],
                    ],
                },
                PivotMatrix {
                    indicator: "Остаток средств на счетах эскроу".to_string(),
                    values: vec![vec![None, None]; 3],
                },
            ],
        }
    }

    #[test]
    fn test_abbreviate_sheet_name() {
        assert_eq!(abbreviate_sheet_name("Объем средств на счетах эскроу"), "ОСНСЭ");
        assert_eq!(abbreviate_sheet_name("Количество (шт.) договоров, 2"), "КШД");
        assert_eq!(abbreviate_sheet_name("2024 / 1"), "SHEET");
        assert_eq!(abbreviate_sheet_name(""), "SHEET");
    }

    #[test]
    fn test_abbreviation_is_capped() {
        let long = "слово ".repeat(40);
        assert_eq!(abbreviate_sheet_name(&long).chars().count(), MAX_SHEET_NAME_LEN);
    }

    #[test]
    fn test_unique_sheet_names() {
        let names = unique_sheet_names(["Объем средств", "Остаток средств", "объем счетов", "x"]);
        assert_eq!(names, vec!["ОС", "ОС2", "ОС3", "X"]);
    }

    #[test]
    fn test_unique_sheet_names_respect_length_limit() {
        let long = "слово ".repeat(40);
        let names = unique_sheet_names([long.as_str(), long.as_str()]);
        assert_eq!(names[1].chars().count(), MAX_SHEET_NAME_LEN);
        assert!(names[1].ends_with('2'));
    }

    #[test]
    fn test_plan_workbook() {
        let plans = plan_workbook(&pivots(), &RenderOptions::default());

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].sheet_name, "ОСНСЭ");
        assert_eq!(plans[1].sheet_name, "ОСНСЭ2");
        assert_eq!(plans[0].title, "ОБЪЕМ СРЕДСТВ НА СЧЕТАХ ЭСКРОУ");
        assert_eq!(plans[0].header, vec!["Регион", "2024-01-01", "2024-02-01"]);

        let highlights: Vec<bool> = plans[0].rows.iter().map(|r| r.highlight).collect();
        assert_eq!(highlights, vec![true, false, true]);
        assert_eq!(plans[0].rows[1].values, vec![None, Some(3.0)]);
    }

    #[test]
    fn test_workbook_bytes_is_xlsx() {
        let plans = plan_workbook(&pivots(), &RenderOptions::default());
        let bytes = workbook_bytes(&plans).unwrap();
        // xlsx is a zip container
        assert_eq!(&bytes[..2], b"PK");
    }
}
