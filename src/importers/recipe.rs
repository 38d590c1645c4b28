use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::ConfigError;
use crate::names::NormalizeOptions;

/// How the reporting period of a sheet is determined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PeriodRule {
    /// Date token in the filename (`DDMMYYYY` and day-first forms); the stem
    /// is used verbatim when it holds no date
    FileName,
    /// Filename without extension, verbatim
    FileStem,
    /// One sheet per period, sheet name parsed day-first; other sheets skipped
    SheetName,
    Fixed { period: String },
}

/// Per-source-format description of where the data sits in a sheet
///
/// Row and column indices are zero-based absolute sheet coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutRecipe {
    pub name: String,
    /// Row holding indicator names; rows above it are titles and notes
    pub header_row: usize,
    /// Rows dropped from the end after trailing empty rows are ignored
    #[serde(default)]
    pub footer_rows: usize,
    #[serde(default)]
    pub first_column: usize,
    #[serde(default)]
    pub last_column: Option<usize>,
    pub entity_column: usize,
    /// Code/label column used when the entity cell is blank
    #[serde(default)]
    pub entity_fallback_column: Option<usize>,
    pub period: PeriodRule,
    /// Sheet to read for single-sheet layouts; first sheet when absent
    #[serde(default)]
    pub sheet: Option<String>,
    /// Literal entity labels replaced by an unambiguous label (e.g. `Итого`)
    #[serde(default)]
    pub total_labels: Vec<(String, String)>,
    /// Run every entity through the name normalizer (bank-level files)
    #[serde(default)]
    pub entity_names: Option<NormalizeOptions>,
}

impl LayoutRecipe {
    pub const PRESETS: [&'static str; 2] = ["escrow", "nps"];

    /// Regional escrow-account files: title block of three rows, region names
    /// in column B with the code column A as fallback
    pub fn escrow() -> Self {
        Self {
            name: "escrow".to_string(),
            header_row: 3,
            footer_rows: 0,
            first_column: 0,
            last_column: None,
            entity_column: 1,
            entity_fallback_column: Some(0),
            period: PeriodRule::FileName,
            sheet: None,
            total_labels: vec![
                ("Итого".to_string(), "Итого по РФ".to_string()),
                ("Total".to_string(), "Grand total".to_string()),
            ],
            entity_names: None,
        }
    }

    /// Payment-system statistics: one `.xls` per period named by its date
    pub fn nps() -> Self {
        Self {
            name: "nps".to_string(),
            header_row: 0,
            footer_rows: 0,
            first_column: 0,
            last_column: None,
            entity_column: 0,
            entity_fallback_column: None,
            period: PeriodRule::FileStem,
            sheet: None,
            total_labels: Vec::new(),
            entity_names: None,
        }
    }

    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "escrow" => Ok(Self::escrow()),
            "nps" => Ok(Self::nps()),
            _ => Err(ConfigError::UnknownPreset(name.to_string())),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            msg: e.to_string(),
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let recipe: Self = serde_json::from_str(text).map_err(|e| ConfigError::InvalidRecipe {
            recipe: "<json>".to_string(),
            msg: e.to_string(),
        })?;
        recipe.validate()?;
        Ok(recipe)
    }

    /// Preset name or path to a JSON recipe
    pub fn resolve(name_or_path: &str) -> Result<Self, ConfigError> {
        let path = Path::new(name_or_path);
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) || path.is_file() {
            Self::from_json_file(path)
        } else {
            Self::preset(name_or_path)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| ConfigError::InvalidRecipe {
            recipe: self.name.clone(),
            msg,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if let Some(last) = self.last_column {
            if last < self.first_column {
                return Err(invalid(format!(
                    "last_column {last} is before first_column {}",
                    self.first_column
                )));
            }
        }
        if !self.in_columns(self.entity_column) {
            return Err(invalid(format!(
                "entity_column {} is outside the column range",
                self.entity_column
            )));
        }
        if let Some(fallback) = self.entity_fallback_column {
            if fallback == self.entity_column {
                return Err(invalid(
                    "entity_fallback_column must differ from entity_column".to_string(),
                ));
            }
        }
        if let PeriodRule::Fixed { period } = &self.period {
            if period.trim().is_empty() {
                return Err(invalid("fixed period must not be empty".to_string()));
            }
        }
        if self.total_labels.iter().any(|(from, to)| from.trim().is_empty() || to.trim().is_empty()) {
            return Err(invalid("total_labels entries must not be empty".to_string()));
        }
        Ok(())
    }

    /// Whether a column is inside the kept column range
    pub fn in_columns(&self, col: usize) -> bool {
        col >= self.first_column && self.last_column.map_or(true, |last| col <= last)
    }

    /// Whether a column carries indicator values
    pub fn is_value_column(&self, col: usize) -> bool {
        self.in_columns(col)
            && col != self.entity_column
            && Some(col) != self.entity_fallback_column
    }

    /// Replacement for a literal total label, if the entity is one
    pub fn total_label(&self, entity: &str) -> Option<&str> {
        self.total_labels
            .iter()
            .find(|(from, _)| from == entity)
            .map(|(_, to)| to.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for name in LayoutRecipe::PRESETS {
            let recipe = LayoutRecipe::preset(name).unwrap();
            assert!(recipe.validate().is_ok(), "preset {name} should validate");
        }
    }

    #[test]
    fn test_unknown_preset() {
        assert!(matches!(
            LayoutRecipe::preset("mortgage"),
            Err(ConfigError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_escrow_value_columns() {
        let recipe = LayoutRecipe::escrow();
        assert!(!recipe.is_value_column(0));
        assert!(!recipe.is_value_column(1));
        assert!(recipe.is_value_column(2));
        assert_eq!(recipe.total_label("Итого"), Some("Итого по РФ"));
        assert_eq!(recipe.total_label("Москва"), None);
    }

    #[test]
    fn test_validate_rejects_bad_column_range() {
        let recipe = LayoutRecipe {
            first_column: 3,
            last_column: Some(1),
            ..LayoutRecipe::escrow()
        };
        assert!(matches!(
            recipe.validate(),
            Err(ConfigError::InvalidRecipe { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_entity_equal_to_fallback() {
        let recipe = LayoutRecipe {
            entity_fallback_column: Some(1),
            ..LayoutRecipe::escrow()
        };
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_fixed_period() {
        let recipe = LayoutRecipe {
            period: PeriodRule::Fixed {
                period: " ".to_string(),
            },
            ..LayoutRecipe::nps()
        };
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn test_from_json_with_defaults() {
        let recipe = LayoutRecipe::from_json(
            r#"{
                "name": "banks",
                "header_row": 5,
                "entity_column": 1,
                "period": {"rule": "sheet_name"},
                "entity_names": {"placement": "left", "case": "upper"}
            }"#,
        )
        .unwrap();

        assert_eq!(recipe.header_row, 5);
        assert_eq!(recipe.first_column, 0);
        assert_eq!(recipe.period, PeriodRule::SheetName);
        assert!(recipe.entity_names.is_some());
    }

    #[test]
    fn test_from_json_invalid_is_config_error() {
        let result = LayoutRecipe::from_json(r#"{"name": "x"}"#);
        assert!(matches!(result, Err(ConfigError::InvalidRecipe { .. })));
    }
}
