use std::env;
use std::path::PathBuf;

use crate::pivot::UnknownIndicatorPolicy;

pub const CBR_INDEX_URL_DEFAULT: &str =
    "https://www.cbr.ru/statistics/bank_sector/equity_const_financing/";
pub const INBANK_API_PREFIX_DEFAULT: &str = "https://gate.rshb.ru/ex/cbr";

/// Configuration mistakes: bad recipes, bad normalizer options, bad endpoint prefixes
///
/// These are never caused by the data itself and abort the run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid layout recipe '{recipe}': {msg}")]
    InvalidRecipe { recipe: String, msg: String },

    #[error("Unknown layout recipe preset: {0}")]
    UnknownPreset(String),

    #[error("Invalid normalizer option {option}: '{value}'")]
    InvalidOption { option: &'static str, value: String },

    #[error("Invalid endpoint prefix: {0}")]
    InvalidPrefix(String),

    #[error("Invalid value for {var}: '{value}'")]
    InvalidVar { var: &'static str, value: String },

    #[error("Failed to read configuration file {path}: {msg}")]
    File { path: String, msg: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub index_url: String,
    pub inbank: bool,
    pub inbank_api_prefix: String,
    pub work_dir: PathBuf,
    pub output_path: PathBuf,
    pub parse_concurrency: usize,
    pub http_timeout_secs: u64,
    pub unknown_indicator_policy: UnknownIndicatorPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            index_url: CBR_INDEX_URL_DEFAULT.to_string(),
            inbank: false,
            inbank_api_prefix: INBANK_API_PREFIX_DEFAULT.to_string(),
            work_dir: PathBuf::from("temp_equity_xlsx"),
            output_path: PathBuf::from("Escrow Accounts.xlsx"),
            parse_concurrency: 4,
            http_timeout_secs: 60,
            unknown_indicator_policy: UnknownIndicatorPolicy::AppendSorted,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        Ok(Config {
            index_url: env::var("CBR_INDEX_URL").unwrap_or(defaults.index_url),
            inbank: parse_bool("INBANK", env::var("INBANK").ok(), defaults.inbank)?,
            inbank_api_prefix: env::var("INBANK_API_PREFIX")
                .unwrap_or(defaults.inbank_api_prefix),
            work_dir: env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            output_path: env::var("OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_path),
            parse_concurrency: env::var("PARSE_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .unwrap_or(defaults.parse_concurrency)
                .max(1),
            http_timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(defaults.http_timeout_secs),
            unknown_indicator_policy: match env::var("UNKNOWN_INDICATOR_POLICY") {
                Ok(value) => value.parse()?,
                Err(_) => defaults.unknown_indicator_policy,
            },
        })
    }

    /// Endpoint prefix to apply to every URL, if the gateway is enabled
    pub fn endpoint_prefix(&self) -> Option<&str> {
        self.inbank.then_some(self.inbank_api_prefix.as_str())
    }
}

fn parse_bool(var: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidVar { var, value }),
    }
}
