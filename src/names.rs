//! Bank and legal-entity name normalizer
//!
//! Turns free-text names from published lists ("Публичное акционерное общество
//! «Сбербанк России»", "Банк ВТБ (ПАО)") into one display form, controlled by
//! three independent options: tag placement, case mode and generic-word policy.

pub mod rules;

pub use rules::{NameRules, SpecialName};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::ConfigError;
use crate::utils::collapse_whitespace;
use rules::CompiledRules;

/// Where legal-form tags go in the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagPlacement {
    #[default]
    Left,
    Right,
    Omit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseMode {
    Upper,
    #[default]
    Preserve,
}

/// Whether a standalone generic word ("Банк") is dropped from the name edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenericWordPolicy {
    #[default]
    Keep,
    DropEdges,
}

impl FromStr for TagPlacement {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "prefix" => Ok(Self::Left),
            "right" | "suffix" => Ok(Self::Right),
            "none" | "omit" => Ok(Self::Omit),
            _ => Err(ConfigError::InvalidOption {
                option: "placement",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for CaseMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upper" => Ok(Self::Upper),
            "preserve" | "keep" => Ok(Self::Preserve),
            _ => Err(ConfigError::InvalidOption {
                option: "case",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for GenericWordPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "edges" | "drop" | "drop_edges" => Ok(Self::DropEdges),
            _ => Err(ConfigError::InvalidOption {
                option: "generic_words",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NormalizeOptions {
    #[serde(default)]
    pub placement: TagPlacement,
    #[serde(default)]
    pub case: CaseMode,
    #[serde(default)]
    pub generic_words: GenericWordPolicy,
}

impl NormalizeOptions {
    /// Build options from their textual forms (CLI flags, config files)
    pub fn parse(placement: &str, case: &str, generic_words: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            placement: placement.parse()?,
            case: case.parse()?,
            generic_words: generic_words.parse()?,
        })
    }
}

// Built-in tables are constants; a failure here is caught by the rules tests
static DEFAULT_RULES: Lazy<Arc<CompiledRules>> = Lazy::new(|| {
    Arc::new(
        CompiledRules::compile(&NameRules::default(), normalize_characters)
            .expect("built-in name rules must compile"),
    )
});

static EMPTY_BRACKETS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\s*\)").unwrap());
static DASH_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").unwrap());

/// Unify lookalike dashes and spaces, turn decorative quotes into spaces, collapse whitespace
pub fn normalize_characters(value: &str) -> String {
    let mapped: String = value
        .chars()
        .filter_map(|c| match c {
            '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{FE58}' | '\u{FE63}' | '\u{FF0D}' => {
                Some('-')
            }
            '\u{00AD}' | '\u{200B}' | '\u{FEFF}' => None,
            '"' | '\'' | '`' | '\u{00AB}' | '\u{00BB}' | '\u{2018}'..='\u{201F}' | '\u{2039}'
            | '\u{203A}' => Some(' '),
            c if c.is_whitespace() => Some(' '),
            c => Some(c),
        })
        .collect();
    collapse_whitespace(&mapped)
}

/// Normalize one name with the built-in rules
pub fn normalize_name(value: Option<&str>, options: NormalizeOptions) -> Option<String> {
    NameNormalizer::new(options).normalize(value)
}

/// Name split into tags and core text, before joining
struct Assembled {
    before: Vec<String>,
    core: String,
    after: Vec<String>,
}

#[derive(Clone)]
pub struct NameNormalizer {
    rules: Arc<CompiledRules>,
    options: NormalizeOptions,
}

impl NameNormalizer {
    pub fn new(options: NormalizeOptions) -> Self {
        Self {
            rules: Arc::clone(&DEFAULT_RULES),
            options,
        }
    }

    /// Use a custom rule set instead of the built-in one
    pub fn with_rules(options: NormalizeOptions, rules: &NameRules) -> Result<Self, ConfigError> {
        Ok(Self {
            rules: Arc::new(CompiledRules::compile(rules, normalize_characters)?),
            options,
        })
    }

    pub fn options(&self) -> NormalizeOptions {
        self.options
    }

    /// Normalize a possibly absent value; blank input stays absent
    pub fn normalize(&self, value: Option<&str>) -> Option<String> {
        value.and_then(|v| self.normalize_str(v))
    }

    pub fn normalize_str(&self, value: &str) -> Option<String> {
        // 1. characters
        let text = normalize_characters(value);
        if text.is_empty() {
            return None;
        }

        // 2. aliases
        let text = self.substitute_aliases(&text);

        // 3. legal-form phrases
        let text = self.abbreviate_legal_forms(&text);

        // 4. well-known entities carry their own display name and tags
        let (core, ranks) = self.split_tags(&text);
        let (core, tags, protected) = match self.match_special(&core) {
            Some((name, tags)) => (name, tags, true),
            // 5. tags in canonical order
            None => (core, self.ordered_tags(ranks), false),
        };

        // 6. reassembly
        let mut assembled = self.assemble(core, tags);

        // 7. generic words at the edges
        if !protected && self.options.generic_words == GenericWordPolicy::DropEdges {
            assembled.core = self.strip_generic_edges(&assembled.core);
        }

        // 8. squeeze
        squeeze(&assembled)
    }

    pub fn normalize_many<'a, I>(&self, values: I) -> Vec<Option<String>>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        values.into_iter().map(|v| self.normalize(v)).collect()
    }

    /// Normalize a keyed column, keeping keys and absent entries
    pub fn normalize_column<K: Ord + Clone>(
        &self,
        column: &BTreeMap<K, Option<String>>,
    ) -> BTreeMap<K, Option<String>> {
        column
            .iter()
            .map(|(key, value)| (key.clone(), self.normalize(value.as_deref())))
            .collect()
    }

    fn substitute_aliases(&self, text: &str) -> String {
        let Some(pattern) = &self.rules.alias_pattern else {
            return text.to_string();
        };
        pattern
            .replace_all(text, |caps: &regex::Captures| {
                let matched = &caps[0];
                self.rules
                    .alias_targets
                    .get(&matched.to_lowercase())
                    .cloned()
                    .unwrap_or_else(|| matched.to_string())
            })
            .into_owned()
    }

    fn abbreviate_legal_forms(&self, text: &str) -> String {
        self.rules
            .legal_forms
            .iter()
            .fold(text.to_string(), |acc, rule| {
                rule.pattern
                    .replace_all(&acc, rule.abbreviation.as_str())
                    .into_owned()
            })
    }

    /// Remove tag tokens; returns the remaining text and the rank of every tag seen
    fn split_tags(&self, text: &str) -> (String, Vec<usize>) {
        let mut kept = Vec::new();
        let mut ranks = Vec::new();
        for token in text.split(' ') {
            let bare = token.trim_matches(|c: char| matches!(c, '(' | ')' | ',' | ';'));
            match self.rules.tag_rank(bare) {
                Some(rank) => ranks.push(rank),
                None => kept.push(token),
            }
        }
        let core = kept
            .join(" ")
            .trim_matches(|c: char| matches!(c, ',' | ';' | ' '))
            .to_string();
        (core, ranks)
    }

    fn ordered_tags(&self, mut ranks: Vec<usize>) -> Vec<String> {
        ranks.sort_unstable();
        ranks.dedup();
        ranks
            .into_iter()
            .map(|rank| self.rules.tag_priority[rank].clone())
            .collect()
    }

    fn match_special(&self, core: &str) -> Option<(String, Vec<String>)> {
        let squeezed = collapse_whitespace(&EMPTY_BRACKETS.replace_all(core, " "));
        let mut candidates = vec![squeezed];
        if self.options.generic_words == GenericWordPolicy::DropEdges {
            candidates.push(self.strip_generic_edges(&candidates[0]));
        }

        self.rules.specials.iter().find_map(|special| {
            candidates
                .iter()
                .any(|c| special.pattern.is_match(c))
                .then(|| (special.name.clone(), special.tags.clone()))
        })
    }

    fn assemble(&self, core: String, tags: Vec<String>) -> Assembled {
        // A name made only of tags keeps them as its text
        let (core, tags) = if core.trim().is_empty() {
            (tags.join(" "), Vec::new())
        } else {
            (core, tags)
        };

        let core = match self.options.case {
            CaseMode::Upper => core.to_uppercase(),
            CaseMode::Preserve => core,
        };

        match self.options.placement {
            TagPlacement::Left => Assembled {
                before: tags,
                core,
                after: Vec::new(),
            },
            TagPlacement::Right => Assembled {
                before: Vec::new(),
                core,
                after: tags,
            },
            TagPlacement::Omit => Assembled {
                before: Vec::new(),
                core,
                after: Vec::new(),
            },
        }
    }

    /// Drop standalone generic words at either edge, never the last word
    fn strip_generic_edges(&self, core: &str) -> String {
        let mut tokens: Vec<&str> = core.split_whitespace().collect();
        while tokens.len() > 1 && self.rules.is_generic_word(tokens[0]) {
            tokens.remove(0);
        }
        while tokens.len() > 1 && self.rules.is_generic_word(tokens[tokens.len() - 1]) {
            tokens.pop();
        }
        tokens.join(" ")
    }
}

fn squeeze(assembled: &Assembled) -> Option<String> {
    let joined = assembled
        .before
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(assembled.core.as_str()))
        .chain(assembled.after.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");

    let text = EMPTY_BRACKETS.replace_all(&joined, " ");
    let text = DASH_RUNS.replace_all(&text, "-");
    let text = collapse_whitespace(&text);
    let text = text.trim_matches(|c: char| c == '-' || c == ' ');

    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
