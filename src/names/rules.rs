//! Curated rule tables for the bank name normalizer
//!
//! The tables are plain data (`NameRules`) so a caller can load a replacement set
//! from JSON; `CompiledRules` holds the regexes built from them.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::ConfigError;

/// Known-name fixes, applied longest alias first
const ALIASES: &[(&str, &str)] = &[
    ("Банк Тинькофф", "Т-Банк"),
    ("Тинькофф Банк", "Т-Банк"),
    ("Тинькофф", "Т-Банк"),
    ("Банк ФК Открытие", "Открытие"),
    ("ФК Открытие", "Открытие"),
    ("Банк Открытие", "Открытие"),
    ("Хоум Кредит энд Финанс Банк", "Хоум Банк"),
    ("Хоум Кредит Банк", "Хоум Банк"),
    ("Хоум Кредит", "Хоум Банк"),
    ("Московский кредитный банк", "МКБ"),
    ("Промсвязьбанк", "ПСБ"),
    ("Райффайзен Банк", "Райффайзенбанк"),
    ("Уральский банк реконструкции и развития", "УБРиР"),
    ("Всероссийский банк развития регионов", "ВБРР"),
];

/// Legal-form phrases and the abbreviation each one collapses to
const LEGAL_FORMS: &[(&str, &str)] = &[
    ("Публичное акционерное общество", "ПАО"),
    ("Непубличное акционерное общество", "НАО"),
    ("Открытое акционерное общество", "ОАО"),
    ("Закрытое акционерное общество", "ЗАО"),
    ("Акционерное общество", "АО"),
    ("Общество с ограниченной ответственностью", "ООО"),
    ("Акционерный коммерческий банк", "АКБ"),
    ("Коммерческий банк", "КБ"),
    ("Небанковская кредитная организация", "НКО"),
    ("Public Joint Stock Company", "PJSC"),
    ("Joint Stock Company", "JSC"),
    ("Limited Liability Company", "LLC"),
];

/// Canonical tag order used when reassembling a name
const TAG_PRIORITY: &[&str] = &[
    "ПАО", "НАО", "ОАО", "ЗАО", "АО", "ООО", "АКБ", "КБ", "НКО", "PJSC", "JSC", "LLC",
];

const GENERIC_WORDS: &[&str] = &["Банк", "Bank"];

/// Well-known entities: (pattern over the tag-free name, display name, tags)
const SPECIAL_NAMES: &[(&str, &str, &[&str])] = &[
    (r"Сбербанк(\s+России)?|Sberbank(\s+of\s+Russia)?", "Сбербанк", &["ПАО"]),
    (r"(Банк\s+)?ВТБ", "ВТБ", &["ПАО"]),
    (r"Газпромбанк|Банк\s+ГПБ", "Газпромбанк", &["АО"]),
    (
        r"Россельхозбанк|Российский\s+сельскохозяйственный\s+банк",
        "Россельхозбанк",
        &["АО"],
    ),
    (r"Альфа\s*-?\s*Банк", "Альфа-Банк", &["АО"]),
    (
        r"Центральный\s+банк\s+Российской\s+Федерации|Банк\s+России|ЦБ\s+РФ",
        "Банк России",
        &[],
    ),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialName {
    pub pattern: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Rule tables driving `NameNormalizer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameRules {
    #[serde(default)]
    pub aliases: Vec<(String, String)>,
    #[serde(default)]
    pub legal_forms: Vec<(String, String)>,
    #[serde(default)]
    pub special_names: Vec<SpecialName>,
    #[serde(default)]
    pub tag_priority: Vec<String>,
    #[serde(default)]
    pub generic_words: Vec<String>,
}

impl Default for NameRules {
    fn default() -> Self {
        Self {
            aliases: owned_pairs(ALIASES),
            legal_forms: owned_pairs(LEGAL_FORMS),
            special_names: SPECIAL_NAMES
                .iter()
                .map(|(pattern, name, tags)| SpecialName {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                    tags: tags.iter().map(|t| t.to_string()).collect(),
                })
                .collect(),
            tag_priority: TAG_PRIORITY.iter().map(|t| t.to_string()).collect(),
            generic_words: GENERIC_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

fn owned_pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

pub(crate) struct LegalFormRule {
    pub(crate) pattern: Regex,
    pub(crate) abbreviation: String,
}

pub(crate) struct CompiledSpecial {
    pub(crate) pattern: Regex,
    pub(crate) name: String,
    pub(crate) tags: Vec<String>,
}

pub(crate) struct CompiledRules {
    /// Alternation of all aliases, longest first; `None` when there are no aliases
    pub(crate) alias_pattern: Option<Regex>,
    /// Lowercased alias → replacement
    pub(crate) alias_targets: HashMap<String, String>,
    pub(crate) legal_forms: Vec<LegalFormRule>,
    pub(crate) specials: Vec<CompiledSpecial>,
    pub(crate) tag_priority: Vec<String>,
    pub(crate) generic_words: Vec<String>,
}

impl CompiledRules {
    pub(crate) fn compile(
        rules: &NameRules,
        prepare: impl Fn(&str) -> String,
    ) -> Result<Self, ConfigError> {
        let mut aliases: Vec<(String, String)> = rules
            .aliases
            .iter()
            .map(|(alias, target)| (prepare(alias), target.clone()))
            .filter(|(alias, _)| !alias.is_empty())
            .collect();
        // Longest alias first so the alternation prefers "A B" over "A"
        aliases.sort_by(|a, b| {
            b.0.chars()
                .count()
                .cmp(&a.0.chars().count())
                .then_with(|| a.0.cmp(&b.0))
        });

        let alias_pattern = if aliases.is_empty() {
            None
        } else {
            let alternation = aliases
                .iter()
                .map(|(alias, _)| regex::escape(alias))
                .collect::<Vec<_>>()
                .join("|");
            Some(case_insensitive(&format!(r"\b(?:{alternation})\b"), "aliases")?)
        };
        let alias_targets = aliases
            .into_iter()
            .map(|(alias, target)| (alias.to_lowercase(), target))
            .collect();

        let mut legal_forms = rules.legal_forms.clone();
        // Longest abbreviation first, then longest phrase
        legal_forms.sort_by(|a, b| {
            b.1.chars()
                .count()
                .cmp(&a.1.chars().count())
                .then_with(|| b.0.chars().count().cmp(&a.0.chars().count()))
        });
        let legal_forms = legal_forms
            .iter()
            .map(|(phrase, abbreviation)| {
                let words = prepare(phrase)
                    .split([' ', '-'])
                    .filter(|w| !w.is_empty())
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"[\s-]+");
                Ok(LegalFormRule {
                    pattern: case_insensitive(&format!(r"\b{words}\b"), "legal_forms")?,
                    abbreviation: abbreviation.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let specials = rules
            .special_names
            .iter()
            .map(|special| {
                Ok(CompiledSpecial {
                    pattern: case_insensitive(&format!("^(?:{})$", special.pattern), "special_names")?,
                    name: special.name.clone(),
                    tags: special.tags.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            alias_pattern,
            alias_targets,
            legal_forms,
            specials,
            tag_priority: rules.tag_priority.iter().map(|t| t.to_uppercase()).collect(),
            generic_words: rules.generic_words.iter().map(|w| w.to_lowercase()).collect(),
        })
    }

    /// Position of a token in the canonical tag order, if it is a tag
    pub(crate) fn tag_rank(&self, token: &str) -> Option<usize> {
        let upper = token.to_uppercase();
        self.tag_priority.iter().position(|tag| *tag == upper)
    }

    pub(crate) fn is_generic_word(&self, token: &str) -> bool {
        let lower = token.to_lowercase();
        self.generic_words.iter().any(|w| *w == lower)
    }
}

fn case_insensitive(pattern: &str, table: &'static str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ConfigError::InvalidOption {
            option: table,
            value: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_compile() {
        let compiled = CompiledRules::compile(&NameRules::default(), |s| s.to_string()).unwrap();
        assert!(compiled.alias_pattern.is_some());
        assert_eq!(compiled.legal_forms.len(), LEGAL_FORMS.len());
        assert_eq!(compiled.specials.len(), SPECIAL_NAMES.len());
    }

    #[test]
    fn test_legal_forms_ordered_by_result_then_pattern_length() {
        let compiled = CompiledRules::compile(&NameRules::default(), |s| s.to_string()).unwrap();
        let order: Vec<&str> = compiled
            .legal_forms
            .iter()
            .map(|rule| rule.abbreviation.as_str())
            .collect();

        assert_eq!(order[0], "PJSC");
        let pao = order.iter().position(|a| *a == "ПАО").unwrap();
        let ao = order.iter().position(|a| *a == "АО").unwrap();
        let akb = order.iter().position(|a| *a == "АКБ").unwrap();
        let kb = order.iter().position(|a| *a == "КБ").unwrap();
        assert!(pao < ao);
        assert!(akb < kb);
    }

    #[test]
    fn test_tag_rank_is_case_insensitive() {
        let compiled = CompiledRules::compile(&NameRules::default(), |s| s.to_string()).unwrap();
        assert_eq!(compiled.tag_rank("пао"), Some(0));
        assert_eq!(compiled.tag_rank("ООО"), Some(5));
        assert_eq!(compiled.tag_rank("Банк"), None);
    }

    #[test]
    fn test_invalid_special_pattern_is_config_error() {
        let rules = NameRules {
            special_names: vec![SpecialName {
                pattern: "(unclosed".to_string(),
                name: "X".to_string(),
                tags: vec![],
            }],
            ..NameRules::default()
        };
        let result = CompiledRules::compile(&rules, |s| s.to_string());
        assert!(matches!(
            result,
            Err(ConfigError::InvalidOption { option: "special_names", .. })
        ));
    }
}
