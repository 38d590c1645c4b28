// Name normalizer behaviour through the public API

use cbr_stats::names::{
    normalize_name, CaseMode, GenericWordPolicy, NameNormalizer, NameRules, NormalizeOptions,
    TagPlacement,
};

const SAMPLE_NAMES: &[&str] = &[
    "Публичное акционерное общество «Сбербанк России»",
    "Банк ВТБ (публичное акционерное общество)",
    "АО «Тинькофф Банк»",
    "Акционерный коммерческий банк «Авангард» (публичное акционерное общество)",
    "ООО «Хоум Кредит энд Финанс Банк»",
    "Общество с ограниченной ответственностью Коммерческий банк «Кольцо Урала»",
    "Банк «Левобережный» (ПАО)",
    "Экспо\u{2013}Банк",
    "АО",
    "Центральный банк Российской Федерации",
];

fn upper_left() -> NormalizeOptions {
    NormalizeOptions {
        placement: TagPlacement::Left,
        case: CaseMode::Upper,
        generic_words: GenericWordPolicy::Keep,
    }
}

#[test]
fn test_blank_or_absent_is_none() {
    for options in [NormalizeOptions::default(), upper_left()] {
        assert_eq!(normalize_name(None, options), None);
        assert_eq!(normalize_name(Some(""), options), None);
        assert_eq!(normalize_name(Some("   \t "), options), None);
    }
}

#[test]
fn test_idempotent_upper_left() {
    let normalizer = NameNormalizer::new(upper_left());
    for name in SAMPLE_NAMES {
        let once = normalizer.normalize_str(name).unwrap();
        let twice = normalizer.normalize_str(&once).unwrap();
        assert_eq!(once, twice, "not idempotent for {name}");
    }
}

#[test]
fn test_idempotent_with_generic_edges() {
    let normalizer = NameNormalizer::new(NormalizeOptions {
        placement: TagPlacement::Left,
        case: CaseMode::Upper,
        generic_words: GenericWordPolicy::DropEdges,
    });
    for name in SAMPLE_NAMES {
        let once = normalizer.normalize_str(name).unwrap();
        assert_eq!(normalizer.normalize_str(&once).unwrap(), once, "input {name}");
    }
}

#[test]
fn test_longest_alias_wins() {
    let rules = NameRules {
        aliases: vec![
            ("Альфа".to_string(), "Первый".to_string()),
            ("Альфа Бета".to_string(), "Второй".to_string()),
        ],
        legal_forms: Vec::new(),
        special_names: Vec::new(),
        tag_priority: Vec::new(),
        generic_words: Vec::new(),
    };
    let normalizer = NameNormalizer::with_rules(NormalizeOptions::default(), &rules).unwrap();

    assert_eq!(normalizer.normalize_str("Альфа Бета Гамма"), Some("Второй Гамма".to_string()));
    assert_eq!(normalizer.normalize_str("Альфа Гамма"), Some("Первый Гамма".to_string()));
}

#[test]
fn test_tags_only_name_is_kept() {
    assert_eq!(
        normalize_name(Some("АО"), NormalizeOptions::default()),
        Some("АО".to_string())
    );
}

#[test]
fn test_invalid_custom_rule_is_rejected() {
    let rules = NameRules {
        aliases: Vec::new(),
        legal_forms: Vec::new(),
        special_names: vec![cbr_stats::names::SpecialName {
            pattern: "(unclosed".to_string(),
            name: "X".to_string(),
            tags: Vec::new(),
        }],
        tag_priority: Vec::new(),
        generic_words: Vec::new(),
    };
    assert!(NameNormalizer::with_rules(NormalizeOptions::default(), &rules).is_err());
}

#[test]
fn test_quotes_without_spaces_separate_tokens() {
    let normalizer = NameNormalizer::new(upper_left());

    assert_eq!(
        normalizer.normalize(Some("ПАО«Сбербанк»")),
        Some("ПАО СБЕРБАНК".to_string())
    );
    assert_eq!(
        normalizer.normalize(Some("АО\"Банк\"Хлынов")),
        Some("АО БАНК ХЛЫНОВ".to_string())
    );
}

#[test]
fn test_aliases_match_whole_words_only() {
    let normalizer = NameNormalizer::new(upper_left());

    assert_eq!(
        normalizer.normalize(Some("Хоум Кредит Банк")),
        Some("ХОУМ БАНК".to_string())
    );
    assert_eq!(
        normalizer.normalize(Some("Банк «Тинькофф»")),
        Some("Т-БАНК".to_string())
    );
    assert_eq!(
        normalizer.normalize(Some("Хоум Кредитование")),
        Some("ХОУМ КРЕДИТОВАНИЕ".to_string())
    );
}
