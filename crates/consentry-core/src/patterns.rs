//! Category classifier - ordered pattern rules, first match wins.
//!
//! A literal pattern matches when the input equals it or starts with it. A
//! regular-expression pattern matches when it is found anywhere in the input.
//! Regexes that fail to compile degrade to case-insensitive substring
//! containment of the raw pattern text.

use crate::{known_patterns, ConsentCategory};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Source form of a pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternSource {
    /// Exact or prefix match
    Literal(String),
    /// Containment match
    Regex(String),
}

impl PatternSource {
    pub fn text(&self) -> &str {
        match self {
            PatternSource::Literal(s) | PatternSource::Regex(s) => s,
        }
    }
}

/// A classification rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern: PatternSource,
    pub category: ConsentCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PatternRule {
    pub fn literal(pattern: impl Into<String>, category: ConsentCategory) -> Self {
        Self {
            pattern: PatternSource::Literal(pattern.into()),
            category,
            description: None,
        }
    }

    pub fn regex(pattern: impl Into<String>, category: ConsentCategory) -> Self {
        Self {
            pattern: PatternSource::Regex(pattern.into()),
            category,
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A pattern ready for matching
#[derive(Debug, Clone)]
pub enum CompiledPattern {
    Literal(String),
    Regex(Regex),
    /// Lowercased raw text of a regex that did not compile
    Substring(String),
}

impl CompiledPattern {
    pub fn compile(source: &PatternSource) -> Self {
        match source {
            PatternSource::Literal(s) => CompiledPattern::Literal(s.clone()),
            PatternSource::Regex(s) => match Regex::new(s) {
                Ok(re) => CompiledPattern::Regex(re),
                Err(e) => {
                    warn!("Pattern {:?} does not compile, using substring match: {}", s, e);
                    CompiledPattern::Substring(s.to_lowercase())
                }
            },
        }
    }

    pub fn matches(&self, input: &str) -> bool {
        match self {
            CompiledPattern::Literal(p) => input.starts_with(p.as_str()),
            CompiledPattern::Regex(re) => re.is_match(input),
            CompiledPattern::Substring(p) => input.to_lowercase().contains(p.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: PatternRule,
    matcher: CompiledPattern,
}

/// An immutable, ordered rule table
#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    rules: Vec<CompiledRule>,
}

impl PatternTable {
    pub fn new(rules: impl IntoIterator<Item = PatternRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| CompiledRule {
                matcher: CompiledPattern::compile(&rule.pattern),
                rule,
            })
            .collect();
        Self { rules }
    }

    /// Built-in storage key rules followed by `custom`
    pub fn storage(custom: &[PatternRule]) -> Self {
        Self::new(known_patterns::storage_rules().into_iter().chain(custom.iter().cloned()))
    }

    /// Built-in script rules followed by `custom`
    pub fn scripts(custom: &[PatternRule]) -> Self {
        Self::new(known_patterns::script_rules().into_iter().chain(custom.iter().cloned()))
    }

    /// First rule matching `input`
    pub fn classify(&self, input: &str) -> Option<&PatternRule> {
        self.rules
            .iter()
            .find(|r| r.matcher.matches(input))
            .map(|r| &r.rule)
    }

    pub fn rules(&self) -> impl Iterator<Item = &PatternRule> {
        self.rules.iter().map(|r| &r.rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Classify against an ordered table
pub fn classify<'a>(input: &str, table: &'a PatternTable) -> Option<&'a PatternRule> {
    table.classify(input)
}

/// Outcome of classifying a storage key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ConsentCategory,
    pub description: Option<String>,
    /// False when the strictest category was assigned because nothing matched
    pub matched: bool,
}

/// Classify a storage key; unmatched keys get the strictest category
pub fn classify_storage_key(key: &str, table: &PatternTable) -> Classification {
    match table.classify(key) {
        Some(rule) => Classification {
            category: rule.category,
            description: rule.description.clone(),
            matched: true,
        },
        None => Classification {
            category: ConsentCategory::STRICTEST,
            description: None,
            matched: false,
        },
    }
}

/// A set of patterns with no categories (allow-lists)
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<CompiledPattern>,
}

impl PatternSet {
    pub fn new<'a>(sources: impl IntoIterator<Item = &'a PatternSource>) -> Self {
        Self {
            patterns: sources.into_iter().map(CompiledPattern::compile).collect(),
        }
    }

    pub fn push(&mut self, source: &PatternSource) {
        self.patterns.push(CompiledPattern::compile(source));
    }

    pub fn matches_any(&self, input: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PatternTable {
        PatternTable::new(vec![
            PatternRule::literal("_ga", ConsentCategory::Analytics).describe("Google Analytics"),
            PatternRule::regex(r"^_gat?_", ConsentCategory::Marketing),
            PatternRule::literal("theme", ConsentCategory::Preferences),
        ])
    }

    #[test]
    fn test_literal_equality_and_prefix() {
        let t = table();
        assert_eq!(t.classify("_ga").unwrap().category, ConsentCategory::Analytics);
        assert_eq!(t.classify("_ga_XYZ123").unwrap().category, ConsentCategory::Analytics);
        assert!(t.classify("x_ga").is_none());
    }

    #[test]
    fn test_first_match_wins() {
        // "_gat_abc" also matches the regex rule, but the literal comes first
        let t = table();
        assert_eq!(t.classify("_gat_abc").unwrap().category, ConsentCategory::Analytics);
    }

    #[test]
    fn test_regex_containment() {
        let t = PatternTable::new(vec![PatternRule::regex(
            r"googletagmanager\.com",
            ConsentCategory::Analytics,
        )]);
        assert!(t.classify("https://www.googletagmanager.com/gtm.js?id=GTM-1").is_some());
        assert!(t.classify("https://example.com/app.js").is_none());
    }

    #[test]
    fn test_malformed_regex_falls_back_to_substring() {
        let t = PatternTable::new(vec![PatternRule::regex("track(er", ConsentCategory::Marketing)]);
        assert_eq!(
            t.classify("https://cdn.example.com/TRACK(ER.js").unwrap().category,
            ConsentCategory::Marketing
        );
        assert!(t.classify("https://cdn.example.com/tracker.js").is_none());
    }

    #[test]
    fn test_unmatched_storage_key_is_strictest() {
        let c = classify_storage_key("some_unknown_key", &table());
        assert_eq!(c.category, ConsentCategory::Marketing);
        assert!(!c.matched);

        let c = classify_storage_key("_ga", &table());
        assert_eq!(c.category, ConsentCategory::Analytics);
        assert_eq!(c.description.as_deref(), Some("Google Analytics"));
        assert!(c.matched);
    }

    #[test]
    fn test_builtins_take_priority_over_custom() {
        let custom = vec![PatternRule::literal("_ga", ConsentCategory::Preferences)];
        let t = PatternTable::storage(&custom);
        assert_eq!(t.classify("_ga").unwrap().category, ConsentCategory::Analytics);
    }

    #[test]
    fn test_custom_rules_extend_builtins() {
        let custom = vec![PatternRule::literal("my_app_", ConsentCategory::Preferences)];
        let t = PatternTable::storage(&custom);
        assert_eq!(t.classify("my_app_layout").unwrap().category, ConsentCategory::Preferences);
    }

    #[test]
    fn test_pattern_set() {
        let set = PatternSet::new(&[
            PatternSource::Literal("consentry_".into()),
            PatternSource::Regex(r"^debug:".into()),
        ]);
        assert!(set.matches_any("consentry_consent"));
        assert!(set.matches_any("debug:verbose"));
        assert!(!set.matches_any("_ga"));
    }

    #[test]
    fn test_rule_serde_shape() {
        let rule: PatternRule = serde_json::from_str(
            r#"{"pattern":{"regex":"^wp-"},"category":"preferences","description":"WordPress"}"#,
        )
        .unwrap();
        assert_eq!(rule.pattern, PatternSource::Regex("^wp-".into()));
        assert_eq!(rule.category, ConsentCategory::Preferences);
    }
}
