//! Injection signature rules
//!
//! Rules are tried in order and the first match wins, so each inspected
//! string yields at most one hit.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default cap on sample length, in characters
pub const DEFAULT_SAMPLE_MAX_LEN: usize = 200;

/// Appended to samples cut at the cap
pub const TRUNCATION_MARKER: &str = "…(truncated)";

/// A single named signature
#[derive(Debug, Clone)]
pub struct SignatureRule {
    pub id: &'static str,
    pub description: &'static str,
    pub pattern: Regex,
}

impl SignatureRule {
    pub fn new(id: &'static str, description: &'static str, pattern: Regex) -> Self {
        Self {
            id,
            description,
            pattern,
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        self.pattern.is_match(value)
    }
}

/// A matched string, reported with the id of the first rule it hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureHit {
    pub pattern: String,
    pub sample: String,
}

static DEFAULT_RULES: LazyLock<Vec<SignatureRule>> = LazyLock::new(|| {
    vec![
        // `OR 1=1`, `and '2'='2'`
        SignatureRule::new(
            "sql_tautology",
            "boolean tautology condition",
            Regex::new(r#"(?i)\b(?:or|and)\b\s+['"]?\d+['"]?\s*=\s*['"]?\d+['"]?"#).unwrap(),
        ),
        SignatureRule::new(
            "sql_comment",
            "comment delimiter truncating the query",
            Regex::new(r"--|/\*|\*/").unwrap(),
        ),
        SignatureRule::new(
            "sql_stacked_statement",
            "statement chained into DDL/DML",
            Regex::new(r"(?i);\s*(?:drop|alter|create|truncate|insert|update|delete)\b").unwrap(),
        ),
        SignatureRule::new(
            "sql_union_select",
            "UNION SELECT exfiltration",
            Regex::new(r"(?i)\bunion\b\s+\bselect\b").unwrap(),
        ),
    ]
});

/// Built-in rules, in matching order
pub fn default_rules() -> Vec<SignatureRule> {
    DEFAULT_RULES.clone()
}

/// Cut `value` to `max_len` characters, appending [`TRUNCATION_MARKER`] when cut
pub fn truncate_sample(value: &str, max_len: usize) -> String {
    match value.char_indices().nth(max_len) {
        Some((idx, _)) => {
            let mut sample = String::with_capacity(idx + TRUNCATION_MARKER.len());
            sample.push_str(&value[..idx]);
            sample.push_str(TRUNCATION_MARKER);
            sample
        }
        None => value.to_string(),
    }
}

/// Ordered first-match scanner over a rule list
#[derive(Debug, Clone)]
pub struct SignatureMatcher {
    rules: Vec<SignatureRule>,
    sample_max_len: usize,
}

impl Default for SignatureMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_MAX_LEN)
    }
}

impl SignatureMatcher {
    pub fn new(sample_max_len: usize) -> Self {
        Self::with_rules(default_rules(), sample_max_len)
    }

    pub fn with_rules(rules: Vec<SignatureRule>, sample_max_len: usize) -> Self {
        Self {
            rules,
            sample_max_len,
        }
    }

    pub fn rules(&self) -> &[SignatureRule] {
        &self.rules
    }

    /// Test `value` against the rules in order; at most one hit
    pub fn scan(&self, value: &str) -> Option<SignatureHit> {
        if value.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .find(|rule| rule.matches(value))
            .map(|rule| SignatureHit {
                pattern: rule.id.to_string(),
                sample: truncate_sample(value, self.sample_max_len),
            })
    }

    /// Scan every value, preserving input order
    pub fn scan_all<I, S>(&self, values: I) -> Vec<SignatureHit>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        values
            .into_iter()
            .filter_map(|v| self.scan(v.as_ref()))
            .collect()
    }
}
