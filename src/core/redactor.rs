use std::collections::HashSet;

use serde_json::Value;

/// Key names whose whole value subtree is never inspected (compared lowercased)
pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "password",
    "pass",
    "pwd",
    "token",
    "access_token",
    "refresh_token",
    "authorization",
    "cookie",
    "sid",
    "session",
];

/// Nesting depth past which subtrees contribute nothing; matches the
/// recursion limit `serde_json` enforces when parsing
pub const MAX_DEPTH: usize = 128;

/// Case-insensitive set of sensitive key names
#[derive(Debug, Clone)]
pub struct SensitiveKeys {
    keys: HashSet<String>,
}

impl Default for SensitiveKeys {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_KEYS.iter().copied())
    }
}

impl SensitiveKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Default keys plus `extra`
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = Self::default();
        keys.keys
            .extend(extra.into_iter().map(|k| k.as_ref().to_lowercase()));
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(&key.to_lowercase())
    }
}

/// Flatten `value` into its string leaves, skipping every subtree rooted at a
/// sensitive key.
///
/// Arrays are walked element-wise, non-string scalars are ignored.
pub fn flatten_redacted(value: &Value, sensitive: &SensitiveKeys) -> Vec<String> {
    let mut out = Vec::new();
    collect(value, Some(sensitive), 0, &mut out);
    out
}

/// Flatten `value` into its string leaves without redaction
pub fn flatten_all(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect(value, None, 0, &mut out);
    out
}

fn collect(value: &Value, sensitive: Option<&SensitiveKeys>, depth: usize, out: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                collect(item, sensitive, depth + 1, out);
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                if sensitive.is_some_and(|keys| keys.contains(key)) {
                    continue;
                }
                collect(child, sensitive, depth + 1, out);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}
