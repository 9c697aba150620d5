//! Property strings of the form `key=value:key2=value2`.
//!
//! A colon inside a value is written as `__COLONESCAPE__:`. When parsing, the
//! legacy escapes `[]:`, `[@]:` and `\:` are accepted as well.

use crate::config::types::{EvalError, Result};
use std::collections::BTreeMap;
use std::fmt;

pub const COLON_ESCAPE: &str = "__COLONESCAPE__";

const SEPARATOR_ESCAPES: [&str; 4] = [COLON_ESCAPE, "[@]", "[]", "\\"];

/// Ordered key/value properties
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a property string; an empty string yields empty properties
    pub fn parse(text: &str) -> Result<Self> {
        let mut props = Self::new();
        props.merge_str(text)?;
        Ok(props)
    }

    /// Parse `text` and overlay its entries on top of the existing ones
    pub fn merge_str(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }

        for item in split_unescaped(text) {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| EvalError::Config(format!("Invalid property '{}'", item)))?;
            self.entries
                .insert(key.trim().to_string(), unescape_value(value));
        }
        Ok(())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{}={}", key, escape_value(value))?;
        }
        Ok(())
    }
}

pub fn escape_value(value: &str) -> String {
    value.replace(':', &format!("{}:", COLON_ESCAPE))
}

pub fn unescape_value(value: &str) -> String {
    value
        .replace("[@]:", ":")
        .replace("\\:", ":")
        .replace("[]:", ":")
        .replace(&format!("{}:", COLON_ESCAPE), ":")
}

/// Split on colons that are not preceded by one of the escape markers
fn split_unescaped(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        if ch != ':' {
            continue;
        }
        let before = &text[start..idx];
        if SEPARATOR_ESCAPES.iter().any(|esc| before.ends_with(esc)) {
            continue;
        }
        parts.push(before);
        start = idx + 1;
    }
    parts.push(&text[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_pairs() {
        let props = Properties::parse("type=dummy:size=20").unwrap();
        assert_eq!(props.get("type"), Some("dummy"));
        assert_eq!(props.get("size"), Some("20"));
        assert_eq!(props.get("missing"), None);
    }

    #[test]
    fn test_escaped_colons_stay_in_value() {
        let props =
            Properties::parse("train=C__COLONESCAPE__:/data/a.csv:test=x[]:y:z=a\\:b").unwrap();
        assert_eq!(props.get("train"), Some("C:/data/a.csv"));
        assert_eq!(props.get("test"), Some("x:y"));
        assert_eq!(props.get("z"), Some("a:b"));
    }

    #[test]
    fn test_missing_equals_is_rejected() {
        let err = Properties::parse("type=dummy:oops").unwrap_err();
        assert!(err.to_string().contains("oops"));
    }

    #[test]
    fn test_display_escapes_values() {
        let mut props = Properties::new();
        props.set("datasetString", "type=dummy:size=5");
        props.set("resultMetric", "errorRate");
        let text = props.to_string();
        assert_eq!(
            text,
            "datasetString=type=dummy__COLONESCAPE__:size=5:resultMetric=errorRate"
        );

        let reparsed = Properties::parse(&text).unwrap();
        assert_eq!(reparsed.get("datasetString"), Some("type=dummy:size=5"));
    }

    #[test]
    fn test_empty_string_is_empty_properties() {
        assert!(Properties::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_merge_overrides() {
        let mut props = Properties::parse("a=1:b=2").unwrap();
        props.merge_str("b=3").unwrap();
        assert_eq!(props.get("a"), Some("1"));
        assert_eq!(props.get("b"), Some("3"));
        assert!(!props.get_bool("c"));
    }
}
