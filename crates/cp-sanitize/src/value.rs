//! Sanitization over parsed JSON trees.
//!
//! Only string leaves are touched; keys, numbers, and structure pass
//! through. Runs strictly after a successful parse so partial JSON
//! tokens are never corrupted.

use crate::control::sanitize_text;
use serde_json::Value;

/// Counters describing what a sanitization pass removed.
///
/// `fields_modified` feeds the sanitization-loss metric in status
/// documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeStats {
    /// Number of string leaves that were modified.
    pub fields_modified: usize,

    /// Total characters removed across all leaves.
    pub chars_removed: usize,
}

impl SanitizeStats {
    /// True when the pass changed nothing.
    pub fn is_clean(&self) -> bool {
        self.fields_modified == 0
    }

    /// Fold another pass's counters into this one.
    pub fn merge(&mut self, other: SanitizeStats) {
        self.fields_modified += other.fields_modified;
        self.chars_removed += other.chars_removed;
    }
}

/// Sanitize every string leaf of a parsed JSON value in place.
pub fn sanitize_value(value: &mut Value) -> SanitizeStats {
    let mut stats = SanitizeStats::default();
    walk(value, &mut stats);
    stats
}

fn walk(value: &mut Value, stats: &mut SanitizeStats) {
    match value {
        Value::String(s) => {
            let cleaned = sanitize_text(s);
            if cleaned.len() != s.len() {
                stats.fields_modified += 1;
                stats.chars_removed += s.chars().count() - cleaned.chars().count();
                *s = cleaned.into_owned();
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, stats);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                walk(v, stats);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_value_untouched() {
        let mut value = json!({"input": "ls -la", "n": 3});
        let stats = sanitize_value(&mut value);
        assert!(stats.is_clean());
        assert_eq!(value, json!({"input": "ls -la", "n": 3}));
    }

    #[test]
    fn test_nested_strings_cleaned() {
        let dirty = format!("id{}rm", '\u{0002}');
        let mut value = json!({"a": {"b": [dirty, "ok"]}});
        let stats = sanitize_value(&mut value);
        assert_eq!(stats.fields_modified, 1);
        assert_eq!(stats.chars_removed, 1);
        assert_eq!(value["a"]["b"][0], "idrm");
    }

    #[test]
    fn test_idempotent() {
        let mut value = json!({"x": format!("a{}b", '\u{009c}')});
        sanitize_value(&mut value);
        let second = sanitize_value(&mut value);
        assert!(second.is_clean());
    }

    #[test]
    fn test_non_string_leaves_ignored() {
        let mut value = json!({"n": 1, "b": true, "z": null});
        assert!(sanitize_value(&mut value).is_clean());
    }
}
