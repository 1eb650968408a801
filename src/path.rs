//! Dotted-key helpers shared by the resolver, the rule engine and the name resolver.
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    /// A top-level key: an input, a loader, a bind-name or the main segment
    /// of a dotted rule/callback key.
    pub static ref TOP_LEVEL_KEY_RE: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap();
    /// A callback key: `mainKey__suffix`, optionally `@defer`.
    pub static ref CALLBACK_KEY_RE: Regex =
        Regex::new(r"^[A-Za-z][A-Za-z0-9_]*__[A-Za-z0-9_-]+(@defer)?$").unwrap();
}

/// The first, top-level segment of a dotted key.
pub fn main_key(key: &str) -> &str {
    key.split('.').next().unwrap_or(key)
}

/// The strict, proper ancestors of a dotted key, shortest first.
///
/// `strict_ancestors("a.b.c")` is `["a", "a.b"]`; `strict_ancestors("a")` is empty.
pub fn strict_ancestors(key: &str) -> Vec<String> {
    let segments: Vec<&str> = key.split('.').collect();
    (1..segments.len()).map(|end| segments[..end].join(".")).collect()
}

/// Walks `data` through the dotted segments of `key`, indexing into objects
/// by property name and into arrays by a numeric segment.
pub fn scoped_value<'a>(data: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut segments = key.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ancestors_are_proper_prefixes() {
        assert_eq!(strict_ancestors("a.b.c"), vec!["a".to_string(), "a.b".to_string()]);
        assert!(strict_ancestors("a").is_empty());
    }

    #[test]
    fn scoped_value_walks_objects_and_arrays() {
        let data = json!({"a": {"b": [1, 2, {"c": 3}]}}).as_object().unwrap().clone();
        assert_eq!(scoped_value(&data, "a.b.2.c"), Some(&json!(3)));
        assert_eq!(scoped_value(&data, "a.b.9"), None);
        assert_eq!(scoped_value(&data, "missing"), None);
    }
}
