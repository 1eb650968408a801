//! Pure, stateless helpers over rule lists: selection of related rules,
//! array-of-object escalation checking, wildcard expansion, presence
//! pruning, dependency extraction and rule normalization.
//!
//! Nothing here touches a [`crate::Service`]'s runtime state; the resolver
//! in `service.rs` drives these in sequence and folds their results back
//! into the instance.
use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::declaration::Declaration;
use crate::error::EngineError;
use crate::path::strict_ancestors;

lazy_static! {
    static ref DEPENDENCY_RE: Regex = Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").unwrap();
}

const STRUCTURAL_KEYWORDS: &[&str] =
    &["required", "properties", "dependentRequired", "allOf", "anyOf", "oneOf", "if", "then", "else"];

/// Every rule list in `rules` at `key` itself, a wildcard or deeper
/// descendant of `key`, or a strict ancestor of `key`.
pub fn select_related_rule_lists(key: &str, rules: &BTreeMap<String, Vec<Value>>) -> BTreeMap<String, Vec<Value>> {
    let mut out = BTreeMap::new();
    let prefix = format!("{key}.");
    for (candidate, list) in rules {
        if candidate == key || candidate.starts_with(&prefix) {
            out.insert(candidate.clone(), list.clone());
        }
    }
    for ancestor in strict_ancestors(key) {
        if let Some(list) = rules.get(&ancestor) {
            out.insert(ancestor, list.clone());
        }
    }
    out
}

/// True if `rule` declares an object with known properties (the keyword
/// shape an array-of-children loader output must be ruled with before a
/// descendant key of it may carry rules of its own).
pub fn is_array_object_rule(rule: &Value) -> bool {
    rule.get("type").and_then(Value::as_str) == Some("object") || rule.get("properties").is_some()
}

/// True if `key` carries an array-of-object rule anywhere across every
/// rule-list bucket of `declaration` (traits included).
pub fn has_array_object_rule_anywhere(declaration: &Declaration, key: &str) -> bool {
    declaration
        .merged_rule_lists
        .iter()
        .any(|bucket| bucket.rules.get(key).is_some_and(|list| list.iter().any(is_array_object_rule)))
}

/// Raises [`EngineError::ArrayObjectRuleRequired`] if any selected rule key
/// descends through an ancestor segment that is never declared as an
/// array-of-object rule anywhere in `declaration`.
pub fn check_array_object_escalation(
    selected: &BTreeMap<String, Vec<Value>>,
    declaration: &Declaration,
) -> Result<(), EngineError> {
    for key in selected.keys() {
        for ancestor in strict_ancestors(key) {
            if !has_array_object_rule_anywhere(declaration, &ancestor) {
                return Err(EngineError::ArrayObjectRuleRequired {
                    key: ancestor,
                    declaration: declaration.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Repeatedly expands the first `.* .` segment found in any rule key into
/// one concrete key per child of the data reached by walking the segment's
/// prefix, until no wildcard segment remains.
pub fn expand_wildcards(
    mut rule_lists: BTreeMap<String, Vec<Value>>,
    data: &Map<String, Value>,
) -> BTreeMap<String, Vec<Value>> {
    loop {
        let Some(key) = rule_lists.keys().find(|k| k.split('.').any(|seg| seg == "*")).cloned() else {
            break;
        };
        let segments: Vec<&str> = key.split('.').collect();
        let star_index = segments.iter().position(|s| *s == "*").unwrap();
        let prefix = segments[..star_index].join(".");
        let suffix = &segments[star_index + 1..];
        let rule_list = rule_lists.remove(&key).unwrap();

        let children: Vec<String> = match crate::path::scoped_value(data, &prefix) {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            Some(Value::Array(items)) => (0..items.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        };

        for child in children {
            let mut new_segments: Vec<String> = segments[..star_index].iter().map(|s| s.to_string()).collect();
            new_segments.push(child);
            new_segments.extend(suffix.iter().map(|s| s.to_string()));
            rule_lists.entry(new_segments.join(".")).or_default().extend(rule_list.clone());
        }
    }
    rule_lists
}

/// Drops every rule list whose key is absent from `data`, replacing it with
/// its present-related projection when that projection still retains a
/// `required` keyword; drops every strictly deeper rule list unconditionally
/// once an ancestor is absent, since its data cannot be walked either.
pub fn prune_absent(rule_lists: BTreeMap<String, Vec<Value>>, data: &Map<String, Value>) -> BTreeMap<String, Vec<Value>> {
    let mut keys: Vec<String> = rule_lists.keys().cloned().collect();
    keys.sort_by_key(|k| k.matches('.').count());

    let mut out = BTreeMap::new();
    let mut dropped_prefixes: Vec<String> = Vec::new();

    'outer: for key in keys {
        for dropped in &dropped_prefixes {
            if key.starts_with(&format!("{dropped}.")) {
                continue 'outer;
            }
        }
        let rule_list = &rule_lists[&key];
        if crate::path::scoped_value(data, &key).is_some() {
            out.insert(key, rule_list.clone());
        } else {
            dropped_prefixes.push(key.clone());
            let projected: Vec<Value> = rule_list.iter().filter_map(present_related_projection).collect();
            if !projected.is_empty() {
                out.insert(key, projected);
            }
        }
    }
    out
}

/// Projects a rule down to its structural, presence-related keywords
/// (`required`, `properties`, `dependentRequired`, `allOf`/`anyOf`/`oneOf`,
/// `if`/`then`/`else`), returning `None` if the projection retains no
/// `required` keyword anywhere (meaning it can say nothing about presence).
pub fn present_related_projection(rule: &Value) -> Option<Value> {
    let mut has_required = false;
    let projected = project_present_related(rule, &mut has_required);
    has_required.then_some(projected)
}

fn project_present_related(rule: &Value, has_required: &mut bool) -> Value {
    let Value::Object(map) = rule else {
        return Value::Object(Map::new());
    };
    let mut out = Map::new();
    for keyword in STRUCTURAL_KEYWORDS {
        let Some(value) = map.get(*keyword) else { continue };
        let projected = match *keyword {
            "required" => {
                *has_required = true;
                value.clone()
            }
            "properties" => {
                let Value::Object(props) = value else { continue };
                let mut new_props = Map::new();
                for (name, schema) in props {
                    new_props.insert(name.clone(), project_present_related(schema, has_required));
                }
                Value::Object(new_props)
            }
            "allOf" | "anyOf" | "oneOf" => {
                let Value::Array(items) = value else { continue };
                Value::Array(items.iter().map(|item| project_present_related(item, has_required)).collect())
            }
            "then" | "else" => project_present_related(value, has_required),
            _ => value.clone(),
        };
        out.insert((*keyword).to_string(), projected);
    }
    Value::Object(out)
}

/// Every `{{dependency}}` reference found in a string leaf of `rule`.
pub fn extract_rule_dependencies(rule: &Value) -> Vec<String> {
    let mut deps = Vec::new();
    collect_dependencies(rule, &mut deps);
    deps
}

fn collect_dependencies(value: &Value, deps: &mut Vec<String>) {
    match value {
        Value::Object(map) => map.values().for_each(|v| collect_dependencies(v, deps)),
        Value::Array(items) => items.iter().for_each(|v| collect_dependencies(v, deps)),
        Value::String(s) => {
            for caps in DEPENDENCY_RE.captures_iter(s) {
                deps.push(caps[1].trim().to_string());
            }
        }
        _ => {}
    }
}

/// Strips the `{{...}}` wrapper from every string leaf of `rule`, so the
/// external validator sees the literal dependency key rather than the
/// template syntax.
pub fn normalize_rule(rule: &Value) -> Value {
    match rule {
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), normalize_rule(v))).collect()),
        Value::Array(items) => Value::Array(items.iter().map(normalize_rule).collect()),
        Value::String(s) => Value::String(DEPENDENCY_RE.replace_all(s, "$1").to_string()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wildcard_expands_over_object_children() {
        let mut rules = BTreeMap::new();
        rules.insert("items.*.name".to_string(), vec![json!({"type": "string"})]);
        let data = json!({"items": {"a": {}, "b": {}}}).as_object().unwrap().clone();
        let expanded = expand_wildcards(rules, &data);
        assert!(expanded.contains_key("items.a.name"));
        assert!(expanded.contains_key("items.b.name"));
    }

    #[test]
    fn presence_projection_keeps_required_only() {
        let rule = json!({"type": "object", "required": ["x"], "minProperties": 2});
        let projected = present_related_projection(&rule).unwrap();
        assert_eq!(projected, json!({"required": ["x"]}));
    }

    #[test]
    fn presence_projection_drops_rules_with_no_required() {
        let rule = json!({"type": "string", "minLength": 2});
        assert!(present_related_projection(&rule).is_none());
    }

    #[test]
    fn dependency_extraction_and_normalization_round_trip() {
        let rule = json!({"required": ["{{result.count}}"]});
        assert_eq!(extract_rule_dependencies(&rule), vec!["result.count".to_string()]);
        assert_eq!(normalize_rule(&rule), json!({"required": ["result.count"]}));
    }

    #[test]
    fn prune_absent_drops_descendants_of_missing_ancestor() {
        let mut rules = BTreeMap::new();
        rules.insert("a".to_string(), vec![json!({"required": ["x"]})]);
        rules.insert("a.b".to_string(), vec![json!({"type": "string"})]);
        let data = Map::new();
        let pruned = prune_absent(rules, &data);
        assert!(pruned.contains_key("a"));
        assert!(!pruned.contains_key("a.b"));
    }
}
