//! The external rule validator: turns a surviving set of rule lists and
//! their scoped instance values into error messages.
//!
//! The default implementation validates each rule against a draft 2020-12
//! JSON Schema the same way the original validated against
//! `jsonschema.Draft202012Validator`; it is abstracted behind
//! [`RuleValidator`] so a test can swap in a stub without a real schema
//! validator.
use std::collections::BTreeMap;

use serde_json::Value;

/// Validates a set of rule lists, keyed by the dotted key they apply to,
/// against the corresponding scoped instance values.
///
/// Returns, for every rule key that produced at least one violation, the
/// de-duplicated, human-facing messages for that key, in the order they
/// were first observed.
pub trait RuleValidator: Send + Sync {
    fn validate(
        &self,
        scoped_values: &BTreeMap<String, Value>,
        rule_lists: &BTreeMap<String, Vec<Value>>,
        names: &BTreeMap<String, String>,
        messages: &BTreeMap<String, String>,
    ) -> BTreeMap<String, Vec<String>>;
}

/// The default [`RuleValidator`]: each rule is an independent draft 2020-12
/// JSON Schema, validated with the `jsonschema` crate.
pub struct JsonSchemaRuleValidator;

impl RuleValidator for JsonSchemaRuleValidator {
    fn validate(
        &self,
        scoped_values: &BTreeMap<String, Value>,
        rule_lists: &BTreeMap<String, Vec<Value>>,
        names: &BTreeMap<String, String>,
        messages: &BTreeMap<String, String>,
    ) -> BTreeMap<String, Vec<String>> {
        let mut violations: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (rule_key, schemas) in rule_lists {
            let instance = scoped_values.get(rule_key).cloned().unwrap_or(Value::Null);
            for schema in schemas {
                let Ok(validator) = jsonschema::validator_for(schema) else { continue };
                if let Err(errors) = validator.validate(&instance) {
                    for error in errors {
                        let message = render_message(rule_key, &error, names, messages);
                        let bucket = violations.entry(rule_key.clone()).or_default();
                        if !bucket.contains(&message) {
                            bucket.push(message);
                        }
                    }
                }
            }
        }

        violations
    }
}

fn render_message(
    rule_key: &str,
    error: &jsonschema::ValidationError<'_>,
    names: &BTreeMap<String, String>,
    messages: &BTreeMap<String, String>,
) -> String {
    if let jsonschema::error::ValidationErrorKind::Required { property } = &error.kind {
        let mut segments: Vec<String> = rule_key.split('.').skip(1).map(str::to_string).collect();
        segments.extend(instance_path_segments(error));
        let property_name = property.as_str().map(str::to_string).unwrap_or_else(|| property.to_string());
        segments.push(property_name);

        let bracket_path: String = segments.iter().map(|s| format!("[{s}]")).collect();
        let main_key = rule_key.split('.').next().unwrap_or(rule_key);
        let resolved_name = names.get(main_key).cloned().unwrap_or_else(|| main_key.to_string());
        let resolved_name = resolved_name.replace("[...]", &bracket_path);

        let template = messages.get("required").map(String::as_str).unwrap_or("'{property}' is required");
        template.replace("{property}", &resolved_name)
    } else {
        error.to_string()
    }
}

fn instance_path_segments(error: &jsonschema::ValidationError<'_>) -> Vec<String> {
    error
        .instance_path
        .to_string()
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The default human-facing message templates, keyed by the keyword they
/// cover. `{property}` is substituted with the resolved, bracket-expanded
/// name of the missing property.
pub fn default_messages() -> BTreeMap<String, String> {
    let mut messages = BTreeMap::new();
    messages.insert("required".to_string(), "'{property}' is required".to_string());
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_violation_uses_the_message_template() {
        let validator = JsonSchemaRuleValidator;
        let mut scoped_values = BTreeMap::new();
        scoped_values.insert("result".to_string(), json!({}));
        let mut rule_lists = BTreeMap::new();
        rule_lists.insert("result".to_string(), vec![json!({"required": ["count"]})]);
        let names = BTreeMap::new();
        let violations = validator.validate(&scoped_values, &rule_lists, &names, &default_messages());
        let messages = violations.get("result").unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("is required"));
    }

    #[test]
    fn passing_rule_produces_no_violation() {
        let validator = JsonSchemaRuleValidator;
        let mut scoped_values = BTreeMap::new();
        scoped_values.insert("result".to_string(), json!({"count": 1}));
        let mut rule_lists = BTreeMap::new();
        rule_lists.insert("result".to_string(), vec![json!({"required": ["count"]})]);
        let names = BTreeMap::new();
        let violations = validator.validate(&scoped_values, &rule_lists, &names, &default_messages());
        assert!(violations.is_empty());
    }
}
