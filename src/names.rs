//! Resolves a bind-name template — a string with at most one `{{key}}`
//! placeholder and at most one `[...]` placeholder — into a concrete,
//! human-facing name.
use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::declaration::Declaration;
use crate::error::EngineError;
use crate::rules::has_array_object_rule_anywhere;

lazy_static! {
    static ref BIND_NAME_RE: Regex = Regex::new(r"\{\{\s*([A-Za-z][A-Za-z0-9_.]*)\s*\}\}").unwrap();
    static ref BRACKET_RE: Regex = Regex::new(r"\[\.\.\.\]").unwrap();
}

/// Resolves `template` against `instance_names` (per-instance overrides) and
/// `declaration.merged_bind_names` (the class default), substituting nested
/// `{{key}}` references until a fixed point or `max_depth` is reached.
pub fn resolve_bind_name(
    declaration: &Declaration,
    instance_names: &BTreeMap<String, String>,
    template: &str,
    max_depth: usize,
) -> Result<String, EngineError> {
    resolve_inner(declaration, instance_names, template, max_depth)
}

fn resolve_inner(
    declaration: &Declaration,
    instance_names: &BTreeMap<String, String>,
    template: &str,
    budget: usize,
) -> Result<String, EngineError> {
    let mut current = template.to_string();
    loop {
        let Some(caps) = BIND_NAME_RE.captures(&current) else { break };
        if budget == 0 {
            return Err(EngineError::SubstitutionDepthExceeded { template: template.to_string() });
        }
        let full_match = caps.get(0).unwrap().as_str().to_string();
        let reference = caps.get(1).unwrap().as_str().to_string();
        let main_key = reference.split('.').next().unwrap_or(&reference).to_string();

        let bind_name = instance_names
            .get(&main_key)
            .or_else(|| declaration.merged_bind_names.get(&main_key))
            .cloned()
            .ok_or_else(|| EngineError::UnknownBindName { key: main_key.clone(), declaration: declaration.name.clone() })?;

        let resolved = resolve_inner(declaration, instance_names, &bind_name, budget - 1)?;
        current = current.replacen(&full_match, &resolved, 1);

        let bracket_count = BRACKET_RE.find_iter(&current).count();
        if bracket_count > 1 {
            return Err(EngineError::DuplicatePlaceholder { name: current.clone(), declaration: declaration.name.clone() });
        }

        let needs_placeholder = has_array_object_rule_anywhere(declaration, &main_key);
        if needs_placeholder && bracket_count == 0 {
            return Err(EngineError::MissingPlaceholder { name: main_key.clone(), declaration: declaration.name.clone() });
        }

        let sub_segments: Vec<&str> = reference.splitn(2, '.').nth(1).map(|s| s.split('.').collect()).unwrap_or_default();
        current = if sub_segments.is_empty() {
            BRACKET_RE.replace(&current, "").to_string()
        } else {
            let bracket_path: String = sub_segments.iter().map(|s| format!("[{s}]")).collect();
            BRACKET_RE.replace(&current, bracket_path.as_str()).to_string()
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::DeclarationBuilder;

    #[test]
    fn plain_template_resolves_to_itself() {
        let decl = DeclarationBuilder::new("A").build().unwrap();
        let names = BTreeMap::new();
        assert_eq!(resolve_bind_name(&decl, &names, "Widget", 8).unwrap(), "Widget");
    }

    #[test]
    fn instance_name_overrides_declaration_default() {
        let decl = DeclarationBuilder::new("A").bind_name("x", "class default").build().unwrap();
        let mut names = BTreeMap::new();
        names.insert("x".to_string(), "instance override".to_string());
        assert_eq!(resolve_bind_name(&decl, &names, "{{x}}", 8).unwrap(), "instance override");
    }

    #[test]
    fn unknown_reference_is_an_engine_error() {
        let decl = DeclarationBuilder::new("A").build().unwrap();
        let names = BTreeMap::new();
        let err = resolve_bind_name(&decl, &names, "{{missing}}", 8).unwrap_err();
        assert!(matches!(err, EngineError::UnknownBindName { .. }));
    }

    #[test]
    fn array_object_rule_requires_bracket_placeholder() {
        let decl = DeclarationBuilder::new("A")
            .bind_name("item", "Item")
            .rule("item", serde_json::json!({"type": "object", "properties": {}}))
            .build()
            .unwrap();
        let names = BTreeMap::new();
        let err = resolve_bind_name(&decl, &names, "{{item}}", 8).unwrap_err();
        assert!(matches!(err, EngineError::MissingPlaceholder { .. }));
    }
}
