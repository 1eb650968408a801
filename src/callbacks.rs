//! Computes the execution order of the callbacks attached to a key's main
//! segment, honoring declared promise-list predecessors with a depth-first
//! topological walk.
use std::collections::HashSet;

use crate::declaration::Declaration;

/// Every callback key `main_key__...` (ignoring `@defer`), ordered so a
/// callback always comes after every predecessor named in its promise list,
/// predecessors of predecessors included, each key appearing exactly once.
pub fn ordered_callback_keys(declaration: &Declaration, main_key: &str) -> Vec<String> {
    let prefix = format!("{main_key}__");
    let all_keys: Vec<String> =
        declaration.merged_callbacks.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();

    let mut ordered = Vec::new();
    let mut seen = HashSet::new();
    for key in &all_keys {
        visit(key, declaration, &all_keys, &mut ordered, &mut seen);
    }
    ordered
}

fn visit(key: &str, declaration: &Declaration, scope: &[String], ordered: &mut Vec<String>, seen: &mut HashSet<String>) {
    if !seen.insert(key.to_string()) {
        return;
    }
    if let Some(predecessors) = declaration.merged_promise_lists.get(key) {
        for predecessor in predecessors {
            if scope.iter().any(|k| k == predecessor) {
                visit(predecessor, declaration, scope, ordered, seen);
            }
        }
    }
    ordered.push(key.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::DeclarationBuilder;
    use std::sync::Arc;

    #[test]
    fn predecessors_come_before_their_dependents() {
        let decl = DeclarationBuilder::new("A")
            .callback("result__first", vec![], false, Arc::new(|_| None))
            .callback("result__second", vec![], false, Arc::new(|_| None))
            .promise("result__second", vec!["result__first".to_string()])
            .build()
            .unwrap();
        let ordered = ordered_callback_keys(&decl, "result");
        let first_pos = ordered.iter().position(|k| k == "result__first").unwrap();
        let second_pos = ordered.iter().position(|k| k == "result__second").unwrap();
        assert!(first_pos < second_pos);
    }
}
