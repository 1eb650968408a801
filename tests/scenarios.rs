//! End-to-end coverage of the worked scenarios: each declares a service,
//! runs it to completion, and asserts on the resulting `Response`.
use std::collections::BTreeMap;
use std::sync::Arc;

use declarative_service::{ChildSpec, DeclarationBuilder, LoaderOutput, Response, Service};
use serde_json::{json, Map, Value};

fn inputs(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn scenario_1_input_passthrough() {
    let declaration = DeclarationBuilder::new("Passthrough")
        .rule("result", json!({"required": ["result"]}))
        .build()
        .unwrap();
    let mut service = Service::new(declaration, inputs(&[("result", json!("value"))]), BTreeMap::new()).unwrap();
    let response = service.run().unwrap();
    assert_eq!(response, Response::Result(json!("value")));
    assert!(service.total_errors().is_empty());
}

#[test]
fn scenario_2_callback_dependency_gating() {
    let declaration = DeclarationBuilder::new("CallbackGating")
        .loader("test1", vec![], Arc::new(|_| LoaderOutput::Value(json!("test1 val"))))
        .callback(
            "result__cb1",
            vec!["result".to_string(), "test1".to_string()],
            false,
            Arc::new(|deps| {
                let mut merged = deps[0].as_object().cloned().unwrap_or_default();
                merged.insert("abcd".to_string(), deps[1].clone());
                Some(Value::Object(merged))
            }),
        )
        .callback(
            "result__cb2",
            vec!["result".to_string(), "test2".to_string()],
            false,
            Arc::new(|_deps| panic!("cb2 must be skipped: test2 never resolves")),
        )
        .build()
        .unwrap();

    let mut service =
        Service::new(declaration, inputs(&[("result", json!({"aaaa": "aaaa"}))]), BTreeMap::new()).unwrap();
    let response = service.run().unwrap();

    assert_eq!(response, Response::Result(json!({"aaaa": "aaaa", "abcd": "test1 val"})));
}

#[test]
fn scenario_3_array_of_child_services() {
    let child = DeclarationBuilder::new("Child")
        .loader("result", vec![], Arc::new(|_| LoaderOutput::Value(json!("child result value"))))
        .build()
        .unwrap();

    let parent = DeclarationBuilder::new("Parent")
        .loader(
            "result",
            vec![],
            Arc::new({
                let child = Arc::clone(&child);
                move |_| {
                    LoaderOutput::Children(vec![ChildSpec::new(Arc::clone(&child)), ChildSpec::new(Arc::clone(&child))])
                }
            }),
        )
        .build()
        .unwrap();

    let mut service = Service::new(parent, Map::new(), BTreeMap::new()).unwrap();
    let response = service.run().unwrap();
    assert_eq!(response, Response::Result(json!(["child result value", "child result value"])));
}

#[test]
fn scenario_4_wildcard_style_type_mismatch_invalidates_result() {
    let declaration = DeclarationBuilder::new("TypeMismatch")
        .loader(
            "result",
            vec![],
            Arc::new(|_| LoaderOutput::Value(json!({"a": {"c": "ccc"}, "b": {"c": "ccc"}}))),
        )
        .rule("result", json!({"type": "object"}))
        .rule("result.a", json!({"type": "string"}))
        .build()
        .unwrap();

    let mut service = Service::new(declaration, Map::new(), BTreeMap::new()).unwrap();
    let response = service.run().unwrap();
    assert!(matches!(response, Response::Errors(_)));
}

#[test]
fn scenario_5_parent_rule_failure_prunes_siblings_independently() {
    let declaration = DeclarationBuilder::new("SiblingPruning")
        .loader(
            "result",
            vec![],
            Arc::new(|_| LoaderOutput::Value(json!({"a": {"c": "ccc"}, "b": {"c": "ccc"}}))),
        )
        .rule("result", json!({"type": "object"}))
        .rule("result.a", json!({"type": "object", "required": ["d"]}))
        .rule("result.a.c", json!({"type": "string"}))
        .rule("result.b", json!({"type": "object"}))
        .rule("result.b.c", json!({"type": "string"}))
        .build()
        .unwrap();

    let mut service = Service::new(declaration, Map::new(), BTreeMap::new()).unwrap();
    let response = service.run().unwrap();
    assert!(matches!(response, Response::Errors(_)));
    // "result.a" is missing field "d": it, its own descendant "result.a.c",
    // and the top-level "result" all fail by ancestor/descendant inclusion,
    // while the sibling branch under "result.b" is untouched.
    let errors = service.total_errors();
    assert!(errors.contains_key("result.a"));
}

#[test]
fn scenario_6_name_substitution_with_bracket_placeholder() {
    let declaration = DeclarationBuilder::new("BracketName")
        .bind_name("result", "result[...] name")
        .rule("result", json!({"type": "object", "properties": {"a": {"type": "object", "required": ["b"]}}}))
        .build()
        .unwrap();

    let mut service = Service::new(declaration, inputs(&[("result", json!({"a": {}}))]), BTreeMap::new()).unwrap();
    let response = service.run().unwrap();
    match response {
        Response::Errors(errors) => {
            let messages = errors.get("result").and_then(Value::as_array).expect("result errors");
            assert_eq!(messages.len(), 1);
            let message = messages[0].as_str().unwrap();
            assert!(message.contains("result[a][b]"), "unexpected message: {message}");
        }
        Response::Result(_) => panic!("expected errors"),
    }
}
