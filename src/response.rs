//! The wire shape returned from a root service's [`crate::Service::run`].
use serde_json::{Map, Value};

/// The outcome of running a root service.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// No total errors anywhere in the tree; carries `data["result"]`.
    Result(Value),
    /// At least one error somewhere in the tree, keyed by rule key at the
    /// root and nested by child key for every failing descendant.
    Errors(Map<String, Value>),
}

impl Response {
    /// The `{"result": ...}` / `{"errors": {...}}` wire shape.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Response::Result(value) => {
                let mut body = Map::new();
                body.insert("result".to_string(), value.clone());
                Value::Object(body)
            }
            Response::Errors(errors) => {
                let mut body = Map::new();
                body.insert("errors".to_string(), Value::Object(errors.clone()));
                Value::Object(body)
            }
        }
    }

    /// `true` if this response carries no errors.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Result(_))
    }
}
