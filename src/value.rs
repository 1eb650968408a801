//! The result type a loader produces, and the descriptor a loader uses to
//! spawn a child service.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::declaration::Declaration;

/// What a loader produced for its key.
pub enum LoaderOutput {
    /// The loader could not produce a value (a missing upstream fact, not a
    /// programmer error). The key is left unresolved.
    Unresolvable,
    /// A plain value to store at the loader's key.
    Value(Value),
    /// A single child service to construct, run and fold in under the
    /// loader's key.
    Child(ChildSpec),
    /// A list of child services, folded in under `key.0`, `key.1`, ...
    Children(Vec<ChildSpec>),
}

/// Everything needed to construct and run a child [`crate::Service`]: which
/// declaration to run it against, what inputs to seed it with, and what name
/// templates to resolve (through the parent) before it runs.
#[derive(Clone)]
pub struct ChildSpec {
    pub declaration: Arc<Declaration>,
    pub inputs: Map<String, Value>,
    pub names: BTreeMap<String, String>,
}

impl ChildSpec {
    #[must_use]
    pub fn new(declaration: Arc<Declaration>) -> Self {
        Self { declaration, inputs: Map::new(), names: BTreeMap::new() }
    }

    #[must_use]
    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    #[must_use]
    pub fn with_names(mut self, names: BTreeMap<String, String>) -> Self {
        self.names = names;
        self
    }
}
