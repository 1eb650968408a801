//! The resolver: a runtime instance of a [`Declaration`], memoizing
//! validation results per key and driving loaders, the rule engine and
//! callbacks to a fixed point.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, trace, warn};
use serde_json::{Map, Value};

use crate::callbacks::ordered_callback_keys;
use crate::declaration::Declaration;
use crate::error::EngineError;
use crate::names::resolve_bind_name;
use crate::options::EngineOptions;
use crate::path::{self, TOP_LEVEL_KEY_RE};
use crate::response::Response;
use crate::rules;
use crate::validator::default_messages;
use crate::value::{ChildSpec, LoaderOutput};

/// What running a non-root (child) service produced, for its parent to fold
/// into `data` at the loader's key.
enum ChildOutcome {
    Value(Value),
    Unresolvable,
}

/// A running instance of a [`Declaration`]: its own inputs and names, plus
/// everything the resolver accumulates as it validates keys — loaded data,
/// memoized validations, accumulated rule errors, and any child services it
/// spawned.
pub struct Service {
    declaration: Arc<Declaration>,
    inputs: Map<String, Value>,
    names: BTreeMap<String, String>,
    is_root: bool,
    options: EngineOptions,

    data: Map<String, Value>,
    validations: HashMap<String, bool>,
    errors: BTreeMap<String, Vec<String>>,
    children: BTreeMap<String, Service>,
    is_run: bool,
}

impl Service {
    /// Constructs a root service: the entry point a caller builds, runs and
    /// reads a [`Response`] from.
    pub fn new(
        declaration: Arc<Declaration>,
        inputs: Map<String, Value>,
        names: BTreeMap<String, String>,
    ) -> Result<Self, EngineError> {
        Self::with_options(declaration, inputs, names, EngineOptions::default())
    }

    /// Constructs a root service with non-default [`EngineOptions`].
    pub fn with_options(
        declaration: Arc<Declaration>,
        inputs: Map<String, Value>,
        names: BTreeMap<String, String>,
        options: EngineOptions,
    ) -> Result<Self, EngineError> {
        Self::construct(declaration, inputs, names, true, options)
    }

    fn new_child(
        declaration: Arc<Declaration>,
        inputs: Map<String, Value>,
        names: BTreeMap<String, String>,
        options: EngineOptions,
    ) -> Result<Self, EngineError> {
        Self::construct(declaration, inputs, names, false, options)
    }

    fn construct(
        declaration: Arc<Declaration>,
        inputs: Map<String, Value>,
        names: BTreeMap<String, String>,
        is_root: bool,
        options: EngineOptions,
    ) -> Result<Self, EngineError> {
        let mut cleaned_inputs = Map::new();
        for (key, value) in inputs {
            if value.as_str() == Some("") {
                continue;
            }
            if !TOP_LEVEL_KEY_RE.is_match(&key) {
                return Err(EngineError::InvalidKeyPattern { key, context: declaration.name.clone() });
            }
            cleaned_inputs.insert(key, value);
        }

        Ok(Self {
            declaration,
            inputs: cleaned_inputs,
            names,
            is_root,
            options,
            data: Map::new(),
            validations: HashMap::new(),
            errors: BTreeMap::new(),
            children: BTreeMap::new(),
            is_run: false,
        })
    }

    /// Runs the service to a fixed point and returns its [`Response`].
    ///
    /// Every input key, every declared loader key and every key carrying a
    /// rule list is seeded as a validation root; the resolver then follows
    /// loader, promise-list and rule dependencies outward from each seed.
    pub fn run(&mut self) -> Result<Response, EngineError> {
        if self.is_run {
            return Err(EngineError::AlreadyRun { declaration: self.declaration.name.clone() });
        }

        if self.is_root {
            for hook in self.declaration.on_start.lock().expect("on_start lock poisoned").iter() {
                hook();
            }
        }

        self.execute()?;

        let total = self.total_errors();
        if total.is_empty() {
            self.run_deferred_callbacks();
            if self.is_root {
                for hook in self.declaration.on_success.lock().expect("on_success lock poisoned").iter() {
                    hook();
                }
            }
            let result = self.data.get("result").cloned().ok_or(EngineError::MissingResult)?;
            Ok(Response::Result(result))
        } else {
            if self.is_root {
                for hook in self.declaration.on_fail.lock().expect("on_fail lock poisoned").iter() {
                    hook();
                }
            }
            Ok(Response::Errors(total))
        }
    }

    fn run_as_child(&mut self) -> Result<ChildOutcome, EngineError> {
        if self.is_run {
            return Err(EngineError::AlreadyRun { declaration: self.declaration.name.clone() });
        }
        self.execute()?;
        let total = self.total_errors();
        if total.is_empty() {
            Ok(ChildOutcome::Value(self.data.get("result").cloned().unwrap_or(Value::Null)))
        } else {
            Ok(ChildOutcome::Unresolvable)
        }
    }

    fn execute(&mut self) -> Result<(), EngineError> {
        let mut seeds: Vec<String> = Vec::new();
        seeds.extend(self.inputs.keys().cloned());
        for bucket in &self.declaration.merged_rule_lists {
            seeds.extend(bucket.rules.keys().cloned());
        }
        seeds.extend(self.declaration.merged_loaders.keys().cloned());

        let mut seen = std::collections::HashSet::new();
        for key in seeds {
            if seen.insert(key.clone()) {
                let mut depth = Vec::new();
                self.validate(&key, &mut depth)?;
            }
        }

        self.is_run = true;
        Ok(())
    }

    /// The merged error tree: this instance's own rule errors, plus every
    /// non-empty child's error tree nested under its child key.
    pub fn total_errors(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, messages) in &self.errors {
            out.insert(key.clone(), Value::Array(messages.iter().cloned().map(Value::String).collect()));
        }
        for (child_key, child) in &self.children {
            let child_errors = child.total_errors();
            if !child_errors.is_empty() {
                out.insert(child_key.clone(), Value::Object(child_errors));
            }
        }
        out
    }

    fn mark_invalid(&mut self, key: &str) {
        self.validations.insert(key.to_string(), false);
    }

    fn resolve_name(&self, template: &str) -> Result<String, EngineError> {
        resolve_bind_name(&self.declaration, &self.names, template, self.options.max_substitution_depth)
    }

    /// The declared bind-name template for a top-level key, verbatim —
    /// falling back to the raw key when the class never bound one. Deliberately
    /// *not* routed through [`Self::resolve_name`]: that function's job is
    /// resolving a `{{key}}` reference nested inside another template, which
    /// collapses the referenced key's own `[...]` placeholder into the
    /// reference's sub-path. Here the placeholder must survive untouched, so
    /// `validator::render_message` can substitute it per-violation with the
    /// exact instance/property path that failed.
    fn raw_bind_name(&self, key: &str) -> String {
        self.names.get(key).or_else(|| self.declaration.merged_bind_names.get(key)).cloned().unwrap_or_else(|| key.to_string())
    }

    /// The core resolver: memoized per key, cycle-detecting via the caller's
    /// depth chain, short-circuiting through an already-true strict
    /// ancestor, and otherwise driving promise-list predecessors, loader
    /// dependencies, the loader itself, the rule engine and callbacks in
    /// order before memoizing the result.
    fn validate(&mut self, key: &str, depth: &mut Vec<String>) -> Result<bool, EngineError> {
        if let Some(&value) = self.validations.get(key) {
            return Ok(value);
        }

        depth.push(key.to_string());
        if depth.iter().filter(|k| k.as_str() == key).count() >= 2 {
            let chain = depth.join("|");
            return Err(EngineError::CircularReference { chain });
        }

        for ancestor in path::strict_ancestors(key) {
            if self.validations.get(&ancestor).copied() == Some(true) {
                self.validations.insert(key.to_string(), true);
                depth.pop();
                return Ok(true);
            }
        }

        let main_key = path::main_key(key).to_string();
        trace!("validating '{key}' (main key '{main_key}')");

        if let Some(predecessors) = self.declaration.merged_promise_lists.get(&main_key).cloned() {
            for predecessor in &predecessors {
                if !self.validate(predecessor, depth)? {
                    self.mark_invalid(&main_key);
                }
            }
        }

        if let Some(loader) = self.declaration.merged_loaders.get(&main_key).cloned() {
            for dep in &loader.deps {
                if !self.validate(dep, depth)? {
                    self.mark_invalid(&main_key);
                }
            }
        }

        self.load_key(&main_key, depth)?;
        self.run_rule_engine(key, depth)?;

        // Memoize before running callbacks: a callback commonly declares a
        // dependency on its own owning key (scenario 2's `cb1` depends on
        // `result`), and `run_callbacks` validates that dependency through
        // the same resolver. Without memoizing here first, that re-entrant
        // call finds `key` still unresolved and still on `depth`, which
        // reads as a cycle rather than the ordinary "already validated,
        // now running its callbacks" case.
        let result = self.validations.get(key).copied().unwrap_or(true);
        self.validations.insert(key.to_string(), result);

        self.run_callbacks(key, &main_key, depth)?;

        depth.pop();
        let result = self.validations.get(key).copied().unwrap_or(true);
        self.validations.insert(key.to_string(), result);
        Ok(result)
    }

    fn load_key(&mut self, key: &str, depth: &mut Vec<String>) -> Result<(), EngineError> {
        if self.data.contains_key(key) {
            return Ok(());
        }

        if let Some(value) = self.inputs.get(key).cloned() {
            self.data.insert(key.to_string(), value);
            return Ok(());
        }

        let Some(loader) = self.declaration.merged_loaders.get(key).cloned() else {
            return Ok(());
        };

        // Each dependency was already routed through `validate` by the
        // caller (resolver step 5), so it has had its chance to load; a
        // dependency the engine could not actually produce data for is a
        // silent resolution failure (§7 category 2), not a validation
        // failure, and simply leaves this loader unresolvable too.
        if !loader.deps.iter().all(|dep| self.data.contains_key(dep)) {
            debug!("loader '{key}' skipped: a dependency has no resolved value");
            return Ok(());
        }
        let dep_values: Vec<Value> = loader.deps.iter().map(|dep| self.data[dep].clone()).collect();

        match (loader.func)(&dep_values) {
            LoaderOutput::Unresolvable => {
                debug!("loader '{key}' produced no value");
            }
            LoaderOutput::Value(value) => {
                self.data.insert(key.to_string(), value);
            }
            LoaderOutput::Child(spec) => match self.spawn_child(key, spec, depth)? {
                Some(value) => {
                    self.data.insert(key.to_string(), value);
                }
                None => self.mark_invalid(key),
            },
            LoaderOutput::Children(specs) => {
                let mut resolved = Vec::with_capacity(specs.len());
                let mut any_unresolved = false;
                for (index, spec) in specs.into_iter().enumerate() {
                    let child_key = format!("{key}.{index}");
                    match self.spawn_child(&child_key, spec, depth)? {
                        Some(value) => resolved.push(value),
                        None => any_unresolved = true,
                    }
                }
                if any_unresolved {
                    self.mark_invalid(key);
                } else {
                    self.data.insert(key.to_string(), Value::Array(resolved));
                }
            }
        }
        Ok(())
    }

    fn spawn_child(&mut self, child_key: &str, spec: ChildSpec, _depth: &mut [String]) -> Result<Option<Value>, EngineError> {
        let mut resolved_names = BTreeMap::new();
        for (key, template) in &spec.names {
            resolved_names.insert(key.clone(), self.resolve_name(template)?);
        }

        let mut child = Service::new_child(spec.declaration, spec.inputs, resolved_names, self.options.clone())?;
        let outcome = child.run_as_child()?;
        self.children.insert(child_key.to_string(), child);

        match outcome {
            ChildOutcome::Value(value) => Ok(Some(value)),
            ChildOutcome::Unresolvable => Ok(None),
        }
    }

    fn run_rule_engine(&mut self, key: &str, depth: &mut Vec<String>) -> Result<(), EngineError> {
        let snapshot = self.data.clone();
        let mut any_failed = false;

        for bucket in self.declaration.merged_rule_lists.clone() {
            let selected = rules::select_related_rule_lists(key, &bucket.rules);
            if selected.is_empty() {
                continue;
            }
            rules::check_array_object_escalation(&selected, &self.declaration)?;

            let expanded = rules::expand_wildcards(selected, &snapshot);
            let pruned = rules::prune_absent(expanded, &snapshot);

            let mut names_for_validator = BTreeMap::new();
            let mut surviving: BTreeMap<String, Vec<Value>> = BTreeMap::new();

            for (rule_key, rule_list) in pruned {
                let mut kept = Vec::new();
                for rule in rule_list {
                    let deps = rules::extract_rule_dependencies(&rule);
                    let mut deps_ok = true;
                    for dep in &deps {
                        if dep.split('.').any(|segment| segment == "*") {
                            return Err(EngineError::WildcardInRuleDependency { key: dep.clone() });
                        }
                        if !self.validate(dep, depth)? {
                            deps_ok = false;
                            self.mark_invalid(key);
                        }
                        let dep_main_key = path::main_key(dep).to_string();
                        let resolved = self.raw_bind_name(&dep_main_key);
                        names_for_validator.insert(dep_main_key, resolved);
                    }
                    if deps_ok {
                        kept.push(rules::normalize_rule(&rule));
                    }
                }
                if !kept.is_empty() {
                    let rule_main_key = path::main_key(&rule_key).to_string();
                    let resolved = self.raw_bind_name(&rule_main_key);
                    names_for_validator.insert(rule_main_key, resolved);
                    surviving.insert(rule_key, kept);
                }
            }

            if surviving.is_empty() {
                continue;
            }

            let mut scoped_values = BTreeMap::new();
            for rule_key in surviving.keys() {
                // Absent real data means this entry survived as a
                // present-related projection (rules.rs::prune_absent); the
                // JSON Schema `required` keyword only ever fires against an
                // object instance, so an empty object stands in for "absent"
                // rather than `Null`.
                let value = path::scoped_value(&snapshot, rule_key)
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                scoped_values.insert(rule_key.clone(), value);
            }

            let violations =
                self.options.validator.validate(&scoped_values, &surviving, &names_for_validator, &default_messages());
            if !violations.is_empty() {
                warn!("class '{}' rejected '{key}': {} rule key(s) failed", bucket.class_name, violations.len());
            }
            for (rule_key, messages) in violations {
                any_failed = true;
                let bucket_errors = self.errors.entry(rule_key).or_default();
                for message in messages {
                    if !bucket_errors.contains(&message) {
                        bucket_errors.push(message);
                    }
                }
            }
        }

        if any_failed {
            self.mark_invalid(key);
        }
        Ok(())
    }

    fn run_callbacks(&mut self, key: &str, main_key: &str, depth: &mut Vec<String>) -> Result<(), EngineError> {
        let ordered = ordered_callback_keys(&self.declaration, main_key);

        for callback_key in &ordered {
            let Some(callback) = self.declaration.merged_callbacks.get(callback_key).cloned() else { continue };
            for dep in &callback.deps {
                if !self.validate(dep, depth)? {
                    self.mark_invalid(key);
                }
            }
        }

        if self.validations.get(key).copied().unwrap_or(true) {
            for callback_key in &ordered {
                let Some(callback) = self.declaration.merged_callbacks.get(callback_key).cloned() else { continue };
                if callback.deferred {
                    continue;
                }
                // A dependency with no resolved data is a silent resolution
                // failure (§7 category 2): skip this callback, but it is not
                // by itself a reason to invalidate the owning key.
                if !callback.deps.iter().all(|dep| self.data.contains_key(dep)) {
                    debug!("callback '{callback_key}' skipped: a dependency has no resolved value");
                    continue;
                }
                let dep_values: Vec<Value> = callback.deps.iter().map(|dep| self.data[dep].clone()).collect();
                if let Some(new_value) = (callback.func)(&dep_values) {
                    let owner = callback_key.split("__").next().unwrap_or(main_key);
                    self.data.insert(owner.to_string(), new_value);
                }
            }
        }
        Ok(())
    }

    fn run_deferred_callbacks(&mut self) {
        let deferred: Vec<(String, crate::declaration::Callback)> = self
            .declaration
            .merged_callbacks
            .iter()
            .filter(|(_, callback)| callback.deferred)
            .map(|(key, callback)| (key.clone(), callback.clone()))
            .collect();

        for (callback_key, callback) in deferred {
            let dep_values: Vec<Value> =
                callback.deps.iter().map(|dep| self.data.get(dep).cloned().unwrap_or(Value::Null)).collect();
            if let Some(new_value) = (callback.func)(&dep_values) {
                let owner = callback_key.split("__").next().unwrap_or(callback_key.as_str());
                self.data.insert(owner.to_string(), new_value);
            }
        }

        for child in self.children.values_mut() {
            child.run_deferred_callbacks();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::DeclarationBuilder;
    use serde_json::json;

    fn value_loader(value: Value) -> crate::declaration::LoaderFn {
        Arc::new(move |_| LoaderOutput::Value(value.clone()))
    }

    #[test]
    fn passthrough_input_with_no_rules_succeeds() {
        let declaration = DeclarationBuilder::new("Passthrough").build().unwrap();
        let mut inputs = Map::new();
        inputs.insert("result".to_string(), json!({"ok": true}));
        let mut service = Service::new(declaration, inputs, BTreeMap::new()).unwrap();
        let response = service.run().unwrap();
        assert_eq!(response, Response::Result(json!({"ok": true})));
    }

    #[test]
    fn missing_required_input_surfaces_as_an_error() {
        let declaration =
            DeclarationBuilder::new("RequiresResult").rule("result", json!({"required": ["count"]})).build().unwrap();
        let mut inputs = Map::new();
        inputs.insert("result".to_string(), json!({}));
        let mut service = Service::new(declaration, inputs, BTreeMap::new()).unwrap();
        let response = service.run().unwrap();
        match response {
            Response::Errors(errors) => assert!(errors.contains_key("result")),
            Response::Result(_) => panic!("expected errors"),
        }
    }

    #[test]
    fn loader_runs_once_across_repeated_validation() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let declaration = DeclarationBuilder::new("CountsCalls")
            .loader(
                "result",
                vec![],
                Arc::new(move |_| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    LoaderOutput::Value(json!(1))
                }),
            )
            .callback("result__observe", vec!["result".to_string()], false, Arc::new(|_| None))
            .build()
            .unwrap();
        let mut service = Service::new(declaration, Map::new(), BTreeMap::new()).unwrap();
        service.run().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn running_twice_is_rejected() {
        let declaration = DeclarationBuilder::new("Once").build().unwrap();
        let mut inputs = Map::new();
        inputs.insert("result".to_string(), json!(1));
        let mut service = Service::new(declaration, inputs, BTreeMap::new()).unwrap();
        service.run().unwrap();
        assert!(matches!(service.run(), Err(EngineError::AlreadyRun { .. })));
    }

    #[test]
    fn callback_can_replace_its_owning_key_data() {
        let declaration = DeclarationBuilder::new("Mutates")
            .loader("result", vec![], value_loader(json!({})))
            .loader("extra", vec![], value_loader(json!("abcd")))
            .callback(
                "result__merge",
                vec!["result".to_string(), "extra".to_string()],
                false,
                Arc::new(|deps| {
                    let mut merged = deps[0].as_object().cloned().unwrap_or_default();
                    merged.insert("extra".to_string(), deps[1].clone());
                    Some(Value::Object(merged))
                }),
            )
            .build()
            .unwrap();
        let mut service = Service::new(declaration, Map::new(), BTreeMap::new()).unwrap();
        let response = service.run().unwrap();
        assert_eq!(response, Response::Result(json!({"extra": "abcd"})));
    }

    #[test]
    fn circular_loader_dependency_is_rejected() {
        let declaration = DeclarationBuilder::new("Circular")
            .loader("a", vec!["b".to_string()], value_loader(json!(1)))
            .loader("b", vec!["a".to_string()], value_loader(json!(1)))
            .rule("result", json!({}))
            .build()
            .unwrap();
        let mut inputs = Map::new();
        inputs.insert("result".to_string(), json!(1));
        let mut service = Service::new(declaration, inputs, BTreeMap::new()).unwrap();
        // "a" and "b" are never seeded directly (no input, no rule list), so
        // the cycle is only hit if something validates them; exercise the
        // resolver directly instead of through run()'s seed loop.
        let mut depth = Vec::new();
        let err = service.validate("a", &mut depth).unwrap_err();
        assert!(matches!(err, EngineError::CircularReference { .. }));
    }
}
