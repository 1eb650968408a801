//! Declarations: the immutable, shareable description of a service class —
//! its bound names, loaders, callbacks, callback ordering hints and rule
//! lists, plus whatever traits it composes.
//!
//! A [`Declaration`] is built once (through [`DeclarationBuilder`]) and then
//! shared behind an `Arc` across every [`crate::Service`] instance of that
//! class, and behind every child spawned from it.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::EngineError;
use crate::path::{CALLBACK_KEY_RE, TOP_LEVEL_KEY_RE};

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

/// A loader: a function of its declared dependencies' resolved values,
/// invoked at most once per instance and only once every dependency has
/// itself validated.
#[derive(Clone)]
pub struct Loader {
    pub deps: Vec<String>,
    pub func: LoaderFn,
}

pub type LoaderFn = Arc<dyn Fn(&[Value]) -> crate::value::LoaderOutput + Send + Sync>;

/// A callback: a side-effecting hook attached to `mainKey__suffix`, run in
/// dependency order once its declared dependencies and `mainKey`'s rules
/// have all passed. A callback may return a replacement value for the data
/// already stored at its main key (the idiomatic stand-in for the original
/// mutate-in-place convention); returning `None` performs no such update.
#[derive(Clone)]
pub struct Callback {
    pub deps: Vec<String>,
    pub deferred: bool,
    pub func: CallbackFn,
}

pub type CallbackFn = Arc<dyn Fn(&[Value]) -> Option<Value> + Send + Sync>;

/// One class's own rule list, bucketed apart from the rule lists of its
/// traits so the resolver can validate each bucket as its own set of related
/// rules (a wildcard or dependency expansion never crosses a class
/// boundary).
#[derive(Clone)]
pub struct RuleListBucket {
    pub class_id: u64,
    pub class_name: String,
    pub rules: BTreeMap<String, Vec<Value>>,
}

/// The immutable description of a service class.
pub struct Declaration {
    pub name: String,
    class_id: u64,

    own_bind_names: BTreeMap<String, String>,
    own_loaders: BTreeMap<String, Loader>,
    own_callbacks: BTreeMap<String, Callback>,
    own_promise_lists: BTreeMap<String, Vec<String>>,
    own_rule_lists: BTreeMap<String, Vec<Value>>,
    own_traits: Vec<Arc<Declaration>>,

    pub merged_bind_names: BTreeMap<String, String>,
    pub merged_loaders: BTreeMap<String, Loader>,
    pub merged_callbacks: BTreeMap<String, Callback>,
    pub merged_promise_lists: BTreeMap<String, Vec<String>>,
    pub merged_rule_lists: Vec<RuleListBucket>,
    pub merged_traits: Vec<Arc<Declaration>>,

    pub(crate) on_start: Mutex<Vec<Arc<dyn Fn() + Send + Sync>>>,
    pub(crate) on_success: Mutex<Vec<Arc<dyn Fn() + Send + Sync>>>,
    pub(crate) on_fail: Mutex<Vec<Arc<dyn Fn() + Send + Sync>>>,
}

impl fmt::Debug for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Declaration").field("name", &self.name).field("class_id", &self.class_id).finish()
    }
}

/// Builds a [`Declaration`], validating key grammar and trait composition
/// once, eagerly, at [`DeclarationBuilder::build`] time rather than re-doing
/// the merge on every instance.
pub struct DeclarationBuilder {
    name: String,
    bind_names: BTreeMap<String, String>,
    loaders: BTreeMap<String, Loader>,
    callbacks: BTreeMap<String, Callback>,
    promise_lists: BTreeMap<String, Vec<String>>,
    rule_lists: BTreeMap<String, Vec<Value>>,
    traits: Vec<Arc<Declaration>>,
}

impl DeclarationBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bind_names: BTreeMap::new(),
            loaders: BTreeMap::new(),
            callbacks: BTreeMap::new(),
            promise_lists: BTreeMap::new(),
            rule_lists: BTreeMap::new(),
            traits: Vec::new(),
        }
    }

    #[must_use]
    pub fn bind_name(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.bind_names.insert(key.into(), template.into());
        self
    }

    #[must_use]
    pub fn loader(mut self, key: impl Into<String>, deps: Vec<String>, func: LoaderFn) -> Self {
        self.loaders.insert(key.into(), Loader { deps, func });
        self
    }

    #[must_use]
    pub fn callback(
        mut self,
        key: impl Into<String>,
        deps: Vec<String>,
        deferred: bool,
        func: CallbackFn,
    ) -> Self {
        self.callbacks.insert(key.into(), Callback { deps, deferred, func });
        self
    }

    #[must_use]
    pub fn promise(mut self, callback_key: impl Into<String>, predecessors: Vec<String>) -> Self {
        self.promise_lists.insert(callback_key.into(), predecessors);
        self
    }

    #[must_use]
    pub fn rule(mut self, key: impl Into<String>, rule: Value) -> Self {
        self.rule_lists.entry(key.into()).or_default().push(rule);
        self
    }

    #[must_use]
    pub fn rules(mut self, key: impl Into<String>, rules: Vec<Value>) -> Self {
        self.rule_lists.entry(key.into()).or_default().extend(rules);
        self
    }

    #[must_use]
    pub fn add_trait(mut self, declaration: Arc<Declaration>) -> Self {
        self.traits.push(declaration);
        self
    }

    pub fn build(self) -> Result<Arc<Declaration>, EngineError> {
        for key in self.bind_names.keys() {
            if !TOP_LEVEL_KEY_RE.is_match(key) {
                return Err(EngineError::InvalidKeyPattern { key: key.clone(), context: self.name.clone() });
            }
        }
        for key in self.loaders.keys() {
            if !TOP_LEVEL_KEY_RE.is_match(key) {
                return Err(EngineError::InvalidKeyPattern { key: key.clone(), context: self.name.clone() });
            }
        }
        for key in self.callbacks.keys() {
            if !CALLBACK_KEY_RE.is_match(key) {
                return Err(EngineError::InvalidCallbackKey { key: key.clone(), declaration: self.name.clone() });
            }
        }

        let class_id = NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed);

        let merged_traits = flatten_traits(&self.traits);

        let mut merged_bind_names = BTreeMap::new();
        let mut merged_loaders = BTreeMap::new();
        let mut merged_callbacks = BTreeMap::new();
        let mut merged_promise_lists = BTreeMap::new();
        let mut merged_rule_lists = Vec::new();

        for trait_decl in &merged_traits {
            for (key, value) in &trait_decl.own_bind_names {
                merged_bind_names.insert(key.clone(), value.clone());
            }
            for (key, loader) in &trait_decl.own_loaders {
                if merged_loaders.insert(key.clone(), loader.clone()).is_some() {
                    return Err(EngineError::DuplicateTraitLoader { key: key.clone(), declaration: self.name.clone() });
                }
            }
            for (key, callback) in &trait_decl.own_callbacks {
                if merged_callbacks.insert(key.clone(), callback.clone()).is_some() {
                    return Err(EngineError::DuplicateTraitCallback {
                        key: key.clone(),
                        declaration: self.name.clone(),
                    });
                }
            }
            for (key, predecessors) in &trait_decl.own_promise_lists {
                merged_promise_lists.insert(key.clone(), predecessors.clone());
            }
            merged_rule_lists.push(RuleListBucket {
                class_id: trait_decl.class_id,
                class_name: trait_decl.name.clone(),
                rules: trait_decl.own_rule_lists.clone(),
            });
        }

        for (key, value) in &self.bind_names {
            merged_bind_names.insert(key.clone(), value.clone());
        }
        for (key, loader) in &self.loaders {
            merged_loaders.insert(key.clone(), loader.clone());
        }
        for (key, callback) in &self.callbacks {
            merged_callbacks.insert(key.clone(), callback.clone());
        }
        for (key, predecessors) in &self.promise_lists {
            merged_promise_lists.insert(key.clone(), predecessors.clone());
        }
        merged_rule_lists.push(RuleListBucket {
            class_id,
            class_name: self.name.clone(),
            rules: self.rule_lists.clone(),
        });

        Ok(Arc::new(Declaration {
            name: self.name,
            class_id,
            own_bind_names: self.bind_names,
            own_loaders: self.loaders,
            own_callbacks: self.callbacks,
            own_promise_lists: self.promise_lists,
            own_rule_lists: self.rule_lists,
            own_traits: self.traits,
            merged_bind_names,
            merged_loaders,
            merged_callbacks,
            merged_promise_lists,
            merged_rule_lists,
            merged_traits,
            on_start: Mutex::new(Vec::new()),
            on_success: Mutex::new(Vec::new()),
            on_fail: Mutex::new(Vec::new()),
        }))
    }
}

/// Depth-first, duplicate-free flattening of a trait list: each trait's own
/// traits come before the trait itself, and a trait reachable through more
/// than one path is kept only at its first appearance.
fn flatten_traits(traits: &[Arc<Declaration>]) -> Vec<Arc<Declaration>> {
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for t in traits {
        visit_trait(t, &mut out, &mut seen);
    }
    out
}

fn visit_trait(decl: &Arc<Declaration>, out: &mut Vec<Arc<Declaration>>, seen: &mut std::collections::HashSet<u64>) {
    if !seen.insert(decl.class_id) {
        return;
    }
    for t in &decl.own_traits {
        visit_trait(t, out, seen);
    }
    out.push(Arc::clone(decl));
}

impl Declaration {
    /// Registers a hook run once, before a root service's first key is
    /// validated. Intended to be called while assembling the declaration,
    /// before any instance of it is run.
    pub fn on_start(&self, f: impl Fn() + Send + Sync + 'static) {
        self.on_start.lock().expect("on_start lock poisoned").push(Arc::new(f));
    }

    /// Registers a hook run once, after a root service finishes with no
    /// total errors.
    pub fn on_success(&self, f: impl Fn() + Send + Sync + 'static) {
        self.on_success.lock().expect("on_success lock poisoned").push(Arc::new(f));
    }

    /// Registers a hook run once, after a root service finishes with total
    /// errors.
    pub fn on_fail(&self, f: impl Fn() + Send + Sync + 'static) {
        self.on_fail.lock().expect("on_fail lock poisoned").push(Arc::new(f));
    }
}
