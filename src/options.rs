//! Configuration for a [`crate::Service`] run.
use std::sync::Arc;

use crate::validator::{JsonSchemaRuleValidator, RuleValidator};

/// Tuning knobs for a service run. The defaults match the original's
/// untunable behavior; `with_*` methods let a caller relax them (mainly
/// useful for tests that exercise the name resolver or plug in a stub
/// validator).
#[derive(Clone)]
pub struct EngineOptions {
    /// The maximum number of nested `{{key}}` substitutions a single name
    /// template may require before resolution is considered non-terminating.
    pub(crate) max_substitution_depth: usize,
    /// The validator used to evaluate rule lists against scoped instance
    /// values.
    pub(crate) validator: Arc<dyn RuleValidator>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { max_substitution_depth: 64, validator: Arc::new(JsonSchemaRuleValidator) }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_substitution_depth(mut self, depth: usize) -> Self {
        self.max_substitution_depth = depth;
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn RuleValidator>) -> Self {
        self.validator = validator;
        self
    }
}
