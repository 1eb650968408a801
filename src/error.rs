//! Error types returned by declaration construction and resolution.
use std::fmt;

/// A programmer error: an invariant of a [`crate::Declaration`] or
/// [`crate::Service`] was violated. These are distinct from validation
/// failures, which are ordinary data and surface through
/// [`crate::Response::Errors`] instead of this type.
#[derive(Debug)]
pub enum EngineError {
    /// A key did not match the grammar required of its position (top-level
    /// key, callback key, dotted rule key, ...).
    InvalidKeyPattern { key: String, context: String },
    /// Two traits (or a trait and the declaration itself) declared a loader
    /// for the same key.
    DuplicateTraitLoader { key: String, declaration: String },
    /// Two traits (or a trait and the declaration itself) declared a
    /// callback for the same key.
    DuplicateTraitCallback { key: String, declaration: String },
    /// A callback key did not match `mainKey__suffix[@defer]`.
    InvalidCallbackKey { key: String, declaration: String },
    /// A dependency chain revisited the same key twice.
    CircularReference { chain: String },
    /// A rule-embedded dependency reference named a wildcard segment, which
    /// cannot be resolved to a concrete value.
    WildcardInRuleDependency { key: String },
    /// A name template needed a `[...]` placeholder (because the key it
    /// names carries an array-of-object rule somewhere in the class
    /// hierarchy) but did not have one.
    MissingPlaceholder { name: String, declaration: String },
    /// A name template carried more than one `[...]` placeholder.
    DuplicatePlaceholder { name: String, declaration: String },
    /// A name template referenced a key with no bound name anywhere in the
    /// class hierarchy or the instance's own names.
    UnknownBindName { key: String, declaration: String },
    /// A dotted rule key descends through an ancestor that is never declared
    /// as an array-of-object rule.
    ArrayObjectRuleRequired { key: String, declaration: String },
    /// Name-template substitution did not reach a fixed point within the
    /// configured depth budget.
    SubstitutionDepthExceeded { template: String },
    /// The root service finished with no errors but never populated
    /// `result`.
    MissingResult,
    /// A service was run more than once.
    AlreadyRun { declaration: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKeyPattern { key, context } => {
                write!(f, "'{key}' is not a valid key in {context}")
            }
            Self::DuplicateTraitLoader { key, declaration } => {
                write!(f, "loader '{key}' is declared by more than one trait of {declaration}")
            }
            Self::DuplicateTraitCallback { key, declaration } => {
                write!(f, "callback '{key}' is declared by more than one trait of {declaration}")
            }
            Self::InvalidCallbackKey { key, declaration } => {
                write!(f, "'{key}' is not a valid callback key in {declaration}")
            }
            Self::CircularReference { chain } => {
                write!(f, "circular dependency: {chain}")
            }
            Self::WildcardInRuleDependency { key } => {
                write!(f, "rule dependency '{key}' cannot reference a wildcard segment")
            }
            Self::MissingPlaceholder { name, declaration } => {
                write!(f, "name for '{name}' in {declaration} must contain a [...] placeholder")
            }
            Self::DuplicatePlaceholder { name, declaration } => {
                write!(f, "name '{name}' in {declaration} contains more than one [...] placeholder")
            }
            Self::UnknownBindName { key, declaration } => {
                write!(f, "no bound name for '{key}' in {declaration}")
            }
            Self::ArrayObjectRuleRequired { key, declaration } => {
                write!(
                    f,
                    "'{key}' must carry an array-of-object rule somewhere in {declaration} before a descendant key can be ruled"
                )
            }
            Self::SubstitutionDepthExceeded { template } => {
                write!(f, "name template '{template}' did not reach a fixed point")
            }
            Self::MissingResult => write!(f, "service finished with no errors but never set 'result'"),
            Self::AlreadyRun { declaration } => write!(f, "{declaration} instance was already run"),
        }
    }
}

impl std::error::Error for EngineError {}
