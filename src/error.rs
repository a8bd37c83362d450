//! Error types for the predicate logic engine.
//!
//! Errors are grouped by the phase in which they can occur (construction,
//! link, evaluation), then unified behind [`PredylogicError`] so callers can
//! match on a single type at the crate boundary while internal code keeps
//! narrow, precise error enums.

use thiserror::Error;

/// Result type alias using [`PredylogicError`]
pub type Result<T> = std::result::Result<T, PredylogicError>;

/// Errors raised while constructing predicate trees (leaves, combinators)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConstructionError {
    /// A rule definition with this name is already registered
    #[error("duplicate rule definition: {0}")]
    DuplicateRule(String),

    /// A registry with this name is already registered
    #[error("duplicate registry: {0}")]
    DuplicateRegistry(String),

    /// A name is empty or otherwise reserved
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// A leaf's bound parameters don't match the rule def's schema
    #[error("parameter error for rule '{rule}': {reason}")]
    ParamError { rule: String, reason: String },

    /// `all_of`/`any_of` called with fewer than two children
    #[error("{op} requires at least two children, got {got}")]
    TooFewChildren { op: &'static str, got: usize },
}

/// Errors raised while linking a manifest against a registry manager
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    /// The manifest names a registry the manager doesn't know about
    #[error("unknown registry: {0}")]
    UnknownRegistry(String),

    /// A leaf names a rule def the registry doesn't have
    #[error("unknown rule definition '{rule}' in registry '{registry}'")]
    UnknownRule { registry: String, rule: String },

    /// A rule-id cycle was found while resolving `ref` nodes
    #[error("cyclic rule reference: {}", .0.join(" -> "))]
    RuleCycle(Vec<String>),

    /// Propagated from [`ConstructionError`] while linking leaves
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    /// A rule node in the manifest had the wrong shape for its `node_type`
    #[error("manifest validation failed for rule '{rule_id}': {reason}")]
    ManifestValidation { rule_id: String, reason: String },
}

/// Errors raised while evaluating a compiled predicate tree
#[derive(Debug, Error)]
pub enum EvalError {
    /// A handle was invoked before its rule id was ever linked
    #[error("unresolved rule: {0}")]
    UnresolvedRule(String),
}

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum PredylogicError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
