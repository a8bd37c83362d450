//! Predicate AST and combinators
//!
//! Trees are immutable once built; the only mutation in this module is the
//! lazily-populated runner cache attached to each tree node (see
//! [`PredicateTree::eval`] / [`PredicateTree::trace`]), which lets repeated
//! invocation of the same tree object skip re-compilation without the tree
//! itself ever changing shape.
//!
//! Combinators (`&`, `|`, `!`, [`all_of`], [`any_of`]) are all O(1): they
//! wrap existing trees in a new `Arc`-backed node rather than copying
//! children.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not as StdNot};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::error::{ConstructionError, EvalError};
use crate::runner::{Handle, Runner};

/// The declared type of a rule definition's parameter, used for the
/// checkable subset of type mismatches at leaf-construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    Number,
    String,
    /// No static check is performed for this parameter.
    Any,
}

impl ParamType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::Any => true,
            ParamType::Bool => value.is_boolean(),
            ParamType::Number => value.is_number(),
            ParamType::String => value.is_string(),
        }
    }
}

/// One declared parameter of a rule definition: name, type tag, optional
/// default.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self { name: name.into(), ty, default: None }
    }

    pub fn with_default(name: impl Into<String>, ty: ParamType, default: Value) -> Self {
        Self { name: name.into(), ty, default: Some(default) }
    }
}

/// An opaque, registered user predicate: `(Ctx, params) -> bool`.
pub type RuleCallable<Ctx> =
    Arc<dyn Fn(&Ctx, &BTreeMap<String, Value>) -> bool + Send + Sync>;

/// An immutable, registered rule definition: name + callable + parameter
/// schema.
pub struct RuleDef<Ctx> {
    pub name: String,
    pub doc: Option<String>,
    pub params: Vec<ParamSpec>,
    pub(crate) callable: RuleCallable<Ctx>,
}

impl<Ctx> fmt::Debug for RuleDef<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleDef").field("name", &self.name).field("params", &self.params.len()).finish()
    }
}

impl<Ctx> RuleDef<Ctx> {
    /// Validate and fill in defaults for a caller-supplied parameter map.
    ///
    /// Missing required params, unknown extra params, and checkable type
    /// mismatches are all `ConstructionError::ParamError`.
    pub(crate) fn bind_params(
        &self,
        mut supplied: BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, ConstructionError> {
        let mut bound = BTreeMap::new();
        for spec in &self.params {
            match supplied.remove(&spec.name) {
                Some(value) => {
                    if !spec.ty.accepts(&value) {
                        return Err(ConstructionError::ParamError {
                            rule: self.name.clone(),
                            reason: format!("param '{}' has wrong type", spec.name),
                        });
                    }
                    bound.insert(spec.name.clone(), value);
                }
                None => match &spec.default {
                    Some(default) => {
                        bound.insert(spec.name.clone(), default.clone());
                    }
                    None => {
                        return Err(ConstructionError::ParamError {
                            rule: self.name.clone(),
                            reason: format!("missing required param '{}'", spec.name),
                        });
                    }
                },
            }
        }
        if let Some((extra, _)) = supplied.into_iter().next() {
            return Err(ConstructionError::ParamError {
                rule: self.name.clone(),
                reason: format!("unknown param '{extra}'"),
            });
        }
        Ok(bound)
    }

    /// A human-readable label used in audit traces: `name(k=v, ...)`.
    pub(crate) fn label(&self, params: &BTreeMap<String, Value>) -> String {
        if params.is_empty() {
            return self.name.clone();
        }
        let parts: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}({})", self.name, parts.join(", "))
    }
}

/// Cheaply-cloned handle-back-to-a-rule-def, returned by
/// [`crate::registry::Registry::register`]. Calling it with concrete
/// parameters produces a bound [`PredicateTree::Leaf`].
#[derive(Clone)]
pub struct Producer<Ctx> {
    rule_def: Arc<RuleDef<Ctx>>,
}

impl<Ctx: Send + Sync + 'static> Producer<Ctx> {
    pub(crate) fn new(rule_def: Arc<RuleDef<Ctx>>) -> Self {
        Self { rule_def }
    }

    pub fn name(&self) -> &str {
        &self.rule_def.name
    }

    /// Bind concrete parameters and produce a `Leaf` tree.
    pub fn call(
        &self,
        params: BTreeMap<String, Value>,
    ) -> Result<PredicateTree<Ctx>, ConstructionError> {
        let bound = self.rule_def.bind_params(params)?;
        Ok(PredicateTree::new(Node::Leaf { rule_def: self.rule_def.clone(), bound_params: bound }))
    }

    /// Convenience for zero-parameter rule defs.
    pub fn call_no_params(&self) -> Result<PredicateTree<Ctx>, ConstructionError> {
        self.call(BTreeMap::new())
    }
}

pub(crate) enum Node<Ctx> {
    Leaf { rule_def: Arc<RuleDef<Ctx>>, bound_params: BTreeMap<String, Value> },
    And(Vec<PredicateTree<Ctx>>),
    Or(Vec<PredicateTree<Ctx>>),
    Not(PredicateTree<Ctx>),
    HandleRef(Handle<Ctx>),
}

struct TreeInner<Ctx> {
    node: Node<Ctx>,
    fast_runner: OnceCell<Arc<Runner<Ctx>>>,
}

/// An immutable predicate tree. Cloning is an `Arc` bump, not a copy.
///
/// Invariants upheld by construction:
/// every `HandleRef` points at a handle the owning engine knows about, every
/// `Leaf`'s bound parameters were validated against its rule def's schema at
/// construction time, and `And`/`Or` nodes always carry at least two
/// children (enforced by [`all_of`]/[`any_of`]; the binary `&`/`|`
/// operators always produce exactly two).
pub struct PredicateTree<Ctx> {
    inner: Arc<TreeInner<Ctx>>,
}

impl<Ctx> Clone for PredicateTree<Ctx> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<Ctx> PartialEq for PredicateTree<Ctx> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<Ctx: Send + Sync + 'static> PredicateTree<Ctx> {
    pub(crate) fn new(node: Node<Ctx>) -> Self {
        Self { inner: Arc::new(TreeInner { node, fast_runner: OnceCell::new() }) }
    }

    pub(crate) fn node(&self) -> &Node<Ctx> {
        &self.inner.node
    }

    /// `~p` / `not_`
    pub fn not_(self) -> PredicateTree<Ctx> {
        PredicateTree::new(Node::Not(self))
    }

    /// `p & q` / `and_`
    pub fn and_(self, other: PredicateTree<Ctx>) -> PredicateTree<Ctx> {
        PredicateTree::new(Node::And(vec![self, other]))
    }

    /// `p | q` / `or_`
    pub fn or_(self, other: PredicateTree<Ctx>) -> PredicateTree<Ctx> {
        PredicateTree::new(Node::Or(vec![self, other]))
    }

    fn fast_runner(&self) -> Arc<Runner<Ctx>> {
        self.inner
            .fast_runner
            .get_or_init(|| Arc::new(crate::compiler::compile(self)))
            .clone()
    }

    /// Fast-path evaluation: short-circuit, no trace allocation.
    ///
    /// Fails with `EvalError::UnresolvedRule` if the tree contains a `Ref`
    /// whose handle has not yet been linked to a compiled rule.
    pub fn eval(&self, ctx: &Ctx) -> Result<bool, EvalError> {
        self.eval_short_circuit(ctx, true)
    }

    pub fn eval_short_circuit(&self, ctx: &Ctx, short_circuit: bool) -> Result<bool, EvalError> {
        crate::runner::eval_fast(&self.fast_runner(), ctx, short_circuit)
    }

    /// Audit-mode evaluation, producing a trace tree. Not cached: audit
    /// mode is not on the hot path.
    pub fn trace(&self, ctx: &Ctx) -> Result<crate::trace::TraceNode, EvalError> {
        self.trace_short_circuit(ctx, true)
    }

    pub fn trace_short_circuit(
        &self,
        ctx: &Ctx,
        short_circuit: bool,
    ) -> Result<crate::trace::TraceNode, EvalError> {
        let runner = crate::compiler::compile(self);
        crate::runner::eval_audit(&runner, ctx, short_circuit)
    }
}

impl<Ctx: Send + Sync + 'static> BitAnd for PredicateTree<Ctx> {
    type Output = PredicateTree<Ctx>;
    fn bitand(self, rhs: Self) -> Self::Output {
        self.and_(rhs)
    }
}

impl<Ctx: Send + Sync + 'static> BitOr for PredicateTree<Ctx> {
    type Output = PredicateTree<Ctx>;
    fn bitor(self, rhs: Self) -> Self::Output {
        self.or_(rhs)
    }
}

impl<Ctx: Send + Sync + 'static> StdNot for PredicateTree<Ctx> {
    type Output = PredicateTree<Ctx>;
    fn not(self) -> Self::Output {
        self.not_()
    }
}

/// Direct N-ary AND over `children` (must have at least two). Bypasses the
/// binary-tree build cost of folding `&` over a long `Vec`.
pub fn all_of<Ctx: Send + Sync + 'static>(
    children: Vec<PredicateTree<Ctx>>,
) -> Result<PredicateTree<Ctx>, ConstructionError> {
    if children.len() < 2 {
        return Err(ConstructionError::TooFewChildren { op: "all_of", got: children.len() });
    }
    Ok(PredicateTree::new(Node::And(children)))
}

/// Direct N-ary OR over `children` (must have at least two).
pub fn any_of<Ctx: Send + Sync + 'static>(
    children: Vec<PredicateTree<Ctx>>,
) -> Result<PredicateTree<Ctx>, ConstructionError> {
    if children.len() < 2 {
        return Err(ConstructionError::TooFewChildren { op: "any_of", got: children.len() });
    }
    Ok(PredicateTree::new(Node::Or(children)))
}

/// A standalone leaf predicate, usable without a registry: wraps a plain
/// `Fn(&Ctx) -> bool` closure and makes it composable with `&`, `|`, `~`,
/// [`all_of`] and [`any_of`].
pub fn predicate<Ctx, F>(f: F, name: impl Into<String>) -> PredicateTree<Ctx>
where
    Ctx: Send + Sync + 'static,
    F: Fn(&Ctx) -> bool + Send + Sync + 'static,
{
    let name = name.into();
    let rule_def = Arc::new(RuleDef {
        name,
        doc: None,
        params: Vec::new(),
        callable: Arc::new(move |ctx, _params| f(ctx)),
    });
    PredicateTree::new(Node::Leaf { rule_def, bound_params: BTreeMap::new() })
}
