//! Compiled executable form of a predicate tree, and the handle
//! indirection that makes hot reload possible.
//!
//! [`Runner`] is the output of [`crate::compiler::compile`]: a flattened,
//! already-lowered tree ready for iterative evaluation. Evaluation never
//! recurses with the shape of the source tree — both [`eval_fast`] and
//! [`eval_audit`] walk an explicit work stack, so a pure-AND chain of
//! arbitrary depth (flattened to one wide `And` node, see
//! `compiler::flatten`) or an arbitrarily deep alternation of
//! `And`/`Or`/`Not` evaluate with bounded native stack usage.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde_json::Value;

use crate::ast::RuleDef;
use crate::error::EvalError;
use crate::trace::TraceNode;

/// The lowered, executable form of a predicate tree.
pub enum Runner<Ctx> {
    Leaf { label: String, rule_def: Arc<RuleDef<Ctx>>, bound_params: BTreeMap<String, Value> },
    And(Vec<Runner<Ctx>>),
    Or(Vec<Runner<Ctx>>),
    Not(Box<Runner<Ctx>>),
    HandleRef { label: String, handle: Handle<Ctx> },
}

struct HandleInner<Ctx> {
    registry: String,
    rule_id: String,
    runner: ArcSwapOption<Runner<Ctx>>,
}

/// A stable, mutable indirection to the currently-installed compiled runner
/// for one `(registry, rule_id)` pair.
///
/// Cloning a `Handle` is an `Arc` bump; all clones observe the same
/// identity and the same swaps.
pub struct Handle<Ctx> {
    inner: Arc<HandleInner<Ctx>>,
}

impl<Ctx> Clone for Handle<Ctx> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<Ctx> PartialEq for Handle<Ctx> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl<Ctx> Eq for Handle<Ctx> {}

impl<Ctx> std::fmt::Debug for Handle<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("registry", &self.inner.registry)
            .field("rule_id", &self.inner.rule_id)
            .field("linked", &!self.is_tombstone())
            .finish()
    }
}

impl<Ctx> Handle<Ctx> {
    /// Create a tombstone handle: not yet linked to any compiled runner.
    pub(crate) fn tombstone(registry: impl Into<String>, rule_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                registry: registry.into(),
                rule_id: rule_id.into(),
                runner: ArcSwapOption::from(None),
            }),
        }
    }

    pub fn registry_name(&self) -> &str {
        &self.inner.registry
    }

    pub fn rule_id(&self) -> &str {
        &self.inner.rule_id
    }

    pub fn is_tombstone(&self) -> bool {
        self.inner.runner.load().is_none()
    }

    /// Atomically swap in a newly-compiled runner. The previous runner (if
    /// any) is dropped once the last in-flight reader observing it
    /// completes — `ArcSwapOption` gives us that for free via `Arc`'s
    /// refcount.
    pub(crate) fn install(&self, runner: Arc<Runner<Ctx>>) {
        self.inner.runner.store(Some(runner));
    }

    /// Single atomic-pointer load, no lock.
    fn load(&self) -> Option<Arc<Runner<Ctx>>> {
        self.inner.runner.load_full()
    }

    pub fn eval(&self, ctx: &Ctx) -> Result<bool, EvalError> {
        self.eval_short_circuit(ctx, true)
    }

    pub fn eval_short_circuit(&self, ctx: &Ctx, short_circuit: bool) -> Result<bool, EvalError> {
        let runner = self
            .load()
            .ok_or_else(|| EvalError::UnresolvedRule(self.inner.rule_id.clone()))?;
        eval_fast(&runner, ctx, short_circuit)
    }

    pub fn trace(&self, ctx: &Ctx) -> Result<TraceNode, EvalError> {
        self.trace_short_circuit(ctx, true)
    }

    pub fn trace_short_circuit(
        &self,
        ctx: &Ctx,
        short_circuit: bool,
    ) -> Result<TraceNode, EvalError> {
        let runner = self
            .load()
            .ok_or_else(|| EvalError::UnresolvedRule(self.inner.rule_id.clone()))?;
        eval_audit(&runner, ctx, short_circuit)
    }
}

/// One frame of the explicit evaluation stack: an `And`/`Or`/`Not` node
/// whose children we are part-way through, plus the accumulator built so
/// far.
enum Frame<'a, Ctx> {
    And { children: &'a [Runner<Ctx>], idx: usize, acc: bool },
    Or { children: &'a [Runner<Ctx>], idx: usize, acc: bool },
    Not,
}

fn eval_leaf<Ctx>(rule_def: &RuleDef<Ctx>, bound_params: &BTreeMap<String, Value>, ctx: &Ctx) -> bool {
    (rule_def.callable)(ctx, bound_params)
}

/// Fast-path iterative evaluation: no trace allocation, short-circuit is a
/// runtime flag.
///
/// A tombstone `HandleRef` anywhere in the tree aborts the whole walk with
/// `Err` — an unresolved nested rule fails the invocation, it does not
/// evaluate to `false`.
pub fn eval_fast<Ctx>(root: &Runner<Ctx>, ctx: &Ctx, short_circuit: bool) -> Result<bool, EvalError> {
    let mut stack: Vec<Frame<Ctx>> = Vec::new();
    let mut current = root;
    let mut result;

    loop {
        result = loop {
            match current {
                Runner::Leaf { rule_def, bound_params, .. } => {
                    break eval_leaf(rule_def, bound_params, ctx)
                }
                Runner::HandleRef { handle, .. } => {
                    break handle.eval_short_circuit(ctx, short_circuit)?
                }
                Runner::And(children) => {
                    stack.push(Frame::And { children, idx: 1, acc: true });
                    current = &children[0];
                }
                Runner::Or(children) => {
                    stack.push(Frame::Or { children, idx: 1, acc: false });
                    current = &children[0];
                }
                Runner::Not(inner) => {
                    stack.push(Frame::Not);
                    current = inner;
                }
            }
        };

        loop {
            match stack.pop() {
                None => return Ok(result),
                Some(Frame::Not) => {
                    result = !result;
                    continue;
                }
                Some(Frame::And { children, idx, acc }) => {
                    let acc = acc && result;
                    if (short_circuit && !acc) || idx >= children.len() {
                        result = acc;
                        continue;
                    }
                    stack.push(Frame::And { children, idx: idx + 1, acc });
                    current = &children[idx];
                    break;
                }
                Some(Frame::Or { children, idx, acc }) => {
                    let acc = acc || result;
                    if (short_circuit && acc) || idx >= children.len() {
                        result = acc;
                        continue;
                    }
                    stack.push(Frame::Or { children, idx: idx + 1, acc });
                    current = &children[idx];
                    break;
                }
            }
        }
    }
}

/// Same walk as [`eval_fast`], but builds a [`TraceNode`] tree instead of a
/// bare `bool`. A tombstone `HandleRef` aborts the trace with `Err` rather
/// than rendering a fabricated leaf.
pub fn eval_audit<Ctx>(root: &Runner<Ctx>, ctx: &Ctx, short_circuit: bool) -> Result<TraceNode, EvalError> {
    match root {
        Runner::Leaf { label, rule_def, bound_params } => {
            let success = eval_leaf(rule_def, bound_params, ctx);
            Ok(TraceNode::leaf(label.clone(), success))
        }
        Runner::HandleRef { label, handle } => {
            let inner = handle.trace_short_circuit(ctx, short_circuit)?;
            Ok(inner.relabel(label.clone()))
        }
        Runner::Not(child) => {
            let sub = eval_audit(child, ctx, short_circuit)?;
            let success = !sub.success.unwrap_or(false);
            Ok(TraceNode::unary("not", success, sub))
        }
        Runner::And(children) => eval_audit_nary("and", children, ctx, short_circuit, true),
        Runner::Or(children) => eval_audit_nary("or", children, ctx, short_circuit, false),
    }
}

fn eval_audit_nary<Ctx>(
    operator: &'static str,
    children: &[Runner<Ctx>],
    ctx: &Ctx,
    short_circuit: bool,
    is_and: bool,
) -> Result<TraceNode, EvalError> {
    let mut traces = Vec::with_capacity(children.len());
    let mut acc = is_and;
    let mut short_circuited = false;

    for child in children {
        if short_circuited {
            traces.push(TraceNode::skipped());
            continue;
        }
        let sub = eval_audit(child, ctx, short_circuit)?;
        let child_success = sub.success.unwrap_or(false);
        acc = if is_and { acc && child_success } else { acc || child_success };
        traces.push(sub);
        if short_circuit && ((is_and && !child_success) || (!is_and && child_success)) {
            short_circuited = true;
        }
    }

    Ok(TraceNode::nary(operator, acc, traces))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{predicate, PredicateTree};

    struct Ctx;

    fn leaf(name: &str, value: bool) -> PredicateTree<Ctx> {
        predicate(move |_: &Ctx| value, name.to_string())
    }

    #[test]
    fn fast_and_audit_agree() {
        let tree = leaf("a", true).and_(leaf("b", false)).or_(leaf("c", true));
        let fast = tree.eval(&Ctx).unwrap();
        let audit = tree.trace(&Ctx).unwrap();
        assert_eq!(Some(fast), audit.success);
    }

    #[test]
    fn deep_and_chain_does_not_overflow_stack() {
        let mut children = Vec::new();
        for i in 0..4000 {
            children.push(leaf(&format!("p{i}"), true));
        }
        let tree = crate::ast::all_of(children).unwrap();
        assert!(tree.eval(&Ctx).unwrap());
    }
}
