//! N-ary flattening and lowering to a [`Runner`].
//!
//! Flattening collapses nested homogeneous `And`/`Or` chains into one wide
//! node. This is what lets [`crate::runner::eval_fast`] evaluate a chain of
//! any depth with bounded native stack usage: a binary tree built by
//! repeated `&` with depth `n` compiles down to a single `And` node holding
//! `n` leaves, which the evaluator then walks with a plain loop over a
//! `Vec`.

use std::sync::Arc;

use crate::ast::{Node, PredicateTree};
use crate::runner::Runner;

/// Collect every transitively-nested child of the same operator
/// (`is_and` selects `And` vs `Or`), stopping at any node whose operator
/// differs, preserving left-to-right leaf order.
///
/// Iterative (explicit stack) rather than recursive: flattening must not
/// itself impose a depth-bound on how deep a homogeneous chain can be.
fn collect_same_op<Ctx: Send + Sync + 'static>(
    root: &PredicateTree<Ctx>,
    is_and: bool,
) -> Vec<PredicateTree<Ctx>> {
    let mut out = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        let matches = match (node.node(), is_and) {
            (Node::And(_), true) | (Node::Or(_), false) => true,
            _ => false,
        };
        if matches {
            let children = match node.node() {
                Node::And(c) | Node::Or(c) => c,
                _ => unreachable!(),
            };
            for child in children.iter().rev() {
                stack.push(child.clone());
            }
        } else {
            out.push(node);
        }
    }
    out
}

/// Lower a predicate tree into its executable [`Runner`] form.
pub fn compile<Ctx: Send + Sync + 'static>(tree: &PredicateTree<Ctx>) -> Runner<Ctx> {
    match tree.node() {
        Node::Leaf { rule_def, bound_params } => {
            let label = rule_def.label(bound_params);
            Runner::Leaf { label, rule_def: rule_def.clone(), bound_params: bound_params.clone() }
        }
        Node::And(_) => {
            let flat = collect_same_op(tree, true);
            lower_nary(flat, true)
        }
        Node::Or(_) => {
            let flat = collect_same_op(tree, false);
            lower_nary(flat, false)
        }
        Node::Not(inner) => match inner.node() {
            // Not(Not(x)) -> x
            Node::Not(grandchild) => compile(grandchild),
            _ => Runner::Not(Box::new(compile(inner))),
        },
        Node::HandleRef(handle) => {
            Runner::HandleRef { label: handle.rule_id().to_string(), handle: handle.clone() }
        }
    }
}

fn lower_nary<Ctx: Send + Sync + 'static>(
    flat: Vec<PredicateTree<Ctx>>,
    is_and: bool,
) -> Runner<Ctx> {
    // A single-child And/Or can appear as an artifact of intermediate
    // passes even though the public constructors guarantee >= 2 at the top
    // level.
    if flat.len() == 1 {
        return compile(&flat[0]);
    }
    let children: Vec<Runner<Ctx>> = flat.iter().map(compile).collect();
    if is_and {
        Runner::And(children)
    } else {
        Runner::Or(children)
    }
}

/// Compile and wrap in an `Arc`, the form installed into a [`crate::runner::Handle`].
pub(crate) fn compile_arc<Ctx: Send + Sync + 'static>(tree: &PredicateTree<Ctx>) -> Arc<Runner<Ctx>> {
    Arc::new(compile(tree))
}
