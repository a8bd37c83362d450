//! Audit-mode trace tree.

use serde::Serialize;

/// One node of an audit-mode execution trace.
///
/// `success` is `None` only for a `skipped` node: a sibling that
/// short-circuit evaluation never reached.
#[derive(Debug, Clone, Serialize)]
pub struct TraceNode {
    pub label: String,
    pub operator: &'static str,
    pub success: Option<bool>,
    pub skipped: bool,
    pub children: Vec<TraceNode>,
}

impl TraceNode {
    pub(crate) fn leaf(label: String, success: bool) -> Self {
        Self { label, operator: "leaf", success: Some(success), skipped: false, children: Vec::new() }
    }

    pub(crate) fn unary(operator: &'static str, success: bool, child: TraceNode) -> Self {
        Self {
            label: operator.to_string(),
            operator,
            success: Some(success),
            skipped: false,
            children: vec![child],
        }
    }

    pub(crate) fn nary(operator: &'static str, success: bool, children: Vec<TraceNode>) -> Self {
        Self {
            label: operator.to_string(),
            operator,
            success: Some(success),
            skipped: false,
            children,
        }
    }

    pub(crate) fn skipped() -> Self {
        Self {
            label: String::new(),
            operator: "leaf",
            success: None,
            skipped: true,
            children: Vec::new(),
        }
    }

    /// Used by `HandleRef` inlining: the inner trace keeps its shape but is
    /// relabeled with the rule-id the `ref` was pointing at.
    pub(crate) fn relabel(mut self, label: String) -> Self {
        self.label = label;
        self
    }
}
