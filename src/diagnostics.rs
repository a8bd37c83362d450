//! Ambient logging helpers shared by the linker and engine.
//!
//! The crate logs through the `log` facade rather than printing directly,
//! so an embedding application's own logger (env_logger, etc.) decides
//! where these lines end up.

use crate::trace::TraceNode;

/// Render a one-line summary of a trace tree for a log line, without
/// walking the whole thing (skipped subtrees are collapsed).
pub fn summarize_trace(trace: &TraceNode) -> String {
    match trace.success {
        Some(true) => format!("{} -> pass", trace.label),
        Some(false) => format!("{} -> fail", trace.label),
        None => format!("{} -> skipped", trace.label),
    }
}
