//! An embedded, schema-driven predicate logic engine.
//!
//! Predicate trees are built in code from registered rule definitions or
//! loaded from a JSON manifest, compiled to a flattened executable form, and
//! evaluated either fast (short-circuit, no trace) or in audit mode (full
//! trace tree, every branch visited). Manifests can be reloaded at runtime:
//! existing [`Handle`]s swap to the newly-linked logic in place, so callers
//! holding one never see a torn or stale tree.
//!
//! ```
//! use predylogic::{all_of, predicate, RegistryManager, Registry, RuleEngine};
//!
//! struct Order { total_cents: u64, flagged: bool }
//!
//! let p = predicate(|o: &Order| o.total_cents > 0, "has_positive_total")
//!     .and_(predicate(|o: &Order| !o.flagged, "not_flagged"));
//!
//! assert!(p.eval(&Order { total_cents: 500, flagged: false }).unwrap());
//! ```

pub mod ast;
pub mod compiler;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod linker;
pub mod manifest;
pub mod registry;
pub mod runner;
pub mod trace;

pub use ast::{all_of, any_of, predicate, ParamSpec, ParamType, PredicateTree, Producer};
pub use engine::{EngineStats, RuleEngine};
pub use error::{ConstructionError, EvalError, LinkError, PredylogicError, Result};
pub use linker::{link, LinkedManifest};
pub use manifest::{LogicNode, Manifest};
pub use registry::{Registry, RegistryManager};
pub use runner::Handle;
pub use trace::TraceNode;
