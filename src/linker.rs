//! Links a parsed [`Manifest`] against a [`RegistryManager`], producing
//! live [`Handle`]s for every rule id.
//!
//! Translation is bottom-up: every `leaf` resolves against the named
//! registry, every `ref` resolves to another rule's handle within the same
//! manifest, and `and`/`or`/`not` recurse. Cycles among `ref` nodes are
//! found with a DFS that tracks the path so far, the way a referent-rule
//! resolver reports which chain of names closed the loop rather than just
//! flagging that one exists.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::ast::{Node, PredicateTree};
use crate::compiler::compile_arc;
use crate::error::LinkError;
use crate::manifest::{LogicNode, Manifest};
use crate::registry::RegistryManager;
use crate::runner::Handle;

/// Outcome of linking one manifest: every rule id in it now has a handle,
/// freshly compiled and installed.
pub struct LinkedManifest<Ctx> {
    pub registry: String,
    pub handles: BTreeMap<String, Handle<Ctx>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InProgress,
    Done,
}

/// Link `manifest` against `registries`, reusing `existing_handles` for any
/// rule id already known (so hot reload updates handles in place rather
/// than minting new ones readers might still be holding stale references
/// to).
pub fn link<Ctx: Send + Sync + 'static>(
    manifest: &Manifest,
    registries: &RegistryManager<Ctx>,
    existing_handles: &HashMap<String, Handle<Ctx>>,
) -> Result<LinkedManifest<Ctx>, LinkError> {
    let registry = registries
        .get(&manifest.registry)
        .ok_or_else(|| LinkError::UnknownRegistry(manifest.registry.clone()))?;

    let nodes = manifest.parse_nodes()?;

    let mut handles: HashMap<String, Handle<Ctx>> = HashMap::new();
    for rule_id in nodes.keys() {
        let handle = existing_handles
            .get(rule_id)
            .cloned()
            .unwrap_or_else(|| Handle::tombstone(manifest.registry.clone(), rule_id.clone()));
        handles.insert(rule_id.clone(), handle);
    }

    let mut visiting: HashMap<String, VisitState> = HashMap::new();
    let mut compiled: HashMap<String, Arc<PredicateTree<Ctx>>> = HashMap::new();

    for rule_id in nodes.keys() {
        resolve(rule_id, &nodes, registry, &handles, &mut visiting, &mut compiled, &mut Vec::new())?;
    }

    for (rule_id, tree) in &compiled {
        let handle = &handles[rule_id];
        handle.install(compile_arc(tree));
    }

    Ok(LinkedManifest { registry: manifest.registry.clone(), handles: handles.into_iter().collect() })
}

fn resolve<Ctx: Send + Sync + 'static>(
    rule_id: &str,
    nodes: &BTreeMap<String, LogicNode>,
    registry: &crate::registry::Registry<Ctx>,
    handles: &HashMap<String, Handle<Ctx>>,
    visiting: &mut HashMap<String, VisitState>,
    compiled: &mut HashMap<String, Arc<PredicateTree<Ctx>>>,
    path: &mut Vec<String>,
) -> Result<Arc<PredicateTree<Ctx>>, LinkError> {
    if let Some(tree) = compiled.get(rule_id) {
        return Ok(tree.clone());
    }
    match visiting.get(rule_id) {
        Some(VisitState::InProgress) => {
            let mut cycle = path.clone();
            cycle.push(rule_id.to_string());
            let start = cycle.iter().position(|id| id == rule_id).unwrap_or(0);
            return Err(LinkError::RuleCycle(cycle[start..].to_vec()));
        }
        Some(VisitState::Done) => unreachable!("done nodes are always in `compiled`"),
        None => {}
    }

    let node = nodes
        .get(rule_id)
        .ok_or_else(|| LinkError::UnknownRule { registry: registry.name().to_string(), rule: rule_id.to_string() })?;

    visiting.insert(rule_id.to_string(), VisitState::InProgress);
    path.push(rule_id.to_string());

    let tree = Arc::new(build(node, rule_id, nodes, registry, handles, visiting, compiled, path)?);

    path.pop();
    visiting.insert(rule_id.to_string(), VisitState::Done);
    compiled.insert(rule_id.to_string(), tree.clone());
    Ok(tree)
}

fn build<Ctx: Send + Sync + 'static>(
    node: &LogicNode,
    current_rule_id: &str,
    nodes: &BTreeMap<String, LogicNode>,
    registry: &crate::registry::Registry<Ctx>,
    handles: &HashMap<String, Handle<Ctx>>,
    visiting: &mut HashMap<String, VisitState>,
    compiled: &mut HashMap<String, Arc<PredicateTree<Ctx>>>,
    path: &mut Vec<String>,
) -> Result<PredicateTree<Ctx>, LinkError> {
    match node {
        LogicNode::Leaf { rule_def_name, params } => {
            let rule_def = registry.get(rule_def_name).ok_or_else(|| LinkError::UnknownRule {
                registry: registry.name().to_string(),
                rule: rule_def_name.clone(),
            })?;
            let bound = rule_def.bind_params(params.clone())?;
            Ok(PredicateTree::new(Node::Leaf { rule_def, bound_params: bound }))
        }
        LogicNode::And(children) | LogicNode::Or(children) => {
            let mut built = Vec::with_capacity(children.len());
            for child in children {
                built.push(build(child, current_rule_id, nodes, registry, handles, visiting, compiled, path)?);
            }
            Ok(PredicateTree::new(if matches!(node, LogicNode::And(_)) {
                Node::And(built)
            } else {
                Node::Or(built)
            }))
        }
        LogicNode::Not(inner) => {
            let built = build(inner, current_rule_id, nodes, registry, handles, visiting, compiled, path)?;
            Ok(built.not_())
        }
        LogicNode::Ref { ref_id } => {
            if nodes.contains_key(ref_id) {
                resolve(ref_id, nodes, registry, handles, visiting, compiled, path)?;
            }
            let handle = handles
                .get(ref_id)
                .cloned()
                .unwrap_or_else(|| Handle::tombstone(registry.name().to_string(), ref_id.clone()));
            Ok(PredicateTree::new(Node::HandleRef(handle)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    struct Ctx {
        flag: bool,
    }

    fn manifest(json: &str) -> Manifest {
        serde_json::from_str(json).unwrap()
    }

    fn registries_with(name: &str) -> RegistryManager<Ctx> {
        let mut registry = Registry::new(name).unwrap();
        registry.register("is_flagged", vec![], |ctx: &Ctx, _| ctx.flag).unwrap();
        let mut manager = RegistryManager::new();
        manager.add(registry).unwrap();
        manager
    }

    #[test]
    fn links_simple_leaf() {
        let manager = registries_with("people");
        let m = manifest(
            r#"{"registry": "people", "rules": {"r1": {"node_type": "leaf", "rule": {"rule_def_name": "is_flagged"}}}}"#,
        );
        let linked = link(&m, &manager, &HashMap::new()).unwrap();
        let handle = &linked.handles["r1"];
        assert!(handle.eval(&Ctx { flag: true }).unwrap());
        assert!(!handle.eval(&Ctx { flag: false }).unwrap());
    }

    #[test]
    fn unknown_registry_is_rejected() {
        let manager = registries_with("people");
        let m = manifest(r#"{"registry": "ghosts", "rules": {}}"#);
        let err = link(&m, &manager, &HashMap::new()).unwrap_err();
        assert!(matches!(err, LinkError::UnknownRegistry(_)));
    }

    #[test]
    fn unknown_rule_def_name_is_rejected() {
        let manager = registries_with("people");
        let m = manifest(
            r#"{"registry": "people", "rules": {"r1": {"node_type": "leaf", "rule": {"rule_def_name": "nope"}}}}"#,
        );
        let err = link(&m, &manager, &HashMap::new()).unwrap_err();
        assert!(matches!(err, LinkError::UnknownRule { .. }));
    }

    #[test]
    fn detects_direct_ref_cycle() {
        let manager = registries_with("people");
        let m = manifest(
            r#"{"registry": "people", "rules": {
                "a": {"node_type": "ref", "ref_id": "b"},
                "b": {"node_type": "ref", "ref_id": "a"}
            }}"#,
        );
        let err = link(&m, &manager, &HashMap::new()).unwrap_err();
        match err {
            LinkError::RuleCycle(path) => {
                assert!(path.contains(&"a".to_string()));
                assert!(path.contains(&"b".to_string()));
            }
            other => panic!("expected RuleCycle, got {other:?}"),
        }
    }

    #[test]
    fn ref_to_rule_outside_manifest_reuses_existing_handle() {
        let manager = registries_with("people");
        let existing = Handle::tombstone("people".to_string(), "elsewhere".to_string());
        existing.install(compile_arc(&PredicateTree::new(Node::Leaf {
            rule_def: manager.get("people").unwrap().get("is_flagged").unwrap(),
            bound_params: BTreeMap::new(),
        })));
        let mut existing_handles = HashMap::new();
        existing_handles.insert("elsewhere".to_string(), existing.clone());

        let m = manifest(
            r#"{"registry": "people", "rules": {"r1": {"node_type": "ref", "ref_id": "elsewhere"}}}"#,
        );
        let linked = link(&m, &manager, &existing_handles).unwrap();
        assert!(linked.handles["r1"].eval(&Ctx { flag: true }).unwrap());
    }
}
