//! The top-level entry point: owns the registries, the handle table, and
//! the single re-entrant lock that serializes manifest updates.
//!
//! Registries are fixed at construction (rule definitions are registered in
//! code, not reloaded). Manifests are the moving part: [`RuleEngine::update_manifests`]
//! can be called at any time, including from within a rule callback running
//! on another handle — the lock is re-entrant for exactly that reason.

use std::collections::HashMap;

use log::{debug, info};
use parking_lot::{ReentrantMutex, RwLock};

use crate::error::{LinkError, PredylogicError};
use crate::manifest::Manifest;
use crate::registry::RegistryManager;
use crate::runner::Handle;

/// `(registry name, rule id)`, the coordinate a handle lives at.
type HandleKey = (String, String);

/// Point-in-time counts, useful for health checks and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub registry_count: usize,
    pub handle_count: usize,
    pub tombstone_count: usize,
}

pub struct RuleEngine<Ctx> {
    registries: RegistryManager<Ctx>,
    handles: RwLock<HashMap<HandleKey, Handle<Ctx>>>,
    update_lock: ReentrantMutex<()>,
}

impl<Ctx: Send + Sync + 'static> RuleEngine<Ctx> {
    pub fn new(registries: RegistryManager<Ctx>) -> Self {
        Self { registries, handles: RwLock::new(HashMap::new()), update_lock: ReentrantMutex::new(()) }
    }

    pub fn registries(&self) -> &RegistryManager<Ctx> {
        &self.registries
    }

    /// Link every manifest in `manifests` and install every rule id they
    /// define. The whole batch is one atomic operation: all manifests are
    /// linked against a single consistent snapshot of the handle table, and
    /// nothing is installed unless every manifest links successfully. A
    /// failure partway through the batch leaves all existing handles
    /// untouched, including ones from manifests earlier in the same batch.
    ///
    /// Already-linked rule ids from a previous call with the same
    /// `(registry, rule_id)` keep their identity — existing [`Handle`]
    /// clones held by callers observe the swap rather than going stale.
    pub fn update_manifests(&self, manifests: &[Manifest]) -> Result<(), PredylogicError> {
        let _guard = self.update_lock.lock();

        let snapshot = self.handles.read().clone();

        let mut linked_manifests = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            info!("linking manifest for registry '{}' ({} rules)", manifest.registry, manifest.rules.len());
            let existing: HashMap<String, Handle<Ctx>> = snapshot
                .iter()
                .filter(|((registry, _), _)| registry == &manifest.registry)
                .map(|((_, rule_id), handle)| (rule_id.clone(), handle.clone()))
                .collect();
            linked_manifests.push(crate::linker::link(manifest, &self.registries, &existing)?);
        }

        let mut handles = self.handles.write();
        for linked in linked_manifests {
            for (rule_id, handle) in linked.handles {
                debug!("installed rule '{}' in registry '{}'", rule_id, linked.registry);
                handles.insert((linked.registry.clone(), rule_id), handle);
            }
        }
        Ok(())
    }

    /// Look up an already-linked handle.
    pub fn get_handle(&self, registry: &str, rule_id: &str) -> Option<Handle<Ctx>> {
        self.handles.read().get(&(registry.to_string(), rule_id.to_string())).cloned()
    }

    /// Look up a handle, creating (and registering) a tombstone if this
    /// `(registry, rule_id)` has never been linked — useful for callers
    /// that want to hold a stable reference before the manifest that
    /// defines it has arrived. Double-checked locking: the common case
    /// (handle already exists) only ever takes the read lock.
    pub fn get_or_create_handle(&self, registry: &str, rule_id: &str) -> Result<Handle<Ctx>, LinkError> {
        if !self.registries.contains(registry) {
            return Err(LinkError::UnknownRegistry(registry.to_string()));
        }
        let key = (registry.to_string(), rule_id.to_string());
        if let Some(handle) = self.handles.read().get(&key).cloned() {
            return Ok(handle);
        }
        let mut handles = self.handles.write();
        if let Some(handle) = handles.get(&key).cloned() {
            return Ok(handle);
        }
        let handle = Handle::tombstone(registry.to_string(), rule_id.to_string());
        handles.insert(key, handle.clone());
        Ok(handle)
    }

    pub fn stats(&self) -> EngineStats {
        let handles = self.handles.read();
        let tombstone_count = handles.values().filter(|h| h.is_tombstone()).count();
        EngineStats {
            registry_count: self.registries.len(),
            handle_count: handles.len(),
            tombstone_count,
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

    fn engine() -> RuleEngine<Ctx> {
        let mut registry = Registry::new("people").unwrap();
        registry.register("is_flagged", vec![], |ctx: &Ctx, _| ctx.flag).unwrap();
        let mut manager = RegistryManager::new();
        manager.add(registry).unwrap();
        RuleEngine::new(manager)
    }

    #[test]
    fn update_then_eval() {
        let engine = engine();
        let manifest: Manifest = serde_json::from_str(
            r#"{"registry": "people", "rules": {"r1": {"node_type": "leaf", "rule": {"rule_def_name": "is_flagged"}}}}"#,
        )
        .unwrap();
        engine.update_manifests(&[manifest]).unwrap();

        let handle = engine.get_handle("people", "r1").unwrap();
        assert!(handle.eval(&Ctx { flag: true }).unwrap());
    }

    #[test]
    fn failed_update_does_not_touch_existing_handles() {
        let engine = engine();
        let good: Manifest = serde_json::from_str(
            r#"{"registry": "people", "rules": {"r1": {"node_type": "leaf", "rule": {"rule_def_name": "is_flagged"}}}}"#,
        )
        .unwrap();
        engine.update_manifests(&[good]).unwrap();

        let bad: Manifest = serde_json::from_str(
            r#"{"registry": "people", "rules": {"r1": {"node_type": "leaf", "rule": {"rule_def_name": "nope"}}}}"#,
        )
        .unwrap();
        assert!(engine.update_manifests(&[bad]).is_err());

        let handle = engine.get_handle("people", "r1").unwrap();
        assert!(handle.eval(&Ctx { flag: true }).unwrap());
    }

    #[test]
    fn get_or_create_returns_stable_tombstone_before_linking() {
        let engine = engine();
        let handle = engine.get_or_create_handle("people", "future").unwrap();
        assert!(handle.is_tombstone());

        let manifest: Manifest = serde_json::from_str(
            r#"{"registry": "people", "rules": {"future": {"node_type": "leaf", "rule": {"rule_def_name": "is_flagged"}}}}"#,
        )
        .unwrap();
        engine.update_manifests(&[manifest]).unwrap();

        assert!(!handle.is_tombstone());
        assert!(handle.eval(&Ctx { flag: true }).unwrap());
    }

    #[test]
    fn unknown_registry_rejected_without_allocating_a_tombstone() {
        let engine = engine();
        assert!(matches!(
            engine.get_or_create_handle("ghosts", "r1"),
            Err(LinkError::UnknownRegistry(_))
        ));
    }

    #[test]
    fn batch_update_is_atomic_across_manifests() {
        let engine = engine();
        let good: Manifest = serde_json::from_str(
            r#"{"registry": "people", "rules": {"r1": {"node_type": "leaf", "rule": {"rule_def_name": "is_flagged"}}}}"#,
        )
        .unwrap();
        let bad: Manifest = serde_json::from_str(
            r#"{"registry": "people", "rules": {"r2": {"node_type": "leaf", "rule": {"rule_def_name": "nope"}}}}"#,
        )
        .unwrap();

        assert!(engine.update_manifests(&[good, bad]).is_err());

        assert!(engine.get_handle("people", "r1").is_none());
        assert!(engine.get_handle("people", "r2").is_none());
    }
}
