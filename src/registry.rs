//! Registry of rule definitions for one context type, and the manager that
//! maps registry names to registries.
//!
//! Mirrors the register/get/contains/iterate shape of a node-type registry:
//! a name-keyed table of immutable definitions, monotonically growing, with
//! stable iteration order.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::ast::{ParamSpec, Producer, RuleCallable, RuleDef};
use crate::error::ConstructionError;

/// Named collection of rule definitions for one context type.
pub struct Registry<Ctx> {
    name: String,
    definitions: IndexMap<String, Arc<RuleDef<Ctx>>>,
}

impl<Ctx: Send + Sync + 'static> Registry<Ctx> {
    pub fn new(name: impl Into<String>) -> Result<Self, ConstructionError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name, definitions: IndexMap::new() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a rule definition. Returns a [`Producer`] that, when called
    /// with concrete params, produces a bound `Leaf`.
    ///
    /// Errors with `DuplicateRule` if `name` is already registered in this
    /// registry, `InvalidName` if `name` is empty or reserved.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        callable: F,
    ) -> Result<Producer<Ctx>, ConstructionError>
    where
        F: Fn(&Ctx, &BTreeMap<String, serde_json::Value>) -> bool + Send + Sync + 'static,
    {
        self.register_arc(name, params, None, Arc::new(callable))
    }

    /// Like [`Registry::register`], attaching a doc string (carried through
    /// to manifest/schema tooling that lives outside this crate's scope).
    pub fn register_documented<F>(
        &mut self,
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        doc: impl Into<String>,
        callable: F,
    ) -> Result<Producer<Ctx>, ConstructionError>
    where
        F: Fn(&Ctx, &BTreeMap<String, serde_json::Value>) -> bool + Send + Sync + 'static,
    {
        self.register_arc(name, params, Some(doc.into()), Arc::new(callable))
    }

    fn register_arc(
        &mut self,
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        doc: Option<String>,
        callable: RuleCallable<Ctx>,
    ) -> Result<Producer<Ctx>, ConstructionError> {
        let name = name.into();
        validate_name(&name)?;
        if self.definitions.contains_key(&name) {
            return Err(ConstructionError::DuplicateRule(name));
        }
        let rule_def = Arc::new(RuleDef { name: name.clone(), doc, params, callable });
        self.definitions.insert(name, rule_def.clone());
        Ok(Producer::new(rule_def))
    }

    /// Look up a rule definition by name.
    pub fn get(&self, name: &str) -> Option<Arc<RuleDef<Ctx>>> {
        self.definitions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Stable (insertion-order) iteration over `(name, def)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<RuleDef<Ctx>>)> {
        self.definitions.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn validate_name(name: &str) -> Result<(), ConstructionError> {
    if name.is_empty() {
        return Err(ConstructionError::InvalidName("name must not be empty".into()));
    }
    if name.starts_with("__") {
        return Err(ConstructionError::InvalidName(format!(
            "name '{name}' uses the reserved '__' prefix"
        )));
    }
    Ok(())
}

/// Maps registry name to registry; the sole resolution surface the engine
/// uses at link time.
pub struct RegistryManager<Ctx> {
    registries: IndexMap<String, Registry<Ctx>>,
}

impl<Ctx: Send + Sync + 'static> Default for RegistryManager<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Send + Sync + 'static> RegistryManager<Ctx> {
    pub fn new() -> Self {
        Self { registries: IndexMap::new() }
    }

    /// Errors with `DuplicateRegistry` if a registry by this name is
    /// already present.
    pub fn add(&mut self, registry: Registry<Ctx>) -> Result<(), ConstructionError> {
        if self.registries.contains_key(registry.name()) {
            return Err(ConstructionError::DuplicateRegistry(registry.name().to_string()));
        }
        self.registries.insert(registry.name().to_string(), registry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Registry<Ctx>> {
        self.registries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.registries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}
