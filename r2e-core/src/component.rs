//! Declarative component tree: the `Component` contract, the JSON-shaped
//! per-node configuration, the named plugin registry, and `merge_config`.
//!
//! A node's *hard-coded* children (declared by the component's own type, via
//! [`Component::child_components`]) are merged with the *config-driven*
//! children listed under that node's `components` key before the
//! orchestrator (`orchestrator.rs`) recurses into them. `type` name
//! resolution always goes through a [`PluginContainer`] — there is no
//! dynamic module-path/attribute string resolution; a [`PluginContainer`]
//! is just an explicit `&str -> constructor` map the caller populates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::{ComponentError, OrchestratorError};

/// A unit in the component tree.
///
/// `prepare` runs before children start; `start` runs after every child has
/// started. Neither is required — a component whose class overrides
/// neither is a pure container that exists only to host its children.
///
/// Both hooks receive the `&Context` they should operate against directly:
/// callers never need `Context::current()` inside a hook unless they are
/// calling an `#[inject]`-wrapped free function.
#[async_trait]
pub trait Component: Send + Sync {
    /// Children this component's *type* always has, independent of
    /// configuration — `alias -> node config` (the same JSON shape a
    /// config-driven node uses). Config under the owning node's
    /// `components` key is merged on top of this per [`merge_config`]
    /// rules; the default is a pure container with no hard-coded children.
    fn child_components(&self) -> Map<String, Value> {
        Map::new()
    }

    async fn prepare(&self, _ctx: &Context) -> Result<(), ComponentError> {
        Ok(())
    }

    async fn start(&self, _ctx: &Context) -> Result<(), ComponentError> {
        Ok(())
    }
}

/// Constructs a `Component` from its node's forwarded configuration (the
/// node's JSON object with `type` and `components` already stripped out).
pub trait FromNodeConfig: Sized {
    fn from_node_config(config: &Value) -> Result<Self, ComponentError>;
}

/// A component with no configuration of its own.
impl FromNodeConfig for () {
    fn from_node_config(_config: &Value) -> Result<Self, ComponentError> {
        Ok(())
    }
}

type ComponentFactory = Arc<dyn Fn(&Value) -> Result<Arc<dyn Component>, ComponentError> + Send + Sync>;

/// An explicit, typed `&str -> constructor` registry. This crate does no
/// filesystem or crate-metadata scanning to discover component types —
/// callers register every name they want resolvable up front.
#[derive(Default)]
pub struct PluginContainer {
    factories: HashMap<String, ComponentFactory>,
}

impl PluginContainer {
    pub fn new() -> Self {
        PluginContainer {
            factories: HashMap::new(),
        }
    }

    /// Registers `C` under `name`, constructing it from each node's config
    /// via [`FromNodeConfig`].
    pub fn register<C>(&mut self, name: impl Into<String>)
    where
        C: Component + FromNodeConfig + 'static,
    {
        self.factories.insert(
            name.into(),
            Arc::new(|config: &Value| {
                let component = C::from_node_config(config)?;
                Ok(Arc::new(component) as Arc<dyn Component>)
            }),
        );
    }

    /// Registers an ad hoc constructor under `name` — useful for tests and
    /// components whose construction needs more than [`FromNodeConfig`]
    /// captures (e.g. closing over a value from outside the config tree).
    pub fn register_factory<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Component>, ComponentError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Resolves `reference` to a constructor. A trailing `/...` suffix is
    /// stripped before lookup — its meaning, if any, is caller-defined.
    pub fn resolve(&self, reference: &str) -> Result<ComponentFactory, OrchestratorError> {
        let name = reference.split('/').next().unwrap_or(reference);
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownComponentType(name.to_string()))
    }

    /// Resolves then instantiates. Returns a plain [`ComponentError`] rather
    /// than an [`OrchestratorError`] — the caller (`orchestrator::build_tree`)
    /// is the one that knows this node's path and wraps it into a properly
    /// addressed [`crate::error::ComponentStartError`].
    pub fn create_object(&self, reference: &str, config: &Value) -> Result<Arc<dyn Component>, ComponentError> {
        let factory = self
            .resolve(reference)
            .map_err(|e| ComponentError::msg(e.to_string()))?;
        factory(config)
    }
}

/// Recursive mapping merge: for each key in `overrides`, if both sides have
/// a mapping, recurse; otherwise the override replaces the base. The result
/// is a new value; neither input is mutated. A `null` override is
/// equivalent to an empty mapping (the base passes through unchanged).
pub fn merge_config(base: &Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (key, override_value) in override_map {
                let next = match merged.get(key) {
                    Some(base_value) => merge_config(base_value, override_value),
                    None => override_value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        (_, other) => other.clone(),
    }
}

/// The parsed shape of one node's configuration: the `type` and `components`
/// keys pulled out, plus everything else forwarded to the component's
/// constructor as `extra`.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub type_name: Option<String>,
    pub components: Map<String, Value>,
    pub extra: Value,
}

impl NodeConfig {
    pub fn parse(value: &Value) -> NodeConfig {
        let Value::Object(map) = value else {
            return NodeConfig {
                extra: Value::Object(Map::new()),
                ..Default::default()
            };
        };
        let type_name = map.get("type").and_then(Value::as_str).map(str::to_string);
        let components = map
            .get("components")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut extra = map.clone();
        extra.remove("type");
        extra.remove("components");
        NodeConfig {
            type_name,
            components,
            extra: Value::Object(extra),
        }
    }
}
