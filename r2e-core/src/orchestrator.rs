//! Builds a component tree from a root type + configuration, then runs
//! `prepare -> start children concurrently -> start` at every node under a
//! supervised timeout.
//!
//! Build and start are two distinct passes: [`build_tree`] recursively
//! instantiates every node first (any failure here is a `creating`-phase
//! [`ComponentStartError`]); [`start_component`] then walks the
//! already-built tree, running each node's hooks and spawning its children
//! concurrently as genuine `tokio` tasks — not just concurrent futures
//! polled on one task — so a child truly suspended on `get_resource`
//! doesn't starve a sibling that's about to publish what it's waiting for.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::component::{merge_config, Component, NodeConfig, PluginContainer};
use crate::context::Context;
use crate::error::{AggregateError, ComponentStartError, OrchestratorError, StartupPhase};
use crate::event::Signal;

/// Where a node currently is in its startup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Creating,
    Created,
    Preparing,
    StartingChildren,
    Starting,
    Started,
}

impl NodeStatus {
    fn label(self) -> &'static str {
        match self {
            NodeStatus::Creating => "creating",
            NodeStatus::Created => "created",
            NodeStatus::Preparing => "preparing",
            NodeStatus::StartingChildren => "starting children",
            NodeStatus::Starting => "starting",
            NodeStatus::Started => "started",
        }
    }
}

/// One transition published on the orchestrator's startup event stream.
#[derive(Debug, Clone)]
pub struct StartupEvent {
    pub path: Arc<str>,
    pub component_type: Arc<str>,
    pub status: NodeStatus,
}

/// The supervisor's view of startup: a status board updated synchronously
/// on every transition (so a timeout report is always accurate, never
/// racing a lagging consumer) plus a bounded broadcast [`Signal`] that
/// external observers — tests, the timeout-diagnostics path, a future
/// metrics plugin — can subscribe to.
///
/// The broadcast side is bounded to 200 buffered events; since the board
/// itself never depends on the channel keeping up, overflow here only ever
/// drops *diagnostic* observers, never startup correctness.
#[derive(Clone)]
pub struct StartupEvents {
    signal: Arc<Signal<StartupEvent>>,
    board: Arc<Mutex<HashMap<Arc<str>, (NodeStatus, Arc<str>)>>>,
    order: Arc<Mutex<Vec<Arc<str>>>>,
}

impl StartupEvents {
    pub fn new() -> Self {
        StartupEvents {
            signal: Arc::new(Signal::new(200)),
            board: Arc::new(Mutex::new(HashMap::new())),
            order: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> crate::event::SignalReceiver<StartupEvent> {
        self.signal.subscribe()
    }

    fn emit(&self, path: &Arc<str>, component_type: &Arc<str>, status: NodeStatus) {
        {
            let mut board = self.board.lock().unwrap();
            if board.insert(path.clone(), (status, component_type.clone())).is_none() {
                self.order.lock().unwrap().push(path.clone());
            }
        }
        debug!(path = %path, status = status.label(), "component startup transition");
        self.signal.publish(StartupEvent {
            path: path.clone(),
            component_type: component_type.clone(),
            status,
        });
    }

    /// Renders a hierarchical, indented status dump of every node observed
    /// so far — used in the timeout diagnostics path. There is no
    /// per-task stack trace to attach (a suspended `Future`'s frame chain
    /// isn't introspectable the way a blocked thread's stack is), so this
    /// report is per-path status only.
    pub fn report(&self) -> String {
        let order = self.order.lock().unwrap().clone();
        let board = self.board.lock().unwrap();
        let mut out = String::new();
        for path in &order {
            let Some((status, component_type)) = board.get(path) else {
                continue;
            };
            let depth = if path.is_empty() { 0 } else { path.matches('.').count() + 1 };
            let indent = "  ".repeat(depth);
            let display_path = if path.is_empty() { "<root>" } else { path };
            let _ = writeln!(out, "{indent}{display_path} ({component_type}): {}", status.label());
        }
        out
    }
}

impl Default for StartupEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// One instantiated node of the component tree, built by [`build_tree`].
#[derive(Clone)]
pub struct ComponentNode {
    pub path: Arc<str>,
    pub component_type: Arc<str>,
    pub component: Arc<dyn Component>,
    pub children: Arc<Vec<ComponentNode>>,
}

fn child_path(parent: &str, alias: &str) -> Arc<str> {
    if parent.is_empty() {
        Arc::from(alias)
    } else {
        Arc::from(format!("{parent}.{alias}"))
    }
}

fn validate_alias(alias: &str) -> Result<(), OrchestratorError> {
    let mut chars = alias.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidName(alias.to_string()))
    }
}

/// Recursively instantiates the component tree.
///
/// Hard-coded children from the class (`Component::child_components`) are
/// merged with the node's own `components` config per [`merge_config`]: the
/// config side always wins on conflicting keys. An alias present in either
/// side but missing a resolvable `type` falls back to the alias itself as
/// the type name.
pub fn build_tree(
    plugins: &PluginContainer,
    type_ref: &str,
    config: &Value,
    path: &str,
    events: &StartupEvents,
) -> Result<ComponentNode, OrchestratorError> {
    let path_arc: Arc<str> = Arc::from(path);
    let component_type: Arc<str> = Arc::from(type_ref);
    events.emit(&path_arc, &component_type, NodeStatus::Creating);

    let parsed = NodeConfig::parse(config);
    let component = plugins.create_object(type_ref, &parsed.extra).map_err(|e| {
        OrchestratorError::ComponentStart(ComponentStartError {
            phase: StartupPhase::Creating,
            path: path.to_string(),
            component_type: type_ref.to_string(),
            cause: e.to_string(),
        })
    })?;

    events.emit(&path_arc, &component_type, NodeStatus::Created);

    let hardcoded = component.child_components();
    let mut aliases: Vec<String> = hardcoded.keys().cloned().collect();
    for alias in parsed.components.keys() {
        if !aliases.contains(alias) {
            aliases.push(alias.clone());
        }
    }

    let mut children = Vec::with_capacity(aliases.len());
    let mut seen = std::collections::HashSet::new();
    for alias in aliases {
        validate_alias(&alias)?;
        if !seen.insert(alias.clone()) {
            return Err(OrchestratorError::DuplicateComponent {
                path: path.to_string(),
                alias,
            });
        }
        let base = hardcoded.get(&alias).cloned().unwrap_or(Value::Null);
        let overrides = parsed
            .components
            .get(&alias)
            .cloned()
            .unwrap_or(Value::Null);
        let merged = merge_config(&base, &overrides);
        let merged_parsed = NodeConfig::parse(&merged);
        let child_type = merged_parsed.type_name.clone().unwrap_or_else(|| alias.clone());
        let child_path = child_path(path, &alias);
        children.push(build_tree(plugins, &child_type, &merged, &child_path, events)?);
    }

    Ok(ComponentNode {
        path: path_arc,
        component_type,
        component,
        children: Arc::new(children),
    })
}

fn wrap(phase: StartupPhase, node: &ComponentNode, cause: crate::error::ComponentError) -> ComponentStartError {
    ComponentStartError {
        phase,
        path: node.path.to_string(),
        component_type: node.component_type.to_string(),
        cause: cause.to_string(),
    }
}

/// Classifies a hook failure: an [`crate::error::ApplicationExit`] sentinel
/// surfaces unwrapped as [`OrchestratorError::Exit`] (a shutdown request,
/// not a failure); anything else is wrapped as a [`ComponentStartError`]
/// addressed to this node and phase.
fn classify(
    phase: StartupPhase,
    node: &ComponentNode,
    cause: crate::error::ComponentError,
) -> OrchestratorError {
    match cause.as_application_exit() {
        Some(exit) => OrchestratorError::Exit(exit),
        None => OrchestratorError::ComponentStart(wrap(phase, node, cause)),
    }
}

/// Flattens an [`OrchestratorError`] from a child's start into the leaf
/// [`ComponentStartError`]s it carries, so aggregates never nest.
fn flatten(err: OrchestratorError) -> Vec<ComponentStartError> {
    match err {
        OrchestratorError::ComponentStart(e) => vec![e],
        OrchestratorError::Aggregate(a) => a.errors,
        other => vec![ComponentStartError {
            phase: StartupPhase::Start,
            path: String::new(),
            component_type: "unknown".to_string(),
            cause: other.to_string(),
        }],
    }
}

/// Runs `prepare -> start children concurrently -> start` at `node` and
/// every descendant. Each child is spawned as its own `tokio` task with the
/// current context re-established via [`Context::scope`] inside that task
/// (task-locals never propagate across a `tokio::spawn` boundary on their
/// own).
pub fn start_node(
    node: ComponentNode,
    ctx: Context,
    events: StartupEvents,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), OrchestratorError>> + Send>> {
    Box::pin(async move {
        let node_ctx = ctx.tagged(node.path.clone());

        events.emit(&node.path, &node.component_type, NodeStatus::Preparing);
        node.component
            .prepare(&node_ctx)
            .await
            .map_err(|e| classify(StartupPhase::Prepare, &node, e))?;

        if !node.children.is_empty() {
            events.emit(&node.path, &node.component_type, NodeStatus::StartingChildren);
            let handles: Vec<_> = node
                .children
                .iter()
                .cloned()
                .map(|child| {
                    let child_ctx = ctx.clone();
                    let events = events.clone();
                    tokio::spawn(child_ctx.clone().scope(start_node(child, child_ctx, events)))
                })
                .collect();

            let mut errors = Vec::new();
            for handle in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    // A sibling requested an ordered exit: propagate it
                    // immediately rather than folding it into the aggregate -
                    // it is a shutdown request, not a failure to report
                    // alongside others.
                    Ok(Err(OrchestratorError::Exit(exit))) => return Err(OrchestratorError::Exit(exit)),
                    Ok(Err(e)) => errors.extend(flatten(e)),
                    Err(join_err) => errors.push(ComponentStartError {
                        phase: StartupPhase::Start,
                        path: node.path.to_string(),
                        component_type: node.component_type.to_string(),
                        cause: format!("child start task panicked or was cancelled: {join_err}"),
                    }),
                }
            }
            AggregateError::collapse(errors)?;
        }

        events.emit(&node.path, &node.component_type, NodeStatus::Starting);
        node.component
            .start(&node_ctx)
            .await
            .map_err(|e| classify(StartupPhase::Start, &node, e))?;

        events.emit(&node.path, &node.component_type, NodeStatus::Started);
        Ok(())
    })
}

/// Builds the component tree rooted at `root_type` and runs it to
/// completion (every node `started`), or fails with
/// [`OrchestratorError::StartupTimeout`] if `timeout` elapses first.
///
/// Requires an active [`Context`] — call from inside `ctx.scope(...)`, or
/// pass one explicitly and this function establishes the scope itself.
pub async fn start_component(
    ctx: &Context,
    plugins: &PluginContainer,
    root_type: &str,
    config: Value,
    timeout: Duration,
) -> Result<(), OrchestratorError> {
    let events = StartupEvents::new();
    let node = build_tree(plugins, root_type, &config, "", &events)?;

    let run = ctx.clone().scope(start_node(node, ctx.clone(), events.clone()));
    match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_elapsed) => {
            let report = events.report();
            warn!(report = %report, "component tree did not finish starting within the deadline");
            Err(OrchestratorError::StartupTimeout { report })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComponentError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Container;
    #[async_trait]
    impl Component for Container {}

    struct Publisher;
    #[async_trait]
    impl Component for Publisher {
        async fn start(&self, ctx: &Context) -> Result<(), ComponentError> {
            ctx.add_resource(42i32, "n").await?;
            Ok(())
        }
    }

    struct Consumer(Arc<AtomicUsize>);
    #[async_trait]
    impl Component for Consumer {
        async fn start(&self, ctx: &Context) -> Result<(), ComponentError> {
            let v: i32 = ctx.get_resource("n", false).await?.unwrap();
            self.0.store(v as usize, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn linear_dependency_s1() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let mut plugins = PluginContainer::new();
        plugins.register_factory("Root", move |_cfg| Ok(Arc::new(Publisher) as Arc<dyn Component>));
        plugins.register_factory("Child", move |_cfg| Ok(Arc::new(Consumer(seen2.clone())) as Arc<dyn Component>));

        let ctx = Context::new();
        let config = json!({"components": {"child": {"type": "Child"}}});
        start_component(&ctx, &plugins, "Root", config, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn sibling_dependency_s2() {
        struct Producer;
        #[async_trait]
        impl Component for Producer {
            async fn start(&self, ctx: &Context) -> Result<(), ComponentError> {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ctx.add_resource("hello".to_string(), "greeting").await?;
                Ok(())
            }
        }
        struct Consumer2(Arc<Mutex<Option<String>>>);
        #[async_trait]
        impl Component for Consumer2 {
            async fn start(&self, ctx: &Context) -> Result<(), ComponentError> {
                let v: String = ctx.get_resource("greeting", false).await?.unwrap();
                *self.0.lock().unwrap() = Some(v);
                Ok(())
            }
        }

        let out = Arc::new(Mutex::new(None));
        let out2 = out.clone();
        let mut plugins = PluginContainer::new();
        plugins.register_factory("Root", |_cfg| Ok(Arc::new(Container) as Arc<dyn Component>));
        plugins.register_factory("Producer", |_cfg| Ok(Arc::new(Producer) as Arc<dyn Component>));
        plugins.register_factory("Consumer", move |_cfg| Ok(Arc::new(Consumer2(out2.clone())) as Arc<dyn Component>));

        let ctx = Context::new();
        let config = json!({"components": {"producer": {"type": "Producer"}, "consumer": {"type": "Consumer"}}});
        start_component(&ctx, &plugins, "Root", config, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(out.lock().unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn startup_timeout_s6() {
        struct NeverStarts;
        #[async_trait]
        impl Component for NeverStarts {
            async fn start(&self, ctx: &Context) -> Result<(), ComponentError> {
                ctx.get_resource::<i32>("never_published", false).await?;
                Ok(())
            }
        }
        let mut plugins = PluginContainer::new();
        plugins.register_factory("Root", |_cfg| Ok(Arc::new(Container) as Arc<dyn Component>));
        plugins.register_factory("Child", |_cfg| Ok(Arc::new(NeverStarts) as Arc<dyn Component>));

        let ctx = Context::new();
        let config = json!({"components": {"child": {"type": "Child"}}});
        let err = start_component(&ctx, &plugins, "Root", config, Duration::from_millis(200))
            .await
            .unwrap_err();
        match err {
            OrchestratorError::StartupTimeout { report } => {
                assert!(report.contains("child"));
                assert!(report.contains("starting"));
            }
            other => panic!("expected StartupTimeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn unknown_component_type_fails_build() {
        let ctx = Context::new();
        let plugins = PluginContainer::new();
        let err = start_component(&ctx, &plugins, "Ghost", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ComponentStart(ComponentStartError { phase: StartupPhase::Creating, .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_sibling_failures_aggregate() {
        struct AlwaysFails;
        #[async_trait]
        impl Component for AlwaysFails {
            async fn start(&self, _ctx: &Context) -> Result<(), ComponentError> {
                Err(ComponentError::msg("boom"))
            }
        }
        let mut plugins = PluginContainer::new();
        plugins.register_factory("Root", |_cfg| Ok(Arc::new(Container) as Arc<dyn Component>));
        plugins.register_factory("Bad", |_cfg| Ok(Arc::new(AlwaysFails) as Arc<dyn Component>));

        let ctx = Context::new();
        let config = json!({"components": {"a": {"type": "Bad"}, "b": {"type": "Bad"}}});
        let err = start_component(&ctx, &plugins, "Root", config, Duration::from_secs(2))
            .await
            .unwrap_err();
        match err {
            OrchestratorError::Aggregate(agg) => assert_eq!(agg.errors.len(), 2),
            other => panic!("expected Aggregate, got {other}"),
        }
    }

    #[tokio::test]
    async fn application_exit_surfaces_unwrapped_not_as_component_start_error() {
        struct RequestsExit;
        #[async_trait]
        impl Component for RequestsExit {
            async fn start(&self, _ctx: &Context) -> Result<(), ComponentError> {
                Err(ComponentError::new(crate::error::ApplicationExit::new(7)))
            }
        }
        let mut plugins = PluginContainer::new();
        plugins.register_factory("Root", |_cfg| Ok(Arc::new(RequestsExit) as Arc<dyn Component>));

        let ctx = Context::new();
        let err = start_component(&ctx, &plugins, "Root", Value::Null, Duration::from_secs(2))
            .await
            .unwrap_err();
        match err {
            OrchestratorError::Exit(exit) => assert_eq!(exit.code, 7),
            other => panic!("expected Exit, got {other}"),
        }
    }

    #[tokio::test]
    async fn hardcoded_children_merge_with_config_overrides() {
        struct WithHardcodedChild;
        #[async_trait]
        impl Component for WithHardcodedChild {
            fn child_components(&self) -> serde_json::Map<String, Value> {
                let mut map = serde_json::Map::new();
                map.insert("inner".to_string(), json!({"type": "Container"}));
                map
            }
        }
        let mut plugins = PluginContainer::new();
        plugins.register_factory("Root", |_cfg| Ok(Arc::new(WithHardcodedChild) as Arc<dyn Component>));
        plugins.register_factory("Container", |_cfg| Ok(Arc::new(Container) as Arc<dyn Component>));

        let ctx = Context::new();
        let events = StartupEvents::new();
        let node = build_tree(&plugins, "Root", &Value::Null, "", &events).unwrap();
        assert_eq!(node.children.len(), 1);
        assert_eq!(&*node.children[0].path, "inner");

        info!("ok");
    }
}
