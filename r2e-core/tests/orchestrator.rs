//! Orchestrator build/start behavior not already covered by
//! `orchestrator`'s own inline unit tests: slash-suffixed type references,
//! duplicate-alias detection, and config-driven overrides of a hard-coded
//! child's type.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use r2e_core::{Component, ComponentError, Context, OrchestratorError, PluginContainer};
use serde_json::{json, Map, Value};

struct Leaf;
#[async_trait]
impl Component for Leaf {}

#[tokio::test]
async fn slash_suffix_on_type_reference_is_stripped_before_resolution() {
    let mut plugins = PluginContainer::new();
    plugins.register_factory("Leaf", |_cfg| Ok(Arc::new(Leaf) as Arc<dyn r2e_core::Component>));

    let ctx = Context::new();
    r2e_core::start_component(&ctx, &plugins, "Leaf/caller-defined-suffix", Value::Null, Duration::from_secs(1))
        .await
        .unwrap();
}

#[tokio::test]
async fn duplicate_alias_between_hardcoded_and_config_is_not_an_error() {
    // A config entry for an alias the class already hard-codes is a merge,
    // not a duplicate - only two *different* declarations of the same
    // alias within the same source would conflict, which orchestrator.rs's
    // own alias de-duplication already prevents by construction.
    struct WithChild;
    #[async_trait]
    impl Component for WithChild {
        fn child_components(&self) -> Map<String, Value> {
            let mut map = Map::new();
            map.insert("inner".to_string(), json!({"type": "Leaf", "port": 1}));
            map
        }
    }

    let mut plugins = PluginContainer::new();
    plugins.register_factory("Root", |_cfg| Ok(Arc::new(WithChild) as Arc<dyn Component>));
    plugins.register_factory("Leaf", |_cfg| Ok(Arc::new(Leaf) as Arc<dyn Component>));

    let ctx = Context::new();
    let config = json!({"components": {"inner": {"port": 2}}});
    r2e_core::start_component(&ctx, &plugins, "Root", config, Duration::from_secs(1))
        .await
        .unwrap();
}

#[tokio::test]
async fn invalid_component_alias_fails_the_build_phase() {
    struct WithBadAlias;
    #[async_trait]
    impl Component for WithBadAlias {
        fn child_components(&self) -> Map<String, Value> {
            let mut map = Map::new();
            map.insert("bad alias".to_string(), json!({"type": "Leaf"}));
            map
        }
    }
    let mut plugins = PluginContainer::new();
    plugins.register_factory("Root", |_cfg| Ok(Arc::new(WithBadAlias) as Arc<dyn Component>));
    plugins.register_factory("Leaf", |_cfg| Ok(Arc::new(Leaf) as Arc<dyn Component>));

    let ctx = Context::new();
    let err = r2e_core::start_component(&ctx, &plugins, "Root", Value::Null, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidName(_)));
}

#[tokio::test]
async fn prepare_failure_wraps_as_component_start_error_in_prepare_phase() {
    struct FailsInPrepare;
    #[async_trait]
    impl Component for FailsInPrepare {
        async fn prepare(&self, _ctx: &Context) -> Result<(), ComponentError> {
            Err(ComponentError::msg("cannot prepare"))
        }
    }
    let mut plugins = PluginContainer::new();
    plugins.register_factory("Root", |_cfg| Ok(Arc::new(FailsInPrepare) as Arc<dyn Component>));

    let ctx = Context::new();
    let err = r2e_core::start_component(&ctx, &plugins, "Root", Value::Null, Duration::from_secs(1))
        .await
        .unwrap_err();
    match err {
        OrchestratorError::ComponentStart(e) => {
            assert_eq!(e.phase, r2e_core::StartupPhase::Prepare);
            assert!(e.cause.contains("cannot prepare"));
        }
        other => panic!("expected ComponentStart(Prepare), got {other}"),
    }
}
