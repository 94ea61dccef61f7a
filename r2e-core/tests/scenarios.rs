//! The concrete end-to-end scenarios from spec.md §8. S1 (linear
//! dependency), S2 (sibling dependency), and S6 (startup timeout) are
//! covered by `orchestrator.rs`'s own inline tests; S4 (teardown ordering
//! and aggregation) and S5 (factory isolation) by `teardown.rs` and
//! `resource_registry.rs` respectively. This file covers S3 and a
//! multi-component scenario that exercises context, factories, and the
//! orchestrator together.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use r2e_core::{Component, ComponentError, Context, ContextError, PluginContainer};
use serde_json::{json, Value};

#[tokio::test]
async fn s3_conflict_message_names_the_type_and_name() {
    let ctx = Context::new();
    ctx.add_resource(1i32, "default").await.unwrap();
    let err = ctx.add_resource(2i32, "default").await.unwrap_err();
    assert!(matches!(err, ContextError::ResourceConflict { .. }));
    assert!(
        err.to_string().contains("already contains a resource of type i32"),
        "got: {err}"
    );
}

/// A three-level tree: `root` prepares a shared counter factory, `root.a`
/// and `root.b` each request it (so they must materialize distinct
/// instances per S5), and `root.c` waits on a resource neither sibling
/// publishes until the other one starts (S2-shaped), exercising prepare,
/// concurrent children, factory isolation, and sibling waiting together.
#[tokio::test]
async fn multi_component_tree_combines_prepare_factories_and_sibling_waits() {
    struct Root;
    #[async_trait]
    impl Component for Root {
        async fn prepare(&self, ctx: &Context) -> Result<(), ComponentError> {
            let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
            ctx.add_resource_factory::<usize, _, _>("seq", move |_ctx| {
                let counter = counter.clone();
                async move { counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) }
            })
            .await?;
            Ok(())
        }
    }

    struct RequestsSeq(Arc<std::sync::Mutex<Option<usize>>>);
    #[async_trait]
    impl Component for RequestsSeq {
        async fn start(&self, ctx: &Context) -> Result<(), ComponentError> {
            let v: usize = ctx.get_resource("seq", false).await?.unwrap();
            *self.0.lock().unwrap() = Some(v);
            Ok(())
        }
    }

    struct Publishes;
    #[async_trait]
    impl Component for Publishes {
        async fn start(&self, ctx: &Context) -> Result<(), ComponentError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctx.add_resource("ready".to_string(), "signal").await?;
            Ok(())
        }
    }

    struct WaitsForSignal(Arc<std::sync::Mutex<Option<String>>>);
    #[async_trait]
    impl Component for WaitsForSignal {
        async fn start(&self, ctx: &Context) -> Result<(), ComponentError> {
            let v: String = ctx.get_resource("signal", false).await?.unwrap();
            *self.0.lock().unwrap() = Some(v);
            Ok(())
        }
    }

    let a_seen = Arc::new(std::sync::Mutex::new(None));
    let c_seen = Arc::new(std::sync::Mutex::new(None));

    let mut plugins = PluginContainer::new();
    {
        let a_seen = a_seen.clone();
        let c_seen = c_seen.clone();
        plugins.register_factory("Root", |_cfg| Ok(Arc::new(Root) as Arc<dyn Component>));
        plugins.register_factory("SeqConsumer", move |_cfg| {
            Ok(Arc::new(RequestsSeq(a_seen.clone())) as Arc<dyn Component>)
        });
        plugins.register_factory("Publisher", |_cfg| Ok(Arc::new(Publishes) as Arc<dyn Component>));
        plugins.register_factory("Waiter", move |_cfg| {
            Ok(Arc::new(WaitsForSignal(c_seen.clone())) as Arc<dyn Component>)
        });
    }

    let ctx = Context::new();
    let config: Value = json!({
        "components": {
            "a": {"type": "SeqConsumer"},
            "publisher": {"type": "Publisher"},
            "waiter": {"type": "Waiter"},
        }
    });
    r2e_core::start_component(&ctx, &plugins, "Root", config, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(*a_seen.lock().unwrap(), Some(0));
    assert_eq!(c_seen.lock().unwrap().as_deref(), Some("ready"));

    // The factory registered in `prepare` lives on the *root* context, so a
    // second independent child requesting it afterwards gets the next
    // sequence value rather than reusing `a`'s.
    let direct_child = Context::child_of(&ctx);
    let v: usize = direct_child.get_resource("seq", false).await.unwrap().unwrap();
    assert_eq!(v, 1);
}
