//! One-stop `use` for building components against this crate.
//!
//! ```ignore
//! use r2e_core::prelude::*;
//!
//! struct Database;
//!
//! #[async_trait::async_trait]
//! impl Component for Database {
//!     async fn start(&self, ctx: &Context) -> Result<(), ComponentError> {
//!         ctx.add_resource(42i32, "default").await?;
//!         Ok(())
//!     }
//! }
//!
//! #[inject]
//! async fn handler(#[resource] n: i32) -> Result<(), ComponentError> {
//!     println!("{n}");
//!     Ok(())
//! }
//! ```

// ── Macro (from r2e-macros) ─────────────────────────────────────────────

/// Attribute macro — rewrites a free function so its `#[resource]`-marked
/// parameters are resolved from the current [`Context`] at call time.
pub use r2e_macros::inject;

// ── Core types (from r2e-core) ───────────────────────────────────────────

pub use crate::component::{Component, FromNodeConfig, NodeConfig, PluginContainer};
pub use crate::context::{type_key, Context, ResourceAddedEvent, TypeKey};
pub use crate::error::{
    AggregateError, ApplicationExit, ComponentError, ComponentStartError, ContextError,
    InjectError, OrchestratorError, StartupPhase, TeardownError,
};
pub use crate::event::{wait_event, Signal, SignalReceiver};
pub use crate::inject::{resource, FromContext};
pub use crate::orchestrator::{start_component, ComponentNode, NodeStatus, StartupEvent};
pub use crate::runner::{run_application, RunOutcome};
