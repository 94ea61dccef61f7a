//! Core of an application framework that brings up a tree of long-lived
//! service components in a single process.
//!
//! The crate's job is narrow and deliberate: a hierarchical [`Context`] that
//! holds typed, named resources and teardown hooks
//! ([`context`]/[`event`]); a declarative [`Component`] tree that an
//! [`orchestrator`] instantiates and starts two-phase
//! (`prepare` -> start children concurrently -> `start`) under a timeout;
//! and an [`inject`] helper (paired with the sibling `r2e-macros` crate's
//! `#[inject]` attribute) that resolves resource-marked function parameters
//! from the current context at call time.
//!
//! Config file loading, CLI parsing, signal handling configuration, and
//! dynamic plugin-name resolution are explicitly out of scope as features —
//! [`component::PluginContainer`] is a plain `&str -> constructor` map the
//! caller populates, and [`runner`] is a thin wrapper around a process
//! shutdown signal, not a config loader.

pub mod component;
pub mod context;
pub mod error;
pub mod event;
pub mod inject;
pub mod orchestrator;
pub mod runner;

pub use component::{Component, FromNodeConfig, NodeConfig, PluginContainer};
pub use context::{type_key, Context, ResourceAddedEvent, TypeKey};
pub use error::{
    AggregateError, ApplicationExit, ComponentError, ComponentStartError, ContextError,
    InjectError, OrchestratorError, StartupPhase, TeardownError,
};
pub use event::{wait_event, Signal, SignalReceiver};
pub use inject::{resource, FromContext, ResourceMarker};
pub use orchestrator::{start_component, ComponentNode, NodeStatus, StartupEvent, StartupEvents};
pub use runner::{run_application, RunOutcome};

/// Re-exports the `#[inject]` attribute macro alongside the runtime support
/// it expands into, so `use r2e_core::prelude::*;` is all a component
/// author needs.
pub mod prelude;
