//! Error taxonomy for the context, resource, and component-startup subsystem.
//!
//! Following the rest of this workspace, every error type here is a plain
//! enum/struct with a hand-written `Display`/`Debug`, not a `thiserror`
//! derive.

use std::fmt;

use tracing::warn;

/// Errors raised by [`crate::context::Context`] operations.
#[derive(Debug, Clone)]
pub enum ContextError {
    /// `(type, name)` already has a resource or factory registered in this
    /// exact context.
    ResourceConflict { type_name: String, name: String },
    /// No resource or factory under `(type, name)` anywhere in the chain.
    ResourceNotFound { type_name: String, name: String },
    /// A resource/factory name failed the
    /// "nonempty, alphanumeric-and-underscore" validation rule.
    InvalidName(String),
    /// The context has already finished closing.
    AlreadyClosed,
    /// The context is in the middle of closing.
    AlreadyClosing,
    /// No context is installed as "current" on this task.
    NoCurrentContext,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::ResourceConflict { type_name, name } => write!(
                f,
                "this context already contains a resource of type {type_name} using the name '{name}'"
            ),
            ContextError::ResourceNotFound { type_name, name } => write!(
                f,
                "no matching resource was found for type={type_name} name='{name}'"
            ),
            ContextError::InvalidName(name) => write!(
                f,
                "\"name\" must be a nonempty string consisting only of alphanumeric characters and underscores, got '{name}'"
            ),
            ContextError::AlreadyClosed => write!(f, "this context has already been closed"),
            ContextError::AlreadyClosing => write!(f, "this context is already closing"),
            ContextError::NoCurrentContext => {
                write!(f, "there is no active context on this task")
            }
        }
    }
}

impl std::error::Error for ContextError {}

/// Raised by [`crate::context::Context::close`] when one or more teardown
/// callbacks fail. A single failure is reported directly as the one error
/// string; more than one is aggregated.
#[derive(Debug, Clone)]
pub struct TeardownError {
    messages: Vec<String>,
}

impl TeardownError {
    pub fn new(messages: Vec<String>) -> Self {
        TeardownError { messages }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.messages.as_slice() {
            [] => write!(f, "context close was already in progress"),
            [one] => write!(f, "{one}"),
            many => {
                writeln!(f, "{} teardown callbacks failed:", many.len())?;
                for (i, m) in many.iter().enumerate() {
                    writeln!(f, "  {}: {m}", i + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for TeardownError {}

/// Errors from [`crate::event::wait_event`] and the orchestrator's
/// supervisor loop.
#[derive(Debug, Clone)]
pub enum OrchestratorError {
    /// Every signal being awaited has had its sender dropped.
    EventStreamClosed,
    /// The supervisor's own event stream overflowed its bound — treated as
    /// fatal rather than silently dropping startup events.
    EventStreamOverflow,
    /// The whole component tree failed to finish starting within the
    /// configured timeout. Carries a hierarchical status dump.
    StartupTimeout { report: String },
    /// One named component failed during `creating`/`prepare`/`start`.
    ComponentStart(ComponentStartError),
    /// More than one component failed concurrently.
    Aggregate(AggregateError),
    /// `start_component` was called with no context installed as "current"
    /// on this task (see [`crate::context::Context::scope`]).
    NoCurrentContext,
    /// A component configuration referenced a `type` name with no matching
    /// entry in the [`crate::component::PluginContainer`].
    UnknownComponentType(String),
    /// A component or child alias failed the name-validation rule.
    InvalidName(String),
    /// A child alias was declared twice at the same node.
    DuplicateComponent { path: String, alias: String },
    /// A component requested an ordered application exit instead of
    /// reporting an ordinary failure. Not itself an error — the runner
    /// treats it as a shutdown request and exits with the carried code.
    Exit(ApplicationExit),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::EventStreamClosed => {
                write!(f, "the event stream being waited on has been closed")
            }
            OrchestratorError::EventStreamOverflow => write!(
                f,
                "the startup event stream overflowed its buffer; treating as a fatal startup failure"
            ),
            OrchestratorError::StartupTimeout { report } => {
                write!(f, "timed out waiting for the component tree to start\n{report}")
            }
            OrchestratorError::ComponentStart(e) => write!(f, "{e}"),
            OrchestratorError::Aggregate(e) => write!(f, "{e}"),
            OrchestratorError::NoCurrentContext => {
                write!(f, "start_component requires an active context (see Context::scope)")
            }
            OrchestratorError::UnknownComponentType(name) => {
                write!(f, "no component type registered under the name '{name}'")
            }
            OrchestratorError::InvalidName(name) => write!(
                f,
                "component alias must be a nonempty string consisting only of alphanumeric characters and underscores, got '{name}'"
            ),
            OrchestratorError::DuplicateComponent { path, alias } => write!(
                f,
                "component '{path}' already declares a child aliased '{alias}'"
            ),
            OrchestratorError::Exit(exit) => write!(f, "{exit}"),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<ComponentStartError> for OrchestratorError {
    fn from(e: ComponentStartError) -> Self {
        OrchestratorError::ComponentStart(e)
    }
}

impl From<AggregateError> for OrchestratorError {
    fn from(e: AggregateError) -> Self {
        OrchestratorError::Aggregate(e)
    }
}

/// The phase of component startup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPhase {
    Creating,
    Prepare,
    Start,
}

impl fmt::Display for StartupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupPhase::Creating => write!(f, "creating"),
            StartupPhase::Prepare => write!(f, "prepare"),
            StartupPhase::Start => write!(f, "start"),
        }
    }
}

/// A single component's `prepare`/`start` hook returned an error.
#[derive(Debug, Clone)]
pub struct ComponentStartError {
    pub phase: StartupPhase,
    /// Dotted path from the root, e.g. `"root.database.pool"`.
    pub path: String,
    pub component_type: String,
    pub cause: String,
}

impl fmt::Display for ComponentStartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error calling {}() of component {} ({}): {}",
            self.phase, self.path, self.component_type, self.cause
        )
    }
}

impl std::error::Error for ComponentStartError {}

/// Multiple [`ComponentStartError`]s raised concurrently (e.g. two sibling
/// components both failing to start). If exactly one error is present, the
/// orchestrator unwraps it rather than wrapping a singleton aggregate.
#[derive(Debug, Clone)]
pub struct AggregateError {
    pub errors: Vec<ComponentStartError>,
}

impl AggregateError {
    /// Collapses `errors` into the simplest equivalent `Result`: `Ok(())` if
    /// empty, the lone error surfaced directly if there is exactly one,
    /// otherwise an aggregate.
    pub fn collapse(errors: Vec<ComponentStartError>) -> Result<(), OrchestratorError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(OrchestratorError::ComponentStart(
                errors.into_iter().next().unwrap(),
            )),
            _ => Err(OrchestratorError::Aggregate(AggregateError { errors })),
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} components failed to start:", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            writeln!(f, "  {}: {e}", i + 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// The error type returned by [`crate::component::Component::prepare`] and
/// [`crate::component::Component::start`]. A thin wrapper over any boxed
/// `std::error::Error`, so a hook can return whatever error type it likes;
/// the orchestrator is the only thing that needs to know the concrete
/// phase/path/component, which it attaches when wrapping this into a
/// [`ComponentStartError`].
#[derive(Debug)]
pub struct ComponentError(pub Box<dyn std::error::Error + Send + Sync>);

impl ComponentError {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        ComponentError(Box::new(err))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        ComponentError(Box::new(SimpleError(message.into())))
    }
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ComponentError {}

impl From<ContextError> for ComponentError {
    fn from(e: ContextError) -> Self {
        ComponentError::new(e)
    }
}

impl ComponentError {
    /// If this error was raised to request an ordered application exit
    /// rather than report an ordinary failure, returns the sentinel.
    pub fn as_application_exit(&self) -> Option<ApplicationExit> {
        self.0.downcast_ref::<ApplicationExit>().copied()
    }
}

/// A sentinel "failure" a component's `prepare`/`start` can raise to request
/// an ordered shutdown instead of reporting a genuine error. The orchestrator
/// recognizes it (via [`ComponentError::as_application_exit`]) and surfaces
/// it unwrapped as [`OrchestratorError::Exit`] instead of a
/// [`ComponentStartError`]; the runner then treats it as a shutdown request,
/// not a failure, and exits the process with the carried code.
#[derive(Debug, Clone, Copy)]
pub struct ApplicationExit {
    pub code: u8,
}

impl ApplicationExit {
    /// Builds an exit sentinel for `code`. Valid codes are `0..=127`;
    /// anything outside that range is coerced to `1` with a warning rather
    /// than rejected outright.
    pub fn new(code: i32) -> Self {
        if (0..=127).contains(&code) {
            ApplicationExit { code: code as u8 }
        } else {
            warn!(code, "ApplicationExit code out of range [0, 127]; coercing to 1");
            ApplicationExit { code: 1 }
        }
    }
}

impl fmt::Display for ApplicationExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "application exit requested with code {}", self.code)
    }
}

impl std::error::Error for ApplicationExit {}

#[derive(Debug)]
struct SimpleError(String);

impl fmt::Display for SimpleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SimpleError {}

/// A resource-injection parameter marker was used without the `#[inject]`
/// attribute macro, or without the parentheses the macro expects.
#[derive(Debug, Clone)]
pub enum InjectError {
    /// Attempted to use a `resource()` marker type outside of an
    /// `#[inject]`-expanded function.
    MarkerUsedDirectly,
    /// `#[resource]` was written without its call parentheses.
    MissingParentheses,
}

impl fmt::Display for InjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InjectError::MarkerUsedDirectly => write!(
                f,
                "attempted to access a resource() marker directly – did you forget to add the #[inject] attribute?"
            ),
            InjectError::MissingParentheses => write!(
                f,
                "#[resource] requires call parentheses – did you forget to add the parentheses at the end?"
            ),
        }
    }
}

impl std::error::Error for InjectError {}
