//! Hierarchical resource context.
//!
//! A [`Context`] is a node in a tree. Each node owns a set of named, typed
//! resources and factories, and a list of teardown callbacks that run in
//! reverse registration order when the context closes. Resource lookups walk
//! up the parent chain; a lazy factory found on an ancestor is invoked once
//! per *requesting* context, not once per ancestor (see [`Context::get_resource`]).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ContextError, TeardownError};
use crate::event::Signal;

type AnyBox = Box<dyn Any + Send + Sync>;
type FactoryFn =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = AnyBox> + Send>> + Send + Sync>;
type TeardownFn =
    Box<dyn FnOnce(Option<Arc<TeardownError>>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// `(TypeId, name)` — the key every resource and factory is stored under.
type ResourceKey = (TypeId, &'static str);

struct ResourceEntry {
    value: AnyBox,
    type_name: &'static str,
}

struct FactoryEntry {
    factory: FactoryFn,
    type_name: &'static str,
}

/// One declared type a resource or factory is published under.
///
/// `add_resource` registers the concrete type of `value` by default; callers
/// with a value that also satisfies a broader/trait type can list additional
/// [`TypeKey`]s obtained from [`type_key`] as extra types the same resource
/// is published under (see the Open Question recorded in `DESIGN.md`: this
/// crate does not verify the extra keys are actually supertypes of `value`).
pub type TypeKey = (TypeId, &'static str);

/// Returns the `(TypeId, type_name)` pair for `T`, for use as an extra
/// declared type passed to [`Context::add_resource`].
pub fn type_key<T: Any>() -> TypeKey {
    (TypeId::of::<T>(), std::any::type_name::<T>())
}

/// Event published on a context's `resource_added` [`Signal`] whenever a
/// resource is added directly or materialized from a factory.
#[derive(Clone)]
pub struct ResourceAddedEvent {
    /// Every declared type this publication was registered under.
    pub resource_types: Vec<TypeKey>,
    pub resource_name: &'static str,
    pub is_factory_generated: bool,
}

impl ResourceAddedEvent {
    fn matches(&self, key: ResourceKey) -> bool {
        self.resource_name == key.1 && self.resource_types.iter().any(|(tid, _)| *tid == key.0)
    }
}

impl fmt::Debug for ResourceAddedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceAddedEvent")
            .field("resource_types", &self.resource_types.iter().map(|(_, n)| *n).collect::<Vec<_>>())
            .field("resource_name", &self.resource_name)
            .field("is_factory_generated", &self.is_factory_generated)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closing,
    Closed,
}

struct ContextState {
    lifecycle: Lifecycle,
    resources: HashMap<ResourceKey, ResourceEntry>,
    factories: HashMap<ResourceKey, FactoryEntry>,
    /// Keys currently being produced by a factory, to diagnose re-entrant
    /// `get_resource` calls for the same key instead of deadlocking silently.
    in_progress: std::collections::HashSet<ResourceKey>,
    teardowns: Vec<TeardownFn>,
}

struct ContextInner {
    parent: Option<Context>,
    state: Mutex<ContextState>,
    resource_added: Signal<ResourceAddedEvent>,
}

/// A node in the resource/teardown hierarchy.
///
/// Cheap to clone — internally an `Arc`. Dropping the last clone does *not*
/// close the context; call [`Context::close`] explicitly.
///
/// [`Context::tagged`] attaches a component path to a clone for diagnostic
/// logging without creating a new context layer — this is how the
/// orchestrator realizes the "component context proxy" (every logical
/// resource operation still lands on the same context; only the log lines
/// carry the originating component's path).
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
    component_path: Option<Arc<str>>,
}

tokio::task_local! {
    static CURRENT_CONTEXT: Context;
}

impl Context {
    /// Creates a new root context with no parent.
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    /// Creates a child of `parent`.
    pub fn child_of(parent: &Context) -> Self {
        Self::with_parent(Some(parent.clone()))
    }

    fn with_parent(parent: Option<Context>) -> Self {
        Context {
            inner: Arc::new(ContextInner {
                parent,
                state: Mutex::new(ContextState {
                    lifecycle: Lifecycle::Open,
                    resources: HashMap::new(),
                    factories: HashMap::new(),
                    in_progress: std::collections::HashSet::new(),
                    teardowns: Vec::new(),
                }),
                resource_added: Signal::new(200),
            }),
            component_path: None,
        }
    }

    /// Returns a clone of this context tagged with a component path, for use
    /// as the `&Context` argument handed to one node's `prepare`/`start`.
    /// The tag is carried only by this clone — it does not create a new
    /// context layer, and resource operations still land on the same
    /// underlying context as every other clone.
    pub fn tagged(&self, path: impl Into<Arc<str>>) -> Context {
        let mut clone = self.clone();
        clone.component_path = Some(path.into());
        clone
    }

    /// The component path this clone was tagged with, if any.
    pub fn component_path(&self) -> Option<&str> {
        self.component_path.as_deref()
    }

    /// Returns the currently scoped context, if any task on the call stack
    /// established one via [`Context::scope`].
    pub fn current() -> Option<Context> {
        CURRENT_CONTEXT.try_with(|ctx| ctx.clone()).ok()
    }

    /// Returns the currently scoped context, or [`ContextError::NoCurrentContext`].
    pub fn current_or_err() -> Result<Context, ContextError> {
        Self::current().ok_or(ContextError::NoCurrentContext)
    }

    /// Runs `fut` with `self` installed as the task-local "current context".
    ///
    /// Every `tokio::spawn`ed task needs its own call to `scope` — task-locals
    /// do not propagate across spawn boundaries.
    pub async fn scope<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        CURRENT_CONTEXT.scope(self.clone(), fut).await
    }

    /// The parent of this context, if any.
    pub fn parent(&self) -> Option<Context> {
        self.inner.parent.clone()
    }

    /// This context followed by its ancestors, closest first.
    pub fn chain(&self) -> Vec<Context> {
        let mut out = vec![self.clone()];
        let mut cur = self.inner.parent.clone();
        while let Some(c) = cur {
            out.push(c.clone());
            cur = c.inner.parent.clone();
        }
        out
    }

    pub fn resource_added_signal(&self) -> &Signal<ResourceAddedEvent> {
        &self.inner.resource_added
    }

    fn validate_name(name: &str) -> Result<(), ContextError> {
        let mut chars = name.chars();
        let ok = match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        };
        if !ok {
            return Err(ContextError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Adds an eagerly-constructed resource under `(T, name)`, and
    /// additionally under every key in `extra_types` (see [`type_key`]).
    ///
    /// Fails if this exact context already has a resource or factory under
    /// any of those keys (invariant: no silent overwrite).
    pub async fn add_resource_typed<T>(
        &self,
        value: T,
        name: &'static str,
        extra_types: &[TypeKey],
    ) -> Result<(), ContextError>
    where
        T: Any + Clone + Send + Sync,
    {
        Self::validate_name(name)?;
        let primary = type_key::<T>();
        let mut keys = vec![primary];
        keys.extend_from_slice(extra_types);

        let mut state = self.inner.state.lock().await;
        self.ensure_open(&state)?;
        for key in &keys {
            if state.resources.contains_key(key) || state.factories.contains_key(key) {
                return Err(ContextError::ResourceConflict {
                    type_name: key.1.to_string(),
                    name: name.to_string(),
                });
            }
        }
        for key in &keys {
            state.resources.insert(
                *key,
                ResourceEntry {
                    value: Box::new(value.clone()),
                    type_name: key.1,
                },
            );
        }
        drop(state);

        debug!(name, types = keys.len(), component_path = self.component_path.as_deref().unwrap_or(""), "resource added");
        self.inner.resource_added.publish(ResourceAddedEvent {
            resource_types: keys,
            resource_name: name,
            is_factory_generated: false,
        });
        Ok(())
    }

    /// Adds an eagerly-constructed resource under `(T, name)` only.
    pub async fn add_resource<T>(&self, value: T, name: &'static str) -> Result<(), ContextError>
    where
        T: Any + Clone + Send + Sync,
    {
        self.add_resource_typed(value, name, &[]).await
    }

    /// Registers a lazy factory under `(T, name)`.
    ///
    /// The factory runs at most once per *requesting* context: if this
    /// context's ancestor registered the factory, and a descendant calls
    /// [`Context::get_resource`], the descendant gets its own freshly
    /// produced instance, memoized in the descendant, not the ancestor.
    pub async fn add_resource_factory<T, F, Fut>(
        &self,
        name: &'static str,
        factory: F,
    ) -> Result<(), ContextError>
    where
        T: Any + Clone + Send + Sync,
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self::validate_name(name)?;
        let key = type_key::<T>();

        let boxed: FactoryFn = Arc::new(move |ctx: Context| {
            let fut = factory(ctx);
            Box::pin(async move {
                let value = fut.await;
                Box::new(value) as AnyBox
            })
        });

        let mut state = self.inner.state.lock().await;
        self.ensure_open(&state)?;
        if state.resources.contains_key(&key) || state.factories.contains_key(&key) {
            return Err(ContextError::ResourceConflict {
                type_name: key.1.to_string(),
                name: name.to_string(),
            });
        }
        state.factories.insert(
            key,
            FactoryEntry {
                factory: boxed,
                type_name: key.1,
            },
        );
        Ok(())
    }

    /// Resolves `(T, name)`, walking up the parent chain.
    ///
    /// If nothing is published yet and `optional` is `false`, this subscribes
    /// to `resource_added` on every context in the chain and waits until a
    /// matching publication arrives, then retries. If `optional` is `true`,
    /// a miss returns `Ok(None)` immediately instead of waiting.
    pub async fn get_resource<T>(&self, name: &'static str, optional: bool) -> Result<Option<T>, ContextError>
    where
        T: Any + Clone + Send + Sync,
    {
        loop {
            if let Some(v) = self.get_resource_nowait::<T>(name, true)? {
                return Ok(Some(v));
            }
            if self.has_factory::<T>(name).await {
                return self.materialize_from_factory::<T>(name).await.map(Some);
            }
            if optional {
                return Ok(None);
            }

            let key = type_key::<T>();
            let receivers: Vec<_> = self
                .chain()
                .iter()
                .map(|c| c.inner.resource_added.subscribe())
                .collect();
            // Re-check after subscribing: a publication could have landed
            // between our failed lookup above and the subscribe calls.
            if let Some(v) = self.get_resource_nowait::<T>(name, true)? {
                return Ok(Some(v));
            }
            if self.has_factory::<T>(name).await {
                return self.materialize_from_factory::<T>(name).await.map(Some);
            }
            debug!(type_name = key.1, name, component_path = self.component_path.as_deref().unwrap_or(""), "waiting for resource");
            match crate::event::wait_event(receivers, |e: &ResourceAddedEvent| e.matches(key)).await {
                Ok(_) => continue,
                Err(_) => return Err(self.not_found_error::<T>(name)),
            }
        }
    }

    /// Non-waiting resolution: fails immediately with [`ContextError::ResourceNotFound`]
    /// if nothing is published or producible yet, unless `optional` is set.
    pub async fn get_resource_nowait_required<T>(
        &self,
        name: &'static str,
        optional: bool,
    ) -> Result<Option<T>, ContextError>
    where
        T: Any + Clone + Send + Sync,
    {
        if let Some(v) = self.get_resource_nowait::<T>(name, true)? {
            return Ok(Some(v));
        }
        if self.has_factory::<T>(name).await {
            return self.materialize_from_factory::<T>(name).await.map(Some);
        }
        if optional {
            Ok(None)
        } else {
            Err(self.not_found_error::<T>(name))
        }
    }

    /// Synchronous lookup of an already-materialized value; never forces a
    /// factory and never waits. `allow_missing` controls whether a miss is
    /// `Ok(None)` (used internally) versus the public `optional` parameter —
    /// both behave identically here since nothing asynchronous happens.
    fn get_resource_nowait<T>(&self, name: &'static str, allow_missing: bool) -> Result<Option<T>, ContextError>
    where
        T: Any + Clone + Send + Sync,
    {
        let _ = allow_missing;
        let key = type_key::<T>();
        for ctx in self.chain() {
            if let Ok(state) = ctx.inner.state.try_lock() {
                if let Some(entry) = state.resources.get(&key) {
                    let v = entry
                        .value
                        .downcast_ref::<T>()
                        .expect("TypeId matched but downcast failed")
                        .clone();
                    return Ok(Some(v));
                }
            }
        }
        Ok(None)
    }

    async fn has_factory<T: Any>(&self, name: &'static str) -> bool {
        let key = type_key::<T>();
        for ctx in self.chain() {
            let state = ctx.inner.state.lock().await;
            if state.factories.contains_key(&key) {
                return true;
            }
        }
        false
    }

    async fn materialize_from_factory<T>(&self, name: &'static str) -> Result<T, ContextError>
    where
        T: Any + Clone + Send + Sync,
    {
        let key = type_key::<T>();

        // Find the nearest ancestor (including self) that owns the factory,
        // capturing the factory `Arc` itself while its context's lock is
        // still held. Self may be its own owner (a factory registered and
        // resolved in the same context), and `self.inner.state` is locked
        // again below - re-locking `owner.inner.state` there, instead of
        // reading the factory out here, would deadlock against the
        // non-reentrant `tokio::sync::Mutex` whenever `owner` and `self`
        // share the same underlying context.
        let mut owner_factory = None;
        for ctx in self.chain() {
            let state = ctx.inner.state.lock().await;
            if let Some(entry) = state.factories.get(&key) {
                owner_factory = Some(entry.factory.clone());
                break;
            }
            if state.resources.contains_key(&key) {
                drop(state);
                return self
                    .get_resource_nowait::<T>(name, true)?
                    .ok_or_else(|| self.not_found_error::<T>(name));
            }
        }
        let Some(factory) = owner_factory else {
            return Err(self.not_found_error::<T>(name));
        };

        let mut state = self.inner.state.lock().await;
        self.ensure_open(&state)?;
        if let Some(entry) = state.resources.get(&key) {
            let v = entry
                .value
                .downcast_ref::<T>()
                .expect("TypeId matched but downcast failed")
                .clone();
            return Ok(v);
        }
        if !state.in_progress.insert(key) {
            return Err(ContextError::ResourceConflict {
                type_name: key.1.to_string(),
                name: name.to_string(),
            });
        }
        drop(state);

        // Holding no lock across the factory's own `.await`, but the
        // `in_progress` marker above ensures at most one concurrent
        // invocation per (context, key) — a second caller that lands here
        // while the first is still running observes `in_progress` and
        // returns `ResourceConflict` rather than double-invoking the factory.
        let produced = factory(self.clone()).await;

        let mut state = self.inner.state.lock().await;
        state.in_progress.remove(&key);
        let value = produced
            .downcast_ref::<T>()
            .expect("factory produced mismatched type")
            .clone();
        state.resources.insert(
            key,
            ResourceEntry {
                value: produced,
                type_name: key.1,
            },
        );
        drop(state);

        debug!(type_name = key.1, name, component_path = self.component_path.as_deref().unwrap_or(""), "resource added via factory");
        self.inner.resource_added.publish(ResourceAddedEvent {
            resource_types: vec![key],
            resource_name: name,
            is_factory_generated: true,
        });
        Ok(value)
    }

    fn not_found_error<T>(&self, name: &'static str) -> ContextError {
        ContextError::ResourceNotFound {
            type_name: std::any::type_name::<T>().to_string(),
            name: name.to_string(),
        }
    }

    /// Returns every currently *materialized* resource of type `T` visible
    /// from this context, one per distinct name, closest-context value
    /// winning on name collisions. Factories are never forced.
    pub fn get_resources<T>(&self) -> Vec<(String, T)>
    where
        T: Any + Clone + Send + Sync,
    {
        let type_id = TypeId::of::<T>();
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for ctx in self.chain() {
            if let Ok(state) = ctx.inner.state.try_lock() {
                for ((tid, name), entry) in state.resources.iter() {
                    if *tid == type_id && seen.insert(*name) {
                        let v = entry
                            .value
                            .downcast_ref::<T>()
                            .expect("TypeId matched but downcast failed")
                            .clone();
                        out.push((name.to_string(), v));
                    }
                }
            }
        }
        out
    }

    /// Same as [`Context::get_resources`] but discards the names, returning
    /// only the set of materialized values.
    pub fn get_static_resources<T>(&self) -> Vec<T>
    where
        T: Any + Clone + Send + Sync,
    {
        self.get_resources::<T>().into_iter().map(|(_, v)| v).collect()
    }

    /// Registers a teardown callback. Callbacks run in strict reverse
    /// registration order when [`Context::close`] is called. If
    /// `pass_exception` is set, the callback receives the exception (if any)
    /// that `close` was called with.
    pub async fn add_teardown_callback<F, Fut>(
        &self,
        pass_exception: bool,
        callback: F,
    ) -> Result<(), ContextError>
    where
        F: FnOnce(Option<Arc<TeardownError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.inner.state.lock().await;
        self.ensure_open(&state)?;
        let wrapped: TeardownFn = if pass_exception {
            Box::new(move |exc| Box::pin(callback(exc)))
        } else {
            Box::new(move |_exc| Box::pin(callback(None)))
        };
        state.teardowns.push(wrapped);
        Ok(())
    }

    fn ensure_open(&self, state: &ContextState) -> Result<(), ContextError> {
        match state.lifecycle {
            Lifecycle::Open => Ok(()),
            Lifecycle::Closing => Err(ContextError::AlreadyClosing),
            Lifecycle::Closed => Err(ContextError::AlreadyClosed),
        }
    }

    /// Closes this context: runs all teardown callbacks in reverse order,
    /// collecting failures into a single [`TeardownError`] if more than one
    /// callback fails (or surfacing the lone failure directly if only one
    /// does). `exception`, if given, is handed to every callback registered
    /// with `pass_exception = true`.
    ///
    /// Closing a context that is already closing or already closed is an
    /// invalid-state error, not a no-op — there is exactly one call that
    /// gets to run the teardown callbacks.
    pub async fn close(&self, exception: Option<Arc<TeardownError>>) -> Result<(), TeardownError> {
        let mut state = self.inner.state.lock().await;
        match state.lifecycle {
            Lifecycle::Closed => {
                return Err(TeardownError::new(vec![
                    "this context has already been closed".to_string(),
                ]))
            }
            Lifecycle::Closing => return Err(TeardownError::new(vec![])),
            Lifecycle::Open => state.lifecycle = Lifecycle::Closing,
        }
        let callbacks = std::mem::take(&mut state.teardowns);
        drop(state);

        let mut errors = Vec::new();
        for callback in callbacks.into_iter().rev() {
            let exception = exception.clone();
            let result = std::panic::AssertUnwindSafe(callback(exception))
                .catch_unwind()
                .await;
            if let Err(panic) = result {
                let message = panic_message(panic);
                warn!(message, component_path = self.component_path.as_deref().unwrap_or(""), "teardown callback panicked");
                errors.push(message);
            }
        }

        let mut state = self.inner.state.lock().await;
        state.lifecycle = Lifecycle::Closed;
        drop(state);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TeardownError::new(errors))
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("ptr", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "teardown callback panicked with a non-string payload".to_string()
    }
}
