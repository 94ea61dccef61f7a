//! Support types for the `#[inject]` attribute macro (`r2e_macros::inject`).
//!
//! The macro rewrites a function so that parameters marked `#[resource]`
//! are resolved from [`Context::current`] instead of being supplied by the
//! caller. This module only holds what the expanded code calls into —
//! actual attribute parsing lives in the `r2e-macros` crate.
//!
//! A parameter's own type carries the optionality Python would express with
//! a default sentinel: `T` resolves as required (propagating
//! [`ContextError::ResourceNotFound`][crate::error::ContextError::ResourceNotFound]
//! on a miss), `Option<T>` resolves as optional (a miss becomes `None`).
//! [`FromContext`] is the trait both shapes implement so the macro can emit
//! one resolution call regardless of which shape a given parameter uses.
//! Whether the call waits for the resource to appear is decided by the
//! function's own `async`-ness: a plain `fn` resolves with the non-waiting
//! lookup, an `async fn` resolves with the waiting one — the same
//! distinction the macro reads directly off the `fn` item it's expanding.

use crate::context::Context;
use crate::error::ContextError;

/// Resolves one resource-marked parameter from `ctx`, either waiting for
/// publication (`waiting = true`, used when the wrapped function is
/// `async`) or failing/returning `None` immediately (`waiting = false`,
/// used for a plain `fn`).
#[async_trait::async_trait]
pub trait FromContext: Sized {
    async fn from_context(ctx: &Context, name: &'static str, waiting: bool) -> Result<Self, ContextError>;
}

#[async_trait::async_trait]
impl<T> FromContext for T
where
    T: std::any::Any + Clone + Send + Sync,
{
    async fn from_context(ctx: &Context, name: &'static str, waiting: bool) -> Result<Self, ContextError> {
        if waiting {
            ctx.get_resource::<T>(name, false).await?.ok_or_else(|| unreachable!(
                "get_resource with optional=false never returns Ok(None)"
            ))
        } else {
            ctx.get_resource_nowait_required::<T>(name, false)
                .await?
                .ok_or_else(|| unreachable!("get_resource_nowait_required with optional=false never returns Ok(None)"))
        }
    }
}

#[async_trait::async_trait]
impl<T> FromContext for Option<T>
where
    T: std::any::Any + Clone + Send + Sync,
{
    async fn from_context(ctx: &Context, name: &'static str, waiting: bool) -> Result<Self, ContextError> {
        if waiting {
            ctx.get_resource::<T>(name, true).await
        } else {
            ctx.get_resource_nowait_required::<T>(name, true).await
        }
    }
}

/// The sentinel `resource()`/`resource(name = "...")` calls expand to
/// *outside* an `#[inject]`-wrapped function — using it anywhere else is a
/// mistake, and any attempt to read it reports that mistake instead of
/// silently producing a bogus value.
///
/// `#[inject]` strips every `#[resource(...)]`-marked default expression out
/// of the function signature before expansion, so this type only appears in
/// code the macro never touched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceMarker {
    _private: (),
}

impl ResourceMarker {
    pub fn new() -> Self {
        ResourceMarker { _private: () }
    }
}

/// Constructs a [`ResourceMarker`] — called only from the default-value
/// position of a parameter the `#[inject]` macro is meant to intercept.
/// Reaching this function at runtime means `#[inject]` was not applied (or
/// was applied without the attribute-macro's own rewriting taking effect),
/// since `#[inject]` deletes the call before it can ever execute.
pub fn resource() -> ResourceMarker {
    ResourceMarker::new()
}

impl std::ops::Deref for ResourceMarker {
    type Target = ResourceMarker;

    fn deref(&self) -> &Self::Target {
        panic!(
            "{}",
            crate::error::InjectError::MarkerUsedDirectly
        )
    }
}
