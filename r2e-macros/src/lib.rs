extern crate proc_macro;
use proc_macro::TokenStream;

pub(crate) mod crate_path;
pub(crate) mod inject_attr;

/// Rewrites a free function so its `#[resource]`-marked parameters are
/// resolved from the current [`Context`](r2e_core::context::Context)
/// instead of being supplied by the caller.
///
/// A parameter's own type carries whether the resolution is required or
/// optional: `T` propagates `ResourceNotFound` when nothing is published
/// under that name; `Option<T>` resolves to `None` instead. Whether the
/// lookup waits for a future publication or fails immediately is decided by
/// the function's own `async`-ness — a plain `fn` uses the non-waiting
/// lookup, an `async fn` uses the waiting one.
///
/// The wrapped function's return type must be `Result<_, ComponentError>`
/// (or a type `ComponentError` converts into via `?`).
///
/// ```ignore
/// #[inject]
/// async fn handle(#[resource] db: DbPool, #[resource("cache")] cache: Option<Cache>) -> Result<(), ComponentError> {
///     // db and cache are resolved from Context::current() before the body runs
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn inject(_args: TokenStream, input: TokenStream) -> TokenStream {
    inject_attr::expand(input)
}
