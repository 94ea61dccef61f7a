//! Crate path resolution for generated code.
//!
//! Detects whether the user depends on `r2e` (facade) or `r2e-core` directly,
//! and returns the appropriate path prefix for generated code.

use proc_macro2::TokenStream;
use proc_macro_crate::{crate_name, FoundCrate};
use quote::quote;

/// Returns the token stream for accessing `r2e_core` types.
///
/// If the user depends on `r2e`, returns `::r2e`.
/// Otherwise returns `::r2e_core`.
pub fn r2e_core_path() -> TokenStream {
    // First check if the facade crate is available
    if let Ok(found) = crate_name("r2e") {
        match found {
            FoundCrate::Itself => quote!(crate),
            FoundCrate::Name(name) => {
                let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
                quote!(::#ident)
            }
        }
    } else if let Ok(found) = crate_name("r2e-core") {
        match found {
            FoundCrate::Itself => quote!(crate),
            FoundCrate::Name(name) => {
                let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
                quote!(::#ident)
            }
        }
    } else {
        // Fallback - assume r2e_core is available (for error messages)
        quote!(::r2e_core)
    }
}
