//! `#[inject]`: rewrites a free function so its `#[resource]`-marked
//! parameters are resolved from the current [`Context`][ctx] at call time
//! instead of being supplied by the caller.
//!
//! The wrapped function must return `Result<_, ComponentError>` (or a type
//! `ComponentError` converts into via `?`) — a resolution failure on a
//! required resource needs somewhere to go, and `ComponentError` is what
//! every `Component::prepare`/`start` hook already returns, which is the
//! expected caller of an `#[inject]`-wrapped function.
//!
//! [ctx]: r2e_core::context::Context
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, FnArg, GenericArgument, ItemFn, PathArguments, Type};

use crate::crate_path::r2e_core_path;

pub fn expand(input: TokenStream) -> TokenStream {
    let item_fn = parse_macro_input!(input as ItemFn);
    match generate(&item_fn) {
        Ok(output) => quote!(#output).into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// `Option<T>` -> `Some(T)`; anything else -> `None`.
fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else { return None };
    let segment = path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        GenericArgument::Type(t) => Some(t),
        _ => None,
    })
}

fn generate(item_fn: &ItemFn) -> syn::Result<TokenStream2> {
    let fn_name = &item_fn.sig.ident;
    let is_async = item_fn.sig.asyncness.is_some();

    if item_fn
        .sig
        .inputs
        .iter()
        .any(|arg| matches!(arg, FnArg::Receiver(_)))
    {
        return Err(syn::Error::new_spanned(
            fn_name,
            "#[inject] must be a free function (no `self` parameter):\n\
             \n  #[inject]\n  async fn handle(#[resource] db: DbPool) { ... }",
        ));
    }

    let krate = r2e_core_path();
    let mut outer_params: Vec<TokenStream2> = Vec::new();
    let mut call_args: Vec<TokenStream2> = Vec::new();
    let mut resolve_stmts: Vec<TokenStream2> = Vec::new();
    let mut resource_count = 0usize;

    for (i, arg) in item_fn.sig.inputs.iter().enumerate() {
        let FnArg::Typed(pat_type) = arg else {
            unreachable!("receiver rejected above")
        };
        let ty = &*pat_type.ty;
        let pat = &pat_type.pat;

        let resource_attr = pat_type.attrs.iter().find(|a| a.path().is_ident("resource"));
        let local = syn::Ident::new(&format!("__inject_arg_{i}"), proc_macro2::Span::call_site());

        if let Some(attr) = resource_attr {
            resource_count += 1;
            let name: String = match &attr.meta {
                syn::Meta::Path(_) => "default".to_string(),
                syn::Meta::List(_) => attr
                    .parse_args::<syn::LitStr>()
                    .map_err(|_| {
                        syn::Error::new_spanned(
                            attr,
                            "#[resource] takes an optional string literal: #[resource(\"my_name\")]",
                        )
                    })?
                    .value(),
                syn::Meta::NameValue(_) => {
                    return Err(syn::Error::new_spanned(
                        attr,
                        "#[resource] takes an optional string literal: #[resource(\"my_name\")]",
                    ))
                }
            };

            let waiting = is_async;
            let resolve_ty = option_inner(ty).map_or(ty.clone(), Clone::clone);
            let is_optional = option_inner(ty).is_some();
            let resolved_ty = if is_optional {
                quote!(::core::option::Option<#resolve_ty>)
            } else {
                quote!(#resolve_ty)
            };

            resolve_stmts.push(quote! {
                let #local: #resolved_ty = <#resolved_ty as #krate::inject::FromContext>::from_context(
                    &__inject_ctx, #name, #waiting,
                )
                .await
                .map_err(#krate::error::ComponentError::from)?;
            });
            call_args.push(quote! { #local });

            // non-#[resource] attrs (if any) stay on the (now-hidden) inner
            // parameter only; the outer wrapper never exposes this param.
        } else {
            let non_resource_attrs: Vec<_> = pat_type
                .attrs
                .iter()
                .filter(|a| !a.path().is_ident("resource"))
                .collect();
            outer_params.push(quote! { #(#non_resource_attrs)* #pat: #ty });
            call_args.push(quote! { #pat });
        }
    }

    if resource_count == 0 {
        return Err(syn::Error::new_spanned(
            fn_name,
            "#[inject] has no #[resource]-marked parameters; plain attribute has no effect here — remove it",
        ));
    }

    let inner_name = syn::Ident::new(&format!("__inject_inner_{fn_name}"), fn_name.span());
    let vis = &item_fn.vis;
    let fn_body = &item_fn.block;
    let fn_asyncness = &item_fn.sig.asyncness;
    let ret_ty = &item_fn.sig.output;
    let inner_params: Vec<TokenStream2> = item_fn
        .sig
        .inputs
        .iter()
        .map(|arg| {
            let FnArg::Typed(pat_type) = arg else { unreachable!() };
            let pat = &pat_type.pat;
            let ty = &*pat_type.ty;
            let attrs: Vec<_> = pat_type
                .attrs
                .iter()
                .filter(|a| !a.path().is_ident("resource"))
                .collect();
            quote! { #(#attrs)* #pat: #ty }
        })
        .collect();

    let call = if is_async {
        quote! { #inner_name(#(#call_args),*).await }
    } else {
        quote! { #inner_name(#(#call_args),*) }
    };

    Ok(quote! {
        #fn_asyncness fn #inner_name(#(#inner_params),*) #ret_ty #fn_body

        #vis async fn #fn_name(#(#outer_params),*) #ret_ty {
            let __inject_ctx = #krate::context::Context::current_or_err()
                .map_err(#krate::error::ComponentError::from)?;
            #(#resolve_stmts)*
            #call
        }
    })
}
