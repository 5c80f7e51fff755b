use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{parse_macro_input, parse_quote, DeriveInput, Ident, Type};

const SCOPES: &[&str] = &["Session", "Machine", "App", "Chrome", "Server"];

/// Implements `weave_session::Signal`.
///
/// ```ignore
/// #[derive(Signal)]
/// #[signal(scope = App, input = String, output = bool)]
/// struct Announce;
/// ```
///
/// `input` is required. `scope` defaults to `Session` and `output` to `()`.
#[proc_macro_derive(Signal, attributes(signal))]
pub fn derive_signal(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    match expand_signal(&ast) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct SignalArgs {
    scope: Option<Ident>,
    input: Option<Type>,
    output: Option<Type>,
}

fn parse_args(ast: &DeriveInput) -> syn::Result<SignalArgs> {
    let mut args = SignalArgs {
        scope: None,
        input: None,
        output: None,
    };
    for attr in ast.attrs.iter().filter(|attr| attr.path().is_ident("signal")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("scope") {
                let scope: Ident = meta.value()?.parse()?;
                if !SCOPES.iter().any(|known| scope == known) {
                    return Err(syn::Error::new(
                        scope.span(),
                        format!("unknown scope `{scope}`, expected one of {}", SCOPES.join(", ")),
                    ));
                }
                args.scope = Some(scope);
            } else if meta.path.is_ident("input") {
                args.input = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("output") {
                args.output = Some(meta.value()?.parse()?);
            } else {
                return Err(meta.error("expected `scope`, `input` or `output`"));
            }
            Ok(())
        })?;
    }
    Ok(args)
}

fn expand_signal(ast: &DeriveInput) -> syn::Result<TokenStream2> {
    let args = parse_args(ast)?;
    let name = &ast.ident;
    let input = args.input.ok_or_else(|| {
        syn::Error::new_spanned(name, "missing `#[signal(input = Type)]` on signal type")
    })?;
    let output: Type = args.output.unwrap_or_else(|| parse_quote!(()));
    let scope = args
        .scope
        .unwrap_or_else(|| Ident::new("Session", Span::call_site()));
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::weave_session::Signal for #name #ty_generics #where_clause {
            type Input = #input;
            type Output = #output;
            const SCOPE: ::weave_session::BroadcastScope = ::weave_session::BroadcastScope::#scope;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(ast: DeriveInput) -> String {
        expand_signal(&ast)
            .map(|tokens| tokens.to_string())
            .unwrap_or_else(|err| err.to_string())
    }

    #[test]
    fn defaults_to_session_scope_and_unit_output() {
        let out = expand(parse_quote! {
            #[signal(input = u32)]
            struct Ping;
        });
        assert!(out.contains("type Input = u32"), "{out}");
        assert!(out.contains("type Output = ()"), "{out}");
        assert!(out.contains("BroadcastScope :: Session"), "{out}");
    }

    #[test]
    fn reads_explicit_scope_and_output() {
        let out = expand(parse_quote! {
            #[signal(scope = App, input = String, output = Vec<u8>)]
            struct Announce;
        });
        assert!(out.contains("BroadcastScope :: App"), "{out}");
        assert!(out.contains("type Output = Vec < u8 >"), "{out}");
    }

    #[test]
    fn rejects_unknown_scope() {
        let out = expand(parse_quote! {
            #[signal(scope = Galaxy, input = u32)]
            struct Wide;
        });
        assert!(out.contains("unknown scope `Galaxy`"), "{out}");
    }

    #[test]
    fn requires_input() {
        let out = expand(parse_quote! {
            #[signal(scope = Server)]
            struct Empty;
        });
        assert!(out.contains("missing `#[signal(input = Type)]`"), "{out}");
    }
}
