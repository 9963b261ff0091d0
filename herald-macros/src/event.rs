use crate::derive_utils::apply_derives;
use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Item, LitStr, Result, Token, parse::Parse, parse::ParseStream, parse_macro_input};

/// #[event] 宏实现
/// - 仅支持具名字段结构体（载荷需序列化为 JSON 对象）
/// - 生成 `::herald_domain::domain_event::EventPayload` 实现（EVENT_TYPE/KIND）
/// - 支持：`#[event(event_type = "...", kind = "domain|integration|system")]`
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EventAttrConfig);
    let input = parse_macro_input!(item as Item);

    let mut st = match input {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(other.span(), "#[event] can only be used on struct types")
                .to_compile_error()
                .into();
        }
    };

    if !matches!(st.fields, syn::Fields::Named(_)) {
        return syn::Error::new(
            st.span(),
            "#[event] payloads must be named-field structs (use `struct Name {}` for no fields)",
        )
        .to_compile_error()
        .into();
    }

    apply_derives(
        &mut st.attrs,
        vec![
            syn::parse_quote!(Debug),
            syn::parse_quote!(Clone),
            syn::parse_quote!(serde::Serialize),
            syn::parse_quote!(serde::Deserialize),
        ],
    );

    let ident = &st.ident;
    let event_type = cfg
        .event_type
        .unwrap_or_else(|| LitStr::new(&ident.to_string(), ident.span()));
    let kind = match cfg.kind {
        Some(kind) => match kind.value().as_str() {
            "domain" => quote!(Domain),
            "integration" => quote!(Integration),
            "system" => quote!(System),
            _ => {
                return syn::Error::new(
                    kind.span(),
                    "expected 'domain', 'integration' or 'system' for 'kind'",
                )
                .to_compile_error()
                .into();
            }
        },
        None => quote!(Domain),
    };

    let (impl_generics, ty_generics, where_clause) = st.generics.split_for_impl();

    let expanded = quote! {
        #st

        impl #impl_generics ::herald_domain::domain_event::EventPayload for #ident #ty_generics #where_clause {
            const EVENT_TYPE: &'static str = #event_type;
            const KIND: ::herald_domain::domain_event::EventKind =
                ::herald_domain::domain_event::EventKind::#kind;
        }
    };

    TokenStream::from(expanded)
}

// -------- parsing --------

#[derive(Default)]
struct EventAttrConfig {
    event_type: Option<LitStr>,
    kind: Option<LitStr>,
}

impl Parse for EventAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut cfg = Self::default();

        let elems: Punctuated<syn::MetaNameValue, Token![,]> =
            Punctuated::<syn::MetaNameValue, Token![,]>::parse_terminated(input)?;

        for elem in elems.into_iter() {
            let key = elem
                .path
                .get_ident()
                .map(|i| i.to_string())
                .unwrap_or_default();
            let slot = match key.as_str() {
                "event_type" => &mut cfg.event_type,
                "kind" => &mut cfg.kind,
                _ => {
                    return Err(syn::Error::new(
                        elem.path.span(),
                        "unknown key in attribute; expected 'event_type' or 'kind'",
                    ));
                }
            };
            if slot.is_some() {
                return Err(syn::Error::new(
                    elem.path.span(),
                    format!("duplicate key '{key}' in attribute"),
                ));
            }
            match elem.value {
                syn::Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Str(s),
                    ..
                }) => *slot = Some(s),
                other => {
                    return Err(syn::Error::new(
                        other.span(),
                        format!("expected string literal for '{key}'"),
                    ));
                }
            }
        }

        Ok(cfg)
    }
}
