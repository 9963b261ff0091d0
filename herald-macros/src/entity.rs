use crate::derive_utils::apply_derives;
use crate::field_utils::ensure_required_fields;
use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Field, Item, Result, Token, parse::Parse, parse::ParseStream, parse_macro_input};

/// #[entity] 宏实现
/// - 若缺失则追加簿记字段，并置于字段最前：
///   `id`、`version`、`uncommitted_events`（不参与序列化）、`deleted`
/// - 自动实现 `::herald_domain::entity::Entity`
/// - 支持参数：`#[entity(debug = true|false)]`，默认 `true`（派生 Debug）
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EntityAttrConfig);
    let input = parse_macro_input!(item as Item);

    let mut st = match input {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(other.span(), "#[entity] only on struct")
                .to_compile_error()
                .into();
        }
    };

    let fields_named = match &mut st.fields {
        syn::Fields::Named(f) => f,
        _ => {
            return syn::Error::new(st.span(), "only supports named-field struct")
                .to_compile_error()
                .into();
        }
    };

    let required: Vec<Field> = vec![
        syn::parse_quote! { id: String },
        syn::parse_quote! { version: usize },
        syn::parse_quote! {
            #[serde(skip)]
            uncommitted_events: ::std::vec::Vec<::herald_domain::domain_event::Event>
        },
        syn::parse_quote! { deleted: bool },
    ];
    ensure_required_fields(fields_named, required);

    let mut derives: Vec<syn::Path> = vec![
        syn::parse_quote!(Default),
        syn::parse_quote!(serde::Serialize),
        syn::parse_quote!(serde::Deserialize),
    ];
    if cfg.derive_debug.unwrap_or(true) {
        derives.insert(0, syn::parse_quote!(Debug));
    }
    apply_derives(&mut st.attrs, derives);

    let ident = &st.ident;
    let (impl_generics, ty_generics, where_clause) = st.generics.split_for_impl();

    let expanded = quote! {
        #st

        impl #impl_generics ::herald_domain::entity::Entity for #ident #ty_generics #where_clause {
            fn new(aggregate_id: ::std::string::String) -> Self {
                Self { id: aggregate_id, ..::std::default::Default::default() }
            }

            fn id(&self) -> &str { &self.id }

            fn version(&self) -> usize { self.version }

            fn set_version(&mut self, version: usize) { self.version = version; }

            fn uncommitted_events(&self) -> &[::herald_domain::domain_event::Event] {
                &self.uncommitted_events
            }

            fn uncommitted_events_mut(
                &mut self,
            ) -> &mut ::std::vec::Vec<::herald_domain::domain_event::Event> {
                &mut self.uncommitted_events
            }

            fn is_deleted(&self) -> bool { self.deleted }

            fn set_deleted(&mut self, deleted: bool) { self.deleted = deleted; }
        }
    };

    TokenStream::from(expanded)
}

// -------- parsing --------

struct EntityAttrConfig {
    derive_debug: Option<bool>,
}

impl Parse for EntityAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut derive_debug: Option<bool> = None;

        let elems: Punctuated<syn::MetaNameValue, Token![,]> =
            Punctuated::<syn::MetaNameValue, Token![,]>::parse_terminated(input)?;

        for elem in elems.into_iter() {
            if !elem.path.is_ident("debug") {
                return Err(syn::Error::new(
                    elem.path.span(),
                    "unknown key in attribute; expected 'debug'",
                ));
            }
            if derive_debug.is_some() {
                return Err(syn::Error::new(
                    elem.path.span(),
                    "duplicate key 'debug' in attribute",
                ));
            }
            match elem.value {
                syn::Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Bool(b),
                    ..
                }) => derive_debug = Some(b.value()),
                other => {
                    return Err(syn::Error::new(
                        other.span(),
                        "expected boolean literal for 'debug'",
                    ));
                }
            }
        }

        Ok(Self { derive_debug })
    }
}
