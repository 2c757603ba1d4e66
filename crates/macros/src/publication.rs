use proc_macro2::{TokenStream, Span};
use syn::{Attribute, Meta, MetaList, NestedMeta, Lit, spanned::Spanned};
use synstructure::{BindingInfo, Structure, VariantInfo};

#[derive(Debug)]
struct Error(TokenStream);

impl Error {
    fn new(span: Span, message: &str) -> Error {
        Error(quote_spanned! { span =>
            compile_error!(#message);
        })
    }

    fn into_tokens(self) -> TokenStream {
        self.0
    }
}

pub fn derive_code(s: Structure) -> TokenStream {
    let codes = s.each_variant(|v| match find_code(v) {
        Ok(v) => v,
        Err(e) => e.into_tokens(),
    });

    let kinds = s.each_variant(|v| match find_kind(v) {
        Ok(v) => v,
        Err(e) => e.into_tokens(),
    });

    s.gen_impl(quote! {
        gen impl PublicationCode for @Self {
            fn code(&self) -> i32 {
                match *self { #codes }
            }

            fn kind(&self) -> &'static str {
                match *self { #kinds }
            }
        }
    })
}

/// Given a list of attributes find `#[publication(...)]`, and ensure there is
/// only one of them.
fn find_publication(attrs: &[Attribute]) -> Result<Option<MetaList>, Error> {
    let mut attrs = attrs.iter()
        .filter_map(|attr| attr.parse_meta().ok())
        .filter(|meta| meta.path().is_ident("publication"));

    let meta = match attrs.next() {
        Some(meta) => meta,
        None => return Ok(None),
    };

    let meta = match meta {
        Meta::List(meta) => meta,
        _ => return Err(Error::new(
            meta.span(),
            "publication attribute must take a list in parentheses",
        ))
    };

    if meta.nested.is_empty() {
        return Err(Error::new(
            meta.span(),
            "publication attribute requires at least one argument",
        ));
    }

    if let Some(meta) = attrs.next() {
        return Err(Error::new(
            meta.span(),
            "publication attribute must be used exactly once",
        ));
    }

    Ok(Some(meta))
}

/// Find value of [`PublicationCode::code()`] for a variant.
fn find_code(v: &VariantInfo) -> Result<TokenStream, Error> {
    let meta = match find_publication(v.ast().attrs)? {
        Some(meta) => meta,
        None => return v.bindings()
            .iter()
            .find(is_cause)
            .map(|cause| quote!(#cause.code()))
            .ok_or_else(|| Error::new(
                v.ast().ident.span(),
                "each variant must be #[publication]-annotated \
                 or have a #[cause]",
            )),
    };

    let span = meta.span();
    let mut code = None;

    for item in meta.nested {
        match item {
            NestedMeta::Meta(Meta::NameValue(ref nv)) if nv.path.is_ident("code") =>
                code = Some(match nv.lit {
                    Lit::Int(ref i) => i.clone(),
                    _ => return Err(Error::new(
                        nv.lit.span(),
                        "expected an integer",
                    )),
                }),
            _ => return Err(Error::new(
                item.span(),
                "expected: code",
            )),
        }
    }

    match code {
        Some(code) => Ok(quote!(#code)),
        None => Err(Error::new(span, "missing code")),
    }
}

/// Find value of [`PublicationCode::kind()`] for a variant.
fn find_kind(v: &VariantInfo) -> Result<TokenStream, Error> {
    if find_publication(v.ast().attrs)?.is_none() {
        return v.bindings()
            .iter()
            .find(is_cause)
            .map(|cause| quote!(#cause.kind()))
            .ok_or_else(|| Error::new(
                v.ast().ident.span(),
                "each variant must be #[publication]-annotated \
                 or have a #[cause]",
            ));
    }

    let kind = v.ast().ident.to_string();
    Ok(quote!(#kind))
}

fn is_cause(bi: &&BindingInfo) -> bool {
    bi.ast()
        .attrs
        .iter()
        .filter_map(|attr| attr.parse_meta().ok())
        .any(|meta| meta.path().is_ident("cause"))
}
