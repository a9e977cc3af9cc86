//! Attribute parsing for the Record derive macro.
//!
//! Struct level: `#[orm(table = "...")]`.
//! Field level: `#[orm(id)]`, `#[orm(column = "...")]`, `#[orm(skip)]`.

use crate::sql_ident::{parse_qualified_ident, parse_sql_ident_with_span};
use heck::ToSnakeCase;
use syn::spanned::Spanned;
use syn::{DeriveInput, Result};

/// Parsed `#[orm(...)]` options on one field.
#[derive(Default)]
pub(super) struct FieldAttr {
    pub is_id: bool,
    pub skip: bool,
    pub column: Option<String>,
}

impl syn::parse::Parse for FieldAttr {
    fn parse(input: syn::parse::ParseStream) -> Result<Self> {
        let mut attr = FieldAttr::default();

        while !input.is_empty() {
            let ident: syn::Ident = input.parse()?;
            if ident == "id" {
                attr.is_id = true;
            } else if ident == "skip" {
                attr.skip = true;
            } else if ident == "column" {
                let _: syn::Token![=] = input.parse()?;
                let value: syn::LitStr = input.parse()?;
                attr.column = Some(parse_sql_ident_with_span(
                    &value.value(),
                    value.span(),
                    "column",
                )?);
            } else {
                return Err(syn::Error::new(
                    ident.span(),
                    format!("unknown field attribute `{ident}` (expected id, column or skip)"),
                ));
            }

            if input.peek(syn::Token![,]) {
                let _: syn::Token![,] = input.parse()?;
            } else {
                break;
            }
        }

        if attr.skip && (attr.is_id || attr.column.is_some()) {
            return Err(input.error("#[orm(skip)] cannot be combined with id or column"));
        }
        Ok(attr)
    }
}

/// Table name from `#[orm(table = "...")]`, or the struct name in snake_case.
pub(super) fn get_table_name(input: &DeriveInput) -> Result<String> {
    for attr in &input.attrs {
        if !attr.path().is_ident("orm") {
            continue;
        }
        let nested = attr.parse_args::<syn::MetaNameValue>()?;
        if !nested.path.is_ident("table") {
            return Err(syn::Error::new_spanned(
                &nested.path,
                "unknown struct attribute (expected table = \"...\")",
            ));
        }
        let syn::Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Str(lit),
            ..
        }) = &nested.value
        else {
            return Err(syn::Error::new_spanned(
                &nested.value,
                "table must be a string literal",
            ));
        };
        return parse_qualified_ident(&lit.value(), lit.span(), "table");
    }
    Ok(input.ident.to_string().to_snake_case())
}

/// Merge every `#[orm(...)]` attribute on a field.
pub(super) fn get_field_attr(field: &syn::Field) -> Result<FieldAttr> {
    let mut merged = FieldAttr::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("orm") {
            continue;
        }
        let syn::Meta::List(list) = &attr.meta else {
            return Err(syn::Error::new(attr.span(), "expected #[orm(...)]"));
        };
        let parsed = syn::parse2::<FieldAttr>(list.tokens.clone())?;
        merged.is_id |= parsed.is_id;
        merged.skip |= parsed.skip;
        if parsed.column.is_some() {
            merged.column = parsed.column;
        }
    }
    Ok(merged)
}
