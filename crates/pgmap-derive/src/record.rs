//! Record derive macro implementation

mod attrs;

use attrs::{get_field_attr, get_table_name};
use proc_macro2::TokenStream;
use quote::quote;
use std::collections::HashSet;
use syn::{Data, DeriveInput, Fields, Result};

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Record can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Record can only be derived for structs",
            ));
        }
    };

    let table = get_table_name(&input)?;

    let mut defs = Vec::with_capacity(fields.len());
    let mut arms = Vec::with_capacity(fields.len());
    let mut key: Option<String> = None;
    let mut seen = HashSet::new();

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let attr = get_field_attr(field)?;
        if attr.skip {
            continue;
        }

        let field_name = ident.to_string();
        let field_name = field_name.strip_prefix("r#").unwrap_or(&field_name).to_string();
        let column = attr.column.unwrap_or_else(|| field_name.clone());

        if !seen.insert(column.clone()) {
            return Err(syn::Error::new_spanned(
                field,
                format!("column '{column}' is mapped by more than one field"),
            ));
        }
        if attr.is_id {
            if key.is_some() {
                return Err(syn::Error::new_spanned(
                    field,
                    "only one field can be marked #[orm(id)]",
                ));
            }
            key = Some(column.clone());
        }

        let index = defs.len();
        defs.push(quote! {
            ::pgmap::FieldDef { name: #field_name, column: #column }
        });
        arms.push(quote! {
            #index => ::core::option::Option::Some(&mut self.#ident as &mut dyn ::pgmap::ColumnSlot)
        });
    }

    let key_column = match key {
        Some(k) => quote! { ::core::option::Option::Some(#k) },
        None => quote! { ::core::option::Option::None },
    };

    Ok(quote! {
        impl #impl_generics ::pgmap::Record for #name #ty_generics #where_clause {
            const TABLE: &'static str = #table;

            fn fields() -> &'static [::pgmap::FieldDef] {
                const FIELDS: &[::pgmap::FieldDef] = &[#(#defs),*];
                FIELDS
            }

            fn key_column() -> ::core::option::Option<&'static str> {
                #key_column
            }

            fn field_mut(
                &mut self,
                index: usize,
            ) -> ::core::option::Option<&mut dyn ::pgmap::ColumnSlot> {
                match index {
                    #(#arms,)*
                    _ => ::core::option::Option::None,
                }
            }
        }
    })
}
