//! Derive macros for pgmap
//!
//! Provides `#[derive(Record)]`.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod record;
mod sql_ident;

/// Derive field metadata for a struct so it can be queried and materialized.
///
/// # Example
///
/// ```ignore
/// use pgmap::Record;
///
/// #[derive(Debug, Default, Record)]
/// #[orm(table = "node")]
/// struct Node {
///     #[orm(id)]
///     id: i64,
///     parent_id: Option<i64>,
///     #[orm(column = "label")]
///     name: String,
///     #[orm(skip)]
///     depth: u32,
/// }
/// ```
///
/// # Generated
///
/// - `TABLE: &'static str` - Table name
/// - `fn fields()` - Field/column pairs in declaration order
/// - `fn key_column()` - Column of the `#[orm(id)]` field
/// - `fn field_mut()` - Write access to each mapped field
///
/// # Attributes
///
/// - `#[orm(table = "name")]` - Table name (defaults to the struct name in snake_case)
/// - `#[orm(id)]` - Mark field as the key used by recursive traversal
/// - `#[orm(column = "name")]` - Map field to a different column name
/// - `#[orm(skip)]` - Leave the field out of the mapping
///
/// Every mapped field's type must implement `pgmap::FromValue` and `Default`.
#[proc_macro_derive(Record, attributes(orm))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    record::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
