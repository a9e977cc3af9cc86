//! # pgmap
//!
//! A typed SELECT builder and row materializer for PostgreSQL.
//!
//! ## Features
//!
//! - **Parameterized by construction**: values are always bound as `$n`
//!   parameters, identifiers are validated
//! - **Sticky builder errors**: the first invalid argument is kept and the
//!   query is never sent
//! - **Recursive traversal**: ancestor/descendant queries over
//!   self-referencing tables via `WITH RECURSIVE`
//! - **Shape-driven decoding**: the destination's type picks how rows are
//!   stored (record, `Vec`, keyed `HashMap`, grouped `HashMap`, scalars, rows)
//! - **NULL-safe**: a NULL column resets the field to its default instead of
//!   failing the row
//!
//! ## Example
//!
//! ```ignore
//! use pgmap::prelude::*;
//!
//! #[derive(Debug, Default, Record)]
//! #[orm(table = "node")]
//! struct Node {
//!     #[orm(id)]
//!     id: i64,
//!     parent_id: i64,
//!     name: String,
//! }
//!
//! let registry = Registry::new();
//! let (ancestors, result) = registry
//!     .query::<Node>()
//!     .where_eq("id", 3)
//!     .with_parents_on_column("parent_id")
//!     .get_list(&client)
//!     .await;
//! result.into_result()?;
//! ```

// Lets `#[derive(Record)]` output (which names `::pgmap`) compile inside this crate.
extern crate self as pgmap;

pub mod clause;
pub mod error;
pub mod executor;
pub mod ident;
pub mod meta;
pub mod pg;
pub mod prelude;
pub mod query;
pub mod scan;
pub mod stub;
pub mod value;

mod log;

#[cfg(test)]
mod fixtures;

pub use clause::{Column, CompiledQuery, Conditions, Fragment, Op, SubQuery};
pub use error::{OrmError, OrmResult};
pub use executor::{ExecContext, Executor, RowCursor, Session, TransactionBinder};
pub use ident::Ident;
pub use log::MAX_LOGGED_SQL;
pub use meta::{FieldDef, FieldEntry, Record, RecordMeta, Registry};
pub use query::{Query, QueryResult};
pub use scan::{Destination, Element, ElementKind, Row, Shape};
pub use stub::StubExecutor;
pub use value::{ColumnSlot, FromValue, Value};

#[cfg(feature = "derive")]
pub use pgmap_derive::Record;
