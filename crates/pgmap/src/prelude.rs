//! Convenient imports for typical `pgmap` usage.
//!
//! ```ignore
//! use pgmap::prelude::*;
//! ```

pub use crate::{
    Conditions, ExecContext, Executor, OrmError, OrmResult, Query, QueryResult, Record, Registry,
    Row, Session, SubQuery, Value,
};
