//! `tracing` events emitted around query execution.
//!
//! All events use the `pgmap.sql` target, so they can be enabled with e.g.
//! `RUST_LOG=pgmap.sql=debug`.

use crate::error::OrmError;
use crate::executor::ExecContext;
use crate::scan::Shape;

/// Longest SQL text (in bytes) written into a log event.
pub const MAX_LOGGED_SQL: usize = 200;

/// Truncate to at most `max_bytes`, backing off to a char boundary.
pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

fn display_sql(sql: &str) -> String {
    if sql.len() > MAX_LOGGED_SQL {
        format!("{}...", truncate_sql_bytes(sql, MAX_LOGGED_SQL))
    } else {
        sql.to_string()
    }
}

pub(crate) fn before_execute(ctx: &ExecContext, shape: Shape, sql: &str, param_count: usize) {
    tracing::debug!(
        target: "pgmap.sql",
        tag = ctx.tag().unwrap_or("-"),
        shape = ?shape,
        param_count,
        sql = %display_sql(sql),
        "executing query"
    );
}

pub(crate) fn short_circuit(ctx: &ExecContext, error: &str, sql: &str) {
    tracing::warn!(
        target: "pgmap.sql",
        tag = ctx.tag().unwrap_or("-"),
        error,
        sql = %display_sql(sql),
        "query not executed: builder error"
    );
}

pub(crate) fn failed(ctx: &ExecContext, error: &OrmError, rows: u64, sql: &str) {
    tracing::warn!(
        target: "pgmap.sql",
        tag = ctx.tag().unwrap_or("-"),
        error = %error,
        rows,
        sql = %display_sql(sql),
        "query failed"
    );
}
