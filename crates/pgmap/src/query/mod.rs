//! Typed SELECT builder.
//!
//! A [`Query`] accumulates clauses through consuming calls and compiles them
//! into a [`CompiledQuery`] on demand. Clause order in the output is fixed:
//!
//! `WITH` · `SELECT` · `FROM` · joins · `WHERE` · `UNION` · `ORDER BY` ·
//! `LIMIT` · `OFFSET` · `FOR UPDATE`
//!
//! Arguments are validated as they are added. The first invalid argument is
//! recorded on the query; every later call leaves the query unchanged, and
//! execution reports the error without touching the database.
//!
//! # Example
//! ```ignore
//! let registry = Registry::new();
//! let (nodes, result) = registry
//!     .query::<Node>()
//!     .where_op("id", ">", 10)
//!     .or_where_null("parent_id")
//!     .order_by_desc("id")
//!     .limit(20)
//!     .get_list(&client)
//!     .await;
//! ```

mod cte;
mod exec;

#[cfg(test)]
mod tests;

pub use exec::QueryResult;

use crate::clause::{
    Column, CompiledQuery, Conditions, CteDef, Fragment, Join, JoinKind, Op, OrderBy, SubQuery,
};
use crate::error::{OrmError, OrmResult};
use crate::executor::ExecContext;
use crate::ident::Ident;
use crate::meta::{Record, Registry};
use crate::value::Value;
use std::marker::PhantomData;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Subject {
    Table(Ident),
    Sub { query: Fragment, alias: Ident },
}

#[derive(Debug, Clone)]
struct Union {
    all: bool,
    query: Fragment,
}

/// SELECT query over records of type `T`.
#[must_use]
pub struct Query<T: Record> {
    registry: Registry,
    subject: Option<Subject>,
    columns: Vec<Column>,
    joins: Vec<Join>,
    wheres: Conditions,
    orders: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    for_update: bool,
    unions: Vec<Union>,
    ctes: Vec<CteDef>,
    ctx: ExecContext,
    error: Option<String>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            subject: self.subject.clone(),
            columns: self.columns.clone(),
            joins: self.joins.clone(),
            wheres: self.wheres.clone(),
            orders: self.orders.clone(),
            limit: self.limit,
            offset: self.offset,
            for_update: self.for_update,
            unions: self.unions.clone(),
            ctes: self.ctes.clone(),
            ctx: self.ctx.clone(),
            error: self.error.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: Record> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("record", &std::any::type_name::<T>())
            .field("sql", &self.compile().sql)
            .field("error", &self.error)
            .finish()
    }
}

fn message(err: OrmError) -> String {
    match err {
        OrmError::Builder(m) => m,
        other => other.to_string(),
    }
}

fn sub_error(what: &str, sub: &SubQuery) -> OrmResult<()> {
    match &sub.error {
        Some(e) => Err(OrmError::builder(format!("{what}: {e}"))),
        None => Ok(()),
    }
}

impl<T: Record> Query<T> {
    /// Start a query over `T::TABLE`.
    pub fn new(registry: &Registry) -> Self {
        let mut query = Self {
            registry: registry.clone(),
            subject: None,
            columns: Vec::new(),
            joins: Vec::new(),
            wheres: Conditions::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            for_update: false,
            unions: Vec::new(),
            ctes: Vec::new(),
            ctx: ExecContext::default(),
            error: None,
            _record: PhantomData,
        };
        match Ident::parse(T::TABLE) {
            Ok(table) => query.subject = Some(Subject::Table(table)),
            Err(e) => query.error = Some(format!("table of record: {}", message(e))),
        }
        query
    }

    /// The recorded builder error, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    /// Run `f` unless an error is already recorded; record its error.
    fn apply(mut self, f: impl FnOnce(&mut Self) -> OrmResult<()>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Err(e) = f(&mut self) {
            self.error = Some(message(e));
        }
        self
    }

    fn filter(self, f: impl FnOnce(Conditions) -> Conditions) -> Self {
        self.apply(|q| {
            let wheres = std::mem::take(&mut q.wheres);
            q.wheres = f(wheres);
            match q.wheres.take_error() {
                Some(e) => Err(OrmError::Builder(e)),
                None => Ok(()),
            }
        })
    }

    // ==================== Subject ====================

    /// Read from another table or relation instead of `T::TABLE`.
    pub fn from(self, table: &str) -> Self {
        self.apply(|q| {
            q.subject = Some(Subject::Table(Ident::parse(table)?));
            Ok(())
        })
    }

    /// Read from `(sub-query) AS alias`.
    pub fn from_sub(self, sub: &SubQuery, alias: &str) -> Self {
        self.apply(|q| {
            sub_error("FROM sub-query", sub)?;
            q.subject = Some(Subject::Sub {
                query: sub.fragment.clone(),
                alias: Ident::parse(alias)?,
            });
            Ok(())
        })
    }

    // ==================== SELECT list ====================

    /// Replace the select list.
    pub fn select(self, columns: &[&str]) -> Self {
        self.apply(|q| {
            q.columns = columns
                .iter()
                .map(|c| Column::parse(c))
                .collect::<OrmResult<Vec<_>>>()?;
            Ok(())
        })
    }

    pub fn add_select(self, column: &str) -> Self {
        self.apply(|q| {
            q.columns.push(Column::parse(column)?);
            Ok(())
        })
    }

    /// Add a raw select expression with `?` placeholders.
    pub fn select_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.apply(|q| {
            q.columns.push(Column::Raw(Fragment::template(sql, bindings)?));
            Ok(())
        })
    }

    /// Add `(sub-query) AS alias` to the select list.
    pub fn select_sub(self, sub: &SubQuery, alias: &str) -> Self {
        self.apply(|q| {
            sub_error("select sub-query", sub)?;
            q.columns.push(Column::Sub {
                query: sub.fragment.clone(),
                alias: Ident::parse(alias)?,
            });
            Ok(())
        })
    }

    // ==================== WHERE ====================

    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(|w| w.eq(column, value))
    }

    pub fn or_where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(|w| w.or_eq(column, value))
    }

    /// `column <op> value` with the operator given as text (`"="`, `">="`,
    /// `"like"`, ...).
    pub fn where_op(self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        self.filter(|w| w.op(column, op, value))
    }

    pub fn or_where_op(self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        self.filter(|w| w.or_op(column, op, value))
    }

    pub fn where_cmp(self, column: &str, op: Op, value: impl Into<Value>) -> Self {
        self.filter(|w| w.cmp(column, op, value))
    }

    pub fn where_null(self, column: &str) -> Self {
        self.filter(|w| w.null(column))
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.filter(|w| w.not_null(column))
    }

    pub fn or_where_null(self, column: &str) -> Self {
        self.filter(|w| w.or_null(column))
    }

    pub fn where_in<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filter(|w| w.is_in(column, values))
    }

    pub fn where_not_in<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(|w| w.not_in(column, values))
    }

    pub fn where_in_sub(self, column: &str, sub: &SubQuery) -> Self {
        self.filter(|w| w.in_sub(column, sub))
    }

    /// Compare two columns.
    pub fn where_column(self, left: &str, op: &str, right: &str) -> Self {
        self.filter(|w| w.column(left, op, right))
    }

    /// Raw predicate with `?` placeholders.
    pub fn where_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.filter(|w| w.raw(sql, bindings))
    }

    pub fn or_where_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.filter(|w| w.or_raw(sql, bindings))
    }

    /// Parenthesised group of predicates, joined with AND.
    pub fn where_group(self, build: impl FnOnce(Conditions) -> Conditions) -> Self {
        self.filter(|w| w.group(build))
    }

    /// Parenthesised group of predicates, joined with OR.
    pub fn or_where_group(self, build: impl FnOnce(Conditions) -> Conditions) -> Self {
        self.filter(|w| w.or_group(build))
    }

    // ==================== JOIN ====================

    fn add_join(
        self,
        kind: JoinKind,
        table: &str,
        on: impl FnOnce(Conditions) -> Conditions,
    ) -> Self {
        self.apply(|q| {
            let table = Ident::parse(table)?;
            let mut on = on(Conditions::new());
            if let Some(e) = on.take_error() {
                return Err(OrmError::builder(format!("join {table}: {e}")));
            }
            if on.is_empty() {
                return Err(OrmError::builder(format!("join {table} has no ON condition")));
            }
            q.joins.push(Join { kind, table, on });
            Ok(())
        })
    }

    /// `INNER JOIN table ON ...`
    ///
    /// ```ignore
    /// query.join("node_cte", |on| on.column("node.id", "=", "node_cte.parent_id"))
    /// ```
    pub fn join(self, table: &str, on: impl FnOnce(Conditions) -> Conditions) -> Self {
        self.add_join(JoinKind::Inner, table, on)
    }

    pub fn left_join(self, table: &str, on: impl FnOnce(Conditions) -> Conditions) -> Self {
        self.add_join(JoinKind::Left, table, on)
    }

    pub fn right_join(self, table: &str, on: impl FnOnce(Conditions) -> Conditions) -> Self {
        self.add_join(JoinKind::Right, table, on)
    }

    // ==================== ORDER / LIMIT ====================

    pub fn order_by(self, column: &str) -> Self {
        self.apply(|q| {
            q.orders.push(OrderBy::Asc(Ident::parse(column)?));
            Ok(())
        })
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.apply(|q| {
            q.orders.push(OrderBy::Desc(Ident::parse(column)?));
            Ok(())
        })
    }

    /// Raw ORDER BY item, e.g. `"lower(name) DESC NULLS LAST"`.
    pub fn order_by_raw(self, sql: &str) -> Self {
        self.apply(|q| {
            let sql = sql.trim();
            if sql.is_empty() || sql.contains(';') {
                return Err(OrmError::builder(format!("invalid ORDER BY expression `{sql}`")));
            }
            q.orders.push(OrderBy::Raw(sql.to_string()));
            Ok(())
        })
    }

    pub fn limit(self, n: u64) -> Self {
        self.apply(|q| {
            q.limit = Some(n);
            Ok(())
        })
    }

    pub fn offset(self, n: u64) -> Self {
        self.apply(|q| {
            q.offset = Some(n);
            Ok(())
        })
    }

    /// Append `FOR UPDATE`.
    pub fn for_update(self) -> Self {
        self.apply(|q| {
            q.for_update = true;
            Ok(())
        })
    }

    // ==================== UNION ====================

    fn add_union(self, sub: &SubQuery, all: bool) -> Self {
        self.apply(|q| {
            sub_error("union", sub)?;
            q.unions.push(Union {
                all,
                query: sub.fragment.clone(),
            });
            Ok(())
        })
    }

    pub fn union(self, sub: &SubQuery) -> Self {
        self.add_union(sub, false)
    }

    pub fn union_all(self, sub: &SubQuery) -> Self {
        self.add_union(sub, true)
    }

    // ==================== Context ====================

    /// Replace the execution context forwarded to the executor.
    pub fn with_context(self, ctx: ExecContext) -> Self {
        self.apply(|q| {
            q.ctx = ctx;
            Ok(())
        })
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.apply(|q| {
            q.ctx = std::mem::take(&mut q.ctx).with_timeout(timeout);
            Ok(())
        })
    }

    pub fn with_tag(self, tag: &str) -> Self {
        self.apply(|q| {
            q.ctx = std::mem::take(&mut q.ctx).with_tag(tag);
            Ok(())
        })
    }

    // ==================== Compile ====================

    /// Everything but the WITH prefix, ORDER BY, LIMIT, OFFSET and FOR UPDATE.
    fn write_body(&self, out: &mut Fragment) {
        out.push("SELECT ");
        if self.columns.is_empty() {
            out.push("*");
        }
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            column.write(out);
        }

        match &self.subject {
            Some(Subject::Table(table)) => {
                out.push(" FROM ").push_ident(table);
            }
            Some(Subject::Sub { query, alias }) => {
                out.push(" FROM (")
                    .push_fragment(query)
                    .push(") AS ")
                    .push_ident(alias);
            }
            None => {}
        }

        for join in &self.joins {
            join.write(out);
        }

        if !self.wheres.is_empty() {
            out.push(" WHERE ");
            self.wheres.write(out);
        }

        for union in &self.unions {
            out.push(if union.all { " UNION ALL " } else { " UNION " });
            out.push_fragment(&union.query);
        }
    }

    fn write_tail(&self, out: &mut Fragment) {
        if !self.orders.is_empty() {
            out.push(" ORDER BY ");
            for (i, order) in self.orders.iter().enumerate() {
                if i > 0 {
                    out.push(", ");
                }
                order.write(out);
            }
        }
        if let Some(limit) = self.limit {
            out.push(" LIMIT ").push(&limit.to_string());
        }
        if let Some(offset) = self.offset {
            out.push(" OFFSET ").push(&offset.to_string());
        }
        if self.for_update {
            out.push(" FOR UPDATE");
        }
    }

    fn write_with(&self, out: &mut Fragment) {
        if self.ctes.is_empty() {
            return;
        }
        out.push(if self.ctes.iter().any(|c| c.recursive) {
            "WITH RECURSIVE "
        } else {
            "WITH "
        });
        for (i, cte) in self.ctes.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            cte.write(out);
        }
        out.push(" ");
    }

    fn fragment(&self) -> Fragment {
        let mut out = Fragment::new();
        self.write_with(&mut out);
        self.write_body(&mut out);
        self.write_tail(&mut out);
        out
    }

    /// Render SQL text with `$n` placeholders and the matching bindings.
    pub fn compile(&self) -> CompiledQuery {
        self.fragment().compile()
    }

    /// Extract the query for embedding in another query.
    ///
    /// The sub-query carries this query's error, if any.
    pub fn sub_query(&self) -> SubQuery {
        SubQuery {
            fragment: self.fragment(),
            error: self.error.clone(),
        }
    }
}
