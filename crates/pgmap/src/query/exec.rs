//! Terminal calls: execute the compiled query and materialize the rows.

use super::Query;
use crate::clause::CompiledQuery;
use crate::error::{OrmError, OrmResult};
use crate::executor::{RowCursor, TransactionBinder, dispatch};
use crate::log;
use crate::meta::{Record, Registry};
use crate::scan::{Destination, Element, Row};
use crate::value::{FromValue, Value};
use std::collections::HashMap;
use std::hash::Hash;

/// Outcome of one execution.
///
/// Always carries the final SQL text and bindings, including when the query
/// failed or was never sent.
#[derive(Debug)]
#[must_use]
pub struct QueryResult {
    pub sql: String,
    pub bindings: Vec<Value>,
    pub error: Option<OrmError>,
    /// Rows committed into the destination.
    pub rows: u64,
}

impl QueryResult {
    fn new(compiled: CompiledQuery) -> Self {
        Self {
            sql: compiled.sql,
            bindings: compiled.bindings,
            error: None,
            rows: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&OrmError> {
        self.error.as_ref()
    }

    /// Row count on success, the error otherwise.
    pub fn into_result(self) -> OrmResult<u64> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.rows),
        }
    }
}

/// Drain `cursor` into `dest`. Single shapes stop after the first row.
///
/// Returns the number of rows committed alongside the outcome; rows committed
/// before a failure stay in the destination.
pub(crate) async fn materialize<D: Destination>(
    dest: &mut D,
    mut cursor: RowCursor,
    registry: &Registry,
) -> (u64, OrmResult<()>) {
    let plan = match dest.prepare(cursor.columns(), registry) {
        Ok(plan) => plan,
        Err(e) => return (0, Err(e)),
    };
    let single = D::shape().is_single();

    let mut rows = 0;
    while let Some(row) = cursor.next_row().await {
        if let Err(e) = row.and_then(|row| dest.accept(&plan, row)) {
            return (rows, Err(e));
        }
        rows += 1;
        if single {
            break;
        }
    }
    (rows, Ok(()))
}

impl<T: Record> Query<T> {
    /// Execute into any supported destination.
    ///
    /// The destination's type selects how rows are stored; see
    /// [`Shape`](crate::Shape). A recorded builder error is returned without
    /// calling the executor.
    pub async fn get_to<B, D>(&self, binder: &B, dest: &mut D) -> QueryResult
    where
        B: TransactionBinder,
        D: Destination,
    {
        let mut result = QueryResult::new(self.compile());

        if let Some(err) = &self.error {
            log::short_circuit(&self.ctx, err, &result.sql);
            result.error = Some(OrmError::Builder(err.clone()));
            return result;
        }

        log::before_execute(&self.ctx, D::shape(), &result.sql, result.bindings.len());
        let cursor = match dispatch(binder, &result.sql, &result.bindings, &self.ctx).await {
            Ok(cursor) => cursor,
            Err(e) => {
                log::failed(&self.ctx, &e, 0, &result.sql);
                result.error = Some(e);
                return result;
            }
        };

        let (rows, outcome) = materialize(dest, cursor, &self.registry).await;
        result.rows = rows;
        if let Err(e) = outcome {
            log::failed(&self.ctx, &e, rows, &result.sql);
            result.error = Some(e);
        }
        result
    }

    /// First matching record, with `LIMIT 1` applied.
    pub async fn get<B: TransactionBinder>(&self, binder: &B) -> (Option<T>, QueryResult) {
        let mut record = T::default();
        let result = self.clone().limit(1).get_to(binder, &mut record).await;
        let found = result.is_ok() && result.rows > 0;
        (found.then_some(record), result)
    }

    /// All matching records in row order.
    pub async fn get_list<B: TransactionBinder>(&self, binder: &B) -> (Vec<T>, QueryResult) {
        let mut records = Vec::new();
        let result = self.get_to(binder, &mut records).await;
        (records, result)
    }

    /// Records keyed by the first result column; the last row per key wins.
    pub async fn get_map<K, B>(&self, binder: &B) -> (HashMap<K, T>, QueryResult)
    where
        K: FromValue + Default + Eq + Hash + Send,
        B: TransactionBinder,
    {
        let mut map = HashMap::new();
        let result = self.get_to(binder, &mut map).await;
        (map, result)
    }

    /// Records grouped by the first result column, in arrival order.
    pub async fn get_grouped<K, B>(&self, binder: &B) -> (HashMap<K, Vec<T>>, QueryResult)
    where
        K: FromValue + Default + Eq + Hash + Send,
        B: TransactionBinder,
    {
        let mut map = HashMap::new();
        let result = self.get_to(binder, &mut map).await;
        (map, result)
    }

    /// First column of the first row.
    pub async fn get_scalar<S, B>(&self, binder: &B) -> (Option<S>, QueryResult)
    where
        S: Element,
        B: TransactionBinder,
    {
        let mut value = S::default();
        let result = self.get_to(binder, &mut value).await;
        let found = result.is_ok() && result.rows > 0;
        (found.then_some(value), result)
    }

    /// First column of every row.
    pub async fn get_scalars<S, B>(&self, binder: &B) -> (Vec<S>, QueryResult)
    where
        S: Element,
        B: TransactionBinder,
    {
        let mut values = Vec::new();
        let result = self.get_to(binder, &mut values).await;
        (values, result)
    }

    /// First row as a column-name mapping.
    pub async fn get_row<B: TransactionBinder>(&self, binder: &B) -> (Option<Row>, QueryResult) {
        let mut row = Row::new();
        let result = self.get_to(binder, &mut row).await;
        let found = result.is_ok() && result.rows > 0;
        (found.then_some(row), result)
    }

    /// Every row as a column-name mapping.
    pub async fn get_rows<B: TransactionBinder>(&self, binder: &B) -> (Vec<Row>, QueryResult) {
        let mut rows = Vec::new();
        let result = self.get_to(binder, &mut rows).await;
        (rows, result)
    }
}
