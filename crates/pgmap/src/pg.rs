//! [`Executor`] implementations for tokio-postgres clients and transactions.
//!
//! Statements are prepared first so the cursor knows its column names before
//! the first row arrives. Rows are streamed with `query_raw` and every cell is
//! decoded into a [`Value`] holder. A context timeout covers both preparing
//! the statement and draining the stream.

use crate::error::{OrmError, OrmResult};
use crate::executor::{ExecContext, Executor, RowCursor};
use crate::value::Value;
use futures_core::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep};
use tokio_postgres::types::ToSql;
use tokio_postgres::{GenericClient as PgClient, Row, Statement};

fn column_names(stmt: &Statement) -> Vec<String> {
    stmt.columns().iter().map(|c| c.name().to_string()).collect()
}

fn params(bindings: &[Value]) -> impl ExactSizeIterator<Item = &(dyn ToSql + Sync)> {
    bindings.iter().map(|v| v as &(dyn ToSql + Sync))
}

fn decode_row(row: &Row) -> OrmResult<Vec<Value>> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| {
            row.try_get::<_, Value>(i)
                .map_err(|e| OrmError::decode(column.name(), e.to_string()))
        })
        .collect()
}

/// Adapts a tokio-postgres row stream into decoded rows, enforcing an
/// optional deadline.
struct PgRows<S> {
    inner: Pin<Box<S>>,
    deadline: Option<(Pin<Box<Sleep>>, Duration)>,
    finished: bool,
}

impl<S> PgRows<S> {
    fn new(stream: S, deadline: Option<(Instant, Duration)>) -> Self {
        Self {
            inner: Box::pin(stream),
            deadline: deadline.map(|(at, limit)| (Box::pin(tokio::time::sleep_until(at)), limit)),
            finished: false,
        }
    }
}

impl<S> Stream for PgRows<S>
where
    S: Stream<Item = Result<Row, tokio_postgres::Error>> + Send + 'static,
{
    type Item = OrmResult<Vec<Value>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if let Some((sleep, limit)) = this.deadline.as_mut() {
            if sleep.as_mut().poll(cx).is_ready() {
                this.finished = true;
                return Poll::Ready(Some(Err(OrmError::Timeout(*limit))));
            }
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(decode_row(&row))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(OrmError::from_db_error(e)))),
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

async fn open_cursor<C>(
    client: &C,
    sql: &str,
    bindings: &[Value],
    ctx: &ExecContext,
) -> OrmResult<RowCursor>
where
    C: PgClient + Sync,
{
    let deadline = ctx.timeout().map(|limit| (Instant::now() + limit, limit));
    let open = async {
        let stmt = client.prepare(sql).await.map_err(OrmError::from_db_error)?;
        let columns = column_names(&stmt);
        let stream = client
            .query_raw(&stmt, params(bindings))
            .await
            .map_err(OrmError::from_db_error)?;
        Ok::<_, OrmError>((columns, stream))
    };

    let (columns, stream) = match deadline {
        Some((at, limit)) => tokio::time::timeout_at(at, open)
            .await
            .map_err(|_| OrmError::Timeout(limit))??,
        None => open.await?,
    };
    Ok(RowCursor::new(columns, PgRows::new(stream, deadline)))
}

impl Executor for tokio_postgres::Client {
    async fn execute(&self, sql: &str, bindings: &[Value], ctx: &ExecContext) -> OrmResult<RowCursor> {
        open_cursor(self, sql, bindings, ctx).await
    }
}

impl Executor for tokio_postgres::Transaction<'_> {
    async fn execute(&self, sql: &str, bindings: &[Value], ctx: &ExecContext) -> OrmResult<RowCursor> {
        open_cursor(self, sql, bindings, ctx).await
    }
}
