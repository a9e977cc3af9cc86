//! Execution capability consumed by the materializer.

use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use futures_core::Stream;
use futures_util::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Per-query execution context, forwarded verbatim to the executor.
///
/// # Example
/// ```ignore
/// let ctx = ExecContext::new()
///     .with_tag("node.ancestors")
///     .with_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecContext {
    tag: Option<String>,
    timeout: Option<Duration>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag the query for logs.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Deadline for obtaining and draining the cursor.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A stream of decoded rows, one [`Value`] per result column.
///
/// Dropping the cursor releases the underlying result set.
#[must_use]
pub struct RowCursor {
    columns: Vec<String>,
    inner: Pin<Box<dyn Stream<Item = OrmResult<Vec<Value>>> + Send>>,
}

impl RowCursor {
    pub fn new<S>(columns: Vec<String>, stream: S) -> Self
    where
        S: Stream<Item = OrmResult<Vec<Value>>> + Send + 'static,
    {
        Self {
            columns,
            inner: Box::pin(stream),
        }
    }

    /// A cursor with no rows.
    pub fn empty(columns: Vec<String>) -> Self {
        Self::new(columns, futures_util::stream::empty())
    }

    /// Result column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Next row, or `None` once the result set is exhausted.
    pub async fn next_row(&mut self) -> Option<OrmResult<Vec<Value>>> {
        self.inner.next().await
    }
}

impl Stream for RowCursor {
    type Item = OrmResult<Vec<Value>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for RowCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowCursor")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Runs compiled SQL and hands back a row cursor.
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        sql: &str,
        bindings: &[Value],
        ctx: &ExecContext,
    ) -> impl Future<Output = OrmResult<RowCursor>> + Send;
}

/// Supplies the executor a query runs on: the bound transaction when there
/// is one, the general connection otherwise.
pub trait TransactionBinder: Send + Sync {
    type Conn: Executor;
    type Tx: Executor;

    fn connection(&self) -> &Self::Conn;

    fn transaction(&self) -> Option<&Self::Tx>;
}

impl<E: Executor> TransactionBinder for E {
    type Conn = E;
    type Tx = E;

    fn connection(&self) -> &E {
        self
    }

    fn transaction(&self) -> Option<&E> {
        None
    }
}

/// A connection with an optionally bound transaction.
///
/// ```ignore
/// let session = Session::new(&conn).bind_transaction(&tx);
/// let (node, _) = registry.query::<Node>().where_eq("id", 3).get(&session).await;
/// ```
pub struct Session<'a, C, T = C> {
    conn: &'a C,
    tx: Option<&'a T>,
}

impl<'a, C: Executor> Session<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn, tx: None }
    }
}

impl<'a, C: Executor, T: Executor> Session<'a, C, T> {
    /// Route subsequent queries through `tx`.
    pub fn bind_transaction<U: Executor>(self, tx: &'a U) -> Session<'a, C, U> {
        Session {
            conn: self.conn,
            tx: Some(tx),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.tx.is_some()
    }
}

impl<C: Executor, T: Executor> TransactionBinder for Session<'_, C, T> {
    type Conn = C;
    type Tx = T;

    fn connection(&self) -> &C {
        self.conn
    }

    fn transaction(&self) -> Option<&T> {
        self.tx
    }
}

/// Run on the bound transaction if present, otherwise on the connection.
pub(crate) async fn dispatch<B: TransactionBinder>(
    binder: &B,
    sql: &str,
    bindings: &[Value],
    ctx: &ExecContext,
) -> OrmResult<RowCursor> {
    match binder.transaction() {
        Some(tx) => tx.execute(sql, bindings, ctx).await,
        None => binder.connection().execute(sql, bindings, ctx).await,
    }
}

/// Await `fut`, failing with [`OrmError::Timeout`] once the context's
/// deadline passes.
pub async fn with_deadline<F, T>(ctx: &ExecContext, fut: F) -> OrmResult<T>
where
    F: Future<Output = OrmResult<T>>,
{
    match ctx.timeout() {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| OrmError::Timeout(limit))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubExecutor;

    #[test]
    fn context_builder() {
        let ctx = ExecContext::new()
            .with_tag("node.list")
            .with_timeout(Duration::from_millis(50));
        assert_eq!(ctx.tag(), Some("node.list"));
        assert_eq!(ctx.timeout(), Some(Duration::from_millis(50)));
        assert_eq!(ExecContext::default().tag(), None);
    }

    #[tokio::test]
    async fn executor_is_its_own_binder() {
        let conn = StubExecutor::new().with_rows(&["n"], vec![vec![Value::Int(1)]]);
        let mut cursor = dispatch(&conn, "SELECT 1 AS n", &[], &ExecContext::new())
            .await
            .unwrap();
        assert_eq!(cursor.columns(), ["n".to_string()]);
        assert_eq!(cursor.next_row().await.unwrap().unwrap(), vec![Value::Int(1)]);
        assert!(cursor.next_row().await.is_none());
        assert_eq!(conn.calls(), 1);
    }

    #[tokio::test]
    async fn bound_transaction_is_preferred() {
        let conn = StubExecutor::new();
        let tx = StubExecutor::new();
        let session = Session::new(&conn).bind_transaction(&tx);
        assert!(session.is_bound());

        let _cursor = dispatch(&session, "SELECT 1", &[], &ExecContext::new())
            .await
            .unwrap();
        assert_eq!(tx.calls(), 1);
        assert_eq!(conn.calls(), 0);
    }

    #[tokio::test]
    async fn unbound_session_uses_connection() {
        let conn = StubExecutor::new();
        let session = Session::new(&conn);
        assert!(!session.is_bound());
        let _cursor = dispatch(&session, "SELECT 1", &[], &ExecContext::new())
            .await
            .unwrap();
        assert_eq!(conn.calls(), 1);
    }

    #[tokio::test]
    async fn deadline_elapses() {
        let ctx = ExecContext::new().with_timeout(Duration::from_millis(5));
        let err = with_deadline(&ctx, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn empty_cursor_yields_nothing() {
        let mut cursor = RowCursor::empty(vec!["id".into()]);
        assert!(cursor.next_row().await.is_none());
    }
}
