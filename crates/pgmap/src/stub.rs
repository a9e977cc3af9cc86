//! Scripted in-memory executor.
//!
//! Useful for testing query composition and materialization without a
//! database: the stub records every call and hands back a fixed result set.
//!
//! ```ignore
//! let stub = StubExecutor::new().with_rows(
//!     &["id", "parent_id", "name"],
//!     vec![vec![1.into(), 0.into(), "root".into()]],
//! );
//! let (nodes, result) = registry.query::<Node>().get_list(&stub).await;
//! assert_eq!(stub.calls(), 1);
//! ```

use crate::error::{OrmError, OrmResult};
use crate::executor::{ExecContext, Executor, RowCursor, with_deadline};
use crate::value::Value;
use futures_core::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

/// A recorded `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub struct StubCall {
    pub sql: String,
    pub bindings: Vec<Value>,
    pub ctx: ExecContext,
}

#[derive(Debug, Clone, Default)]
struct Script {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    fail_execute: Option<String>,
    fail_row: Option<(usize, String)>,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    consumed: AtomicUsize,
    open: AtomicUsize,
}

/// Executor returning a scripted result set.
#[derive(Debug, Default)]
pub struct StubExecutor {
    script: Script,
    counters: Arc<Counters>,
    calls: Mutex<Vec<StubCall>>,
}

impl StubExecutor {
    /// A stub that returns an empty result with no columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `rows` under `columns` on every call.
    pub fn with_rows(mut self, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.script.columns = columns.iter().map(|c| c.to_string()).collect();
        self.script.rows = rows;
        self
    }

    /// Fail every `execute` call with an execution error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.script.fail_execute = Some(message.into());
        self
    }

    /// Yield an error instead of the row at `index`, ending the stream.
    pub fn failing_at_row(mut self, index: usize, message: impl Into<String>) -> Self {
        self.script.fail_row = Some((index, message.into()));
        self
    }

    /// Sleep before returning the cursor.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script.delay = Some(delay);
        self
    }

    /// Number of `execute` calls so far.
    pub fn calls(&self) -> usize {
        self.recorded().len()
    }

    /// Every recorded call, oldest first.
    pub fn recorded(&self) -> Vec<StubCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn last_call(&self) -> Option<StubCall> {
        self.recorded().pop()
    }

    /// Rows pulled from cursors, across all calls.
    pub fn rows_consumed(&self) -> usize {
        self.counters.consumed.load(Ordering::SeqCst)
    }

    /// Cursors handed out and not yet dropped.
    pub fn open_cursors(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }
}

impl Executor for StubExecutor {
    async fn execute(&self, sql: &str, bindings: &[Value], ctx: &ExecContext) -> OrmResult<RowCursor> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(StubCall {
                sql: sql.to_string(),
                bindings: bindings.to_vec(),
                ctx: ctx.clone(),
            });
        }

        let script = self.script.clone();
        let counters = Arc::clone(&self.counters);
        with_deadline(ctx, async move {
            if let Some(delay) = script.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = script.fail_execute {
                return Err(OrmError::Execution(message));
            }
            counters.open.fetch_add(1, Ordering::SeqCst);
            let rows = StubRows {
                rows: script.rows.into_iter(),
                fail_row: script.fail_row,
                position: 0,
                done: false,
                counters,
            };
            Ok(RowCursor::new(script.columns, rows))
        })
        .await
    }
}

struct StubRows {
    rows: std::vec::IntoIter<Vec<Value>>,
    fail_row: Option<(usize, String)>,
    position: usize,
    done: bool,
    counters: Arc<Counters>,
}

impl Stream for StubRows {
    type Item = OrmResult<Vec<Value>>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if let Some((index, message)) = &this.fail_row {
            if *index == this.position {
                this.done = true;
                return Poll::Ready(Some(Err(OrmError::Execution(message.clone()))));
            }
        }
        match this.rows.next() {
            Some(row) => {
                this.position += 1;
                this.counters.consumed.fetch_add(1, Ordering::SeqCst);
                Poll::Ready(Some(Ok(row)))
            }
            None => {
                this.done = true;
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for StubRows {
    fn drop(&mut self) {
        self.counters.open.fetch_sub(1, Ordering::SeqCst);
    }
}
