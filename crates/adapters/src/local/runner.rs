use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use querydeck_core::execution::ResultRow;
use thiserror::Error;
use tokio::sync::Notify;

use crate::local::buffer::RowBuffer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryBackendError {
    message: String,
}

impl QueryBackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryRunnerError {
    #[error("query backend failed: {0}")]
    Backend(#[source] QueryBackendError),
}

#[derive(Debug, Default)]
struct CancellationState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared flag that stops a streaming query between rows, or while it is
/// waiting for the next one.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<CancellationState>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_one();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.state.notify.notified().await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryExecutionSummary {
    pub rows_streamed: u64,
    pub was_cancelled: bool,
    pub elapsed: Duration,
}

#[async_trait]
pub trait QueryRowStream: Send {
    async fn next_row(&mut self) -> Result<Option<ResultRow>, QueryBackendError>;

    /// Column names, known once the first row (or the result header) has
    /// been read.
    fn columns(&self) -> Vec<String>;

    async fn cancel(&mut self) -> Result<(), QueryBackendError> {
        Ok(())
    }
}

#[async_trait]
pub trait QueryBackend: Send + Sync + 'static {
    type Stream: QueryRowStream + Send;

    async fn start_query(&self, sql: &str) -> Result<Self::Stream, QueryBackendError>;
}

#[derive(Debug)]
pub struct QueryRunner<B: QueryBackend> {
    backend: B,
}

impl<B: QueryBackend> QueryRunner<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub async fn execute_streaming(
        &self,
        sql: &str,
        buffer: &mut RowBuffer,
        cancellation: &CancellationToken,
    ) -> Result<QueryExecutionSummary, QueryRunnerError> {
        let started_at = std::time::Instant::now();
        let mut stream = self
            .backend
            .start_query(sql)
            .await
            .map_err(QueryRunnerError::Backend)?;

        let mut rows_streamed = 0_u64;
        while !cancellation.is_cancelled() {
            let next = tokio::select! {
                row = stream.next_row() => row.map_err(QueryRunnerError::Backend)?,
                () = cancellation.cancelled() => break,
            };
            let Some(row) = next else {
                buffer.set_columns(stream.columns());
                return Ok(QueryExecutionSummary {
                    rows_streamed,
                    was_cancelled: false,
                    elapsed: started_at.elapsed(),
                });
            };

            buffer.push(row);
            rows_streamed += 1;
        }

        stream.cancel().await.map_err(QueryRunnerError::Backend)?;
        buffer.set_columns(stream.columns());
        Ok(QueryExecutionSummary {
            rows_streamed,
            was_cancelled: true,
            elapsed: started_at.elapsed(),
        })
    }
}
