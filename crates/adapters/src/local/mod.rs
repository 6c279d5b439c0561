//! In-process execution service.
//!
//! Runs SQL on a row-streaming backend in a background task and keeps the
//! result on the "server" side, so the workbench talks to it through the same
//! submit / status / page / cancel contract and push stream it would use for
//! a remote service. Page tokens are opaque offsets into the buffered rows.
//! Only the most recently finished executions keep their results; older ones
//! are forgotten and report as unknown.

pub mod buffer;
pub mod runner;

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::stream;
use querydeck_core::execution::{
    ExecutionId, ExecutionPhase, STATUS_CANCELED, STATUS_FAILED, STATUS_QUEUED, STATUS_RUNNING,
    STATUS_SUCCEEDED,
};
use querydeck_core::service::{
    ExecutionService, PageRequest, PushError, PushEvent, PushSource, PushStream, ResultPage,
    ServiceError, StatusReport, SubmitReceipt, SubmitRequest,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use self::buffer::RowBuffer;
use self::runner::{CancellationToken, QueryBackend, QueryRunner};

pub const DEFAULT_ROW_LIMIT: usize = 10_000;
pub const DEFAULT_RETAINED_RESULTS: usize = 32;
const EVENT_CAPACITY: usize = 1_024;

#[derive(Debug)]
struct LocalExecution {
    status: &'static str,
    message: Option<String>,
    query_hash: String,
    error_summary: Option<String>,
    rows: Option<RowBuffer>,
    cancellation: CancellationToken,
}

impl LocalExecution {
    fn report(&self) -> StatusReport {
        StatusReport {
            status: self.status.to_string(),
            message: self.message.clone(),
            query_hash: Some(self.query_hash.clone()),
            error_summary: self.error_summary.clone(),
            row_limit_reached: self.rows.as_ref().is_some_and(RowBuffer::limit_reached),
        }
    }

    fn is_terminal(&self) -> bool {
        ExecutionPhase::from_server_status(self.status).is_terminal()
    }
}

#[derive(Debug)]
struct ExecutionTable {
    entries: HashMap<ExecutionId, LocalExecution>,
    /// Finished executions, oldest first.
    finished: VecDeque<ExecutionId>,
    retained: usize,
}

impl ExecutionTable {
    fn new(retained: usize) -> Self {
        Self {
            entries: HashMap::new(),
            finished: VecDeque::new(),
            retained: retained.max(1),
        }
    }

    fn get(&self, execution_id: &ExecutionId) -> Option<&LocalExecution> {
        self.entries.get(execution_id)
    }

    fn get_mut(&mut self, execution_id: &ExecutionId) -> Option<&mut LocalExecution> {
        self.entries.get_mut(execution_id)
    }

    fn insert(&mut self, execution_id: ExecutionId, execution: LocalExecution) {
        self.entries.insert(execution_id, execution);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Records that `execution_id` finished and drops the oldest finished
    /// executions beyond the retention limit.
    fn finish(&mut self, execution_id: &ExecutionId) {
        self.finished.push_back(execution_id.clone());
        while self.finished.len() > self.retained {
            if let Some(evicted) = self.finished.pop_front() {
                self.entries.remove(&evicted);
                debug!(execution_id = %evicted, "evicted finished execution");
            }
        }
    }
}

#[derive(Debug)]
struct Shared {
    executions: Mutex<ExecutionTable>,
    events: broadcast::Sender<String>,
}

impl Shared {
    fn executions(&self) -> MutexGuard<'_, ExecutionTable> {
        self.executions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(
        &self,
        execution_id: &ExecutionId,
        status: &'static str,
        message: Option<String>,
        update: impl FnOnce(&mut LocalExecution),
    ) {
        {
            let mut executions = self.executions();
            let Some(execution) = executions.get_mut(execution_id) else {
                return;
            };
            let was_terminal = execution.is_terminal();
            execution.status = status;
            execution.message.clone_from(&message);
            update(execution);
            if !was_terminal && execution.is_terminal() {
                executions.finish(execution_id);
            }
        }
        self.publish(execution_id, status, message);
    }

    fn publish(&self, execution_id: &ExecutionId, status: &str, message: Option<String>) {
        let event = PushEvent {
            execution_id: execution_id.clone(),
            status: status.to_string(),
            message,
        };
        match event.encode() {
            // No subscriber is fine; polling still sees the status.
            Ok(payload) => {
                let _ = self.events.send(payload);
            }
            Err(err) => debug!(error = %err, "failed to encode push event"),
        }
    }
}

/// Execution service that runs queries on per-datasource backends.
#[derive(Debug)]
pub struct LocalExecutionService<B: QueryBackend> {
    runners: HashMap<String, Arc<QueryRunner<B>>>,
    row_limit: usize,
    shared: Arc<Shared>,
}

impl<B: QueryBackend> Default for LocalExecutionService<B> {
    fn default() -> Self {
        Self::new(DEFAULT_ROW_LIMIT)
    }
}

impl<B: QueryBackend> LocalExecutionService<B> {
    #[must_use]
    pub fn new(row_limit: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            runners: HashMap::new(),
            row_limit: row_limit.max(1),
            shared: Arc::new(Shared {
                executions: Mutex::new(ExecutionTable::new(DEFAULT_RETAINED_RESULTS)),
                events,
            }),
        }
    }

    #[must_use]
    pub fn with_datasource(mut self, datasource_id: impl Into<String>, backend: B) -> Self {
        self.runners
            .insert(datasource_id.into(), Arc::new(QueryRunner::new(backend)));
        self
    }

    /// Number of finished executions whose status and results stay
    /// available.
    #[must_use]
    pub fn with_retained_results(self, count: usize) -> Self {
        self.shared.executions().retained = count.max(1);
        self
    }

    /// Executions currently known, running or retained.
    #[must_use]
    pub fn tracked_executions(&self) -> usize {
        self.shared.executions().len()
    }

    #[must_use]
    pub fn datasource_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runners.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl<B: QueryBackend> ExecutionService for LocalExecutionService<B> {
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, ServiceError> {
        let runner = self
            .runners
            .get(&request.datasource_id)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownDatasource(request.datasource_id.clone()))?;

        let execution_id = ExecutionId::new(Uuid::new_v4().to_string());
        let query_hash = query_fingerprint(&request.sql);
        let cancellation = CancellationToken::new();
        self.shared.executions().insert(
            execution_id.clone(),
            LocalExecution {
                status: STATUS_QUEUED,
                message: Some("Queued".to_string()),
                query_hash: query_hash.clone(),
                error_summary: None,
                rows: None,
                cancellation: cancellation.clone(),
            },
        );
        self.shared
            .publish(&execution_id, STATUS_QUEUED, Some("Queued".to_string()));
        info!(%execution_id, datasource = %request.datasource_id, "execution queued");

        let shared = Arc::clone(&self.shared);
        let row_limit = self.row_limit;
        let spawned_id = execution_id.clone();
        tokio::spawn(async move {
            run_execution(shared, runner, spawned_id, request.sql, row_limit, cancellation).await;
        });

        Ok(SubmitReceipt {
            execution_id,
            status: STATUS_QUEUED.to_string(),
            query_hash: Some(query_hash),
        })
    }

    async fn status(&self, execution_id: &ExecutionId) -> Result<StatusReport, ServiceError> {
        self.shared
            .executions()
            .get(execution_id)
            .map(LocalExecution::report)
            .ok_or_else(|| ServiceError::UnknownExecution(execution_id.clone()))
    }

    async fn page(&self, request: PageRequest) -> Result<ResultPage, ServiceError> {
        let offset = match request.page_token.as_deref() {
            None | Some("") => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ServiceError::InvalidPageToken(token.to_string()))?,
        };

        let executions = self.shared.executions();
        let execution = executions
            .get(&request.execution_id)
            .ok_or_else(|| ServiceError::UnknownExecution(request.execution_id.clone()))?;
        let rows = execution
            .rows
            .as_ref()
            .filter(|_| execution.status == STATUS_SUCCEEDED)
            .ok_or_else(|| ServiceError::ResultsUnavailable(request.execution_id.clone()))?;
        if offset > rows.len() {
            return Err(ServiceError::InvalidPageToken(offset.to_string()));
        }

        let page = rows.page(offset, request.page_size.max(1));
        let next_offset = offset + page.len();
        Ok(ResultPage {
            columns: rows.columns().to_vec(),
            rows: page.to_vec(),
            next_page_token: (next_offset < rows.len()).then(|| next_offset.to_string()),
            row_limit_reached: rows.limit_reached(),
        })
    }

    async fn cancel(&self, execution_id: &ExecutionId) -> Result<(), ServiceError> {
        let mut executions = self.shared.executions();
        let execution = executions
            .get_mut(execution_id)
            .ok_or_else(|| ServiceError::UnknownExecution(execution_id.clone()))?;
        if execution.is_terminal() {
            return Ok(());
        }
        execution.cancellation.cancel();
        execution.message = Some("Cancellation requested".to_string());
        info!(%execution_id, "execution cancellation requested");
        Ok(())
    }
}

#[async_trait]
impl<B: QueryBackend> PushSource for LocalExecutionService<B> {
    async fn subscribe(&self) -> Result<PushStream, PushError> {
        let receiver = self.shared.events.subscribe();
        let events = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => return Some((Ok(payload), receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "push subscriber lagged behind execution events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(events))
    }
}

async fn run_execution<B: QueryBackend>(
    shared: Arc<Shared>,
    runner: Arc<QueryRunner<B>>,
    execution_id: ExecutionId,
    sql: String,
    row_limit: usize,
    cancellation: CancellationToken,
) {
    if cancellation.is_cancelled() {
        shared.transition(&execution_id, STATUS_CANCELED, Some("Canceled".to_string()), |_| {});
        return;
    }
    shared.transition(&execution_id, STATUS_RUNNING, Some("Running".to_string()), |_| {});

    let mut rows = RowBuffer::new(row_limit);
    match runner.execute_streaming(&sql, &mut rows, &cancellation).await {
        Ok(summary) if summary.was_cancelled => {
            info!(%execution_id, rows = summary.rows_streamed, "execution canceled");
            shared.transition(&execution_id, STATUS_CANCELED, Some("Canceled".to_string()), |_| {});
        }
        Ok(summary) => {
            let message = if rows.limit_reached() {
                format!(
                    "{} rows (showing first {})",
                    summary.rows_streamed,
                    rows.len()
                )
            } else {
                format!("{} rows", summary.rows_streamed)
            };
            info!(%execution_id, rows = summary.rows_streamed, elapsed = ?summary.elapsed, "execution succeeded");
            shared.transition(&execution_id, STATUS_SUCCEEDED, Some(message), move |execution| {
                execution.rows = Some(rows);
            });
        }
        Err(err) => {
            warn!(%execution_id, error = %err, "execution failed");
            let summary = err.to_string();
            shared.transition(
                &execution_id,
                STATUS_FAILED,
                Some("Query failed".to_string()),
                move |execution| execution.error_summary = Some(summary),
            );
        }
    }
}

/// Stable fingerprint of a statement, insensitive to whitespace layout.
#[must_use]
pub fn query_fingerprint(sql: &str) -> String {
    let mut hasher = DefaultHasher::new();
    for word in sql.split_whitespace() {
        word.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use futures_util::StreamExt;
    use querydeck_core::execution::{ExecutionId, ResultRow};
    use querydeck_core::service::{
        ExecutionService, PageRequest, PushEvent, PushSource, ServiceError, SubmitRequest,
    };

    use super::runner::{QueryBackend, QueryBackendError, QueryRowStream};
    use super::{query_fingerprint, LocalExecutionService};

    #[derive(Debug, Clone)]
    enum Script {
        Rows(usize),
        Stall,
        Fail(&'static str),
    }

    #[derive(Debug, Clone)]
    struct ScriptedBackend {
        script: Script,
    }

    struct ScriptedStream {
        rows: VecDeque<ResultRow>,
        stall: bool,
    }

    #[async_trait::async_trait]
    impl QueryRowStream for ScriptedStream {
        async fn next_row(&mut self) -> Result<Option<ResultRow>, QueryBackendError> {
            match self.rows.pop_front() {
                Some(row) => Ok(Some(row)),
                None if self.stall => std::future::pending().await,
                None => Ok(None),
            }
        }

        fn columns(&self) -> Vec<String> {
            vec!["n".to_string()]
        }
    }

    #[async_trait::async_trait]
    impl QueryBackend for ScriptedBackend {
        type Stream = ScriptedStream;

        async fn start_query(&self, _sql: &str) -> Result<Self::Stream, QueryBackendError> {
            let (count, stall) = match self.script {
                Script::Rows(count) => (count, false),
                Script::Stall => (0, true),
                Script::Fail(message) => return Err(QueryBackendError::new(message)),
            };
            Ok(ScriptedStream {
                rows: (0..count)
                    .map(|value| ResultRow::new(vec![value.to_string()]))
                    .collect(),
                stall,
            })
        }
    }

    fn service(script: Script, row_limit: usize) -> LocalExecutionService<ScriptedBackend> {
        LocalExecutionService::new(row_limit).with_datasource("local", ScriptedBackend { script })
    }

    fn submit_request(sql: &str) -> SubmitRequest {
        SubmitRequest {
            datasource_id: "local".to_string(),
            sql: sql.to_string(),
        }
    }

    async fn wait_for_terminal(
        service: &LocalExecutionService<ScriptedBackend>,
        execution_id: &ExecutionId,
    ) -> String {
        for _ in 0..100 {
            let report = service.status(execution_id).await.expect("execution exists");
            if ["SUCCEEDED", "FAILED", "CANCELED"].contains(&report.status.as_str()) {
                return report.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution did not finish");
    }

    #[tokio::test]
    async fn unknown_datasource_is_rejected() {
        let service = service(Script::Rows(1), 10);
        let err = service
            .submit(SubmitRequest {
                datasource_id: "other".to_string(),
                sql: "SELECT 1".to_string(),
            })
            .await
            .expect_err("datasource is not configured");
        assert_eq!(err, ServiceError::UnknownDatasource("other".to_string()));
        assert_eq!(service.datasource_ids(), vec!["local".to_string()]);
    }

    #[tokio::test]
    async fn finished_execution_pages_with_offset_tokens() {
        let service = service(Script::Rows(5), 100);
        let receipt = service
            .submit(submit_request("SELECT n FROM numbers"))
            .await
            .expect("submit should succeed");
        assert_eq!(receipt.status, "QUEUED");
        assert_eq!(wait_for_terminal(&service, &receipt.execution_id).await, "SUCCEEDED");

        let mut token = None;
        let mut seen = Vec::new();
        loop {
            let page = service
                .page(PageRequest {
                    execution_id: receipt.execution_id.clone(),
                    page_token: token.clone(),
                    page_size: 2,
                })
                .await
                .expect("page should load");
            assert_eq!(page.columns, vec!["n".to_string()]);
            seen.extend(page.rows.into_iter().map(|row| row.values[0].clone()));
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(token.as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn only_recent_finished_executions_are_retained() {
        let service = service(Script::Rows(3), 100).with_retained_results(2);
        let mut finished = Vec::new();
        for round in 0..3 {
            let receipt = service
                .submit(submit_request(&format!("SELECT {round}")))
                .await
                .expect("submit should succeed");
            assert_eq!(wait_for_terminal(&service, &receipt.execution_id).await, "SUCCEEDED");
            finished.push(receipt.execution_id);
        }

        assert_eq!(service.tracked_executions(), 2);
        assert_eq!(
            service.status(&finished[0]).await,
            Err(ServiceError::UnknownExecution(finished[0].clone()))
        );
        let page = service
            .page(PageRequest {
                execution_id: finished[2].clone(),
                page_token: None,
                page_size: 10,
            })
            .await
            .expect("latest result stays available");
        assert_eq!(page.rows.len(), 3);

        let running = service.submit(submit_request("SELECT 3")).await.expect("submit");
        assert!(service.status(&running.execution_id).await.is_ok());
        assert!(service.status(&finished[1]).await.is_ok());
    }

    #[tokio::test]
    async fn row_limit_is_reported_by_status_and_page() {
        let service = service(Script::Rows(5), 3);
        let receipt = service
            .submit(submit_request("SELECT n FROM numbers"))
            .await
            .expect("submit should succeed");
        wait_for_terminal(&service, &receipt.execution_id).await;

        let report = service
            .status(&receipt.execution_id)
            .await
            .expect("execution exists");
        assert!(report.row_limit_reached);
        assert_eq!(report.message.as_deref(), Some("5 rows (showing first 3)"));
        let page = service
            .page(PageRequest {
                execution_id: receipt.execution_id,
                page_token: None,
                page_size: 10,
            })
            .await
            .expect("page should load");
        assert_eq!(page.rows.len(), 3);
        assert!(page.row_limit_reached);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn pages_require_success_and_valid_tokens() {
        let service = service(Script::Stall, 10);
        let receipt = service
            .submit(submit_request("SELECT SLEEP(60)"))
            .await
            .expect("submit should succeed");
        let request = PageRequest {
            execution_id: receipt.execution_id.clone(),
            page_token: None,
            page_size: 10,
        };
        assert_eq!(
            service.page(request.clone()).await,
            Err(ServiceError::ResultsUnavailable(receipt.execution_id.clone()))
        );
        assert_eq!(
            service
                .page(PageRequest {
                    page_token: Some("abc".to_string()),
                    ..request
                })
                .await,
            Err(ServiceError::InvalidPageToken("abc".to_string()))
        );
        service
            .cancel(&receipt.execution_id)
            .await
            .expect("cancel should succeed");
    }

    #[tokio::test]
    async fn cancel_stops_a_running_execution() {
        let service = service(Script::Stall, 10);
        let receipt = service
            .submit(submit_request("SELECT SLEEP(60)"))
            .await
            .expect("submit should succeed");
        tokio::task::yield_now().await;

        service
            .cancel(&receipt.execution_id)
            .await
            .expect("cancel should succeed");
        assert_eq!(wait_for_terminal(&service, &receipt.execution_id).await, "CANCELED");
        service
            .cancel(&receipt.execution_id)
            .await
            .expect("cancelling a finished execution is a no-op");
        assert_eq!(
            service.cancel(&ExecutionId::new("missing")).await,
            Err(ServiceError::UnknownExecution(ExecutionId::new("missing")))
        );
    }

    #[tokio::test]
    async fn backend_failure_is_reported_as_error_summary() {
        let service = service(Script::Fail("Table 'numbers' doesn't exist"), 10);
        let receipt = service
            .submit(submit_request("SELECT n FROM numbers"))
            .await
            .expect("submit should succeed");
        assert_eq!(wait_for_terminal(&service, &receipt.execution_id).await, "FAILED");

        let report = service
            .status(&receipt.execution_id)
            .await
            .expect("execution exists");
        assert!(report
            .error_summary
            .as_deref()
            .is_some_and(|summary| summary.contains("doesn't exist")));
    }

    #[tokio::test]
    async fn push_stream_carries_every_transition() {
        let service = service(Script::Rows(1), 10);
        let mut events = service.subscribe().await.expect("subscribe should succeed");
        let receipt = service
            .submit(submit_request("SELECT 1"))
            .await
            .expect("submit should succeed");

        let mut statuses = Vec::new();
        while statuses.last().map(String::as_str) != Some("SUCCEEDED") {
            let payload = events
                .next()
                .await
                .expect("stream stays open")
                .expect("payload is delivered");
            let event = PushEvent::decode(&payload).expect("payload decodes");
            assert_eq!(event.execution_id, receipt.execution_id);
            statuses.push(event.status);
        }
        assert_eq!(statuses, vec!["QUEUED", "RUNNING", "SUCCEEDED"]);
    }

    #[test]
    fn fingerprint_ignores_whitespace_layout() {
        assert_eq!(
            query_fingerprint("SELECT  1\nFROM dual"),
            query_fingerprint("SELECT 1 FROM dual")
        );
        assert_ne!(query_fingerprint("SELECT 1"), query_fingerprint("SELECT 2"));
    }
}
