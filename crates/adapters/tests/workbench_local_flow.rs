use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use querydeck_adapters::local::runner::{QueryBackend, QueryBackendError, QueryRowStream};
use querydeck_adapters::local::LocalExecutionService;
use querydeck_core::config::WorkbenchConfig;
use querydeck_core::datasources::StaticDatasources;
use querydeck_core::execution::{ExecutionPhase, ResultRow};
use querydeck_core::tab_store::{Tab, TabId};
use querydeck_core::workbench::{CancelOutcome, PageOutcome, RunOutcome, Workbench};

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Numbers(usize),
    Hang,
    Fail,
}

#[derive(Debug, Clone, Copy)]
struct NumbersBackend {
    behaviour: Behaviour,
}

struct NumbersStream {
    rows: VecDeque<ResultRow>,
    hang: bool,
}

#[async_trait]
impl QueryRowStream for NumbersStream {
    async fn next_row(&mut self) -> Result<Option<ResultRow>, QueryBackendError> {
        match self.rows.pop_front() {
            Some(row) => Ok(Some(row)),
            None if self.hang => std::future::pending().await,
            None => Ok(None),
        }
    }

    fn columns(&self) -> Vec<String> {
        vec!["n".to_string(), "square".to_string()]
    }
}

#[async_trait]
impl QueryBackend for NumbersBackend {
    type Stream = NumbersStream;

    async fn start_query(&self, _sql: &str) -> Result<Self::Stream, QueryBackendError> {
        let (count, hang) = match self.behaviour {
            Behaviour::Numbers(count) => (count, false),
            Behaviour::Hang => (0, true),
            Behaviour::Fail => return Err(QueryBackendError::new("Unknown column 'nope'")),
        };
        Ok(NumbersStream {
            rows: (1..=count)
                .map(|n| ResultRow::new(vec![n.to_string(), (n * n).to_string()]))
                .collect(),
            hang,
        })
    }
}

fn workbench(
    behaviour: Behaviour,
) -> (
    Workbench<LocalExecutionService<NumbersBackend>>,
    Arc<LocalExecutionService<NumbersBackend>>,
) {
    let service = Arc::new(
        LocalExecutionService::new(1_000).with_datasource("warehouse", NumbersBackend { behaviour }),
    );
    let config = WorkbenchConfig {
        poll_interval_ms: 10,
        page_size: 2,
        ..WorkbenchConfig::default()
    };
    let workbench = Workbench::builder(
        Arc::clone(&service),
        Arc::new(StaticDatasources::new(["warehouse"])),
    )
    .config(config)
    .build();
    (workbench, service)
}

async fn wait_for_tab(
    workbench: &Workbench<LocalExecutionService<NumbersBackend>>,
    tab_id: TabId,
    condition: impl Fn(&Tab) -> bool,
) -> Tab {
    for _ in 0..500 {
        let tab = workbench.tab(tab_id).expect("tab should exist");
        if condition(&tab) {
            return tab;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("tab never reached the expected state");
}

#[tokio::test]
async fn query_runs_to_completion_and_pages_through_results() {
    let (workbench, service) = workbench(Behaviour::Numbers(5));
    assert!(workbench.attach_push_source(service));
    let tab_id = workbench.active_id();

    let outcome = workbench
        .run_sql(tab_id, "SELECT n, n * n FROM numbers", Default::default())
        .await
        .expect("tab exists");
    assert!(matches!(outcome, RunOutcome::Started(_)));

    let tab = wait_for_tab(&workbench, tab_id, |tab| !tab.execution.result_rows.is_empty()).await;
    assert_eq!(tab.execution.phase, ExecutionPhase::Succeeded);
    assert_eq!(tab.datasource_id.as_deref(), Some("warehouse"));
    assert_eq!(tab.execution.result_columns, vec!["n", "square"]);
    assert_eq!(tab.execution.result_rows.len(), 2);
    assert_eq!(workbench.polling_tabs(), 0);

    assert_eq!(
        workbench.next_page(tab_id).await.expect("tab exists"),
        PageOutcome::Loaded
    );
    assert_eq!(
        workbench.next_page(tab_id).await.expect("tab exists"),
        PageOutcome::Loaded
    );
    let last = workbench.tab(tab_id).expect("tab exists");
    assert_eq!(last.execution.result_rows, vec![ResultRow::new(vec!["5".into(), "25".into()])]);
    assert_eq!(
        workbench.next_page(tab_id).await.expect("tab exists"),
        PageOutcome::Unavailable
    );

    assert_eq!(
        workbench.previous_page(tab_id).await.expect("tab exists"),
        PageOutcome::Loaded
    );
    let middle = workbench.tab(tab_id).expect("tab exists");
    assert_eq!(middle.execution.result_rows[0].values[0], "3");

    workbench.teardown();
}

#[tokio::test]
async fn cancel_settles_a_hanging_query() {
    let (workbench, _service) = workbench(Behaviour::Hang);
    let tab_id = workbench.active_id();

    let outcome = workbench
        .run_sql(tab_id, "SELECT SLEEP(600)", Default::default())
        .await
        .expect("tab exists");
    assert!(matches!(outcome, RunOutcome::Started(_)));
    wait_for_tab(&workbench, tab_id, |tab| {
        tab.execution.phase == ExecutionPhase::Running
    })
    .await;

    let cancel = workbench.cancel(tab_id).await.expect("tab exists");
    assert!(matches!(
        cancel,
        CancelOutcome::Settled(ExecutionPhase::Canceled) | CancelOutcome::StillRunning
    ));

    let tab = wait_for_tab(&workbench, tab_id, |tab| tab.execution.is_terminal()).await;
    assert_eq!(tab.execution.phase, ExecutionPhase::Canceled);
    assert!(tab.execution.result_rows.is_empty());
    assert_eq!(workbench.polling_tabs(), 0);
}

#[tokio::test]
async fn backend_failure_reaches_the_tab_through_polling() {
    let (workbench, _service) = workbench(Behaviour::Fail);
    let tab_id = workbench.active_id();

    workbench
        .run_sql(tab_id, "SELECT nope FROM numbers", Default::default())
        .await
        .expect("tab exists");

    let tab = wait_for_tab(&workbench, tab_id, |tab| tab.execution.is_terminal()).await;
    assert_eq!(tab.execution.phase, ExecutionPhase::Failed);
    assert!(tab
        .execution
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("Unknown column")));
}
