use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::WorkbenchConfig;
use crate::datasources::DatasourceDirectory;
use crate::execution::{ExecutionContext, ExecutionId, ExecutionPhase, PageCursor, RunKind};
use crate::history::ExecutionRecord;
use crate::multiplexer::{EventMultiplexer, EventRouter, RouteOutcome};
use crate::notice::{FinishedExecution, StopReason, WorkbenchNotice};
use crate::pager::{apply_page, next_page, previous_page, PageFetch};
use crate::polling::{PollBudget, PollPolicy, PollVerdict, PollingTimers};
use crate::reconciler::{reconcile, Applied, StatusUpdate, Transition, UpdateSource};
use crate::run_mode::{prepare_run_text, RunRequest};
use crate::service::{ExecutionService, PageRequest, PushSource, SubmitRequest};
use crate::session::SessionSnapshot;
use crate::statements::{SqlStatementResolver, StatementResolver};
use crate::tab_store::{CloseOutcome, Tab, TabId, TabSeed, TabStore};

pub const NO_DATASOURCE_MESSAGE: &str = "No permitted datasource selected";
pub const EMPTY_SQL_MESSAGE: &str = "SQL text is empty";
pub const NOTHING_TO_CANCEL_MESSAGE: &str = "No running query to cancel";

const NOTICE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkbenchError {
    #[error("tab `{0}` does not exist")]
    UnknownTab(TabId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Started(ExecutionId),
    /// The tab already has an execution in flight; nothing was sent.
    AlreadyExecuting,
    /// Rejected before any request was made.
    Rejected(String),
    SubmitFailed(String),
    /// The tab was closed, reset or re-run while the submission was in flight.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Loaded,
    /// The execution was superseded while the page was in flight.
    Stale,
    /// Another page request for the tab is still running.
    Busy,
    /// No page in that direction, or no finished result set.
    Unavailable,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    NothingToCancel,
    Settled(ExecutionPhase),
    /// The server still reports the execution as running; polling resumed.
    StillRunning,
    Failed(String),
    Superseded,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<S> {
    service: Arc<S>,
    datasources: Arc<dyn DatasourceDirectory>,
    resolver: Arc<dyn StatementResolver>,
    config: WorkbenchConfig,
    poll_policy: PollPolicy,
    // Lock order: `tabs` before `timers`. Never held across an await.
    tabs: Mutex<TabStore>,
    timers: Mutex<PollingTimers>,
    push: Mutex<Option<EventMultiplexer>>,
    notices: broadcast::Sender<WorkbenchNotice>,
    submissions: AtomicU64,
}

pub struct WorkbenchBuilder<S> {
    service: Arc<S>,
    datasources: Arc<dyn DatasourceDirectory>,
    resolver: Arc<dyn StatementResolver>,
    config: WorkbenchConfig,
    tabs: TabStore,
}

impl<S: ExecutionService + 'static> WorkbenchBuilder<S> {
    #[must_use]
    pub fn config(mut self, config: WorkbenchConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn tabs(mut self, tabs: TabStore) -> Self {
        self.tabs = tabs;
        self
    }

    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn StatementResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn build(self) -> Workbench<S> {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Workbench {
            inner: Arc::new(Inner {
                service: self.service,
                datasources: self.datasources,
                resolver: self.resolver,
                poll_policy: PollPolicy::from(&self.config),
                config: self.config,
                tabs: Mutex::new(self.tabs),
                timers: Mutex::new(PollingTimers::new()),
                push: Mutex::new(None),
                notices,
                submissions: AtomicU64::new(0),
            }),
        }
    }
}

/// Multi-tab execution engine. Cheap to clone; every clone drives the same
/// tabs.
///
/// Status updates from polling, push events, submission receipts and cancel
/// refreshes all go through [`Workbench::apply_status_update`], which applies
/// an update only while it names the tab's current execution. Methods that
/// may start background work must be called inside a tokio runtime.
pub struct Workbench<S: ExecutionService + 'static> {
    inner: Arc<Inner<S>>,
}

impl<S: ExecutionService + 'static> Clone for Workbench<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ExecutionService + 'static> Workbench<S> {
    #[must_use]
    pub fn builder(
        service: Arc<S>,
        datasources: Arc<dyn DatasourceDirectory>,
    ) -> WorkbenchBuilder<S> {
        WorkbenchBuilder {
            service,
            datasources,
            resolver: Arc::new(SqlStatementResolver),
            config: WorkbenchConfig::default(),
            tabs: TabStore::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &WorkbenchConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn permitted_datasources(&self) -> Vec<String> {
        self.inner.datasources.permitted()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WorkbenchNotice> {
        self.inner.notices.subscribe()
    }

    #[must_use]
    pub fn tabs(&self) -> Vec<Tab> {
        lock(&self.inner.tabs).tabs().to_vec()
    }

    #[must_use]
    pub fn tab(&self, tab_id: TabId) -> Option<Tab> {
        lock(&self.inner.tabs).get(&tab_id).cloned()
    }

    #[must_use]
    pub fn active_id(&self) -> TabId {
        lock(&self.inner.tabs).active_id()
    }

    #[must_use]
    pub fn active_tab(&self) -> Option<Tab> {
        lock(&self.inner.tabs).active().cloned()
    }

    #[must_use]
    pub fn session_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(&lock(&self.inner.tabs))
    }

    /// Number of tabs with a live polling timer.
    #[must_use]
    pub fn polling_tabs(&self) -> usize {
        lock(&self.inner.timers).len()
    }

    pub fn new_tab(&self) -> TabId {
        self.open_tab(TabSeed::default())
    }

    pub fn open_tab(&self, seed: TabSeed) -> TabId {
        let tab_id = lock(&self.inner.tabs).open(seed);
        self.notify(WorkbenchNotice::TabsChanged);
        tab_id
    }

    pub fn open_history_entry(&self, record: &ExecutionRecord) -> TabId {
        self.open_tab(record.tab_seed())
    }

    pub fn duplicate_tab(&self, tab_id: TabId) -> Result<TabId, WorkbenchError> {
        let copy = lock(&self.inner.tabs)
            .duplicate(&tab_id)
            .ok_or(WorkbenchError::UnknownTab(tab_id))?;
        self.notify(WorkbenchNotice::TabsChanged);
        Ok(copy)
    }

    /// Closes a tab, or resets it in place when it is the last one. Its
    /// polling timer is stopped either way.
    pub fn close_tab(&self, tab_id: TabId) -> Result<CloseOutcome, WorkbenchError> {
        let (outcome, stopped) = {
            let mut tabs = lock(&self.inner.tabs);
            let outcome = tabs.close(&tab_id);
            if outcome == CloseOutcome::Missing {
                return Err(WorkbenchError::UnknownTab(tab_id));
            }
            (outcome, lock(&self.inner.timers).stop(&tab_id))
        };

        if let Some(execution_id) = stopped {
            self.notify(WorkbenchNotice::PollingStopped {
                tab_id,
                execution_id,
                reason: StopReason::TabClosed,
            });
        }
        self.notify(WorkbenchNotice::TabsChanged);
        Ok(outcome)
    }

    pub fn select_tab(&self, tab_id: TabId) -> Result<(), WorkbenchError> {
        if !lock(&self.inner.tabs).activate(&tab_id) {
            return Err(WorkbenchError::UnknownTab(tab_id));
        }
        self.notify(WorkbenchNotice::TabsChanged);
        Ok(())
    }

    pub fn select_relative(&self, offset: isize) -> TabId {
        let tab_id = lock(&self.inner.tabs).activate_relative(offset);
        self.notify(WorkbenchNotice::TabsChanged);
        tab_id
    }

    pub fn rename_tab(&self, tab_id: TabId, title: impl Into<String>) -> Result<(), WorkbenchError> {
        let title = title.into();
        self.edit_tab(tab_id, |tab| tab.title = title)
    }

    pub fn set_sql(&self, tab_id: TabId, sql: impl Into<String>) -> Result<(), WorkbenchError> {
        let sql = sql.into();
        self.edit_tab(tab_id, |tab| tab.sql = sql)
    }

    pub fn set_datasource(
        &self,
        tab_id: TabId,
        datasource_id: Option<String>,
    ) -> Result<(), WorkbenchError> {
        self.edit_tab(tab_id, |tab| tab.datasource_id = datasource_id)
    }

    pub fn set_schema(&self, tab_id: TabId, schema: Option<String>) -> Result<(), WorkbenchError> {
        self.edit_tab(tab_id, |tab| tab.schema = schema)
    }

    /// Resolves the text to run from the editor state and submits it.
    pub async fn run(
        &self,
        tab_id: TabId,
        request: RunRequest,
    ) -> Result<RunOutcome, WorkbenchError> {
        let text = self
            .tab(tab_id)
            .ok_or(WorkbenchError::UnknownTab(tab_id))?
            .sql;
        let sql = prepare_run_text(&text, &request, self.inner.resolver.as_ref());
        self.run_sql(tab_id, &sql, request.kind).await
    }

    pub async fn run_sql(
        &self,
        tab_id: TabId,
        sql: &str,
        run_kind: RunKind,
    ) -> Result<RunOutcome, WorkbenchError> {
        let sql = sql.trim().to_string();
        let submission = self.inner.submissions.fetch_add(1, Ordering::Relaxed) + 1;

        let (datasource_id, superseded) = {
            let mut tabs = lock(&self.inner.tabs);
            let tab = tabs.get(&tab_id).ok_or(WorkbenchError::UnknownTab(tab_id))?;
            if tab.execution.is_executing() {
                debug!(%tab_id, "run ignored; tab already executing");
                return Ok(RunOutcome::AlreadyExecuting);
            }

            let datasource_id = match self
                .inner
                .datasources
                .resolve(tab.datasource_id.as_deref())
            {
                Some(datasource_id) if !sql.is_empty() => datasource_id,
                resolved => {
                    let message = if resolved.is_none() {
                        NO_DATASOURCE_MESSAGE
                    } else {
                        EMPTY_SQL_MESSAGE
                    };
                    tabs.replace_execution(&tab_id, ExecutionContext::rejected(run_kind, message));
                    drop(tabs);
                    self.notify(WorkbenchNotice::TabChanged(tab_id));
                    return Ok(RunOutcome::Rejected(message.to_string()));
                }
            };

            let execution = ExecutionContext::submitted(submission, run_kind, sql.clone());
            let target = datasource_id.clone();
            tabs.replace_with(&tab_id, move |tab| {
                Some(Tab {
                    datasource_id: Some(target),
                    execution,
                    ..tab.clone()
                })
            });
            (datasource_id, lock(&self.inner.timers).stop(&tab_id))
        };

        if let Some(execution_id) = superseded {
            self.notify(WorkbenchNotice::PollingStopped {
                tab_id,
                execution_id,
                reason: StopReason::Superseded,
            });
        }
        self.notify(WorkbenchNotice::TabChanged(tab_id));

        info!(%tab_id, datasource = %datasource_id, ?run_kind, "submitting query");
        let receipt = match self
            .inner
            .service
            .submit(SubmitRequest { datasource_id, sql })
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => {
                let message = format!("Failed to submit query: {err}");
                warn!(%tab_id, error = %err, "query submission failed");
                let reverted = self.replace_if_submission(tab_id, submission, |execution| {
                    ExecutionContext {
                        phase: ExecutionPhase::Idle,
                        status_message: None,
                        error_message: Some(message.clone()),
                        ..execution.clone()
                    }
                });
                return Ok(if reverted {
                    RunOutcome::SubmitFailed(message)
                } else {
                    RunOutcome::Abandoned
                });
            }
        };

        let execution_id = receipt.execution_id.clone();
        let attached = self.replace_if_submission(tab_id, submission, |execution| {
            ExecutionContext {
                execution_id: Some(execution_id.clone()),
                ..execution.clone()
            }
        });
        if !attached {
            info!(%tab_id, %execution_id, "cancelling execution orphaned by its tab");
            if let Err(err) = self.inner.service.cancel(&execution_id).await {
                debug!(%execution_id, error = %err, "orphan cancel failed");
            }
            return Ok(RunOutcome::Abandoned);
        }

        let applied = self.apply_status_update(tab_id, StatusUpdate::from_receipt(&receipt), true);
        if !applied.is_terminal() {
            self.start_polling(tab_id, execution_id.clone());
        }
        Ok(RunOutcome::Started(execution_id))
    }

    /// Feeds one status observation through the reconciler. Terminal
    /// transitions stop the tab's polling timer, notify observers, and
    /// optionally start loading the first result page.
    pub fn apply_status_update(
        &self,
        tab_id: TabId,
        update: StatusUpdate,
        load_first_page: bool,
    ) -> Applied {
        let (applied, finished) = {
            let mut tabs = lock(&self.inner.tabs);
            let Some(tab) = tabs.get(&tab_id) else {
                return Applied::Stale;
            };
            let transition = reconcile(&tab.execution, &update);
            let tab_title = tab.title.clone();
            let datasource_id = tab.datasource_id.clone();

            match transition {
                Transition::Stale => {
                    debug!(%tab_id, execution_id = %update.execution_id, source = ?update.source, "ignoring stale status update");
                    return Applied::Stale;
                }
                Transition::Absorbed => {
                    debug!(%tab_id, execution_id = %update.execution_id, source = ?update.source, "execution already finished");
                    return Applied::Absorbed;
                }
                Transition::Progressed(next) => {
                    let phase = next.phase;
                    tabs.replace_execution(&tab_id, next);
                    (Applied::Progressed(phase), None)
                }
                Transition::Terminal(mut next) => {
                    let phase = next.phase;
                    let load = load_first_page && phase == ExecutionPhase::Succeeded;
                    next.page_loading = load;
                    let finished = FinishedExecution {
                        tab_id,
                        tab_title,
                        datasource_id,
                        execution_id: update.execution_id.clone(),
                        phase,
                        run_kind: next.run_kind,
                        sql: next.submitted_sql.clone().unwrap_or_default(),
                        status_message: next.status_message.clone(),
                        error_message: next.error_message.clone(),
                    };
                    tabs.replace_execution(&tab_id, next);
                    (Applied::Terminal(phase), Some((finished, load)))
                }
            }
        };
        self.notify(WorkbenchNotice::TabChanged(tab_id));

        if let Some((finished, load)) = finished {
            info!(%tab_id, execution_id = %finished.execution_id, status = %finished.phase, source = ?update.source, "execution finished");
            let execution_id = finished.execution_id.clone();
            if lock(&self.inner.timers).stop_matching(&tab_id, &execution_id) {
                self.notify(WorkbenchNotice::PollingStopped {
                    tab_id,
                    execution_id: execution_id.clone(),
                    reason: StopReason::Terminal,
                });
            }
            self.notify(WorkbenchNotice::ExecutionFinished(finished));

            if load {
                let workbench = self.clone();
                tokio::spawn(async move {
                    workbench
                        .load_page(tab_id, execution_id, PageFetch::first())
                        .await;
                });
            }
        }
        applied
    }

    /// Routes a push update to whichever tab currently tracks its execution.
    pub fn route_push(&self, update: StatusUpdate) -> RouteOutcome {
        let tab_id = lock(&self.inner.tabs).find_by_execution(&update.execution_id);
        match tab_id {
            Some(tab_id) => RouteOutcome::Applied(self.apply_status_update(tab_id, update, true)),
            None => RouteOutcome::Unmatched,
        }
    }

    /// Opens the shared push connection. Returns `false` when one is already
    /// open.
    pub fn attach_push_source(&self, source: Arc<dyn PushSource>) -> bool {
        let mut push = lock(&self.inner.push);
        if push.as_ref().is_some_and(EventMultiplexer::is_open) {
            return false;
        }
        let router: Arc<dyn EventRouter> = Arc::new(PushRouter {
            inner: Arc::downgrade(&self.inner),
        });
        let delay = Duration::from_millis(self.inner.config.push_reconnect_delay_ms);
        *push = Some(EventMultiplexer::spawn(source, router, delay));
        true
    }

    #[must_use]
    pub fn is_push_attached(&self) -> bool {
        lock(&self.inner.push)
            .as_ref()
            .is_some_and(EventMultiplexer::is_open)
    }

    /// Closes the push connection and stops every polling timer.
    pub fn teardown(&self) {
        if let Some(multiplexer) = lock(&self.inner.push).take() {
            multiplexer.close();
        }
        let stopped = lock(&self.inner.timers).stop_all();
        for (tab_id, execution_id) in stopped {
            self.notify(WorkbenchNotice::PollingStopped {
                tab_id,
                execution_id,
                reason: StopReason::Teardown,
            });
        }
        info!("workbench torn down");
    }

    pub async fn next_page(&self, tab_id: TabId) -> Result<PageOutcome, WorkbenchError> {
        self.step_page(tab_id, next_page).await
    }

    pub async fn previous_page(&self, tab_id: TabId) -> Result<PageOutcome, WorkbenchError> {
        self.step_page(tab_id, previous_page).await
    }

    /// Loads `fetch` for `execution_id` if that execution is still the tab's
    /// current, finished one.
    pub async fn fetch_page(
        &self,
        tab_id: TabId,
        execution_id: &ExecutionId,
        fetch: PageFetch,
    ) -> Result<PageOutcome, WorkbenchError> {
        {
            let mut tabs = lock(&self.inner.tabs);
            let tab = tabs.get(&tab_id).ok_or(WorkbenchError::UnknownTab(tab_id))?;
            if !tab.execution.is_current(execution_id) {
                return Ok(PageOutcome::Stale);
            }
            if tab.execution.page_loading {
                return Ok(PageOutcome::Busy);
            }
            if tab.execution.phase != ExecutionPhase::Succeeded {
                return Ok(PageOutcome::Unavailable);
            }
            let execution = ExecutionContext {
                page_loading: true,
                ..tab.execution.clone()
            };
            tabs.replace_execution(&tab_id, execution);
        }
        self.notify(WorkbenchNotice::TabChanged(tab_id));
        Ok(self.load_page(tab_id, execution_id.clone(), fetch).await)
    }

    /// Cancels the tab's execution. Polling stops right away; one forced
    /// status fetch then decides the final state.
    pub async fn cancel(&self, tab_id: TabId) -> Result<CancelOutcome, WorkbenchError> {
        let target = {
            let mut tabs = lock(&self.inner.tabs);
            let tab = tabs.get(&tab_id).ok_or(WorkbenchError::UnknownTab(tab_id))?;
            let target = tab
                .execution
                .execution_id
                .clone()
                .filter(|_| !tab.execution.is_terminal());
            if target.is_none() {
                let execution = ExecutionContext {
                    notice: Some(NOTHING_TO_CANCEL_MESSAGE.to_string()),
                    ..tab.execution.clone()
                };
                tabs.replace_execution(&tab_id, execution);
            }
            target
        };
        let Some(execution_id) = target else {
            self.notify(WorkbenchNotice::TabChanged(tab_id));
            return Ok(CancelOutcome::NothingToCancel);
        };

        info!(%tab_id, %execution_id, "cancel requested");
        if let Err(err) = self.inner.service.cancel(&execution_id).await {
            let message = format!("Failed to cancel query: {err}");
            warn!(%tab_id, %execution_id, error = %err, "cancel request failed");
            self.replace_if_current(tab_id, &execution_id, |execution| ExecutionContext {
                error_message: Some(message.clone()),
                ..execution.clone()
            });
            return Ok(CancelOutcome::Failed(message));
        }

        if lock(&self.inner.timers).stop_matching(&tab_id, &execution_id) {
            self.notify(WorkbenchNotice::PollingStopped {
                tab_id,
                execution_id: execution_id.clone(),
                reason: StopReason::CancelRequested,
            });
        }

        match self.inner.service.status(&execution_id).await {
            Ok(report) => {
                let update =
                    StatusUpdate::from_report(execution_id.clone(), report, UpdateSource::Refresh);
                match self.apply_status_update(tab_id, update, true) {
                    Applied::Terminal(phase) => Ok(CancelOutcome::Settled(phase)),
                    Applied::Progressed(_) => {
                        self.start_polling(tab_id, execution_id);
                        Ok(CancelOutcome::StillRunning)
                    }
                    Applied::Stale | Applied::Absorbed => Ok(CancelOutcome::Superseded),
                }
            }
            Err(err) => {
                warn!(%tab_id, %execution_id, error = %err, "status refresh after cancel failed");
                self.start_polling(tab_id, execution_id);
                Ok(CancelOutcome::StillRunning)
            }
        }
    }

    fn start_polling(&self, tab_id: TabId, execution_id: ExecutionId) {
        let workbench = self.clone();
        let polled = execution_id.clone();
        let task = tokio::spawn(async move {
            workbench.poll_until_terminal(tab_id, polled).await;
        });
        let handle = task.abort_handle();

        let replaced = {
            let tabs = lock(&self.inner.tabs);
            let tracking = tabs.get(&tab_id).is_some_and(|tab| {
                tab.execution.is_current(&execution_id) && !tab.execution.is_terminal()
            });
            if !tracking {
                handle.abort();
                return;
            }
            lock(&self.inner.timers).start(tab_id, execution_id.clone(), handle)
        };
        debug!(%tab_id, %execution_id, "polling started");

        if let Some(previous) = replaced {
            self.notify(WorkbenchNotice::PollingStopped {
                tab_id,
                execution_id: previous,
                reason: StopReason::Superseded,
            });
        }
    }

    async fn poll_until_terminal(&self, tab_id: TabId, execution_id: ExecutionId) {
        let Some(spent) = self.polls_spent(tab_id, &execution_id) else {
            self.release_timer(tab_id, &execution_id);
            return;
        };
        let mut budget = PollBudget::resume(self.inner.poll_policy, spent);
        let mut last_error = String::new();

        loop {
            if budget.is_exhausted() {
                self.fail_polling(tab_id, &execution_id, budget.timeout_message());
                return;
            }
            tokio::time::sleep(budget.interval()).await;
            if !self.claim_poll_attempt(tab_id, &execution_id) {
                self.release_timer(tab_id, &execution_id);
                return;
            }

            budget.begin_attempt();
            let verdict = match self.inner.service.status(&execution_id).await {
                Ok(report) => {
                    let update =
                        StatusUpdate::from_report(execution_id.clone(), report, UpdateSource::Poll);
                    match self.apply_status_update(tab_id, update, true) {
                        Applied::Terminal(_) => return,
                        Applied::Stale | Applied::Absorbed => {
                            self.release_timer(tab_id, &execution_id);
                            return;
                        }
                        Applied::Progressed(_) => budget.record_success(),
                    }
                }
                Err(err) => {
                    warn!(
                        %tab_id,
                        %execution_id,
                        attempt = budget.attempts(),
                        error = %err,
                        "status poll failed"
                    );
                    last_error = err.to_string();
                    budget.record_failure()
                }
            };

            let message = match verdict {
                PollVerdict::Continue => continue,
                PollVerdict::Unavailable => budget.unavailable_message(&last_error),
                PollVerdict::TimedOut => budget.timeout_message(),
            };
            self.fail_polling(tab_id, &execution_id, message);
            return;
        }
    }

    fn fail_polling(&self, tab_id: TabId, execution_id: &ExecutionId, message: String) {
        warn!(%tab_id, %execution_id, "{message}");
        let update = StatusUpdate::synthetic_failure(execution_id.clone(), message);
        if !self.apply_status_update(tab_id, update, false).is_terminal() {
            self.release_timer(tab_id, execution_id);
        }
    }

    /// Polls already spent on the tab's execution, or `None` when the tab no
    /// longer tracks it.
    fn polls_spent(&self, tab_id: TabId, execution_id: &ExecutionId) -> Option<u32> {
        lock(&self.inner.tabs)
            .get(&tab_id)
            .filter(|tab| tab.execution.is_current(execution_id) && !tab.execution.is_terminal())
            .map(|tab| tab.execution.poll_attempts)
    }

    /// Records one poll against the tab's execution. `false` when the tab no
    /// longer tracks it.
    fn claim_poll_attempt(&self, tab_id: TabId, execution_id: &ExecutionId) -> bool {
        lock(&self.inner.tabs).replace_with(&tab_id, |tab| {
            (tab.execution.is_current(execution_id) && !tab.execution.is_terminal()).then(|| {
                tab.with_execution(ExecutionContext {
                    poll_attempts: tab.execution.poll_attempts.saturating_add(1),
                    ..tab.execution.clone()
                })
            })
        })
    }

    fn release_timer(&self, tab_id: TabId, execution_id: &ExecutionId) {
        if lock(&self.inner.timers).stop_matching(&tab_id, execution_id) {
            self.notify(WorkbenchNotice::PollingStopped {
                tab_id,
                execution_id: execution_id.clone(),
                reason: StopReason::Superseded,
            });
        }
    }

    async fn step_page(
        &self,
        tab_id: TabId,
        step: fn(&PageCursor) -> Option<PageFetch>,
    ) -> Result<PageOutcome, WorkbenchError> {
        let (execution_id, fetch) = {
            let mut tabs = lock(&self.inner.tabs);
            let tab = tabs.get(&tab_id).ok_or(WorkbenchError::UnknownTab(tab_id))?;
            let execution = &tab.execution;
            if execution.page_loading {
                return Ok(PageOutcome::Busy);
            }
            if execution.phase != ExecutionPhase::Succeeded {
                return Ok(PageOutcome::Unavailable);
            }
            let (Some(execution_id), Some(fetch)) =
                (execution.execution_id.clone(), step(&execution.cursor))
            else {
                return Ok(PageOutcome::Unavailable);
            };
            let loading = ExecutionContext {
                page_loading: true,
                ..execution.clone()
            };
            tabs.replace_execution(&tab_id, loading);
            (execution_id, fetch)
        };
        self.notify(WorkbenchNotice::TabChanged(tab_id));
        Ok(self.load_page(tab_id, execution_id, fetch).await)
    }

    async fn load_page(
        &self,
        tab_id: TabId,
        execution_id: ExecutionId,
        fetch: PageFetch,
    ) -> PageOutcome {
        let request = PageRequest {
            execution_id: execution_id.clone(),
            page_token: fetch.wire_token(),
            page_size: self.inner.config.page_size,
        };
        let result = self.inner.service.page(request).await;

        let outcome = {
            let mut tabs = lock(&self.inner.tabs);
            let Some(tab) = tabs.get(&tab_id) else {
                return PageOutcome::Stale;
            };
            if !tab.execution.is_current(&execution_id) {
                debug!(%tab_id, %execution_id, "discarding page for superseded execution");
                return PageOutcome::Stale;
            }

            let (execution, outcome) = match result {
                Ok(page) => (apply_page(&tab.execution, fetch, page), PageOutcome::Loaded),
                Err(err) => {
                    warn!(%tab_id, %execution_id, error = %err, "result page request failed");
                    let message = format!("Failed to load results page: {err}");
                    let execution = ExecutionContext {
                        page_loading: false,
                        error_message: Some(message.clone()),
                        ..tab.execution.clone()
                    };
                    (execution, PageOutcome::Failed(message))
                }
            };
            tabs.replace_execution(&tab_id, execution);
            outcome
        };
        self.notify(WorkbenchNotice::TabChanged(tab_id));
        outcome
    }

    fn edit_tab(&self, tab_id: TabId, edit: impl FnOnce(&mut Tab)) -> Result<(), WorkbenchError> {
        let replaced = lock(&self.inner.tabs).replace_with(&tab_id, |tab| {
            let mut next = tab.clone();
            edit(&mut next);
            Some(next)
        });
        if !replaced {
            return Err(WorkbenchError::UnknownTab(tab_id));
        }
        self.notify(WorkbenchNotice::TabChanged(tab_id));
        Ok(())
    }

    fn replace_if_submission(
        &self,
        tab_id: TabId,
        submission: u64,
        update: impl FnOnce(&ExecutionContext) -> ExecutionContext,
    ) -> bool {
        let replaced = lock(&self.inner.tabs).replace_with(&tab_id, |tab| {
            (tab.execution.submission == Some(submission) && tab.execution.execution_id.is_none())
                .then(|| tab.with_execution(update(&tab.execution)))
        });
        if replaced {
            self.notify(WorkbenchNotice::TabChanged(tab_id));
        }
        replaced
    }

    fn replace_if_current(
        &self,
        tab_id: TabId,
        execution_id: &ExecutionId,
        update: impl FnOnce(&ExecutionContext) -> ExecutionContext,
    ) -> bool {
        let replaced = lock(&self.inner.tabs).replace_with(&tab_id, |tab| {
            tab.execution
                .is_current(execution_id)
                .then(|| tab.with_execution(update(&tab.execution)))
        });
        if replaced {
            self.notify(WorkbenchNotice::TabChanged(tab_id));
        }
        replaced
    }

    fn notify(&self, notice: WorkbenchNotice) {
        // No receivers is fine.
        let _ = self.inner.notices.send(notice);
    }
}

struct PushRouter<S> {
    inner: Weak<Inner<S>>,
}

impl<S: ExecutionService + 'static> EventRouter for PushRouter<S> {
    fn route(&self, update: StatusUpdate) -> RouteOutcome {
        match self.inner.upgrade() {
            Some(inner) => Workbench { inner }.route_push(update),
            None => RouteOutcome::Unmatched,
        }
    }
}
