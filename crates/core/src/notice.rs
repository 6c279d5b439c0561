use crate::execution::{ExecutionId, ExecutionPhase, RunKind};
use crate::tab_store::TabId;

/// Why a tab's polling timer was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Terminal,
    CancelRequested,
    TabClosed,
    /// A new run replaced the execution the timer was tracking.
    Superseded,
    Teardown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedExecution {
    pub tab_id: TabId,
    pub tab_title: String,
    pub datasource_id: Option<String>,
    pub execution_id: ExecutionId,
    pub phase: ExecutionPhase,
    pub run_kind: RunKind,
    pub sql: String,
    pub status_message: Option<String>,
    pub error_message: Option<String>,
}

/// Broadcast to observers (UI redraw, history recorder). Receivers that lag
/// simply miss notices; nothing in the engine waits on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkbenchNotice {
    TabChanged(TabId),
    TabsChanged,
    ExecutionFinished(FinishedExecution),
    PollingStopped {
        tab_id: TabId,
        execution_id: ExecutionId,
        reason: StopReason,
    },
}

impl WorkbenchNotice {
    #[must_use]
    pub fn tab_id(&self) -> Option<TabId> {
        match self {
            Self::TabChanged(tab_id) | Self::PollingStopped { tab_id, .. } => Some(*tab_id),
            Self::ExecutionFinished(finished) => Some(finished.tab_id),
            Self::TabsChanged => None,
        }
    }
}
