use crate::execution::{ExecutionContext, ExecutionId, ExecutionPhase, STATUS_FAILED};
use crate::service::{PushEvent, StatusReport, SubmitReceipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Submission,
    Poll,
    Push,
    /// Forced status fetch after a cancel request.
    Refresh,
    /// Client-made terminal state (poll circuit breaker or timeout).
    Synthetic,
}

/// One status observation for one execution, whichever channel produced it.
/// Fields left as `None` keep the value the tab already holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub execution_id: ExecutionId,
    pub status: String,
    pub message: Option<String>,
    pub query_hash: Option<String>,
    pub error_summary: Option<String>,
    pub row_limit_reached: Option<bool>,
    pub source: UpdateSource,
}

impl StatusUpdate {
    #[must_use]
    pub fn from_receipt(receipt: &SubmitReceipt) -> Self {
        Self {
            execution_id: receipt.execution_id.clone(),
            status: receipt.status.clone(),
            message: None,
            query_hash: receipt.query_hash.clone(),
            error_summary: None,
            row_limit_reached: None,
            source: UpdateSource::Submission,
        }
    }

    #[must_use]
    pub fn from_report(execution_id: ExecutionId, report: StatusReport, source: UpdateSource) -> Self {
        Self {
            execution_id,
            status: report.status,
            message: report.message,
            query_hash: report.query_hash,
            error_summary: report.error_summary,
            row_limit_reached: Some(report.row_limit_reached),
            source,
        }
    }

    #[must_use]
    pub fn from_push(event: PushEvent) -> Self {
        Self {
            execution_id: event.execution_id,
            status: event.status,
            message: event.message,
            query_hash: None,
            error_summary: None,
            row_limit_reached: None,
            source: UpdateSource::Push,
        }
    }

    #[must_use]
    pub fn synthetic_failure(execution_id: ExecutionId, message: impl Into<String>) -> Self {
        Self {
            execution_id,
            status: STATUS_FAILED.to_string(),
            message: Some(message.into()),
            query_hash: None,
            error_summary: None,
            row_limit_reached: None,
            source: UpdateSource::Synthetic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The update belongs to an execution the tab no longer tracks.
    Stale,
    /// The tracked execution already reached a terminal state.
    Absorbed,
    Progressed(ExecutionContext),
    Terminal(ExecutionContext),
}

/// Observable result of applying an update to a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Stale,
    Absorbed,
    Progressed(ExecutionPhase),
    Terminal(ExecutionPhase),
}

impl Applied {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// The single transition rule shared by every update channel.
#[must_use]
pub fn reconcile(context: &ExecutionContext, update: &StatusUpdate) -> Transition {
    if !context.is_current(&update.execution_id) {
        return Transition::Stale;
    }
    if context.is_terminal() {
        return Transition::Absorbed;
    }

    let phase = ExecutionPhase::from_server_status(&update.status);
    let mut next = context.clone();
    next.phase = phase;
    next.server_status = Some(update.status.clone());
    if let Some(message) = &update.message {
        next.status_message = Some(message.clone());
    }
    if let Some(query_hash) = &update.query_hash {
        next.query_hash = Some(query_hash.clone());
    }
    if let Some(row_limit_reached) = update.row_limit_reached {
        next.row_limit_reached = row_limit_reached;
    }

    if phase == ExecutionPhase::Failed {
        let error_message = update
            .error_summary
            .clone()
            .or_else(|| update.message.clone())
            .or_else(|| next.status_message.clone())
            .unwrap_or_else(|| "Query failed".to_string());
        next.error_message = Some(error_message);
    } else if phase.is_terminal() {
        // A leftover error (e.g. a failed cancel request) no longer applies.
        next.error_message = None;
    }

    if phase.is_terminal() {
        Transition::Terminal(next)
    } else {
        Transition::Progressed(next)
    }
}
