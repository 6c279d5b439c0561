use std::fmt;

use serde::{Deserialize, Serialize};

pub const STATUS_QUEUED: &str = "QUEUED";
pub const STATUS_RUNNING: &str = "RUNNING";
pub const STATUS_SUCCEEDED: &str = "SUCCEEDED";
pub const STATUS_FAILED: &str = "FAILED";
pub const STATUS_CANCELED: &str = "CANCELED";

/// Server-issued correlation id for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ExecutionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle of the execution embedded in a tab.
///
/// `Submitted` covers the gap between the optimistic client-side mark and the
/// first server status, so in-flight checks never have to look at raw status
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    #[default]
    Idle,
    Submitted,
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl ExecutionPhase {
    /// Maps a server status string. Anything that is not one of the three
    /// terminal statuses is treated as still running.
    #[must_use]
    pub fn from_server_status(status: &str) -> Self {
        let status = status.trim();
        if status.eq_ignore_ascii_case(STATUS_SUCCEEDED) {
            Self::Succeeded
        } else if status.eq_ignore_ascii_case(STATUS_FAILED) {
            Self::Failed
        } else if status.eq_ignore_ascii_case(STATUS_CANCELED) {
            Self::Canceled
        } else if status.eq_ignore_ascii_case(STATUS_QUEUED) {
            Self::Queued
        } else {
            Self::Running
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Submitted | Self::Queued | Self::Running)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Submitted => "SUBMITTED",
            Self::Queued => STATUS_QUEUED,
            Self::Running => STATUS_RUNNING,
            Self::Succeeded => STATUS_SUCCEEDED,
            Self::Failed => STATUS_FAILED,
            Self::Canceled => STATUS_CANCELED,
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    #[default]
    Query,
    /// Results are a plan, not a row grid.
    Explain,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultRow {
    pub values: Vec<String>,
}

impl ResultRow {
    #[must_use]
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }
}

/// Forward-only server cursor plus the tokens already exchanged to get here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageCursor {
    pub current_token: String,
    pub next_token: Option<String>,
    pub previous_tokens: Vec<String>,
}

impl PageCursor {
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.next_token.is_some()
    }

    #[must_use]
    pub fn has_previous(&self) -> bool {
        !self.previous_tokens.is_empty()
    }

    /// One-based page number.
    #[must_use]
    pub fn page_number(&self) -> usize {
        self.previous_tokens.len() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionContext {
    pub execution_id: Option<ExecutionId>,
    /// Client nonce of the submission that owns this context.
    pub submission: Option<u64>,
    pub phase: ExecutionPhase,
    pub server_status: Option<String>,
    pub run_kind: RunKind,
    pub submitted_sql: Option<String>,
    pub query_hash: Option<String>,
    pub status_message: Option<String>,
    pub error_message: Option<String>,
    /// Informational message that is not an error (e.g. nothing to cancel).
    pub notice: Option<String>,
    pub result_columns: Vec<String>,
    pub result_rows: Vec<ResultRow>,
    pub cursor: PageCursor,
    pub row_limit_reached: bool,
    pub page_loading: bool,
    /// Status polls spent on this execution. Survives polling restarts so
    /// the attempt cap stays absolute.
    pub poll_attempts: u32,
}

impl ExecutionContext {
    #[must_use]
    pub fn submitted(submission: u64, run_kind: RunKind, sql: impl Into<String>) -> Self {
        Self {
            submission: Some(submission),
            phase: ExecutionPhase::Submitted,
            run_kind,
            submitted_sql: Some(sql.into()),
            status_message: Some("Submitting query".to_string()),
            ..Self::default()
        }
    }

    /// Cleared context carrying a client-side rejection.
    #[must_use]
    pub fn rejected(run_kind: RunKind, message: impl Into<String>) -> Self {
        Self {
            run_kind,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.phase.is_in_flight()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    #[must_use]
    pub fn is_current(&self, execution_id: &ExecutionId) -> bool {
        self.execution_id.as_ref() == Some(execution_id)
    }

    #[must_use]
    pub fn has_results(&self) -> bool {
        !self.result_columns.is_empty() || !self.result_rows.is_empty()
    }

    #[must_use]
    pub fn can_page_next(&self) -> bool {
        self.phase == ExecutionPhase::Succeeded && !self.page_loading && self.cursor.has_next()
    }

    #[must_use]
    pub fn can_page_previous(&self) -> bool {
        self.phase == ExecutionPhase::Succeeded && !self.page_loading && self.cursor.has_previous()
    }
}
