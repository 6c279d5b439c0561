use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::execution::{ExecutionId, ExecutionPhase, RunKind};
use crate::notice::{FinishedExecution, WorkbenchNotice};
use crate::tab_store::TabSeed;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub timestamp_unix_ms: u128,
    pub tab_title: String,
    pub datasource_id: Option<String>,
    pub execution_id: ExecutionId,
    pub status: ExecutionPhase,
    pub run_kind: RunKind,
    pub sql: String,
    pub error: Option<String>,
}

impl ExecutionRecord {
    #[must_use]
    pub fn from_finished(finished: &FinishedExecution, timestamp_unix_ms: u128) -> Self {
        Self {
            timestamp_unix_ms,
            tab_title: finished.tab_title.clone(),
            datasource_id: finished.datasource_id.clone(),
            execution_id: finished.execution_id.clone(),
            status: finished.phase,
            run_kind: finished.run_kind,
            sql: finished.sql.clone(),
            error: finished.error_message.clone(),
        }
    }

    /// Seed for the "open history entry" tab action.
    #[must_use]
    pub fn tab_seed(&self) -> TabSeed {
        TabSeed {
            title: Some(format!("History: {}", self.tab_title)),
            datasource_id: self.datasource_id.clone(),
            schema: None,
            sql: self.sql.clone(),
        }
    }
}

#[must_use]
pub fn unix_timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid history path `{0}`")]
    InvalidPath(PathBuf),
    #[error("failed to create history directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize history record: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append history record at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read history at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FileExecutionHistory {
    path: PathBuf,
}

impl FileExecutionHistory {
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &ExecutionRecord) -> Result<(), HistoryError> {
        let parent_dir = self
            .path
            .parent()
            .ok_or_else(|| HistoryError::InvalidPath(self.path.clone()))?;
        fs::create_dir_all(parent_dir).map_err(|source| HistoryError::CreateDir {
            path: parent_dir.to_path_buf(),
            source,
        })?;

        let rendered =
            serde_json::to_string(record).map_err(|source| HistoryError::Serialize { source })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| HistoryError::Write {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{rendered}").map_err(|source| HistoryError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Reads every record, newest last. Lines that do not parse are skipped.
    pub fn read_all(&self) -> Result<Vec<ExecutionRecord>, HistoryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path).map_err(|source| HistoryError::Read {
            path: self.path.clone(),
            source,
        })?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| HistoryError::Read {
                path: self.path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(err) => debug!(error = %err, "skipping unreadable history line"),
            }
        }
        Ok(records)
    }

    /// Most recent records first, at most `limit` of them.
    pub fn recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>, HistoryError> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}

/// Appends a history record for every finished execution until the notice
/// channel closes.
pub async fn record_finished_executions(
    history: FileExecutionHistory,
    mut notices: broadcast::Receiver<WorkbenchNotice>,
) {
    loop {
        match notices.recv().await {
            Ok(WorkbenchNotice::ExecutionFinished(finished)) => {
                let record = ExecutionRecord::from_finished(&finished, unix_timestamp_millis());
                if let Err(err) = history.append(&record) {
                    warn!(error = %err, execution_id = %finished.execution_id, "failed to record execution history");
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "history recorder lagged behind workbench notices");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
