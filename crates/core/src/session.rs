use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tab_store::{TabId, TabMetadata, TabStore};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read tab session at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse tab session at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create session directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize tab session: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write tab session at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Tab metadata as written to disk. Execution state never reaches this file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub active: Option<TabId>,
    #[serde(default)]
    pub tabs: Vec<TabMetadata>,
}

impl SessionSnapshot {
    #[must_use]
    pub fn capture(store: &TabStore) -> Self {
        Self {
            active: Some(store.active_id()),
            tabs: store.metadata(),
        }
    }

    #[must_use]
    pub fn into_store(self) -> TabStore {
        TabStore::restore(self.tabs, self.active)
    }
}

#[derive(Debug, Clone)]
pub struct FileTabSession {
    path: PathBuf,
}

impl FileTabSession {
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<SessionSnapshot, SessionError> {
        if !self.path.exists() {
            return Ok(SessionSnapshot::default());
        }

        let raw = fs::read_to_string(&self.path).map_err(|source| SessionError::Read {
            path: self.path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(SessionSnapshot::default());
        }

        toml::from_str(&raw).map_err(|source| SessionError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| SessionError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered =
            toml::to_string_pretty(snapshot).map_err(|source| SessionError::Serialize { source })?;
        fs::write(&self.path, rendered).map_err(|source| SessionError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{FileTabSession, SessionSnapshot};
    use crate::execution::{ExecutionContext, RunKind};
    use crate::tab_store::{TabSeed, TabStore};

    #[test]
    fn missing_session_restores_single_blank_tab() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let session = FileTabSession::from_path(temp_dir.path().join("tabs.toml"));

        let store = session.load().expect("failed to load session").into_store();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn save_and_reload_keeps_metadata_but_not_execution() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let session = FileTabSession::from_path(temp_dir.path().join("tabs.toml"));

        let mut store = TabStore::new();
        let orders = store.open(TabSeed::snippet(
            "Orders",
            "SELECT * FROM orders WHERE note = 'a;b'",
            Some("warehouse".to_string()),
        ));
        store.replace_execution(
            &orders,
            ExecutionContext::submitted(3, RunKind::Query, "SELECT * FROM orders"),
        );
        let first = store.tabs()[0].id;
        store.activate(&first);

        session
            .save(&SessionSnapshot::capture(&store))
            .expect("failed to save session");
        let restored = session.load().expect("failed to reload").into_store();

        assert_eq!(restored.len(), 2);
        assert_eq!(restored.active_id(), first);
        let tab = restored.get(&orders).expect("orders tab restored");
        assert_eq!(tab.title, "Orders");
        assert_eq!(tab.sql, "SELECT * FROM orders WHERE note = 'a;b'");
        assert_eq!(tab.datasource_id.as_deref(), Some("warehouse"));
        assert!(!tab.execution.is_executing());
    }
}
