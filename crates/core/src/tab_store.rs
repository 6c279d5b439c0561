use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{ExecutionContext, ExecutionId};

const DEFAULT_TITLE_PREFIX: &str = "Query";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(Uuid);

impl TabId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub id: TabId,
    pub title: String,
    pub datasource_id: Option<String>,
    pub schema: Option<String>,
    pub sql: String,
    pub execution: ExecutionContext,
}

impl Tab {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: TabId::generate(),
            title: title.into(),
            datasource_id: None,
            schema: None,
            sql: String::new(),
            execution: ExecutionContext::default(),
        }
    }

    #[must_use]
    pub fn metadata(&self) -> TabMetadata {
        TabMetadata {
            id: self.id,
            title: self.title.clone(),
            datasource_id: self.datasource_id.clone(),
            schema: self.schema.clone(),
            sql: self.sql.clone(),
        }
    }

    #[must_use]
    pub fn with_execution(&self, execution: ExecutionContext) -> Self {
        Self {
            execution,
            ..self.clone()
        }
    }
}

/// What a new tab starts from: a blank tab, a history entry or a snippet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TabSeed {
    pub title: Option<String>,
    pub datasource_id: Option<String>,
    pub schema: Option<String>,
    pub sql: String,
}

impl TabSeed {
    #[must_use]
    pub fn snippet(
        title: impl Into<String>,
        sql: impl Into<String>,
        datasource_id: Option<String>,
    ) -> Self {
        Self {
            title: Some(title.into()),
            datasource_id,
            schema: None,
            sql: sql.into(),
        }
    }
}

/// Persistable part of a tab. Execution state is deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabMetadata {
    pub id: TabId,
    pub title: String,
    #[serde(default)]
    pub datasource_id: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub sql: String,
}

impl From<TabMetadata> for Tab {
    fn from(metadata: TabMetadata) -> Self {
        Self {
            id: metadata.id,
            title: metadata.title,
            datasource_id: metadata.datasource_id,
            schema: metadata.schema,
            sql: metadata.sql,
            execution: ExecutionContext::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Removed,
    /// The tab was the last one and has been reset in place.
    Reset,
    Missing,
}

/// Ordered, never-empty collection of tabs. Tabs are replaced as whole
/// values; nothing hands out `&mut Tab`.
#[derive(Debug, Clone)]
pub struct TabStore {
    tabs: Vec<Tab>,
    active: TabId,
    titles_issued: usize,
}

impl Default for TabStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TabStore {
    #[must_use]
    pub fn new() -> Self {
        let first = Tab::new(format!("{DEFAULT_TITLE_PREFIX} 1"));
        Self {
            active: first.id,
            tabs: vec![first],
            titles_issued: 1,
        }
    }

    /// Rebuilds a store from persisted metadata, falling back to one blank tab.
    #[must_use]
    pub fn restore(metadata: Vec<TabMetadata>, active: Option<TabId>) -> Self {
        let mut tabs: Vec<Tab> = Vec::with_capacity(metadata.len());
        for entry in metadata {
            if tabs.iter().any(|tab| tab.id == entry.id) {
                continue;
            }
            tabs.push(Tab::from(entry));
        }
        let Some(first_id) = tabs.first().map(|tab| tab.id) else {
            return Self::new();
        };

        let active = active
            .filter(|id| tabs.iter().any(|tab| tab.id == *id))
            .unwrap_or(first_id);
        let titles_issued = tabs.len();
        Self {
            tabs,
            active,
            titles_issued,
        }
    }

    #[must_use]
    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &TabId) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.id == *id)
    }

    #[must_use]
    pub fn contains(&self, id: &TabId) -> bool {
        self.get(id).is_some()
    }

    #[must_use]
    pub fn active_id(&self) -> TabId {
        self.active
    }

    #[must_use]
    pub fn active(&self) -> Option<&Tab> {
        self.get(&self.active)
    }

    #[must_use]
    pub fn position(&self, id: &TabId) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.id == *id)
    }

    pub fn activate(&mut self, id: &TabId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.active = *id;
        true
    }

    /// Activates the tab `offset` positions away, wrapping around.
    pub fn activate_relative(&mut self, offset: isize) -> TabId {
        let len = self.tabs.len();
        if let Some(current) = self.position(&self.active) {
            let len = isize::try_from(len).unwrap_or(isize::MAX);
            let current = isize::try_from(current).unwrap_or(0);
            let target = (current + offset).rem_euclid(len);
            if let Some(tab) = usize::try_from(target).ok().and_then(|index| self.tabs.get(index)) {
                self.active = tab.id;
            }
        }
        self.active
    }

    #[must_use]
    pub fn find_by_execution(&self, execution_id: &ExecutionId) -> Option<TabId> {
        self.tabs
            .iter()
            .find(|tab| tab.execution.is_current(execution_id))
            .map(|tab| tab.id)
    }

    pub fn open(&mut self, seed: TabSeed) -> TabId {
        let title = seed.title.unwrap_or_else(|| self.next_title());
        let tab = Tab {
            datasource_id: seed.datasource_id,
            schema: seed.schema,
            sql: seed.sql,
            ..Tab::new(title)
        };
        let id = tab.id;
        self.tabs.push(tab);
        self.active = id;
        id
    }

    /// Copies metadata and SQL next to the source tab. Execution state is
    /// never duplicated.
    pub fn duplicate(&mut self, id: &TabId) -> Option<TabId> {
        let index = self.position(id)?;
        let source = &self.tabs[index];
        let copy = Tab {
            datasource_id: source.datasource_id.clone(),
            schema: source.schema.clone(),
            sql: source.sql.clone(),
            ..Tab::new(format!("{} (copy)", source.title))
        };
        let copy_id = copy.id;
        self.tabs.insert(index + 1, copy);
        self.active = copy_id;
        Some(copy_id)
    }

    pub fn close(&mut self, id: &TabId) -> CloseOutcome {
        let Some(index) = self.position(id) else {
            return CloseOutcome::Missing;
        };

        if self.tabs.len() == 1 {
            let title = format!("{DEFAULT_TITLE_PREFIX} 1");
            self.tabs[index] = Tab {
                id: *id,
                ..Tab::new(title)
            };
            self.titles_issued = 1;
            return CloseOutcome::Reset;
        }

        self.tabs.remove(index);
        if self.active == *id {
            let neighbour = index.min(self.tabs.len() - 1);
            self.active = self.tabs[neighbour].id;
        }
        CloseOutcome::Removed
    }

    /// Replaces a tab with the value produced by `update`. Returning `None`
    /// leaves the tab untouched.
    pub fn replace_with(&mut self, id: &TabId, update: impl FnOnce(&Tab) -> Option<Tab>) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        let Some(mut next) = update(&self.tabs[index]) else {
            return false;
        };
        next.id = *id;
        self.tabs[index] = next;
        true
    }

    pub fn replace_execution(&mut self, id: &TabId, execution: ExecutionContext) -> bool {
        self.replace_with(id, |tab| Some(tab.with_execution(execution)))
    }

    #[must_use]
    pub fn metadata(&self) -> Vec<TabMetadata> {
        self.tabs.iter().map(Tab::metadata).collect()
    }

    fn next_title(&mut self) -> String {
        self.titles_issued += 1;
        format!("{DEFAULT_TITLE_PREFIX} {}", self.titles_issued)
    }
}

#[cfg(test)]
mod tests {
    use super::{CloseOutcome, TabSeed, TabStore};
    use crate::execution::{ExecutionContext, ExecutionId, RunKind};

    #[test]
    fn store_starts_with_one_active_tab() {
        let store = TabStore::new();
        assert_eq!(store.len(), 1);
        assert_eq!(store.active().map(|tab| tab.title.as_str()), Some("Query 1"));
    }

    #[test]
    fn closing_last_tab_resets_it_in_place() {
        let mut store = TabStore::new();
        let id = store.active_id();
        store.replace_with(&id, |tab| {
            let mut next = tab.clone();
            next.sql = "SELECT 1".to_string();
            next.execution = ExecutionContext::submitted(7, RunKind::Query, "SELECT 1");
            Some(next)
        });

        assert_eq!(store.close(&id), CloseOutcome::Reset);
        let tab = store.get(&id).expect("tab survives reset");
        assert!(tab.sql.is_empty());
        assert!(!tab.execution.is_executing());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn closing_active_tab_activates_neighbour() {
        let mut store = TabStore::new();
        let first = store.active_id();
        let second = store.open(TabSeed::default());
        let third = store.open(TabSeed::default());
        assert!(store.activate(&second));

        assert_eq!(store.close(&second), CloseOutcome::Removed);
        assert_eq!(store.active_id(), third);
        assert_eq!(store.close(&third), CloseOutcome::Removed);
        assert_eq!(store.active_id(), first);
        assert_eq!(store.close(&third), CloseOutcome::Missing);
    }

    #[test]
    fn duplicate_copies_metadata_but_not_execution() {
        let mut store = TabStore::new();
        let source = store.open(TabSeed::snippet(
            "Orders",
            "SELECT * FROM orders",
            Some("warehouse".to_string()),
        ));
        store.replace_with(&source, |tab| {
            let mut next = tab.clone();
            next.execution.execution_id = Some(ExecutionId::new("exec-1"));
            Some(next)
        });

        let copy = store.duplicate(&source).expect("source exists");
        let copy_tab = store.get(&copy).expect("copy exists");
        assert_eq!(copy_tab.title, "Orders (copy)");
        assert_eq!(copy_tab.sql, "SELECT * FROM orders");
        assert_eq!(copy_tab.datasource_id.as_deref(), Some("warehouse"));
        assert!(copy_tab.execution.execution_id.is_none());
        assert_eq!(store.position(&copy), Some(2));
        assert_eq!(store.find_by_execution(&ExecutionId::new("exec-1")), Some(source));
    }

    #[test]
    fn restore_skips_duplicate_ids_and_falls_back_to_first_tab() {
        let original = TabStore::new();
        let mut metadata = original.metadata();
        metadata.push(metadata[0].clone());

        let restored = TabStore::restore(metadata, None);
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.active_id(), original.active_id());

        let empty = TabStore::restore(Vec::new(), None);
        assert_eq!(empty.len(), 1);
    }

    #[test]
    fn activate_relative_wraps_around() {
        let mut store = TabStore::new();
        let first = store.active_id();
        let second = store.open(TabSeed::default());
        assert_eq!(store.activate_relative(1), first);
        assert_eq!(store.activate_relative(-1), second);
    }
}
