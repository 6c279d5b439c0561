use std::ops::Range;

use crate::execution::RunKind;
use crate::statements::StatementResolver;

const EXPLAIN_KEYWORD: &str = "EXPLAIN";

/// Editor state captured when the user presses "run". Offsets are bytes into
/// the tab's SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EditorSnapshot {
    pub selection: Option<Range<usize>>,
    pub cursor: Option<usize>,
}

impl EditorSnapshot {
    #[must_use]
    pub fn at_cursor(cursor: usize) -> Self {
        Self {
            selection: None,
            cursor: Some(cursor),
        }
    }

    #[must_use]
    pub fn with_selection(selection: Range<usize>) -> Self {
        Self {
            selection: Some(selection),
            cursor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub kind: RunKind,
    pub editor: EditorSnapshot,
}

impl RunRequest {
    #[must_use]
    pub fn query(editor: EditorSnapshot) -> Self {
        Self {
            kind: RunKind::Query,
            editor,
        }
    }

    #[must_use]
    pub fn explain(editor: EditorSnapshot) -> Self {
        Self {
            kind: RunKind::Explain,
            editor,
        }
    }
}

/// Selection first, then the statement under the cursor, then the whole text.
#[must_use]
pub fn resolve_run_text(text: &str, editor: &EditorSnapshot, resolver: &dyn StatementResolver) -> String {
    if let Some(selected) = editor
        .selection
        .as_ref()
        .filter(|range| range.start < range.end)
        .and_then(|range| text.get(range.clone()))
        .filter(|selected| !selected.trim().is_empty())
    {
        return selected.to_string();
    }

    if let Some(statement) = editor
        .cursor
        .and_then(|cursor| resolver.statement_at(text, cursor))
    {
        return statement;
    }

    text.to_string()
}

/// Prefixes `EXPLAIN` unless the statement already starts with it.
#[must_use]
pub fn with_explain_prefix(sql: &str) -> String {
    let trimmed = sql.trim_start();
    let already_explained = trimmed
        .get(..EXPLAIN_KEYWORD.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(EXPLAIN_KEYWORD))
        && trimmed[EXPLAIN_KEYWORD.len()..]
            .chars()
            .next()
            .map_or(true, |ch| !ch.is_ascii_alphanumeric() && ch != '_');
    if already_explained {
        sql.to_string()
    } else {
        format!("{EXPLAIN_KEYWORD} {trimmed}")
    }
}

#[must_use]
pub fn prepare_run_text(
    text: &str,
    request: &RunRequest,
    resolver: &dyn StatementResolver,
) -> String {
    let resolved = resolve_run_text(text, &request.editor, resolver);
    match request.kind {
        RunKind::Explain if !resolved.trim().is_empty() => with_explain_prefix(&resolved),
        RunKind::Query | RunKind::Explain => resolved,
    }
}
