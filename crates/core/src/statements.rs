use std::ops::Range;

/// Finds the SQL statement that encloses an editor cursor.
pub trait StatementResolver: Send + Sync {
    fn statement_at(&self, text: &str, cursor: usize) -> Option<String>;
}

/// Semicolon splitter that ignores separators inside quotes, backticks and
/// comments.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlStatementResolver;

impl StatementResolver for SqlStatementResolver {
    fn statement_at(&self, text: &str, cursor: usize) -> Option<String> {
        let segments = statement_segments(text);
        let cursor = cursor.min(text.len());

        // A cursor sitting right after a terminator belongs to that statement.
        let containing = segments
            .iter()
            .rposition(|segment| segment.region.start < cursor)
            .unwrap_or(0);
        segments[..=containing]
            .iter()
            .rev()
            .find(|segment| segment.has_code)
            .and_then(|segment| text.get(segment.statement.clone()))
            .map(|statement| statement.trim().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    /// Bytes owned by the segment, terminator included.
    region: Range<usize>,
    /// Bytes of the statement itself, terminator excluded.
    statement: Range<usize>,
    has_code: bool,
}

/// Byte ranges of the statements in `sql`, in source order.
#[must_use]
pub fn statement_spans(sql: &str) -> Vec<Range<usize>> {
    statement_segments(sql)
        .into_iter()
        .filter(|segment| segment.has_code)
        .map(|segment| segment.statement)
        .collect()
}

fn statement_segments(sql: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut chars = sql.char_indices().peekable();
    let mut start = 0;
    let mut has_code = false;

    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_backtick = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while let Some((index, ch)) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
            }
            continue;
        }

        if in_block_comment {
            if ch == '*' && chars.peek().map(|(_, next)| *next) == Some('/') {
                chars.next();
                in_block_comment = false;
            }
            continue;
        }

        let quoted = in_single_quote || in_double_quote || in_backtick;
        if !quoted {
            let next = chars.peek().map(|(_, next)| *next);
            if (ch == '-' && next == Some('-')) || ch == '#' {
                in_line_comment = true;
                continue;
            }
            if ch == '/' && next == Some('*') {
                chars.next();
                in_block_comment = true;
                continue;
            }
        }

        match ch {
            '\'' if !in_double_quote && !in_backtick => in_single_quote = !in_single_quote,
            '"' if !in_single_quote && !in_backtick => in_double_quote = !in_double_quote,
            '`' if !in_single_quote && !in_double_quote => in_backtick = !in_backtick,
            ';' if !quoted => {
                segments.push(Segment {
                    region: start..index + 1,
                    statement: start..index,
                    has_code,
                });
                start = index + 1;
                has_code = false;
                continue;
            }
            _ => {}
        }

        if !ch.is_whitespace() {
            has_code = true;
        }
    }

    segments.push(Segment {
        region: start..sql.len(),
        statement: start..sql.len(),
        has_code,
    });
    segments
}

#[cfg(test)]
mod tests {
    use super::{statement_spans, SqlStatementResolver, StatementResolver};

    const SCRIPT: &str = "SELECT 1;\nSELECT 'a;b' AS x;\n-- trailing; comment\nSELECT 3";

    #[test]
    fn splits_on_semicolons_outside_quotes_and_comments() {
        let spans = statement_spans(SCRIPT);
        let statements: Vec<&str> = spans.iter().map(|span| SCRIPT[span.clone()].trim()).collect();
        assert_eq!(
            statements,
            vec!["SELECT 1", "SELECT 'a;b' AS x", "-- trailing; comment\nSELECT 3"]
        );
    }

    #[test]
    fn resolves_statement_under_cursor() {
        let resolver = SqlStatementResolver;
        let second = SCRIPT.find("'a;b'").expect("literal present");
        assert_eq!(
            resolver.statement_at(SCRIPT, second).as_deref(),
            Some("SELECT 'a;b' AS x")
        );
        assert_eq!(resolver.statement_at(SCRIPT, 0).as_deref(), Some("SELECT 1"));
        assert_eq!(
            resolver.statement_at(SCRIPT, SCRIPT.len()).as_deref(),
            Some("-- trailing; comment\nSELECT 3")
        );
    }

    #[test]
    fn cursor_after_final_semicolon_uses_previous_statement() {
        let resolver = SqlStatementResolver;
        let text = "SELECT 1;\nSELECT 2;\n\n";
        assert_eq!(resolver.statement_at(text, text.len()).as_deref(), Some("SELECT 2"));
    }

    #[test]
    fn comment_only_text_has_no_statement() {
        let resolver = SqlStatementResolver;
        assert!(resolver.statement_at("  -- nothing here", 3).is_none());
        assert!(resolver.statement_at("", 0).is_none());
    }

    #[test]
    fn cursor_on_terminator_belongs_to_statement_before_it() {
        let resolver = SqlStatementResolver;
        let text = "SELECT 1;SELECT 2";
        assert_eq!(resolver.statement_at(text, 9).as_deref(), Some("SELECT 1"));
        assert_eq!(resolver.statement_at(text, 10).as_deref(), Some("SELECT 2"));
    }
}
