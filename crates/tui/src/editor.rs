use std::ops::Range;

use querydeck_core::run_mode::EditorSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EditKey {
    Insert(char),
    Backspace,
    Delete,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    SelectLeft,
    SelectRight,
    SelectAll,
}

/// Cursor and optional selection anchor over a tab's SQL. Offsets are bytes
/// and always sit on char boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct EditorCursor {
    position: usize,
    anchor: Option<usize>,
}

impl EditorCursor {
    pub(crate) fn at_end(text: &str) -> Self {
        Self {
            position: text.len(),
            anchor: None,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn selection(&self) -> Option<Range<usize>> {
        let anchor = self.anchor?;
        (anchor != self.position).then(|| anchor.min(self.position)..anchor.max(self.position))
    }

    pub(crate) fn snapshot(&self) -> EditorSnapshot {
        self.selection()
            .map_or_else(|| EditorSnapshot::at_cursor(self.position), EditorSnapshot::with_selection)
    }

    /// Pulls the cursor back inside `text` after it changed underneath.
    pub(crate) fn clamp(&mut self, text: &str) {
        self.position = floor_boundary(text, self.position);
        self.anchor = self.anchor.map(|anchor| floor_boundary(text, anchor));
    }

    /// Zero-based line and column (in chars) of the cursor.
    pub(crate) fn line_and_column(&self, text: &str) -> (usize, usize) {
        let before = &text[..floor_boundary(text, self.position)];
        let line = before.matches('\n').count();
        let column = before[line_start(before, before.len())..].chars().count();
        (line, column)
    }

    /// Applies one key. Returns the edited text when the key changed it.
    pub(crate) fn apply(&mut self, text: &str, key: EditKey) -> Option<String> {
        self.clamp(text);
        match key {
            EditKey::Insert(ch) => {
                let (mut edited, at) = self.without_selection(text);
                edited.insert(at, ch);
                self.position = at + ch.len_utf8();
                Some(edited)
            }
            EditKey::Backspace | EditKey::Delete if self.selection().is_some() => {
                let (edited, at) = self.without_selection(text);
                self.position = at;
                Some(edited)
            }
            EditKey::Backspace => {
                self.anchor = None;
                if self.position == 0 {
                    return None;
                }
                let start = previous_boundary(text, self.position);
                let mut edited = text.to_string();
                edited.replace_range(start..self.position, "");
                self.position = start;
                Some(edited)
            }
            EditKey::Delete => {
                self.anchor = None;
                if self.position == text.len() {
                    return None;
                }
                let end = next_boundary(text, self.position);
                let mut edited = text.to_string();
                edited.replace_range(self.position..end, "");
                Some(edited)
            }
            EditKey::Left => self.move_to(previous_boundary(text, self.position), false),
            EditKey::Right => self.move_to(next_boundary(text, self.position), false),
            EditKey::SelectLeft => self.move_to(previous_boundary(text, self.position), true),
            EditKey::SelectRight => self.move_to(next_boundary(text, self.position), true),
            EditKey::Home => self.move_to(line_start(text, self.position), false),
            EditKey::End => self.move_to(line_end(text, self.position), false),
            EditKey::Up => self.move_to(vertical_target(text, self.position, false), false),
            EditKey::Down => self.move_to(vertical_target(text, self.position, true), false),
            EditKey::SelectAll => {
                self.anchor = Some(0);
                self.position = text.len();
                None
            }
        }
    }

    fn move_to(&mut self, position: usize, extend: bool) -> Option<String> {
        if extend {
            self.anchor.get_or_insert(self.position);
        } else {
            self.anchor = None;
        }
        self.position = position;
        None
    }

    fn without_selection(&mut self, text: &str) -> (String, usize) {
        let mut edited = text.to_string();
        let at = match self.selection() {
            Some(range) => {
                let start = range.start;
                edited.replace_range(range, "");
                start
            }
            None => self.position,
        };
        self.anchor = None;
        (edited, at)
    }
}

fn floor_boundary(text: &str, position: usize) -> usize {
    let mut position = position.min(text.len());
    while !text.is_char_boundary(position) {
        position -= 1;
    }
    position
}

fn previous_boundary(text: &str, position: usize) -> usize {
    text[..position]
        .char_indices()
        .next_back()
        .map_or(0, |(index, _)| index)
}

fn next_boundary(text: &str, position: usize) -> usize {
    text[position..]
        .chars()
        .next()
        .map_or(position, |ch| position + ch.len_utf8())
}

fn line_start(text: &str, position: usize) -> usize {
    text[..position].rfind('\n').map_or(0, |index| index + 1)
}

fn line_end(text: &str, position: usize) -> usize {
    text[position..]
        .find('\n')
        .map_or(text.len(), |index| position + index)
}

fn vertical_target(text: &str, position: usize, down: bool) -> usize {
    let start = line_start(text, position);
    let column = text[start..position].chars().count();
    let target_start = if down {
        let end = line_end(text, position);
        if end == text.len() {
            return text.len();
        }
        end + 1
    } else {
        if start == 0 {
            return 0;
        }
        line_start(text, start - 1)
    };
    let target_end = line_end(text, target_start);
    text[target_start..target_end]
        .char_indices()
        .nth(column)
        .map_or(target_end, |(offset, _)| target_start + offset)
}

#[cfg(test)]
mod tests {
    use querydeck_core::run_mode::EditorSnapshot;

    use super::{EditKey, EditorCursor};

    fn type_text(cursor: &mut EditorCursor, text: &mut String, input: &str) {
        for ch in input.chars() {
            if let Some(edited) = cursor.apply(text, EditKey::Insert(ch)) {
                *text = edited;
            }
        }
    }

    #[test]
    fn typing_and_backspace_follow_the_cursor() {
        let mut text = String::new();
        let mut cursor = EditorCursor::default();
        type_text(&mut cursor, &mut text, "SELECT 1");
        assert_eq!(text, "SELECT 1");
        assert_eq!(cursor.position(), 8);

        assert_eq!(cursor.apply(&text, EditKey::Left), None);
        text = cursor.apply(&text, EditKey::Backspace).expect("text changes");
        assert_eq!(text, "SELECT1");
        assert_eq!(cursor.position(), 6);
        assert_eq!(cursor.snapshot(), EditorSnapshot::at_cursor(6));
    }

    #[test]
    fn shift_selection_is_replaced_by_typing() {
        let mut text = "SELECT 1".to_string();
        let mut cursor = EditorCursor::at_end(&text);
        cursor.apply(&text, EditKey::SelectLeft);
        assert_eq!(cursor.selection(), Some(7..8));
        assert_eq!(cursor.snapshot(), EditorSnapshot::with_selection(7..8));

        type_text(&mut cursor, &mut text, "42");
        assert_eq!(text, "SELECT 42");
        assert_eq!(cursor.selection(), None);
    }

    #[test]
    fn multibyte_characters_are_never_split() {
        let mut text = "SELECT 'é'".to_string();
        let mut cursor = EditorCursor::at_end(&text);
        cursor.apply(&text, EditKey::Left);
        text = cursor.apply(&text, EditKey::Backspace).expect("text changes");
        assert_eq!(text, "SELECT ''");

        let mut cursor = EditorCursor::at_end("é");
        cursor.clamp("");
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn vertical_moves_keep_the_column() {
        let text = "SELECT a,\n  b\nFROM t;";
        let mut cursor = EditorCursor::default();
        cursor.apply(text, EditKey::End);
        assert_eq!(cursor.line_and_column(text), (0, 9));

        cursor.apply(text, EditKey::Down);
        assert_eq!(cursor.line_and_column(text), (1, 3));
        cursor.apply(text, EditKey::Down);
        assert_eq!(cursor.line_and_column(text), (2, 3));
        cursor.apply(text, EditKey::Down);
        assert_eq!(cursor.position(), text.len());
        cursor.apply(text, EditKey::Up);
        cursor.apply(text, EditKey::Home);
        assert_eq!(cursor.line_and_column(text), (1, 0));
    }

    #[test]
    fn select_all_covers_the_whole_text() {
        let text = "SELECT 1; SELECT 2;";
        let mut cursor = EditorCursor::default();
        cursor.apply(text, EditKey::SelectAll);
        assert_eq!(cursor.selection(), Some(0..text.len()));
    }
}
