use crate::execution::ExecutionId;
use crate::tab_store::TabId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportMetrics {
    pub row_height: u32,
    pub viewport_height: u32,
    pub overscan: usize,
}

impl Default for ViewportMetrics {
    fn default() -> Self {
        Self {
            row_height: 34,
            viewport_height: 320,
            overscan: 8,
        }
    }
}

impl ViewportMetrics {
    /// Rows that fit in the viewport, rounded up.
    #[must_use]
    pub fn visible_rows(&self) -> usize {
        let row_height = self.row_height.max(1);
        self.viewport_height.div_ceil(row_height) as usize
    }

    #[must_use]
    pub fn max_mounted_rows(&self) -> usize {
        self.visible_rows() + 2 * self.overscan
    }
}

/// Contiguous slice of rows to mount plus the spacer heights around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowWindow {
    pub start: usize,
    pub end: usize,
    pub leading_spacer: u64,
    pub trailing_spacer: u64,
}

impl RowWindow {
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[must_use]
    pub fn slice<'a, T>(&self, rows: &'a [T]) -> &'a [T] {
        let end = self.end.min(rows.len());
        let start = self.start.min(end);
        &rows[start..end]
    }
}

#[must_use]
pub fn visible_window(total_rows: usize, scroll_offset: u32, metrics: ViewportMetrics) -> RowWindow {
    if total_rows == 0 {
        return RowWindow::default();
    }

    let row_height = metrics.row_height.max(1);
    let first_visible = ((scroll_offset / row_height) as usize).min(total_rows - 1);
    let start = first_visible.saturating_sub(metrics.overscan);
    let end = (first_visible + metrics.visible_rows() + metrics.overscan).min(total_rows);

    RowWindow {
        start,
        end,
        leading_spacer: start as u64 * u64::from(row_height),
        trailing_spacer: (total_rows - end) as u64 * u64::from(row_height),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RowSetKey {
    tab_id: TabId,
    execution_id: Option<ExecutionId>,
    page_token: String,
}

/// Scroll position of the results panel. Switching tabs or loading another
/// page resets it to the top.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultViewport {
    scroll_offset: u32,
    row_set: Option<RowSetKey>,
}

impl ResultViewport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn scroll_offset(&self) -> u32 {
        self.scroll_offset
    }

    /// Tells the viewport which row set is on screen; returns `true` when it
    /// changed and the scroll position was reset. A row set is one page of
    /// one execution in one tab.
    pub fn sync(
        &mut self,
        tab_id: TabId,
        execution_id: Option<&ExecutionId>,
        page_token: &str,
    ) -> bool {
        let changed = match &self.row_set {
            Some(current) => {
                current.tab_id != tab_id
                    || current.execution_id.as_ref() != execution_id
                    || current.page_token != page_token
            }
            None => true,
        };
        if changed {
            self.row_set = Some(RowSetKey {
                tab_id,
                execution_id: execution_id.cloned(),
                page_token: page_token.to_string(),
            });
            self.scroll_offset = 0;
        }
        changed
    }

    pub fn scroll_to(&mut self, offset: u32, total_rows: usize, metrics: ViewportMetrics) {
        self.scroll_offset = offset.min(max_scroll_offset(total_rows, metrics));
    }

    pub fn scroll_by(&mut self, delta: i64, total_rows: usize, metrics: ViewportMetrics) {
        let target = i64::from(self.scroll_offset).saturating_add(delta).max(0);
        let target = u32::try_from(target).unwrap_or(u32::MAX);
        self.scroll_to(target, total_rows, metrics);
    }

    #[must_use]
    pub fn window(&self, total_rows: usize, metrics: ViewportMetrics) -> RowWindow {
        visible_window(total_rows, self.scroll_offset, metrics)
    }
}

fn max_scroll_offset(total_rows: usize, metrics: ViewportMetrics) -> u32 {
    let content = (total_rows as u64).saturating_mul(u64::from(metrics.row_height.max(1)));
    let max = content.saturating_sub(u64::from(metrics.viewport_height));
    u32::try_from(max).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::{visible_window, ResultViewport, ViewportMetrics};
    use crate::execution::ExecutionId;
    use crate::tab_store::TabId;

    #[test]
    fn large_page_mounts_bounded_window() {
        let metrics = ViewportMetrics::default();
        let window = visible_window(10_000, 3_400, metrics);

        assert_eq!(window.start, 92);
        assert!(window.len() <= 320_usize.div_ceil(34) + 16);
        assert_eq!(window.leading_spacer, 92 * 34);
        assert_eq!(
            window.leading_spacer + window.len() as u64 * 34 + window.trailing_spacer,
            10_000 * 34
        );
    }

    #[test]
    fn window_at_top_and_past_end_is_clamped() {
        let metrics = ViewportMetrics::default();
        let top = visible_window(50, 0, metrics);
        assert_eq!(top.start, 0);
        assert_eq!(top.end, 18);

        let past_end = visible_window(50, 1_000_000, metrics);
        assert_eq!(past_end.end, 50);
        assert_eq!(past_end.trailing_spacer, 0);
        assert!(past_end.start < past_end.end);

        assert!(visible_window(0, 100, metrics).is_empty());
    }

    #[test]
    fn slice_returns_window_rows() {
        let rows: Vec<usize> = (0..100).collect();
        let window = visible_window(rows.len(), 34 * 10, ViewportMetrics::default());
        let mounted = window.slice(&rows);
        assert_eq!(mounted.first(), Some(&2));
        assert_eq!(mounted.len(), window.len());
    }

    #[test]
    fn viewport_resets_scroll_when_row_set_changes() {
        let metrics = ViewportMetrics::default();
        let tab = TabId::generate();
        let first = ExecutionId::new("exec-1");
        let mut viewport = ResultViewport::new();
        assert!(viewport.sync(tab, Some(&first), ""));

        viewport.scroll_by(1_000, 500, metrics);
        assert_eq!(viewport.scroll_offset(), 1_000);
        assert!(!viewport.sync(tab, Some(&first), ""));
        assert_eq!(viewport.scroll_offset(), 1_000);

        assert!(viewport.sync(TabId::generate(), Some(&first), ""));
        assert_eq!(viewport.scroll_offset(), 0);

        viewport.scroll_by(-50, 500, metrics);
        assert_eq!(viewport.scroll_offset(), 0);
        viewport.scroll_to(u32::MAX, 500, metrics);
        assert_eq!(viewport.scroll_offset(), 500 * 34 - 320);
    }

    #[test]
    fn rerun_with_same_row_count_starts_at_top() {
        let metrics = ViewportMetrics::default();
        let tab = TabId::generate();
        let mut viewport = ResultViewport::new();
        viewport.sync(tab, Some(&ExecutionId::new("exec-1")), "");
        viewport.scroll_by(2_000, 200, metrics);

        assert!(viewport.sync(tab, Some(&ExecutionId::new("exec-2")), ""));
        assert_eq!(viewport.scroll_offset(), 0);

        viewport.scroll_by(2_000, 200, metrics);
        assert!(viewport.sync(tab, Some(&ExecutionId::new("exec-2")), "t1"));
        assert_eq!(viewport.scroll_offset(), 0);
    }
}
