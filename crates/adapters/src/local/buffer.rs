use querydeck_core::execution::ResultRow;

/// Server-side result buffer. Keeps the first `capacity` rows and counts the
/// rest so the client can be told the row limit was hit.
#[derive(Debug, Clone)]
pub struct RowBuffer {
    capacity: usize,
    columns: Vec<String>,
    rows: Vec<ResultRow>,
    total_rows_seen: u64,
}

impl RowBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "row buffer capacity must be greater than 0");
        Self {
            capacity,
            columns: Vec::new(),
            rows: Vec::new(),
            total_rows_seen: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn total_rows_seen(&self) -> u64 {
        self.total_rows_seen
    }

    #[must_use]
    pub fn limit_reached(&self) -> bool {
        self.total_rows_seen > self.rows.len() as u64
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn set_columns(&mut self, columns: Vec<String>) {
        self.columns = columns;
    }

    pub fn push(&mut self, row: ResultRow) {
        if self.rows.len() < self.capacity {
            self.rows.push(row);
        }
        self.total_rows_seen += 1;
    }

    /// Rows `[offset, offset + limit)`, clamped to what is buffered.
    #[must_use]
    pub fn page(&self, offset: usize, limit: usize) -> &[ResultRow] {
        let start = offset.min(self.rows.len());
        let end = start.saturating_add(limit).min(self.rows.len());
        &self.rows[start..end]
    }
}
