//! Backward navigation over a forward-only result cursor.
//!
//! The server only understands "give me the page after this token". Going
//! back therefore replays a token the client already exchanged: every forward
//! step pushes the token of the page being left, every backward step pops
//! exactly one.

use crate::execution::{ExecutionContext, PageCursor};
use crate::service::ResultPage;

/// A page request together with the stack that becomes current if it lands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageFetch {
    pub token: String,
    pub previous_tokens: Vec<String>,
}

impl PageFetch {
    #[must_use]
    pub fn first() -> Self {
        Self::default()
    }

    /// Token as sent on the wire; the empty token means "first page".
    #[must_use]
    pub fn wire_token(&self) -> Option<String> {
        (!self.token.is_empty()).then(|| self.token.clone())
    }
}

#[must_use]
pub fn next_page(cursor: &PageCursor) -> Option<PageFetch> {
    let token = cursor.next_token.clone()?;
    let mut previous_tokens = cursor.previous_tokens.clone();
    previous_tokens.push(cursor.current_token.clone());
    Some(PageFetch {
        token,
        previous_tokens,
    })
}

#[must_use]
pub fn previous_page(cursor: &PageCursor) -> Option<PageFetch> {
    let mut previous_tokens = cursor.previous_tokens.clone();
    let token = previous_tokens.pop()?;
    Some(PageFetch {
        token,
        previous_tokens,
    })
}

/// Installs a fetched page as the context's current page.
#[must_use]
pub fn apply_page(context: &ExecutionContext, fetch: PageFetch, page: ResultPage) -> ExecutionContext {
    ExecutionContext {
        result_columns: page.columns,
        result_rows: page.rows,
        row_limit_reached: page.row_limit_reached,
        cursor: PageCursor {
            current_token: fetch.token,
            next_token: page.next_page_token.filter(|token| !token.is_empty()),
            previous_tokens: fetch.previous_tokens,
        },
        page_loading: false,
        ..context.clone()
    }
}
