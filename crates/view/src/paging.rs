//! One-based page cursor over the filtered list.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 15;

/// `ceil(count / page_size)`; zero when there is nothing to show.
pub fn total_pages(count: usize, page_size: usize) -> usize {
    if count == 0 || page_size == 0 {
        0
    } else {
        count.div_ceil(page_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub page_size: usize,
    pub page_index: usize,
    pub total_count: usize,
    pub total_pages: usize,
}

impl Default for PageCursor {
    fn default() -> Self { Self::new(DEFAULT_PAGE_SIZE) }
}

impl PageCursor {
    pub fn new(page_size: usize) -> Self {
        Self { page_size: page_size.max(1), page_index: 1, total_count: 0, total_pages: 0 }
    }

    /// Recompute totals for a new list length and clamp the index into `[1, total_pages]`.
    pub fn resize(&mut self, total_count: usize) {
        self.total_count = total_count;
        self.total_pages = total_pages(total_count, self.page_size);
        self.page_index = clamp_index(self.page_index, self.total_pages);
    }

    pub fn has_next(&self) -> bool { self.page_index < self.total_pages }

    pub fn has_prev(&self) -> bool { self.page_index > 1 }

    /// Advance one page; returns false at the last page.
    pub fn next(&mut self) -> bool {
        if self.has_next() {
            self.page_index += 1;
            true
        } else {
            false
        }
    }

    pub fn prev(&mut self) -> bool {
        if self.has_prev() {
            self.page_index -= 1;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) { self.page_index = 1; }

    /// Index range of the current page inside the full list.
    pub fn window(&self) -> std::ops::Range<usize> {
        let start = (self.page_index.saturating_sub(1)).saturating_mul(self.page_size).min(self.total_count);
        let end = start.saturating_add(self.page_size).min(self.total_count);
        start..end
    }

    pub fn slice<'a, T>(&self, rows: &'a [T]) -> &'a [T] {
        let w = self.window();
        let end = w.end.min(rows.len());
        let start = w.start.min(end);
        &rows[start..end]
    }
}

/// Stays at 1 when there are no pages.
pub fn clamp_index(index: usize, total_pages: usize) -> usize {
    if total_pages == 0 {
        1
    } else {
        index.clamp(1, total_pages)
    }
}
