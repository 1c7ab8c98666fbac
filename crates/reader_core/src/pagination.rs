//! crates/reader_core/src/pagination.rs
//!
//! Moves the current page pointer within the readable bounds of a book.

use serde::Serialize;

use crate::chapter_index::ChapterIndex;
use crate::domain::{Book, Chapter};
use crate::session::ReadingSession;

/// The readable page range of a session: `[1, upper]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageBounds {
    pub upper: u32,
    pub preview: bool,
}

impl PageBounds {
    pub fn full(book: &Book) -> Self {
        Self {
            upper: book.total_pages(),
            preview: false,
        }
    }

    /// The preview window is `min(limit, total_pages)`, and always at least one page.
    pub fn preview(book: &Book, limit: u32) -> Self {
        Self {
            upper: limit.clamp(1, book.total_pages()),
            preview: true,
        }
    }

    pub fn contains(&self, page: i64) -> bool {
        page >= 1 && page <= i64::from(self.upper)
    }
}

/// The result of a navigation request. Out-of-range requests are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PageResult {
    Moved {
        from: u32,
        to: u32,
        /// The reading session's high-water mark rose because of this move.
        high_water_raised: bool,
    },
    Rejected {
        requested: i64,
        current: u32,
    },
}

#[derive(Debug, Clone)]
pub struct PaginationController {
    current_page: u32,
    bounds: PageBounds,
    chapters: ChapterIndex,
}

impl PaginationController {
    /// Starts at `start_page` when it is inside `bounds`, otherwise at page 1.
    pub fn new(book: &Book, bounds: PageBounds, start_page: u32) -> Self {
        let current_page = if bounds.contains(i64::from(start_page)) {
            start_page
        } else {
            1
        };
        Self {
            current_page,
            bounds,
            chapters: ChapterIndex::for_book(book),
        }
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn bounds(&self) -> PageBounds {
        self.bounds
    }

    /// Moves to `page` if it is within bounds and records it as read.
    /// Moving backward never lowers the session's high-water mark.
    pub fn go_to(&mut self, page: i64, session: &mut ReadingSession) -> PageResult {
        if !self.bounds.contains(page) {
            return PageResult::Rejected {
                requested: page,
                current: self.current_page,
            };
        }
        let from = self.current_page;
        // In range, so it fits in u32.
        let to = page as u32;
        self.current_page = to;
        let high_water_raised = session.record_page_read(to);
        PageResult::Moved {
            from,
            to,
            high_water_raised,
        }
    }

    pub fn next(&mut self, session: &mut ReadingSession) -> PageResult {
        self.go_to(i64::from(self.current_page) + 1, session)
    }

    pub fn previous(&mut self, session: &mut ReadingSession) -> PageResult {
        self.go_to(i64::from(self.current_page) - 1, session)
    }

    pub fn current_chapter(&self) -> &Chapter {
        self.chapters.chapter_for(self.current_page)
    }

    pub fn chapter_index(&self) -> &ChapterIndex {
        &self.chapters
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.bounds.upper
    }

    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }
}
