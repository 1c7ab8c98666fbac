//! crates/reader_core/src/chapter_index.rs
//!
//! Page-to-chapter lookup over a book's sorted chapter breakpoints.

use crate::domain::{Book, Chapter};

/// Predecessor search over chapter start pages.
///
/// For a page `p`, the containing chapter is the one with the greatest
/// `start_page <= p`. Lookups are `O(log k)` over `k` chapters.
#[derive(Debug, Clone)]
pub struct ChapterIndex {
    chapters: Vec<Chapter>,
}

impl ChapterIndex {
    /// Builds the index for a book. A book without chapters gets a single
    /// synthetic chapter spanning the whole book.
    pub fn for_book(book: &Book) -> Self {
        let chapters = if book.chapters().is_empty() {
            vec![Chapter::new(book.title(), 1)]
        } else {
            book.chapters().to_vec()
        };
        Self { chapters }
    }

    pub fn chapter_for(&self, page: u32) -> &Chapter {
        // Number of chapters starting at or before `page`.
        let at_or_before = self.chapters.partition_point(|c| c.start_page <= page);
        // A page before the first breakpoint belongs to the first chapter.
        &self.chapters[at_or_before.saturating_sub(1)]
    }

    /// Zero-based position of the chapter containing `page`.
    pub fn position_of(&self, page: u32) -> usize {
        self.chapters
            .partition_point(|c| c.start_page <= page)
            .saturating_sub(1)
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn book(total_pages: u32, starts: &[u32]) -> Book {
        let chapters = starts
            .iter()
            .enumerate()
            .map(|(i, s)| Chapter::new(format!("Chapter {}", i + 1), *s))
            .collect();
        Book::new(Uuid::new_v4(), "Sample", total_pages, chapters).unwrap()
    }

    #[test]
    fn resolves_chapter_boundaries() {
        let index = ChapterIndex::for_book(&book(100, &[1, 21, 51]));
        assert_eq!(index.chapter_for(20).title, "Chapter 1");
        assert_eq!(index.chapter_for(21).title, "Chapter 2");
        assert_eq!(index.chapter_for(50).title, "Chapter 2");
        assert_eq!(index.chapter_for(51).title, "Chapter 3");
        assert_eq!(index.chapter_for(99).title, "Chapter 3");
        assert_eq!(index.position_of(99), 2);
    }

    #[test]
    fn page_before_first_chapter_maps_to_first() {
        let index = ChapterIndex::for_book(&book(10, &[1, 5]));
        assert_eq!(index.chapter_for(0).title, "Chapter 1");
    }

    #[test]
    fn empty_chapter_list_yields_whole_book_chapter() {
        let index = ChapterIndex::for_book(&book(42, &[]));
        let chapter = index.chapter_for(30);
        assert_eq!(chapter.title, "Sample");
        assert_eq!(chapter.start_page, 1);
    }

    #[test]
    fn matches_linear_predecessor_scan_for_every_page() {
        let starts = [1, 3, 4, 10, 17, 40];
        let index = ChapterIndex::for_book(&book(50, &starts));
        for page in 1..=50 {
            let expected = starts.iter().rev().find(|s| **s <= page).copied().unwrap();
            let found = index.chapter_for(page);
            assert_eq!(found.start_page, expected, "page {}", page);
            assert!(index
                .chapters()
                .iter()
                .all(|c| c.start_page > page || c.start_page <= found.start_page));
        }
    }
}
