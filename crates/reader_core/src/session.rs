//! crates/reader_core/src/session.rs
//!
//! The per-reader, per-book state: bookmarks and the pages-read high-water mark.
//!
//! `ReadingSession` is a plain state machine. Every operation is total over its
//! inputs (unknown ids and duplicate pages are not errors) and nothing here
//! touches the store; persistence is layered on top by `reader::LiveSession`.

use serde::{Deserialize, Serialize};

use crate::domain::{title_or_label, Book, BookmarkId, Bookmark, Entitlement, UserId};

/// What `toggle_bookmark_at_page` decided to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "bookmark", rename_all = "snake_case")]
pub enum ToggleOutcome {
    Added(Bookmark),
    Removed(Bookmark),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingSession {
    /// `None` for an anonymous preview reader.
    user_id: Option<UserId>,
    book: Book,
    entitlement: Option<Entitlement>,
    bookmarks: Vec<Bookmark>,
    read_pages: u32,
}

impl ReadingSession {
    pub fn new(
        user_id: Option<UserId>,
        book: Book,
        entitlement: Option<Entitlement>,
        bookmarks: Vec<Bookmark>,
        read_pages: u32,
    ) -> Self {
        Self {
            user_id,
            book,
            entitlement,
            bookmarks,
            read_pages,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn entitlement(&self) -> Option<&Entitlement> {
        self.entitlement.as_ref()
    }

    pub(crate) fn set_entitlement(&mut self, entitlement: Entitlement) {
        self.entitlement = Some(entitlement);
    }

    //-------------------------------------------------------------------------------------
    // Bookmarks
    //-------------------------------------------------------------------------------------

    /// Adds a bookmark. Duplicates at the same page are allowed.
    pub fn add_bookmark(&mut self, page: u32, title: Option<String>, note: Option<String>) -> Bookmark {
        let bookmark = Bookmark::new(page, title, note);
        self.bookmarks.push(bookmark.clone());
        bookmark
    }

    /// Removes the bookmark with `id`, returning it if it existed.
    pub fn remove_bookmark(&mut self, id: BookmarkId) -> Option<Bookmark> {
        let position = self.bookmarks.iter().position(|b| b.id == id)?;
        Some(self.bookmarks.remove(position))
    }

    /// Edits a bookmark in place. `None` leaves a field untouched; a blank title
    /// resets to the page label and a blank note clears it.
    pub fn update_bookmark(
        &mut self,
        id: BookmarkId,
        title: Option<String>,
        note: Option<String>,
    ) -> Option<Bookmark> {
        let bookmark = self.bookmarks.iter_mut().find(|b| b.id == id)?;
        if let Some(title) = title {
            bookmark.title = title_or_label(Some(title), bookmark.page);
        }
        if let Some(note) = note {
            bookmark.note = if note.trim().is_empty() { None } else { Some(note) };
        }
        Some(bookmark.clone())
    }

    /// Removes the first bookmark at `page` if there is one, otherwise adds one.
    /// The check and the mutation happen under the same `&mut self` borrow.
    pub fn toggle_bookmark_at_page(
        &mut self,
        page: u32,
        title: Option<String>,
        note: Option<String>,
    ) -> ToggleOutcome {
        match self.bookmarks.iter().position(|b| b.page == page) {
            Some(position) => ToggleOutcome::Removed(self.bookmarks.remove(position)),
            None => ToggleOutcome::Added(self.add_bookmark(page, title, note)),
        }
    }

    pub fn bookmark_at(&self, page: u32) -> Option<&Bookmark> {
        self.bookmarks.iter().find(|b| b.page == page)
    }

    /// Bookmarks in insertion order.
    pub fn list_bookmarks(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    /// Bookmarks ordered by page for display; ties keep insertion order.
    pub fn bookmarks_by_page(&self) -> Vec<&Bookmark> {
        let mut sorted: Vec<&Bookmark> = self.bookmarks.iter().collect();
        sorted.sort_by_key(|b| b.page);
        sorted
    }

    //-------------------------------------------------------------------------------------
    // Progress
    //-------------------------------------------------------------------------------------

    /// Raises the high-water mark to `page`. Returns whether it moved.
    pub fn record_page_read(&mut self, page: u32) -> bool {
        if page > self.read_pages {
            self.read_pages = page;
            true
        } else {
            false
        }
    }

    pub fn read_pages(&self) -> u32 {
        self.read_pages
    }

    /// `floor(read_pages / total_pages * 100)`, with `read_pages` clamped to the book.
    pub fn progress_percent(&self) -> u8 {
        let total = u64::from(self.book.total_pages());
        let read = u64::from(self.read_pages).min(total);
        (read * 100 / total) as u8
    }
}
