//! crates/reader_core/src/domain.rs
//!
//! Defines the pure, core data structures for the reader.
//! These structs are independent of any database or transport format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type BookId = Uuid;
pub type BookmarkId = Uuid;

/// Validation failures raised when constructing domain values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("A book must have at least one page")]
    EmptyBook,
    #[error("The first chapter must start at page 1, found {0}")]
    FirstChapterNotAtPageOne(u32),
    #[error("Chapter {index} starts at page {start_page}, which does not follow the previous chapter")]
    ChaptersOutOfOrder { index: usize, start_page: u32 },
    #[error("Chapter starts at page {start_page}, beyond the last page {total_pages}")]
    ChapterBeyondEnd { start_page: u32, total_pages: u32 },
}

/// A chapter breakpoint: the first page belonging to the chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub start_page: u32,
}

impl Chapter {
    pub fn new(title: impl Into<String>, start_page: u32) -> Self {
        Self {
            title: title.into(),
            start_page,
        }
    }
}

/// A published book. Immutable once constructed; `Book::new` is the only way in,
/// so every `Book` in the system has at least one page and well-ordered chapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BookParts")]
pub struct Book {
    id: BookId,
    title: String,
    total_pages: u32,
    chapters: Vec<Chapter>,
}

#[derive(Deserialize)]
struct BookParts {
    id: BookId,
    title: String,
    total_pages: u32,
    chapters: Vec<Chapter>,
}

impl TryFrom<BookParts> for Book {
    type Error = DomainError;

    fn try_from(parts: BookParts) -> Result<Self, Self::Error> {
        Book::new(parts.id, parts.title, parts.total_pages, parts.chapters)
    }
}

impl Book {
    pub fn new(
        id: BookId,
        title: impl Into<String>,
        total_pages: u32,
        chapters: Vec<Chapter>,
    ) -> Result<Self, DomainError> {
        if total_pages == 0 {
            return Err(DomainError::EmptyBook);
        }
        if let Some(first) = chapters.first() {
            if first.start_page != 1 {
                return Err(DomainError::FirstChapterNotAtPageOne(first.start_page));
            }
        }
        for (index, pair) in chapters.windows(2).enumerate() {
            if pair[1].start_page <= pair[0].start_page {
                return Err(DomainError::ChaptersOutOfOrder {
                    index: index + 1,
                    start_page: pair[1].start_page,
                });
            }
        }
        if let Some(last) = chapters.last() {
            if last.start_page > total_pages {
                return Err(DomainError::ChapterBeyondEnd {
                    start_page: last.start_page,
                    total_pages,
                });
            }
        }

        Ok(Self {
            id,
            title: title.into(),
            total_pages,
            chapters,
        })
    }

    pub fn id(&self) -> BookId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    /// Chapters sorted by ascending `start_page`.
    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }
}

/// Durable proof that a user may access a book's full content.
/// At most one exists per (user, book); the store enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub user_id: UserId,
    pub book_id: BookId,
    pub granted_at: DateTime<Utc>,
    /// Price paid, in minor currency units.
    pub amount: i64,
    pub currency: String,
}

/// A reader's bookmark inside a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: BookmarkId,
    pub page: u32,
    pub title: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    /// Creates a bookmark with a fresh id. A missing or blank title falls back
    /// to the page label.
    pub fn new(page: u32, title: Option<String>, note: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            page,
            title: title_or_label(title, page),
            note,
            created_at: Utc::now(),
        }
    }
}

/// The high-water mark of pages read for one (user, book).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingProgress {
    pub user_id: UserId,
    pub book_id: BookId,
    pub read_pages: u32,
}

/// The default bookmark title for a page.
pub fn page_label(page: u32) -> String {
    format!("Page {}", page)
}

pub(crate) fn title_or_label(title: Option<String>, page: u32) -> String {
    match title {
        Some(t) if !t.trim().is_empty() => t,
        _ => page_label(page),
    }
}
