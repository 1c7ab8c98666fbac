//! crates/reader_core/src/ports.rs
//!
//! Defines the service contracts (traits) the reader core consumes.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete relational store and auth backend.

use async_trait::async_trait;
use crate::domain::{Book, BookId, Bookmark, BookmarkId, Entitlement, ReadingProgress, UserId};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// The backing service could not be reached or timed out; the call may be retried.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

impl PortError {
    /// Whether retrying the same call has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Unavailable(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Result of inserting an entitlement under the (user, book) uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Entitlement),
    /// A row for the same (user, book) already exists; nothing was written.
    Conflict,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Auth ---
    /// Resolves a browser session id to the signed-in user.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<UserId>;

    // --- Books (read-only to this core) ---
    async fn get_book(&self, book_id: BookId) -> PortResult<Book>;

    // --- Entitlements ---
    async fn find_entitlement(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> PortResult<Option<Entitlement>>;

    async fn insert_entitlement(&self, entitlement: Entitlement) -> PortResult<InsertOutcome>;

    async fn list_entitlements(&self, user_id: UserId) -> PortResult<Vec<Entitlement>>;

    // --- Bookmarks ---
    async fn list_bookmarks(&self, user_id: UserId, book_id: BookId) -> PortResult<Vec<Bookmark>>;

    /// Inserts the bookmark, or replaces the stored one with the same id.
    async fn save_bookmark(
        &self,
        user_id: UserId,
        book_id: BookId,
        bookmark: &Bookmark,
    ) -> PortResult<()>;

    /// Deleting an id that does not exist is not an error.
    async fn delete_bookmark(
        &self,
        user_id: UserId,
        book_id: BookId,
        bookmark_id: BookmarkId,
    ) -> PortResult<()>;

    // --- Reading Progress ---
    async fn get_reading_progress(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> PortResult<Option<ReadingProgress>>;

    /// Stores `max(stored, read_pages)` and returns the resulting row.
    /// A late write carrying a lower value must never lower the stored mark.
    async fn record_reading_progress(
        &self,
        user_id: UserId,
        book_id: BookId,
        read_pages: u32,
    ) -> PortResult<ReadingProgress>;
}
