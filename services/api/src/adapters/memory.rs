//! services/api/src/adapters/memory.rs
//!
//! A process-local implementation of the `DatabaseService` port. It mirrors the
//! Postgres adapter's semantics (unique entitlements, monotonic progress) and is
//! used for `STORE_BACKEND=memory` and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reader_core::domain::{Book, BookId, Bookmark, BookmarkId, Entitlement, ReadingProgress, UserId};
use reader_core::ports::{DatabaseService, InsertOutcome, PortError, PortResult};
use tokio::sync::RwLock;

struct AuthSessionRecord {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryAdapter {
    books: RwLock<HashMap<BookId, Book>>,
    auth_sessions: RwLock<HashMap<String, AuthSessionRecord>>,
    entitlements: RwLock<HashMap<(UserId, BookId), Entitlement>>,
    bookmarks: RwLock<HashMap<(UserId, BookId), Vec<Bookmark>>>,
    progress: RwLock<HashMap<(UserId, BookId), u32>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_book(&self, book: Book) {
        self.books.write().await.insert(book.id(), book);
    }

    pub async fn insert_auth_session(
        &self,
        session_id: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) {
        self.auth_sessions.write().await.insert(
            session_id.to_string(),
            AuthSessionRecord {
                user_id,
                expires_at,
            },
        );
    }
}

#[async_trait]
impl DatabaseService for MemoryAdapter {
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<UserId> {
        self.auth_sessions
            .read()
            .await
            .get(session_id)
            .filter(|s| s.expires_at > Utc::now())
            .map(|s| s.user_id)
            .ok_or(PortError::Unauthorized)
    }

    async fn get_book(&self, book_id: BookId) -> PortResult<Book> {
        self.books
            .read()
            .await
            .get(&book_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Book {} not found", book_id)))
    }

    async fn find_entitlement(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> PortResult<Option<Entitlement>> {
        Ok(self.entitlements.read().await.get(&(user_id, book_id)).cloned())
    }

    async fn insert_entitlement(&self, entitlement: Entitlement) -> PortResult<InsertOutcome> {
        let mut rows = self.entitlements.write().await;
        let key = (entitlement.user_id, entitlement.book_id);
        if rows.contains_key(&key) {
            return Ok(InsertOutcome::Conflict);
        }
        rows.insert(key, entitlement.clone());
        Ok(InsertOutcome::Inserted(entitlement))
    }

    async fn list_entitlements(&self, user_id: UserId) -> PortResult<Vec<Entitlement>> {
        let mut owned: Vec<Entitlement> = self
            .entitlements
            .read()
            .await
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.granted_at.cmp(&a.granted_at));
        Ok(owned)
    }

    async fn list_bookmarks(&self, user_id: UserId, book_id: BookId) -> PortResult<Vec<Bookmark>> {
        Ok(self
            .bookmarks
            .read()
            .await
            .get(&(user_id, book_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_bookmark(
        &self,
        user_id: UserId,
        book_id: BookId,
        bookmark: &Bookmark,
    ) -> PortResult<()> {
        let mut rows = self.bookmarks.write().await;
        let stored = rows.entry((user_id, book_id)).or_default();
        match stored.iter_mut().find(|b| b.id == bookmark.id) {
            Some(existing) => *existing = bookmark.clone(),
            None => stored.push(bookmark.clone()),
        }
        Ok(())
    }

    async fn delete_bookmark(
        &self,
        user_id: UserId,
        book_id: BookId,
        bookmark_id: BookmarkId,
    ) -> PortResult<()> {
        if let Some(stored) = self.bookmarks.write().await.get_mut(&(user_id, book_id)) {
            stored.retain(|b| b.id != bookmark_id);
        }
        Ok(())
    }

    async fn get_reading_progress(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> PortResult<Option<ReadingProgress>> {
        Ok(self
            .progress
            .read()
            .await
            .get(&(user_id, book_id))
            .map(|read_pages| ReadingProgress {
                user_id,
                book_id,
                read_pages: *read_pages,
            }))
    }

    async fn record_reading_progress(
        &self,
        user_id: UserId,
        book_id: BookId,
        read_pages: u32,
    ) -> PortResult<ReadingProgress> {
        let mut rows = self.progress.write().await;
        let stored = rows.entry((user_id, book_id)).or_insert(0);
        *stored = (*stored).max(read_pages);
        Ok(ReadingProgress {
            user_id,
            book_id,
            read_pages: *stored,
        })
    }
}
