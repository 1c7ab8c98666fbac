#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reader_core::{
    Book, BookId, Bookmark, BookmarkId, Chapter, DatabaseService, Entitlement, InsertOutcome,
    PortError, PortResult, ReaderSettings, ReadingProgress, UserId,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-memory store with knobs for slow and failing writes.
#[derive(Default)]
pub struct FakeStore {
    pub books: Mutex<HashMap<BookId, Book>>,
    pub entitlements: Mutex<HashMap<(UserId, BookId), Entitlement>>,
    pub bookmarks: Mutex<HashMap<(UserId, BookId), Vec<Bookmark>>>,
    pub progress: Mutex<HashMap<(UserId, BookId), u32>>,
    pub entitlement_lookups: AtomicU64,
    pub write_calls: AtomicU64,
    /// The next `n` writes fail with a transient error.
    pub transient_write_failures: AtomicU32,
    /// Every write fails with a non-transient error while set.
    pub writes_broken: AtomicBool,
    pub write_delay_ms: AtomicU64,
    pub entitlement_delay_ms: AtomicU64,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn add_book(&self, total_pages: u32, chapter_starts: &[u32]) -> BookId {
        let chapters = chapter_starts
            .iter()
            .enumerate()
            .map(|(i, s)| Chapter::new(format!("Chapter {}", i + 1), *s))
            .collect();
        let book = Book::new(Uuid::new_v4(), "Fixture", total_pages, chapters).expect("valid book");
        let id = book.id();
        self.books.lock().await.insert(id, book);
        id
    }

    pub async fn stored_progress(&self, user_id: UserId, book_id: BookId) -> Option<u32> {
        self.progress.lock().await.get(&(user_id, book_id)).copied()
    }

    pub async fn stored_bookmarks(&self, user_id: UserId, book_id: BookId) -> Vec<Bookmark> {
        self.bookmarks
            .lock()
            .await
            .get(&(user_id, book_id))
            .cloned()
            .unwrap_or_default()
    }

    async fn before_write(&self) -> PortResult<()> {
        self.write_calls.fetch_add(1, Ordering::Relaxed);
        let delay = self.write_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.writes_broken.load(Ordering::Relaxed) {
            return Err(PortError::Unexpected("store rejected the write".to_string()));
        }
        let failed = self
            .transient_write_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PortError::Unavailable("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseService for FakeStore {
    async fn validate_auth_session(&self, _session_id: &str) -> PortResult<UserId> {
        Err(PortError::Unauthorized)
    }

    async fn get_book(&self, book_id: BookId) -> PortResult<Book> {
        self.books
            .lock()
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
        self.entitlement_lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.entitlements.lock().await.get(&(user_id, book_id)).cloned())
    }

    async fn insert_entitlement(&self, entitlement: Entitlement) -> PortResult<InsertOutcome> {
        let delay = self.entitlement_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let mut rows = self.entitlements.lock().await;
        let key = (entitlement.user_id, entitlement.book_id);
        if rows.contains_key(&key) {
            return Ok(InsertOutcome::Conflict);
        }
        rows.insert(key, entitlement.clone());
        Ok(InsertOutcome::Inserted(entitlement))
    }

    async fn list_entitlements(&self, user_id: UserId) -> PortResult<Vec<Entitlement>> {
        Ok(self
            .entitlements
            .lock()
            .await
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_bookmarks(&self, user_id: UserId, book_id: BookId) -> PortResult<Vec<Bookmark>> {
        Ok(self.stored_bookmarks(user_id, book_id).await)
    }

    async fn save_bookmark(
        &self,
        user_id: UserId,
        book_id: BookId,
        bookmark: &Bookmark,
    ) -> PortResult<()> {
        self.before_write().await?;
        let mut rows = self.bookmarks.lock().await;
        let list = rows.entry((user_id, book_id)).or_default();
        match list.iter_mut().find(|b| b.id == bookmark.id) {
            Some(existing) => *existing = bookmark.clone(),
            None => list.push(bookmark.clone()),
        }
        Ok(())
    }

    async fn delete_bookmark(
        &self,
        user_id: UserId,
        book_id: BookId,
        bookmark_id: BookmarkId,
    ) -> PortResult<()> {
        self.before_write().await?;
        if let Some(list) = self.bookmarks.lock().await.get_mut(&(user_id, book_id)) {
            list.retain(|b| b.id != bookmark_id);
        }
        Ok(())
    }

    async fn get_reading_progress(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> PortResult<Option<ReadingProgress>> {
        Ok(self
            .stored_progress(user_id, book_id)
            .await
            .map(|read_pages| ReadingProgress {
                user_id,
                book_id,
                read_pages,
            }))
    }

    async fn record_reading_progress(
        &self,
        user_id: UserId,
        book_id: BookId,
        read_pages: u32,
    ) -> PortResult<ReadingProgress> {
        self.before_write().await?;
        let mut rows = self.progress.lock().await;
        let stored = rows.entry((user_id, book_id)).or_insert(0);
        *stored = (*stored).max(read_pages);
        Ok(ReadingProgress {
            user_id,
            book_id,
            read_pages: *stored,
        })
    }
}

pub fn fast_settings() -> ReaderSettings {
    ReaderSettings {
        preview_page_limit: 5,
        persist_retry_attempts: 3,
        persist_retry_base_delay: Duration::from_millis(1),
    }
}

async fn poll_until<T>(mut check: impl FnMut() -> Option<T>) -> Option<T> {
    for _ in 0..200 {
        if let Some(found) = check() {
            return Some(found);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

impl FakeStore {
    /// Waits up to two seconds for the stored progress to equal `expected`.
    pub async fn wait_for_progress(&self, user_id: UserId, book_id: BookId, expected: u32) -> bool {
        poll_until(|| {
            let rows = self.progress.try_lock().ok()?;
            (rows.get(&(user_id, book_id)) == Some(&expected)).then_some(())
        })
        .await
        .is_some()
    }

    /// Waits up to two seconds for the stored bookmarks to satisfy `check`.
    pub async fn wait_for_bookmarks(
        &self,
        user_id: UserId,
        book_id: BookId,
        check: impl Fn(&[Bookmark]) -> bool,
    ) -> bool {
        poll_until(|| {
            let rows = self.bookmarks.try_lock().ok()?;
            let stored = rows.get(&(user_id, book_id)).map(Vec::as_slice).unwrap_or(&[]);
            check(stored).then_some(())
        })
        .await
        .is_some()
    }

    /// Waits up to two seconds for at least `count` write calls.
    pub async fn wait_for_writes(&self, count: u64) -> bool {
        poll_until(|| (self.write_calls.load(Ordering::Relaxed) >= count).then_some(()))
            .await
            .is_some()
    }
}
