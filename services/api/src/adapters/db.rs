//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reader_core::domain::{Book, BookId, Bookmark, BookmarkId, Chapter, Entitlement, ReadingProgress, UserId};
use reader_core::ports::{DatabaseService, InsertOutcome, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Maps a `sqlx` error onto the port error taxonomy. Connection-level failures
/// are reported as `Unavailable` so callers know a retry may help.
fn port_error(e: sqlx::Error) -> PortError {
    match &e {
        sqlx::Error::RowNotFound => PortError::NotFound(e.to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => PortError::Unavailable(e.to_string()),
        sqlx::Error::Database(db) => {
            let code = db.code().unwrap_or_default();
            // Class 08 is connection exception; 40001/40P01 are serialization
            // failure and deadlock; 57P01 is admin shutdown.
            if code.starts_with("08") || matches!(&*code, "40001" | "40P01" | "57P01") {
                PortError::Unavailable(e.to_string())
            } else {
                PortError::Unexpected(e.to_string())
            }
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn page_to_db(page: u32) -> i32 {
    i32::try_from(page).unwrap_or(i32::MAX)
}

fn page_from_db(page: i32) -> u32 {
    u32::try_from(page).unwrap_or(0)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct BookRecord {
    id: Uuid,
    title: String,
    total_pages: i32,
}

#[derive(FromRow)]
struct ChapterRecord {
    title: String,
    start_page: i32,
}
impl ChapterRecord {
    fn to_domain(self) -> Chapter {
        Chapter::new(self.title, page_from_db(self.start_page))
    }
}

#[derive(FromRow)]
struct EntitlementRecord {
    user_id: Uuid,
    book_id: Uuid,
    granted_at: DateTime<Utc>,
    amount: i64,
    currency: String,
}
impl EntitlementRecord {
    fn to_domain(self) -> Entitlement {
        Entitlement {
            user_id: self.user_id,
            book_id: self.book_id,
            granted_at: self.granted_at,
            amount: self.amount,
            currency: self.currency,
        }
    }
}

#[derive(FromRow)]
struct BookmarkRecord {
    id: Uuid,
    page: i32,
    title: String,
    note: Option<String>,
    created_at: DateTime<Utc>,
}
impl BookmarkRecord {
    fn to_domain(self) -> Bookmark {
        Bookmark {
            id: self.id,
            page: page_from_db(self.page),
            title: self.title,
            note: self.note,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ProgressRecord {
    user_id: Uuid,
    book_id: Uuid,
    read_pages: i32,
}
impl ProgressRecord {
    fn to_domain(self) -> ReadingProgress {
        ReadingProgress {
            user_id: self.user_id,
            book_id: self.book_id,
            read_pages: page_from_db(self.read_pages),
        }
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<UserId> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_error)?;

        user_id.ok_or(PortError::Unauthorized)
    }

    async fn get_book(&self, book_id: BookId) -> PortResult<Book> {
        let record = sqlx::query_as::<_, BookRecord>(
            "SELECT id, title, total_pages FROM books WHERE id = $1",
        )
        .bind(book_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Book {} not found", book_id)),
            _ => port_error(e),
        })?;

        let chapters = sqlx::query_as::<_, ChapterRecord>(
            "SELECT title, start_page FROM chapters WHERE book_id = $1 ORDER BY start_page ASC",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .map_err(port_error)?
        .into_iter()
        .map(|r| r.to_domain())
        .collect();

        Book::new(record.id, record.title, page_from_db(record.total_pages), chapters)
            .map_err(|e| PortError::Unexpected(format!("Book {} is malformed: {}", book_id, e)))
    }

    async fn find_entitlement(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> PortResult<Option<Entitlement>> {
        let record = sqlx::query_as::<_, EntitlementRecord>(
            "SELECT user_id, book_id, granted_at, amount, currency FROM entitlements WHERE user_id = $1 AND book_id = $2",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_error)?;

        Ok(record.map(|r| r.to_domain()))
    }

    async fn insert_entitlement(&self, entitlement: Entitlement) -> PortResult<InsertOutcome> {
        // The unique (user_id, book_id) constraint turns a duplicate into "no row returned".
        let record = sqlx::query_as::<_, EntitlementRecord>(
            "INSERT INTO entitlements (user_id, book_id, granted_at, amount, currency) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, book_id) DO NOTHING \
             RETURNING user_id, book_id, granted_at, amount, currency",
        )
        .bind(entitlement.user_id)
        .bind(entitlement.book_id)
        .bind(entitlement.granted_at)
        .bind(entitlement.amount)
        .bind(&entitlement.currency)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_error)?;

        Ok(match record {
            Some(r) => InsertOutcome::Inserted(r.to_domain()),
            None => InsertOutcome::Conflict,
        })
    }

    async fn list_entitlements(&self, user_id: UserId) -> PortResult<Vec<Entitlement>> {
        let records = sqlx::query_as::<_, EntitlementRecord>(
            "SELECT user_id, book_id, granted_at, amount, currency FROM entitlements WHERE user_id = $1 ORDER BY granted_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(port_error)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn list_bookmarks(&self, user_id: UserId, book_id: BookId) -> PortResult<Vec<Bookmark>> {
        let records = sqlx::query_as::<_, BookmarkRecord>(
            "SELECT id, page, title, note, created_at FROM bookmarks WHERE user_id = $1 AND book_id = $2 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .map_err(port_error)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn save_bookmark(
        &self,
        user_id: UserId,
        book_id: BookId,
        bookmark: &Bookmark,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO bookmarks (id, user_id, book_id, page, title, note, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET page = EXCLUDED.page, title = EXCLUDED.title, note = EXCLUDED.note",
        )
        .bind(bookmark.id)
        .bind(user_id)
        .bind(book_id)
        .bind(page_to_db(bookmark.page))
        .bind(&bookmark.title)
        .bind(&bookmark.note)
        .bind(bookmark.created_at)
        .execute(&self.pool)
        .await
        .map_err(port_error)?;
        Ok(())
    }

    async fn delete_bookmark(
        &self,
        user_id: UserId,
        book_id: BookId,
        bookmark_id: BookmarkId,
    ) -> PortResult<()> {
        sqlx::query("DELETE FROM bookmarks WHERE id = $1 AND user_id = $2 AND book_id = $3")
            .bind(bookmark_id)
            .bind(user_id)
            .bind(book_id)
            .execute(&self.pool)
            .await
            .map_err(port_error)?;
        Ok(())
    }

    async fn get_reading_progress(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> PortResult<Option<ReadingProgress>> {
        let record = sqlx::query_as::<_, ProgressRecord>(
            "SELECT user_id, book_id, read_pages FROM reading_progress WHERE user_id = $1 AND book_id = $2",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_error)?;

        Ok(record.map(|r| r.to_domain()))
    }

    async fn record_reading_progress(
        &self,
        user_id: UserId,
        book_id: BookId,
        read_pages: u32,
    ) -> PortResult<ReadingProgress> {
        let record = sqlx::query_as::<_, ProgressRecord>(
            "INSERT INTO reading_progress (user_id, book_id, read_pages) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, book_id) DO UPDATE \
             SET read_pages = GREATEST(reading_progress.read_pages, EXCLUDED.read_pages), updated_at = now() \
             RETURNING user_id, book_id, read_pages",
        )
        .bind(user_id)
        .bind(book_id)
        .bind(page_to_db(read_pages))
        .fetch_one(&self.pool)
        .await
        .map_err(port_error)?;

        Ok(record.to_domain())
    }
}
