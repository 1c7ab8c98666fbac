//! crates/reader_core/src/reader.rs
//!
//! The reader runtime: opens sessions behind the entitlement gate and keeps a
//! live session's bookmarks and progress flowing to the store.
//!
//! In-memory state is always updated first and synchronously, in the order the
//! reader acted. Store writes happen afterwards on a per-session writer task, so
//! a slow or failing store never blocks reading and never rolls anything back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{BookId, Bookmark, BookmarkId, Chapter, Entitlement, UserId};
use crate::entitlement::{EntitlementGate, PurchaseOutcome};
use crate::pagination::{PageBounds, PageResult, PaginationController};
use crate::ports::{DatabaseService, PortError, PortResult};
use crate::session::{ReadingSession, ToggleOutcome};

//=========================================================================================
// Settings and Options
//=========================================================================================

#[derive(Debug, Clone)]
pub struct ReaderSettings {
    /// Pages readable in preview mode, before capping at the book's length.
    pub preview_page_limit: u32,
    /// Total attempts for a store write that fails transiently.
    pub persist_retry_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub persist_retry_base_delay: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            preview_page_limit: 10,
            persist_retry_attempts: 3,
            persist_retry_base_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    /// Skip the entitlement check and confine reading to the preview window.
    pub preview: bool,
    /// Page to open at. Falls back to page 1 when absent or out of bounds.
    pub resume_page: Option<u32>,
}

pub enum OpenOutcome {
    Opened(Arc<LiveSession>),
    /// The reader is signed in but does not own the book.
    NotEntitled,
    /// Full access was requested without a signed-in reader.
    Unauthenticated,
}

/// Errors from the check-then-act operations of a live session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Another operation is already in flight for this session")]
    Busy,
    #[error(transparent)]
    Port(#[from] PortError),
}

/// Whether a mutation reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    Saved,
    /// The store rejected or never received the write; local state is kept.
    NotSaved,
    /// Preview sessions are never persisted.
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToggleReport {
    pub outcome: ToggleOutcome,
    pub save_status: SaveStatus,
}

//=========================================================================================
// ReaderService
//=========================================================================================

/// Entry point used by the UI layer.
#[derive(Clone)]
pub struct ReaderService {
    db: Arc<dyn DatabaseService>,
    gate: EntitlementGate,
    settings: ReaderSettings,
}

impl ReaderService {
    pub fn new(db: Arc<dyn DatabaseService>, settings: ReaderSettings) -> Self {
        Self {
            gate: EntitlementGate::new(db.clone()),
            db,
            settings,
        }
    }

    pub fn gate(&self) -> &EntitlementGate {
        &self.gate
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    pub async fn open_session(
        &self,
        user_id: Option<UserId>,
        book_id: BookId,
        options: OpenOptions,
    ) -> PortResult<OpenOutcome> {
        let mut entitlement = None;
        if !options.preview {
            if user_id.is_none() {
                return Ok(OpenOutcome::Unauthenticated);
            }
            let decision = self.gate.check_access(user_id, book_id).await?;
            if !decision.granted {
                info!(?user_id, %book_id, "Reader is not entitled to the book");
                return Ok(OpenOutcome::NotEntitled);
            }
            entitlement = decision.entitlement;
        }

        let book = self.db.get_book(book_id).await?;

        let persist_for = match (options.preview, user_id) {
            (false, Some(user_id)) => Some(user_id),
            _ => None,
        };

        let (bookmarks, read_pages) = match persist_for {
            Some(user_id) => {
                let (bookmarks, progress) = futures::try_join!(
                    self.db.list_bookmarks(user_id, book_id),
                    self.db.get_reading_progress(user_id, book_id),
                )?;
                (bookmarks, progress.map_or(0, |p| p.read_pages))
            }
            None => (Vec::new(), 0),
        };

        let bounds = if options.preview {
            PageBounds::preview(&book, self.settings.preview_page_limit)
        } else {
            PageBounds::full(&book)
        };
        let pager = PaginationController::new(&book, bounds, options.resume_page.unwrap_or(1));
        let mut session = ReadingSession::new(user_id, book, entitlement, bookmarks, read_pages);
        // The opening page counts as viewed.
        session.record_page_read(pager.current_page());

        let writer = persist_for.map(|user_id| {
            SessionWriter::spawn(
                self.db.clone(),
                user_id,
                book_id,
                RetryPolicy::from(&self.settings),
                read_pages,
                session.read_pages(),
            )
        });

        let live = LiveSession {
            id: Uuid::new_v4(),
            book_id,
            total_pages: session.book().total_pages(),
            bounds,
            user_id,
            core: Mutex::new(SessionCore { session, pager }),
            in_flight: AtomicBool::new(false),
            writer,
        };
        info!(
            session_id = %live.id,
            ?user_id,
            %book_id,
            preview = options.preview,
            "Reading session opened"
        );
        Ok(OpenOutcome::Opened(Arc::new(live)))
    }

    /// Purchase outside of any open session.
    pub async fn purchase(
        &self,
        user_id: Option<UserId>,
        book_id: BookId,
        amount: i64,
        currency: &str,
    ) -> PortResult<PurchaseOutcome> {
        self.gate.purchase(user_id, book_id, amount, currency).await
    }
}

//=========================================================================================
// LiveSession
//=========================================================================================

struct SessionCore {
    session: ReadingSession,
    pager: PaginationController,
}

/// A read-only view of a session for display.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub book_id: BookId,
    pub book_title: String,
    pub total_pages: u32,
    pub current_page: u32,
    pub bounds: PageBounds,
    pub has_next: bool,
    pub has_previous: bool,
    pub chapter: Chapter,
    pub chapter_position: usize,
    pub read_pages: u32,
    pub progress_percent: u8,
    /// Sorted by page.
    pub bookmarks: Vec<Bookmark>,
    pub bookmark_at_current_page: Option<BookmarkId>,
    pub entitlement: Option<Entitlement>,
    pub changes_not_saved: bool,
}

/// One reader's open book.
pub struct LiveSession {
    id: Uuid,
    book_id: BookId,
    total_pages: u32,
    bounds: PageBounds,
    user_id: Option<UserId>,
    core: Mutex<SessionCore>,
    in_flight: AtomicBool,
    /// `None` for preview sessions.
    writer: Option<WriterHandle>,
}

impl LiveSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn book_id(&self) -> BookId {
        self.book_id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    /// Pages this session may visit; fixed when the session opens.
    pub fn bounds(&self) -> PageBounds {
        self.bounds
    }

    pub fn is_preview(&self) -> bool {
        self.writer.is_none()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let core = self.core.lock().await;
        let book = core.session.book();
        let current_page = core.pager.current_page();
        SessionSnapshot {
            session_id: self.id,
            book_id: self.book_id,
            book_title: book.title().to_string(),
            total_pages: book.total_pages(),
            current_page,
            bounds: core.pager.bounds(),
            has_next: core.pager.has_next(),
            has_previous: core.pager.has_previous(),
            chapter: core.pager.current_chapter().clone(),
            chapter_position: core.pager.chapter_index().position_of(current_page),
            read_pages: core.session.read_pages(),
            progress_percent: core.session.progress_percent(),
            bookmarks: core.session.bookmarks_by_page().into_iter().cloned().collect(),
            bookmark_at_current_page: core.session.bookmark_at(current_page).map(|b| b.id),
            entitlement: core.session.entitlement().cloned(),
            changes_not_saved: self.changes_not_saved(),
        }
    }

    //-------------------------------------------------------------------------------------
    // Navigation
    //-------------------------------------------------------------------------------------

    pub async fn go_to(&self, page: i64) -> PageResult {
        self.navigate(|pager, session| pager.go_to(page, session)).await
    }

    pub async fn next(&self) -> PageResult {
        self.navigate(PaginationController::next).await
    }

    pub async fn previous(&self) -> PageResult {
        self.navigate(PaginationController::previous).await
    }

    /// Applies one navigation step under the session lock and hands a raised
    /// high-water mark to the writer.
    async fn navigate<F>(&self, step: F) -> PageResult
    where
        F: FnOnce(&mut PaginationController, &mut ReadingSession) -> PageResult,
    {
        let mut core = self.core.lock().await;
        let SessionCore { session, pager } = &mut *core;
        let result = step(pager, session);
        if let PageResult::Moved {
            high_water_raised: true,
            ..
        } = result
        {
            if let Some(writer) = &self.writer {
                writer.progress.send_replace(session.read_pages());
            }
        }
        result
    }

    pub async fn current_chapter(&self) -> Chapter {
        self.core.lock().await.pager.current_chapter().clone()
    }

    pub async fn progress_percent(&self) -> u8 {
        self.core.lock().await.session.progress_percent()
    }

    pub async fn read_pages(&self) -> u32 {
        self.core.lock().await.session.read_pages()
    }

    //-------------------------------------------------------------------------------------
    // Bookmarks
    //-------------------------------------------------------------------------------------

    pub async fn list_bookmarks(&self) -> Vec<Bookmark> {
        self.core.lock().await.session.list_bookmarks().to_vec()
    }

    pub async fn add_bookmark(
        &self,
        page: u32,
        title: Option<String>,
        note: Option<String>,
    ) -> Bookmark {
        let mut core = self.core.lock().await;
        let bookmark = core.session.add_bookmark(page, title, note);
        self.enqueue(WriteOp::Save(bookmark.clone()), None);
        bookmark
    }

    pub async fn update_bookmark(
        &self,
        id: BookmarkId,
        title: Option<String>,
        note: Option<String>,
    ) -> Option<Bookmark> {
        let mut core = self.core.lock().await;
        let updated = core.session.update_bookmark(id, title, note)?;
        self.enqueue(WriteOp::Save(updated.clone()), None);
        Some(updated)
    }

    pub async fn remove_bookmark(&self, id: BookmarkId) -> Option<Bookmark> {
        let mut core = self.core.lock().await;
        let removed = core.session.remove_bookmark(id)?;
        self.enqueue(WriteOp::Delete(removed.id), None);
        Some(removed)
    }

    /// Adds or removes the bookmark at `page` and waits for the store write.
    ///
    /// Only one toggle (or purchase) may run per session at a time; a second
    /// call while one is in flight gets `SessionError::Busy`. Dropping the
    /// returned future does not cancel the store write.
    pub async fn toggle_bookmark_at_page(
        &self,
        page: u32,
        title: Option<String>,
        note: Option<String>,
    ) -> Result<ToggleReport, SessionError> {
        let _guard = InFlight::acquire(&self.in_flight).ok_or(SessionError::Busy)?;

        let (outcome, ack_rx) = {
            let mut core = self.core.lock().await;
            let outcome = core.session.toggle_bookmark_at_page(page, title, note);
            let op = match &outcome {
                ToggleOutcome::Added(b) => WriteOp::Save(b.clone()),
                ToggleOutcome::Removed(b) => WriteOp::Delete(b.id),
            };
            let ack_rx = self.writer.as_ref().map(|_| {
                let (ack_tx, ack_rx) = oneshot::channel();
                self.enqueue(op, Some(ack_tx));
                ack_rx
            });
            (outcome, ack_rx)
        };

        let save_status = match ack_rx {
            None => SaveStatus::Ephemeral,
            Some(ack_rx) => match ack_rx.await {
                Ok(true) => SaveStatus::Saved,
                _ => SaveStatus::NotSaved,
            },
        };

        Ok(ToggleReport {
            outcome,
            save_status,
        })
    }

    //-------------------------------------------------------------------------------------
    // Purchase
    //-------------------------------------------------------------------------------------

    /// Buys the session's book for its reader. Serialized with toggles through
    /// the same in-flight flag.
    pub async fn purchase(
        &self,
        gate: &EntitlementGate,
        amount: i64,
        currency: &str,
    ) -> Result<PurchaseOutcome, SessionError> {
        let _guard = InFlight::acquire(&self.in_flight).ok_or(SessionError::Busy)?;
        let outcome = gate
            .purchase(self.user_id, self.book_id, amount, currency)
            .await?;
        if let Some(entitlement) = outcome.entitlement() {
            self.core
                .lock()
                .await
                .session
                .set_entitlement(entitlement.clone());
        }
        Ok(outcome)
    }

    //-------------------------------------------------------------------------------------
    // Save status
    //-------------------------------------------------------------------------------------

    /// Whether any write for this session has failed since the last acknowledgement.
    pub fn changes_not_saved(&self) -> bool {
        self.writer
            .as_ref()
            .is_some_and(|w| w.unsaved.load(Ordering::Acquire))
    }

    /// Clears the "changes not saved" notice, returning whether it was set.
    pub fn acknowledge_unsaved(&self) -> bool {
        self.writer
            .as_ref()
            .is_some_and(|w| w.unsaved.swap(false, Ordering::AcqRel))
    }

    /// Callers hold the session lock, so the writer sees changes in the order
    /// they were applied in memory.
    fn enqueue(&self, op: WriteOp, ack: Option<oneshot::Sender<bool>>) {
        let Some(writer) = &self.writer else {
            if let Some(ack) = ack {
                let _ = ack.send(true);
            }
            return;
        };
        if writer.ops.send(QueuedWrite { op, ack }).is_err() {
            // The writer only stops once the session is gone.
            warn!(session_id = %self.id, "Session writer has stopped; write dropped");
            writer.unsaved.store(true, Ordering::Release);
        }
    }
}

/// Sets the flag for as long as it is held; fails if it is already set.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

//=========================================================================================
// Session Writer (background persistence)
//=========================================================================================

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
}

/// Longest pause between two attempts of the same write.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): doubles each time, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
    }
}

impl From<&ReaderSettings> for RetryPolicy {
    fn from(settings: &ReaderSettings) -> Self {
        Self {
            attempts: settings.persist_retry_attempts.max(1),
            base_delay: settings.persist_retry_base_delay,
        }
    }
}

enum WriteOp {
    Save(Bookmark),
    Delete(BookmarkId),
}

struct QueuedWrite {
    op: WriteOp,
    ack: Option<oneshot::Sender<bool>>,
}

/// The session's side of the writer task. Dropping it lets the task flush
/// whatever is queued and exit; it is never aborted.
struct WriterHandle {
    ops: mpsc::UnboundedSender<QueuedWrite>,
    progress: watch::Sender<u32>,
    unsaved: Arc<AtomicBool>,
}

struct SessionWriter {
    db: Arc<dyn DatabaseService>,
    user_id: UserId,
    book_id: BookId,
    retry: RetryPolicy,
    ops: mpsc::UnboundedReceiver<QueuedWrite>,
    progress: watch::Receiver<u32>,
    last_progress_written: u32,
    unsaved: Arc<AtomicBool>,
}

impl SessionWriter {
    fn spawn(
        db: Arc<dyn DatabaseService>,
        user_id: UserId,
        book_id: BookId,
        retry: RetryPolicy,
        stored_progress: u32,
        current_progress: u32,
    ) -> WriterHandle {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = watch::channel(stored_progress);
        if current_progress > stored_progress {
            progress_tx.send_replace(current_progress);
        }
        let unsaved = Arc::new(AtomicBool::new(false));

        let writer = SessionWriter {
            db,
            user_id,
            book_id,
            retry,
            ops: ops_rx,
            progress: progress_rx,
            last_progress_written: stored_progress,
            unsaved: unsaved.clone(),
        };
        tokio::spawn(writer.run());

        WriterHandle {
            ops: ops_tx,
            progress: progress_tx,
            unsaved,
        }
    }

    async fn run(mut self) {
        let mut progress_open = true;
        loop {
            tokio::select! {
                queued = self.ops.recv() => match queued {
                    Some(queued) => self.apply(queued).await,
                    None => break,
                },
                changed = self.progress.changed(), if progress_open => match changed {
                    // Intermediate values sent while a write was running are skipped.
                    Ok(()) => {
                        let latest = *self.progress.borrow_and_update();
                        self.write_progress(latest).await;
                    }
                    Err(_) => progress_open = false,
                },
            }
        }

        let latest = *self.progress.borrow();
        self.write_progress(latest).await;
        debug!(user_id = %self.user_id, book_id = %self.book_id, "Session writer finished");
    }

    async fn apply(&mut self, queued: QueuedWrite) {
        let (db, user_id, book_id) = (&self.db, self.user_id, self.book_id);
        let result = match &queued.op {
            WriteOp::Save(bookmark) => {
                with_retry(self.retry, || db.save_bookmark(user_id, book_id, bookmark)).await
            }
            WriteOp::Delete(id) => {
                with_retry(self.retry, || db.delete_bookmark(user_id, book_id, *id)).await
            }
        };

        let saved = match result {
            Ok(()) => true,
            Err(e) => {
                warn!(%user_id, %book_id, error = %e, "Bookmark change not saved");
                self.unsaved.store(true, Ordering::Release);
                false
            }
        };
        if let Some(ack) = queued.ack {
            // The caller may have gone away; the write stands either way.
            let _ = ack.send(saved);
        }
    }

    async fn write_progress(&mut self, read_pages: u32) {
        if read_pages <= self.last_progress_written {
            return;
        }
        let (db, user_id, book_id) = (&self.db, self.user_id, self.book_id);
        let result = with_retry(self.retry, || async move {
            db.record_reading_progress(user_id, book_id, read_pages)
                .await
                .map(|_| ())
        })
        .await;

        match result {
            Ok(()) => self.last_progress_written = read_pages,
            Err(e) => {
                warn!(%user_id, %book_id, read_pages, error = %e, "Reading progress not saved");
                self.unsaved.store(true, Ordering::Release);
            }
        }
    }
}

/// Runs `op`, retrying transient failures with exponential backoff.
async fn with_retry<F, Fut>(policy: RetryPolicy, mut op: F) -> PortResult<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = PortResult<()>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                let delay = policy.backoff(attempt);
                debug!(attempt, ?delay, error = %e, "Transient store failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64) -> RetryPolicy {
        RetryPolicy {
            attempts: u32::MAX,
            base_delay: Duration::from_millis(base_ms),
        }
    }

    #[test]
    fn backoff_doubles_from_the_base_delay() {
        let retry = policy(100);
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(4), Duration::from_millis(800));
    }

    #[test]
    fn backoff_is_capped_instead_of_overflowing() {
        assert_eq!(policy(100).backoff(40), MAX_RETRY_DELAY);
        assert_eq!(policy(u64::MAX).backoff(3), MAX_RETRY_DELAY);
        assert_eq!(policy(u64::MAX).backoff(u32::MAX), MAX_RETRY_DELAY);
    }
}
