//! services/api/src/web/protocol.rs
//!
//! Defines the JSON payloads exchanged between the reader UI and the API server.

use chrono::{DateTime, Utc};
use reader_core::domain::{Bookmark, Chapter, Entitlement};
use reader_core::reader::{SaveStatus, SessionSnapshot};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

//=========================================================================================
// Payloads Sent FROM the Client TO the Server
//=========================================================================================

#[derive(Deserialize, Debug, ToSchema)]
pub struct PurchaseRequest {
    /// Price in minor currency units.
    pub amount: i64,
    pub currency: String,
}

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OpenSessionQuery {
    /// Bypass the entitlement check and read only the preview window.
    pub preview: Option<bool>,
    /// Page to open at; out-of-range values open at page 1.
    pub resume_page: Option<u32>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct GoToRequest {
    pub page: i64,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct AddBookmarkRequest {
    pub page: u32,
    pub title: Option<String>,
    pub note: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct UpdateBookmarkRequest {
    /// A blank title resets to the page label.
    pub title: Option<String>,
    /// A blank note clears it.
    pub note: Option<String>,
}

#[derive(Deserialize, Debug, Default, ToSchema)]
pub struct ToggleBookmarkRequest {
    /// Defaults to the session's current page.
    pub page: Option<u32>,
    pub title: Option<String>,
    pub note: Option<String>,
}

//=========================================================================================
// Payloads Sent FROM the Server TO the Client
//=========================================================================================

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct ChapterView {
    pub title: String,
    pub start_page: u32,
}

impl From<&Chapter> for ChapterView {
    fn from(c: &Chapter) -> Self {
        Self {
            title: c.title.clone(),
            start_page: c.start_page,
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct BookmarkView {
    pub id: Uuid,
    pub page: u32,
    pub title: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Bookmark> for BookmarkView {
    fn from(b: &Bookmark) -> Self {
        Self {
            id: b.id,
            page: b.page,
            title: b.title.clone(),
            note: b.note.clone(),
            created_at: b.created_at,
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct EntitlementView {
    pub book_id: Uuid,
    pub granted_at: DateTime<Utc>,
    pub amount: i64,
    pub currency: String,
}

impl From<&Entitlement> for EntitlementView {
    fn from(e: &Entitlement) -> Self {
        Self {
            book_id: e.book_id,
            granted_at: e.granted_at,
            amount: e.amount,
            currency: e.currency.clone(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct AccessResponse {
    pub book_id: Uuid,
    pub granted: bool,
    /// Set when nobody is signed in; the UI should offer sign-in rather than purchase.
    pub sign_in_required: bool,
    pub entitlement: Option<EntitlementView>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Granted,
    AlreadyOwned,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct PurchaseResponse {
    pub status: PurchaseStatus,
    pub entitlement: EntitlementView,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct SessionView {
    pub session_id: Uuid,
    pub book_id: Uuid,
    pub book_title: String,
    pub total_pages: u32,
    pub current_page: u32,
    /// Last page reachable in this session (the preview limit in preview mode).
    pub last_readable_page: u32,
    pub preview: bool,
    pub has_next: bool,
    pub has_previous: bool,
    pub chapter: ChapterView,
    /// One-based.
    pub chapter_number: usize,
    pub read_pages: u32,
    pub progress_percent: u8,
    pub bookmarks: Vec<BookmarkView>,
    pub bookmark_at_current_page: Option<Uuid>,
    pub owned: bool,
    pub changes_not_saved: bool,
}

impl From<SessionSnapshot> for SessionView {
    fn from(s: SessionSnapshot) -> Self {
        Self {
            session_id: s.session_id,
            book_id: s.book_id,
            book_title: s.book_title,
            total_pages: s.total_pages,
            current_page: s.current_page,
            last_readable_page: s.bounds.upper,
            preview: s.bounds.preview,
            has_next: s.has_next,
            has_previous: s.has_previous,
            chapter: ChapterView::from(&s.chapter),
            chapter_number: s.chapter_position + 1,
            read_pages: s.read_pages,
            progress_percent: s.progress_percent,
            bookmarks: s.bookmarks.iter().map(BookmarkView::from).collect(),
            bookmark_at_current_page: s.bookmark_at_current_page,
            owned: s.entitlement.is_some(),
            changes_not_saved: s.changes_not_saved,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct NavigationResponse {
    /// `false` when the requested page was out of range and nothing changed.
    pub moved: bool,
    pub high_water_raised: bool,
    pub session: SessionView,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToggleAction {
    Added,
    Removed,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatusView {
    Saved,
    NotSaved,
    Ephemeral,
}

impl From<SaveStatus> for SaveStatusView {
    fn from(s: SaveStatus) -> Self {
        match s {
            SaveStatus::Saved => SaveStatusView::Saved,
            SaveStatus::NotSaved => SaveStatusView::NotSaved,
            SaveStatus::Ephemeral => SaveStatusView::Ephemeral,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ToggleResponse {
    pub action: ToggleAction,
    pub bookmark: BookmarkView,
    pub save_status: SaveStatusView,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ProgressResponse {
    pub read_pages: u32,
    pub total_pages: u32,
    pub progress_percent: u8,
}
