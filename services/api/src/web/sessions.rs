//! services/api/src/web/sessions.rs
//!
//! Axum handlers for an open reading session: navigation, bookmarks, progress,
//! and buying the book from inside the reader.

use crate::web::{
    middleware::CurrentUser,
    protocol::{
        AddBookmarkRequest, BookmarkView, GoToRequest, NavigationResponse, ProgressResponse,
        PurchaseRequest, SessionView, ToggleAction, ToggleBookmarkRequest, ToggleResponse,
        UpdateBookmarkRequest,
    },
    rest::{port_failure, purchase_response, sign_in_required, validate_purchase},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use reader_core::domain::UserId;
use reader_core::pagination::PageResult;
use reader_core::reader::{LiveSession, SessionError};
use reader_core::session::ToggleOutcome;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

type HandlerError = (StatusCode, String);

async fn find_session(
    app_state: &AppState,
    session_id: Uuid,
    user_id: Option<UserId>,
) -> Result<Arc<LiveSession>, HandlerError> {
    app_state
        .sessions
        .get(session_id, user_id)
        .await
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("Reading session {} not found", session_id),
            )
        })
}

fn session_failure(action: &str, e: SessionError) -> HandlerError {
    match e {
        SessionError::Busy => (
            StatusCode::CONFLICT,
            "Another change to this session is still in progress".to_string(),
        ),
        SessionError::Port(e) => port_failure(action, e),
    }
}

/// Bookmarks may only be placed on pages the session can show.
fn check_page(session: &LiveSession, page: u32) -> Result<(), HandlerError> {
    let upper = session.bounds().upper;
    if page == 0 || page > upper {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Page must be between 1 and {}", upper),
        ));
    }
    Ok(())
}

async fn navigation_response(session: &LiveSession, result: PageResult) -> Json<NavigationResponse> {
    let (moved, high_water_raised) = match result {
        PageResult::Moved {
            high_water_raised, ..
        } => (true, high_water_raised),
        PageResult::Rejected { requested, current } => {
            debug!(session_id = %session.id(), requested, current, "Page request rejected");
            (false, false)
        }
    };
    Json(NavigationResponse {
        moved,
        high_water_raised,
        session: SessionView::from(session.snapshot().await),
    })
}

//=========================================================================================
// Session Lifecycle
//=========================================================================================

#[utoipa::path(
    get,
    path = "/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "An open reading session.")),
    responses(
        (status = 200, description = "Current reader state", body = SessionView),
        (status = 404, description = "Session not found")
    )
)]
pub async fn get_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>, HandlerError> {
    let session = find_session(&app_state, session_id, user_id).await?;
    Ok(Json(SessionView::from(session.snapshot().await)))
}

/// Close the reader. Writes already queued for the session still reach the store.
#[utoipa::path(
    delete,
    path = "/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "An open reading session.")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn close_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    if app_state.sessions.remove(session_id, user_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("Reading session {} not found", session_id),
        ))
    }
}

//=========================================================================================
// Navigation
//=========================================================================================

/// Jump to a page. Out-of-range pages leave the session unchanged (`moved: false`).
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/goto",
    params(("session_id" = Uuid, Path, description = "An open reading session.")),
    request_body = GoToRequest,
    responses(
        (status = 200, description = "Navigation result", body = NavigationResponse),
        (status = 404, description = "Session not found")
    )
)]
pub async fn go_to_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<GoToRequest>,
) -> Result<Json<NavigationResponse>, HandlerError> {
    let session = find_session(&app_state, session_id, user_id).await?;
    let result = session.go_to(req.page).await;
    Ok(navigation_response(&session, result).await)
}

#[utoipa::path(
    post,
    path = "/sessions/{session_id}/next",
    params(("session_id" = Uuid, Path, description = "An open reading session.")),
    responses(
        (status = 200, description = "Navigation result", body = NavigationResponse),
        (status = 404, description = "Session not found")
    )
)]
pub async fn next_page_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<NavigationResponse>, HandlerError> {
    let session = find_session(&app_state, session_id, user_id).await?;
    let result = session.next().await;
    Ok(navigation_response(&session, result).await)
}

#[utoipa::path(
    post,
    path = "/sessions/{session_id}/previous",
    params(("session_id" = Uuid, Path, description = "An open reading session.")),
    responses(
        (status = 200, description = "Navigation result", body = NavigationResponse),
        (status = 404, description = "Session not found")
    )
)]
pub async fn previous_page_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<NavigationResponse>, HandlerError> {
    let session = find_session(&app_state, session_id, user_id).await?;
    let result = session.previous().await;
    Ok(navigation_response(&session, result).await)
}

#[utoipa::path(
    get,
    path = "/sessions/{session_id}/progress",
    params(("session_id" = Uuid, Path, description = "An open reading session.")),
    responses(
        (status = 200, description = "Reading progress", body = ProgressResponse),
        (status = 404, description = "Session not found")
    )
)]
pub async fn progress_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ProgressResponse>, HandlerError> {
    let session = find_session(&app_state, session_id, user_id).await?;
    Ok(Json(ProgressResponse {
        read_pages: session.read_pages().await,
        total_pages: session.total_pages(),
        progress_percent: session.progress_percent().await,
    }))
}

//=========================================================================================
// Purchase And Save Status
//=========================================================================================

/// Buy the open book, e.g. from the end of a preview.
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/purchase",
    params(("session_id" = Uuid, Path, description = "An open reading session.")),
    request_body = PurchaseRequest,
    responses(
        (status = 201, description = "Entitlement granted", body = crate::web::protocol::PurchaseResponse),
        (status = 200, description = "Book was already owned", body = crate::web::protocol::PurchaseResponse),
        (status = 400, description = "Invalid amount or currency"),
        (status = 401, description = "Sign in required"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Another change is in progress")
    )
)]
pub async fn session_purchase_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Response, HandlerError> {
    let currency = validate_purchase(&req)?;
    let session = find_session(&app_state, session_id, user_id).await?;
    if session.user_id().is_none() {
        return Err(sign_in_required());
    }

    let outcome = session
        .purchase(app_state.reader.gate(), req.amount, &currency)
        .await
        .map_err(|e| session_failure("record purchase", e))?;
    purchase_response(outcome)
}

/// Dismiss the "changes not saved" notice.
#[utoipa::path(
    delete,
    path = "/sessions/{session_id}/unsaved",
    params(("session_id" = Uuid, Path, description = "An open reading session.")),
    responses(
        (status = 204, description = "Notice cleared"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn acknowledge_unsaved_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    let session = find_session(&app_state, session_id, user_id).await?;
    if session.acknowledge_unsaved() {
        info!(%session_id, "Reader acknowledged unsaved changes");
    }
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Bookmarks
//=========================================================================================

#[utoipa::path(
    get,
    path = "/sessions/{session_id}/bookmarks",
    params(("session_id" = Uuid, Path, description = "An open reading session.")),
    responses(
        (status = 200, description = "Bookmarks in creation order", body = [BookmarkView]),
        (status = 404, description = "Session not found")
    )
)]
pub async fn list_bookmarks_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<BookmarkView>>, HandlerError> {
    let session = find_session(&app_state, session_id, user_id).await?;
    let bookmarks = session.list_bookmarks().await;
    Ok(Json(bookmarks.iter().map(BookmarkView::from).collect()))
}

#[utoipa::path(
    post,
    path = "/sessions/{session_id}/bookmarks",
    params(("session_id" = Uuid, Path, description = "An open reading session.")),
    request_body = AddBookmarkRequest,
    responses(
        (status = 201, description = "Bookmark added", body = BookmarkView),
        (status = 400, description = "Page out of range"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn add_bookmark_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<AddBookmarkRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let session = find_session(&app_state, session_id, user_id).await?;
    check_page(&session, req.page)?;
    let bookmark = session.add_bookmark(req.page, req.title, req.note).await;
    Ok((StatusCode::CREATED, Json(BookmarkView::from(&bookmark))))
}

#[utoipa::path(
    patch,
    path = "/sessions/{session_id}/bookmarks/{bookmark_id}",
    params(
        ("session_id" = Uuid, Path, description = "An open reading session."),
        ("bookmark_id" = Uuid, Path, description = "The bookmark to edit.")
    ),
    request_body = UpdateBookmarkRequest,
    responses(
        (status = 200, description = "Bookmark updated", body = BookmarkView),
        (status = 404, description = "Session or bookmark not found")
    )
)]
pub async fn update_bookmark_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path((session_id, bookmark_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateBookmarkRequest>,
) -> Result<Json<BookmarkView>, HandlerError> {
    let session = find_session(&app_state, session_id, user_id).await?;
    let updated = session
        .update_bookmark(bookmark_id, req.title, req.note)
        .await
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("Bookmark {} not found", bookmark_id),
            )
        })?;
    Ok(Json(BookmarkView::from(&updated)))
}

#[utoipa::path(
    delete,
    path = "/sessions/{session_id}/bookmarks/{bookmark_id}",
    params(
        ("session_id" = Uuid, Path, description = "An open reading session."),
        ("bookmark_id" = Uuid, Path, description = "The bookmark to remove.")
    ),
    responses(
        (status = 204, description = "Bookmark removed, or there was no such bookmark"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn delete_bookmark_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path((session_id, bookmark_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, HandlerError> {
    let session = find_session(&app_state, session_id, user_id).await?;
    if session.remove_bookmark(bookmark_id).await.is_none() {
        debug!(%session_id, %bookmark_id, "Bookmark already gone");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Add a bookmark at a page, or remove the one already there.
///
/// Waits for the store write and reports whether it was saved. The page
/// defaults to the session's current page.
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/bookmarks/toggle",
    params(("session_id" = Uuid, Path, description = "An open reading session.")),
    request_body = ToggleBookmarkRequest,
    responses(
        (status = 200, description = "Bookmark added or removed", body = ToggleResponse),
        (status = 400, description = "Page out of range"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Another toggle is still in progress")
    )
)]
pub async fn toggle_bookmark_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<ToggleBookmarkRequest>,
) -> Result<Json<ToggleResponse>, HandlerError> {
    let session = find_session(&app_state, session_id, user_id).await?;
    let page = match req.page {
        Some(page) => page,
        None => session.snapshot().await.current_page,
    };
    check_page(&session, page)?;

    let report = session
        .toggle_bookmark_at_page(page, req.title, req.note)
        .await
        .map_err(|e| session_failure("toggle bookmark", e))?;

    let (action, bookmark) = match &report.outcome {
        ToggleOutcome::Added(b) => (ToggleAction::Added, b),
        ToggleOutcome::Removed(b) => (ToggleAction::Removed, b),
    };
    Ok(Json(ToggleResponse {
        action,
        bookmark: BookmarkView::from(bookmark),
        save_status: report.save_status.into(),
    }))
}
