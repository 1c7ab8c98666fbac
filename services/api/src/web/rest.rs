//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the book-level REST endpoints (access checks,
//! purchases, opening a reader) and the master definition for the OpenAPI
//! specification.

use crate::web::{
    middleware::CurrentUser,
    protocol::{
        AccessResponse, AddBookmarkRequest, BookmarkView, ChapterView, EntitlementView,
        GoToRequest, NavigationResponse, OpenSessionQuery, ProgressResponse, PurchaseRequest,
        PurchaseResponse, PurchaseStatus, SaveStatusView, SessionView, ToggleAction,
        ToggleBookmarkRequest, ToggleResponse, UpdateBookmarkRequest,
    },
    sessions,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use reader_core::entitlement::PurchaseOutcome;
use reader_core::ports::PortError;
use reader_core::reader::{OpenOptions, OpenOutcome};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use utoipa::OpenApi;
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        check_access_handler,
        purchase_handler,
        open_session_handler,
        library_handler,
        sessions::get_session_handler,
        sessions::close_session_handler,
        sessions::go_to_handler,
        sessions::next_page_handler,
        sessions::previous_page_handler,
        sessions::progress_handler,
        sessions::session_purchase_handler,
        sessions::acknowledge_unsaved_handler,
        sessions::list_bookmarks_handler,
        sessions::add_bookmark_handler,
        sessions::update_bookmark_handler,
        sessions::delete_bookmark_handler,
        sessions::toggle_bookmark_handler,
    ),
    components(
        schemas(
            AccessResponse, PurchaseRequest, PurchaseResponse, PurchaseStatus, EntitlementView,
            SessionView, ChapterView, BookmarkView, NavigationResponse, GoToRequest,
            AddBookmarkRequest, UpdateBookmarkRequest, ToggleBookmarkRequest, ToggleResponse,
            ToggleAction, SaveStatusView, ProgressResponse
        )
    ),
    tags(
        (name = "Book Reader API", description = "Entitlement-gated reading with bookmarks and progress.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Shared Error Mapping
//=========================================================================================

/// Maps an infrastructure failure to an HTTP error. Domain outcomes never get here.
pub(crate) fn port_failure(action: &str, e: PortError) -> (StatusCode, String) {
    match e {
        PortError::NotFound(what) => (StatusCode::NOT_FOUND, what),
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "Sign in required".to_string()),
        PortError::Unavailable(reason) => {
            warn!("Failed to {}: store unavailable: {}", action, reason);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "The store is temporarily unavailable, please retry".to_string(),
            )
        }
        PortError::Unexpected(reason) => {
            error!("Failed to {}: {}", action, reason);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to {}", action),
            )
        }
    }
}

pub(crate) fn sign_in_required() -> (StatusCode, String) {
    (StatusCode::UNAUTHORIZED, "Sign in required".to_string())
}

pub(crate) fn validate_purchase(req: &PurchaseRequest) -> Result<String, (StatusCode, String)> {
    if req.amount < 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            "Amount must not be negative".to_string(),
        ));
    }
    let currency = req.currency.trim().to_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err((
            StatusCode::BAD_REQUEST,
            "Currency must be a three-letter ISO code".to_string(),
        ));
    }
    Ok(currency)
}

/// `201` for a new entitlement, `200` for one the reader already had.
pub(crate) fn purchase_response(outcome: PurchaseOutcome) -> Result<Response, (StatusCode, String)> {
    let (status, code, entitlement) = match outcome {
        PurchaseOutcome::Granted(e) => (PurchaseStatus::Granted, StatusCode::CREATED, e),
        PurchaseOutcome::AlreadyOwned(e) => (PurchaseStatus::AlreadyOwned, StatusCode::OK, e),
        PurchaseOutcome::Unauthenticated => return Err(sign_in_required()),
    };
    let body = PurchaseResponse {
        status,
        entitlement: EntitlementView::from(&entitlement),
    };
    Ok((code, Json(body)).into_response())
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Check whether the current reader may read a book in full.
#[utoipa::path(
    get,
    path = "/books/{book_id}/access",
    params(("book_id" = Uuid, Path, description = "The book to check.")),
    responses(
        (status = 200, description = "Access decision", body = AccessResponse),
        (status = 503, description = "Store temporarily unavailable")
    )
)]
pub async fn check_access_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(book_id): Path<Uuid>,
) -> Result<Json<AccessResponse>, (StatusCode, String)> {
    let decision = app_state
        .reader
        .gate()
        .check_access(user_id, book_id)
        .await
        .map_err(|e| port_failure("check access", e))?;

    Ok(Json(AccessResponse {
        book_id,
        granted: decision.granted,
        sign_in_required: user_id.is_none(),
        entitlement: decision.entitlement.as_ref().map(EntitlementView::from),
    }))
}

/// Buy a book. Buying a book the reader already owns returns the existing entitlement.
#[utoipa::path(
    post,
    path = "/books/{book_id}/purchase",
    params(("book_id" = Uuid, Path, description = "The book to buy.")),
    request_body = PurchaseRequest,
    responses(
        (status = 201, description = "Entitlement granted", body = PurchaseResponse),
        (status = 200, description = "Book was already owned", body = PurchaseResponse),
        (status = 400, description = "Invalid amount or currency"),
        (status = 401, description = "Sign in required"),
        (status = 404, description = "Book not found"),
        (status = 503, description = "Store temporarily unavailable")
    )
)]
pub async fn purchase_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(book_id): Path<Uuid>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Response, (StatusCode, String)> {
    let currency = validate_purchase(&req)?;
    if user_id.is_none() {
        return Err(sign_in_required());
    }
    app_state
        .db
        .get_book(book_id)
        .await
        .map_err(|e| port_failure("load book", e))?;

    let outcome = app_state
        .reader
        .purchase(user_id, book_id, req.amount, &currency)
        .await
        .map_err(|e| port_failure("record purchase", e))?;
    purchase_response(outcome)
}

/// Open a book in the reader.
///
/// Without `preview`, the reader must be signed in and own the book. With
/// `preview=true` the entitlement check is skipped and only the first pages
/// are readable.
#[utoipa::path(
    post,
    path = "/books/{book_id}/sessions",
    params(("book_id" = Uuid, Path, description = "The book to open."), OpenSessionQuery),
    responses(
        (status = 201, description = "Reading session opened", body = SessionView),
        (status = 401, description = "Sign in required"),
        (status = 402, description = "Purchase required"),
        (status = 404, description = "Book not found"),
        (status = 503, description = "Store temporarily unavailable")
    )
)]
pub async fn open_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(book_id): Path<Uuid>,
    Query(query): Query<OpenSessionQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let options = OpenOptions {
        preview: query.preview.unwrap_or(false),
        resume_page: query.resume_page,
    };

    let outcome = app_state
        .reader
        .open_session(user_id, book_id, options)
        .await
        .map_err(|e| port_failure("open book", e))?;

    match outcome {
        OpenOutcome::Opened(session) => {
            app_state.sessions.insert(session.clone()).await;
            let open_sessions = app_state.sessions.len().await;
            debug!(open_sessions, "Reading session registered");
            let view = SessionView::from(session.snapshot().await);
            Ok((StatusCode::CREATED, Json(view)))
        }
        OpenOutcome::Unauthenticated => Err(sign_in_required()),
        OpenOutcome::NotEntitled => {
            info!(?user_id, %book_id, "Reader must purchase before reading");
            Err((StatusCode::PAYMENT_REQUIRED, "Purchase required".to_string()))
        }
    }
}

/// List the books the current reader owns, newest purchase first.
#[utoipa::path(
    get,
    path = "/library",
    responses(
        (status = 200, description = "Owned books", body = [EntitlementView]),
        (status = 401, description = "Sign in required")
    )
)]
pub async fn library_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<Vec<EntitlementView>>, (StatusCode, String)> {
    let user_id = user_id.ok_or_else(sign_in_required)?;
    let owned = app_state
        .reader
        .gate()
        .library(user_id)
        .await
        .map_err(|e| port_failure("load library", e))?;
    Ok(Json(owned.iter().map(EntitlementView::from).collect()))
}
