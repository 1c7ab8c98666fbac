pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod sessions;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;

use middleware::current_user;
use rest::{check_access_handler, library_handler, open_session_handler, purchase_handler};
use sessions::{
    acknowledge_unsaved_handler, add_bookmark_handler, close_session_handler,
    delete_bookmark_handler, get_session_handler, go_to_handler, list_bookmarks_handler,
    next_page_handler, previous_page_handler, progress_handler, session_purchase_handler,
    toggle_bookmark_handler, update_bookmark_handler,
};
use state::AppState;

/// Builds the reader API router. Every route sees a `CurrentUser`, which is
/// `None` for anonymous requests.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/library", get(library_handler))
        .route("/books/{book_id}/access", get(check_access_handler))
        .route("/books/{book_id}/purchase", post(purchase_handler))
        .route("/books/{book_id}/sessions", post(open_session_handler))
        .route(
            "/sessions/{session_id}",
            get(get_session_handler).delete(close_session_handler),
        )
        .route("/sessions/{session_id}/goto", post(go_to_handler))
        .route("/sessions/{session_id}/next", post(next_page_handler))
        .route("/sessions/{session_id}/previous", post(previous_page_handler))
        .route("/sessions/{session_id}/progress", get(progress_handler))
        .route("/sessions/{session_id}/purchase", post(session_purchase_handler))
        .route(
            "/sessions/{session_id}/unsaved",
            delete(acknowledge_unsaved_handler),
        )
        .route(
            "/sessions/{session_id}/bookmarks",
            get(list_bookmarks_handler).post(add_bookmark_handler),
        )
        .route(
            "/sessions/{session_id}/bookmarks/toggle",
            post(toggle_bookmark_handler),
        )
        .route(
            "/sessions/{session_id}/bookmarks/{bookmark_id}",
            patch(update_bookmark_handler).delete(delete_bookmark_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            current_user,
        ))
        .with_state(state)
}
