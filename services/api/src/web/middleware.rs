//! services/api/src/web/middleware.rs
//!
//! Resolves the signed-in reader from the session cookie.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use reader_core::domain::UserId;
use reader_core::ports::PortError;
use std::sync::Arc;
use tracing::{debug, error};

use crate::web::state::AppState;

/// The reader making the request, or `None` when nobody is signed in.
#[derive(Clone, Copy, Debug)]
pub struct CurrentUser(pub Option<UserId>);

/// Extracts the auth session id from the `session=` cookie.
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|id| !id.is_empty())
}

/// Middleware that validates the auth session cookie, if any, and inserts a
/// `CurrentUser` into the request extensions.
///
/// A missing or invalid cookie is not rejected here: whether anonymous access
/// is acceptable is decided per operation. Only a store outage fails the request.
pub async fn current_user(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let user_id = match session_cookie(req.headers()) {
        Some(auth_session_id) => match state.db.validate_auth_session(auth_session_id).await {
            Ok(user_id) => Some(user_id),
            Err(PortError::Unavailable(e)) => {
                error!("Auth store unavailable: {}", e);
                return Err(StatusCode::SERVICE_UNAVAILABLE);
            }
            Err(e) => {
                debug!("Ignoring invalid auth session: {:?}", e);
                None
            }
        },
        None => None,
    };

    req.extensions_mut().insert(CurrentUser(user_id));
    Ok(next.run(req).await)
}
