use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use bay_domain::Owner;

use crate::state::AppState;

/// Header selecting the owner scope. In development mode it replaces the
/// token entirely; with a token it lets trusted service callers act for a
/// specific owner.
pub const OWNER_HEADER: &str = "x-bay-owner";

const DEFAULT_OWNER: &str = "default";
const ANONYMOUS_OWNER: &str = "anonymous";

/// Axum middleware deriving the caller's [`Owner`] and rejecting
/// unauthenticated requests.
///
/// Normal mode requires `Authorization: Bearer <token>`; development mode
/// (`auth.dev_mode`) accepts everything and scopes by the owner header.
pub async fn require_owner(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header_owner = request
        .headers()
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(String::from);

    let owner = if state.auth.dev_mode {
        Owner::new(header_owner.unwrap_or_else(|| ANONYMOUS_OWNER.to_string()))
    } else {
        let provided = request
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "));
        match (provided, state.auth.token.as_deref()) {
            (Some(token), Some(expected)) if token == expected => {
                Owner::new(header_owner.unwrap_or_else(|| DEFAULT_OWNER.to_string()))
            }
            _ => return (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response(),
        }
    };

    request.extensions_mut().insert(owner);
    next.run(request).await
}
