//! Bearer-token guard for the admin API.
//!
//! Without a configured token the admin API is switched off entirely.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::warn;

use super::gate::MessageResponse;
use super::AppState;

fn deny(status: StatusCode, message: &str) -> Response {
    let mut response = (
        status,
        Json(MessageResponse {
            message: message.to_string(),
        }),
    )
        .into_response();
    if status == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Bearer"));
    }
    response
}

/// Compare without short-circuiting on the first differing byte.
fn token_matches(given: &str, expected: &str) -> bool {
    let (given, expected) = (given.as_bytes(), expected.as_bytes());
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Axum middleware admitting only requests with `Authorization: Bearer <admin_token>`.
pub async fn require_admin(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        warn!(path = %request.uri().path(), "Admin API called but no admin token is configured");
        return deny(StatusCode::FORBIDDEN, "Admin API is disabled.");
    };

    let given = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match given {
        None => deny(StatusCode::UNAUTHORIZED, "Admin credentials required."),
        Some(token) if token_matches(token.trim(), expected) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected admin request with a bad token");
            deny(StatusCode::FORBIDDEN, "Invalid admin credentials.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches() {
        assert!(token_matches("s3cret", "s3cret"));
        assert!(!token_matches("s3creT", "s3cret"));
        assert!(!token_matches("s3cre", "s3cret"));
        assert!(!token_matches("", "s3cret"));
    }
}
