//! Review key check for the file review routes
//!
//! Operators present the configured key as `Authorization: Bearer <key>`.
//! Without a configured key the routes stay open (local development).

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;

use super::{ApiState, error_response};

/// Outcome of checking a request against the review key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyCheck {
    Open,
    Accepted,
    Missing,
    Rejected,
}

/// Bearer token from the `Authorization` header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn check(expected: Option<&str>, headers: &HeaderMap) -> KeyCheck {
    let Some(expected) = expected else {
        return KeyCheck::Open;
    };
    match bearer_token(headers) {
        Some(token) if token == expected => KeyCheck::Accepted,
        Some(_) => KeyCheck::Rejected,
        None => KeyCheck::Missing,
    }
}

/// Reject review-route requests that lack the configured key
pub async fn require_review_key(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Response {
    let expected = state.api_key.as_ref().map(ExposeSecret::expose_secret);

    match check(expected, req.headers()) {
        KeyCheck::Open | KeyCheck::Accepted => next.run(req).await,
        KeyCheck::Missing => {
            tracing::debug!(path = %req.uri().path(), "review key missing");
            error_response(
                StatusCode::UNAUTHORIZED,
                "missing_api_key",
                "review routes require a bearer key",
            )
            .into_response()
        }
        KeyCheck::Rejected => {
            tracing::warn!(path = %req.uri().path(), "invalid review key");
            error_response(StatusCode::UNAUTHORIZED, "invalid_api_key", "review key not accepted")
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(authorization: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = authorization {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn bearer_token_is_extracted() {
        assert_eq!(bearer_token(&headers(None)), None);
        assert_eq!(bearer_token(&headers(Some("Bearer review-key"))), Some("review-key"));
        assert_eq!(bearer_token(&headers(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&headers(Some("Bearer   "))), None);
    }

    #[test]
    fn key_check_outcomes() {
        assert_eq!(check(None, &headers(None)), KeyCheck::Open);
        assert_eq!(check(Some("k"), &headers(Some("Bearer k"))), KeyCheck::Accepted);
        assert_eq!(check(Some("k"), &headers(Some("Bearer x"))), KeyCheck::Rejected);
        assert_eq!(check(Some("k"), &headers(None)), KeyCheck::Missing);
    }
}
