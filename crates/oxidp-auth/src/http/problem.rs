//! Error rendering.
//!
//! Two wire shapes: the OAuth registry body (`error` /
//! `error_description`) for the token-family endpoints, and RFC 9457
//! problem-details JSON everywhere else. Retriable conditions carry
//! `Retry-After`.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::AuthError;

/// RFC 9457 problem-details body.
#[derive(Debug, Clone, Serialize)]
pub struct ProblemDetails {
    /// Problem type URI.
    #[serde(rename = "type")]
    pub type_: String,

    /// Short human-readable summary.
    pub title: String,

    /// HTTP status.
    pub status: u16,

    /// Occurrence-specific detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemDetails {
    /// Builds the problem document for an error.
    #[must_use]
    pub fn from_error(err: &AuthError) -> Self {
        Self {
            type_: format!("urn:oxidp:error:{}", err.oauth_error_code()),
            title: err.oauth_error_code().to_string(),
            status: err.http_status(),
            detail: Some(err.to_string()),
        }
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

/// OAuth registry error body for the token-family endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct OAuthErrorBody {
    /// Registry error code.
    pub error: String,

    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Renders an error the way the token endpoints must: registry JSON with
/// the mapped status, plus `Retry-After` for retriable conditions.
#[must_use]
pub fn oauth_error_response(err: &AuthError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = OAuthErrorBody {
        error: err.oauth_error_code().to_string(),
        error_description: match err {
            // Coordination signals are self-describing; description noise
            // confuses polling clients.
            AuthError::AuthorizationPending | AuthError::SlowDown | AuthError::ExpiredToken => {
                None
            }
            other => Some(other.to_string()),
        },
    };
    let mut response = (status, Json(body)).into_response();
    if let AuthError::RateLimited { retry_after_secs } = err {
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

/// Renders a problem-details response.
#[must_use]
pub fn problem_response(err: &AuthError) -> Response {
    let mut response = ProblemDetails::from_error(err).into_response();
    if let AuthError::RateLimited { retry_after_secs } = err {
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_details_shape() {
        let problem = ProblemDetails::from_error(&AuthError::invalid_grant("code expired"));
        assert_eq!(problem.status, 400);
        assert_eq!(problem.title, "invalid_grant");
        assert!(problem.type_.ends_with("invalid_grant"));
        assert!(problem.detail.unwrap().contains("code expired"));
    }

    #[test]
    fn test_pending_has_no_description() {
        let json = serde_json::to_value(OAuthErrorBody {
            error: "authorization_pending".into(),
            error_description: None,
        })
        .unwrap();
        assert!(json.get("error_description").is_none());
    }
}
