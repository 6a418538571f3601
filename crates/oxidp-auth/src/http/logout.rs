//! `/logout` and `/logout/backchannel` handlers.

use axum::Json;
use axum::extract::{Form, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use serde::Deserialize;

use crate::http::OpState;
use crate::http::authorize::SESSION_COOKIE;
use crate::http::problem::problem_response;
use crate::logout::LogoutParams;

/// Handler for `GET /logout` (RP-initiated).
///
/// Clears the session cookie, revokes the subject's sessions, and either
/// redirects to the validated `post_logout_redirect_uri` or returns the
/// front-channel URIs for the UI to load.
pub async fn logout_handler(
    State(state): State<OpState>,
    Query(params): Query<LogoutParams>,
) -> Response {
    match state.logout.rp_initiated_logout(params).await {
        Ok(result) => {
            let clear_cookie = format!(
                "{SESSION_COOKIE}=; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0"
            );
            let mut response = match &result.redirect {
                Some(target) => Redirect::to(target).into_response(),
                None => (
                    StatusCode::OK,
                    Json(serde_json::json!({
                        "revoked_sessions": result.revoked_sessions,
                        "frontchannel_logout_uris": result.frontchannel_uris,
                    })),
                )
                    .into_response(),
            };
            if let Ok(value) = clear_cookie.parse() {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            response
        }
        Err(err) => problem_response(&err),
    }
}

/// `POST /logout/backchannel` form body.
#[derive(Debug, Deserialize)]
pub(crate) struct BackchannelBody {
    logout_token: String,
}

/// Handler for `POST /logout/backchannel` — inbound logout notifications
/// when this provider acts as an RP.
pub async fn backchannel_logout_handler(
    State(state): State<OpState>,
    Form(body): Form<BackchannelBody>,
) -> Response {
    match state
        .logout
        .receive_backchannel_logout(&body.logout_token)
        .await
    {
        // 200 with no body per OIDC Back-Channel Logout §2.8.
        Ok(_) => StatusCode::OK.into_response(),
        Err(err) => problem_response(&err),
    }
}
