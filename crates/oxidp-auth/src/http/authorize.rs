//! `/authorize`, `/bc-authorize`, and `/device_authorization` handlers.

use axum::Json;
use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};

use crate::ciba::CibaParams;
use crate::device::DeviceParams;
use crate::http::problem::{oauth_error_response, problem_response};
use crate::http::OpState;
use crate::oauth::authorize::AuthorizeParams;
use crate::oauth::orchestrator::AuthorizeOutcome;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "oxidp_session";

fn cookie_session(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

fn session_cookie_header(session_id: &str) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; Secure; SameSite=Lax")
}

/// Renders an authorize outcome: a 302 (with the session cookie when one was
/// minted) or the interaction contract as JSON.
pub(crate) fn render_outcome(outcome: AuthorizeOutcome) -> Response {
    match outcome {
        AuthorizeOutcome::Redirect { url, set_session } => {
            let mut response = Redirect::to(&url).into_response();
            if let Some(session_id) = set_session {
                if let Ok(value) = session_cookie_header(&session_id).parse() {
                    response.headers_mut().insert(header::SET_COOKIE, value);
                }
            }
            response
        }
        AuthorizeOutcome::Interact {
            challenge_id,
            contract,
        } => (
            StatusCode::OK,
            Json(serde_json::json!({
                "challenge_id": challenge_id,
                "contract": contract,
            })),
        )
            .into_response(),
    }
}

/// Handler for `GET /authorize`.
pub async fn authorize_handler(
    State(state): State<OpState>,
    headers: HeaderMap,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    begin(state, headers, params).await
}

/// Handler for `POST /authorize` (form body).
pub async fn authorize_handler_post(
    State(state): State<OpState>,
    headers: HeaderMap,
    Form(params): Form<AuthorizeParams>,
) -> Response {
    begin(state, headers, params).await
}

async fn begin(state: OpState, headers: HeaderMap, params: AuthorizeParams) -> Response {
    let session = cookie_session(&headers);
    match state
        .orchestrator
        .begin(params, session.as_deref())
        .await
    {
        Ok(outcome) => render_outcome(outcome),
        // Direct errors: no validated redirect URI to carry them.
        Err(err) => problem_response(&err),
    }
}

/// Handler for `POST /bc-authorize`.
pub async fn bc_authorize_handler(
    State(state): State<OpState>,
    headers: HeaderMap,
    Form(params): Form<CibaParams>,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match state.ciba.handle_bc_authorize(authorization, params).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => oauth_error_response(&err),
    }
}

/// Handler for `POST /device_authorization`.
pub async fn device_authorization_handler(
    State(state): State<OpState>,
    headers: HeaderMap,
    Form(params): Form<DeviceParams>,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match state
        .device
        .handle_device_authorization(authorization, params)
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => oauth_error_response(&err),
    }
}
