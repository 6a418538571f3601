//! `/userinfo` handler.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::error::AuthError;
use crate::http::OpState;
use crate::http::problem::problem_response;
use crate::userinfo::UserInfoDelivery;

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Handler for `GET`/`POST /userinfo`.
pub async fn userinfo_handler(State(state): State<OpState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer(&headers) else {
        let mut response =
            problem_response(&AuthError::invalid_token("missing bearer token"));
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            header::HeaderValue::from_static("Bearer"),
        );
        return response;
    };

    match state.userinfo.handle(token).await {
        Ok(UserInfoDelivery::Json(body)) => (StatusCode::OK, Json(body)).into_response(),
        Ok(UserInfoDelivery::Encrypted(jwe)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/jwt")],
            jwe,
        )
            .into_response(),
        Err(err) => {
            let mut response = problem_response(&err);
            if err.http_status() == 401 {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    header::HeaderValue::from_static("Bearer error=\"invalid_token\""),
                );
            }
            response
        }
    }
}
