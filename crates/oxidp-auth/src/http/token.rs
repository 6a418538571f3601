//! `/token`, `/introspect`, and `/revoke` handlers.

use axum::Json;
use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use oxidp_core::UnixMillis;

use crate::error::AuthResult;
use crate::http::OpState;
use crate::http::problem::oauth_error_response;
use crate::oauth::types::TokenRequest;
use crate::token::issuer::VerifyExpectations;

/// Handler for `POST /token`.
pub async fn token_handler(
    State(state): State<OpState>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match state.grants.handle(authorization, request).await {
        Ok(response) => {
            let mut response = (StatusCode::OK, Json(response)).into_response();
            // Token responses are never cacheable.
            response.headers_mut().insert(
                header::CACHE_CONTROL,
                header::HeaderValue::from_static("no-store"),
            );
            response
        }
        Err(err) => oauth_error_response(&err),
    }
}

/// `POST /introspect` form body (RFC 7662).
#[derive(Debug, Deserialize)]
pub(crate) struct IntrospectBody {
    token: String,

    #[serde(default)]
    #[allow(dead_code)]
    token_type_hint: Option<String>,
}

/// Handler for `POST /introspect`.
///
/// Inactive tokens answer `{"active": false}` rather than an error, per
/// RFC 7662 §2.2.
pub async fn introspect_handler(
    State(state): State<OpState>,
    Form(body): Form<IntrospectBody>,
) -> Response {
    let claims: AuthResult<serde_json::Value> = state
        .issuer
        .verify(&body.token, &VerifyExpectations::default())
        .await;

    let response = match claims {
        Ok(claims) => {
            // A refresh token is only active while its record is redeemable.
            let mut active = true;
            if let Some(jti) = claims.get("jti").and_then(serde_json::Value::as_str) {
                if claims.get("family").is_some() {
                    active = match state.refresh_tokens.get(jti).await {
                        Ok(Some(record)) => record.is_redeemable(UnixMillis::now()),
                        _ => false,
                    };
                }
            }
            if active {
                let mut body = serde_json::json!({ "active": true });
                if let (Some(body_obj), Some(claims_obj)) =
                    (body.as_object_mut(), claims.as_object())
                {
                    for key in ["scope", "client_id", "sub", "exp", "iat", "iss", "aud", "jti"] {
                        if let Some(value) = claims_obj.get(key) {
                            body_obj.insert(key.to_string(), value.clone());
                        }
                    }
                    body_obj.insert("token_type".to_string(), "Bearer".into());
                }
                body
            } else {
                serde_json::json!({ "active": false })
            }
        }
        Err(_) => serde_json::json!({ "active": false }),
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// `POST /revoke` form body (RFC 7009).
#[derive(Debug, Deserialize)]
pub(crate) struct RevokeBody {
    token: String,

    #[serde(default)]
    #[allow(dead_code)]
    token_type_hint: Option<String>,
}

/// Handler for `POST /revoke`.
///
/// Succeeds with 200 even for unknown tokens, per RFC 7009 §2.2 — a
/// revocation endpoint must not be a validity oracle.
pub async fn revoke_handler(
    State(state): State<OpState>,
    Form(body): Form<RevokeBody>,
) -> Response {
    let claims: AuthResult<serde_json::Value> = state
        .issuer
        .verify(
            &body.token,
            &VerifyExpectations {
                allow_expired: true,
                ..VerifyExpectations::default()
            },
        )
        .await;

    if let Ok(claims) = claims {
        if let Some(jti) = claims.get("jti").and_then(serde_json::Value::as_str) {
            if claims.get("family").is_some() {
                // Refresh token: revoke the whole family so rotation cannot
                // resurrect access.
                if let Ok(Some(record)) = state.refresh_tokens.get(jti).await {
                    let _ = state
                        .refresh_tokens
                        .revoke_family(&record.family_id, "rfc7009_revocation")
                        .await;
                } else {
                    let _ = state.refresh_tokens.revoke(jti, "rfc7009_revocation").await;
                }
            }
            // Access tokens are short-lived JWTs; revocation relies on their
            // expiry. Resource servers needing immediacy must introspect.
        }
    }

    StatusCode::OK.into_response()
}
