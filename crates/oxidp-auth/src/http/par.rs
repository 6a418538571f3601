//! Pushed authorization requests (RFC 9126).

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

use oxidp_core::{UnixMillis, generate_id};

use crate::error::{AuthError, AuthResult};
use crate::http::OpState;
use crate::http::problem::oauth_error_response;
use crate::oauth::client_auth::{ClientAuthenticator, ClientCredentials};
use crate::oauth::types::{ParResponse, TokenRequest};
use crate::rate_limit::RateLimiter;
use crate::stores::{PAR_URN_PREFIX, ParRecord};

/// Handler for `POST /par`.
///
/// Authenticates the client, validates the pushed parameters against its
/// contract, and mints a single-use `request_uri` with a 60 s lifetime.
pub async fn par_handler(
    State(state): State<OpState>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match push(state, authorization, params).await {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(err) => oauth_error_response(&err),
    }
}

async fn push(
    state: OpState,
    authorization: Option<&str>,
    mut params: HashMap<String, String>,
) -> AuthResult<ParResponse> {
    // request_uri inside a pushed request is forbidden by RFC 9126 §2.1.
    if params.contains_key("request_uri") {
        return Err(AuthError::invalid_request(
            "request_uri cannot be pushed",
        ));
    }

    // Client authentication uses the token-endpoint surface.
    let shim = TokenRequest {
        grant_type: String::new(),
        code: None,
        redirect_uri: None,
        code_verifier: None,
        client_id: params.get("client_id").cloned(),
        client_secret: params.remove("client_secret"),
        client_assertion_type: params.remove("client_assertion_type"),
        client_assertion: params.remove("client_assertion"),
        refresh_token: None,
        scope: None,
        auth_req_id: None,
        device_code: None,
    };
    let credentials = ClientCredentials::extract(authorization, &shim)?;
    let client_id = credentials
        .client_id()
        .ok_or_else(|| AuthError::invalid_client("client identification missing"))?;
    let (tenant, client) = state.registry.pair(&client_id)?;

    let authenticator = ClientAuthenticator::new(format!(
        "{}/token",
        state.config.issuer.trim_end_matches('/')
    ));
    authenticator.authenticate(&client, &credentials)?;

    state.rate_limiter.enforce(
        &RateLimiter::key(&tenant.tenant_id, "par", &client_id),
        &state.config.rate_limits.par,
    )?;

    // The pushed redirect URI must already be registered; full validation
    // happens again at /authorize after resolution.
    if let Some(redirect_uri) = params.get("redirect_uri") {
        if !client.has_redirect_uri(redirect_uri) {
            return Err(AuthError::invalid_request("redirect_uri is not registered"));
        }
    }

    let body_size: usize = params.iter().map(|(k, v)| k.len() + v.len()).sum();
    if body_size > state.config.oauth.max_request_object_bytes {
        return Err(AuthError::invalid_request("pushed request too large"));
    }

    params.insert("client_id".to_string(), client_id.clone());

    let ttl = state.config.oauth.par_request_ttl;
    let now = UnixMillis::now();
    let record = ParRecord {
        request_uri: format!("{PAR_URN_PREFIX}{}", generate_id(24)),
        client_id,
        parameters: params,
        created_at: now,
        expires_at: now + ttl,
    };
    let request_uri = record.request_uri.clone();
    state.par_store.put(record).await?;

    Ok(ParResponse {
        request_uri,
        expires_in: ttl.as_secs(),
    })
}
