//! JWKS endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::http::OpState;

/// Handler for `GET /.well-known/jwks.json`.
///
/// Public keys only — the JWK type has no private fields, so the response
/// structurally cannot leak `d`/`p`/`q`. Cacheable for one hour.
pub async fn jwks_handler(State(state): State<OpState>) -> impl IntoResponse {
    let jwks = state.keystore.jwks().await;
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
            (header::VARY, "Accept-Encoding"),
        ],
        Json(jwks),
    )
}
