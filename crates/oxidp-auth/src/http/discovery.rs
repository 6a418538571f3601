//! OpenID Connect discovery.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::http::OpState;

/// Handler for `GET /.well-known/openid-configuration`.
///
/// The document is derived from configuration; the issuer value here is the
/// exact string stamped into every token's `iss`. Cacheable for one hour.
pub async fn openid_configuration_handler(State(state): State<OpState>) -> impl IntoResponse {
    let base = state.config.issuer.trim_end_matches('/');

    let doc = serde_json::json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "userinfo_endpoint": format!("{base}/userinfo"),
        "jwks_uri": format!("{base}/.well-known/jwks.json"),
        "pushed_authorization_request_endpoint": format!("{base}/par"),
        "introspection_endpoint": format!("{base}/introspect"),
        "revocation_endpoint": format!("{base}/revoke"),
        "end_session_endpoint": format!("{base}/logout"),
        "backchannel_authentication_endpoint": format!("{base}/bc-authorize"),
        "device_authorization_endpoint": format!("{base}/device_authorization"),
        "response_types_supported": ["code"],
        "grant_types_supported": [
            "authorization_code",
            "refresh_token",
            "client_credentials",
            "urn:openid:params:grant-type:ciba",
            "urn:ietf:params:oauth:grant-type:device_code",
        ],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": [state.config.signing.algorithm.clone()],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": [
            "client_secret_basic",
            "client_secret_post",
            "private_key_jwt",
            "none",
        ],
        "backchannel_token_delivery_modes_supported": ["poll", "ping", "push"],
        "backchannel_user_code_parameter_supported": true,
        "request_parameter_supported": true,
        "request_uri_parameter_supported": true,
        "claims_supported": [
            "sub", "iss", "aud", "exp", "iat", "auth_time", "nonce", "acr", "amr",
            "name", "email", "email_verified", "phone_number",
        ],
        "scopes_supported": ["openid", "profile", "email", "phone", "offline_access"],
        "frontchannel_logout_supported": true,
        "backchannel_logout_supported": true,
    });

    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        Json(doc),
    )
}
