//! JWT claim sets.
//!
//! All timestamps here are seconds since the Unix epoch, per RFC 7519.
//! Internal code works in milliseconds and converts at this boundary.

use serde::{Deserialize, Serialize};

/// The `events` member key identifying a back-channel logout token.
pub const BACKCHANNEL_LOGOUT_EVENT: &str = "http://schemas.openid.net/event/backchannel-logout";

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// Issuer URL.
    pub iss: String,

    /// Subject (user UUID, or client ID for client_credentials).
    pub sub: String,

    /// Audience.
    pub aud: String,

    /// Expiration (seconds).
    pub exp: i64,

    /// Issued at (seconds).
    pub iat: i64,

    /// Unique token ID.
    pub jti: String,

    /// Granted scopes, space separated.
    pub scope: String,

    /// Requesting client.
    pub client_id: String,

    /// Time of the underlying user authentication (seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    /// Authentication context class reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,

    /// Authentication method references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amr: Option<Vec<String>>,
}

/// ID token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdTokenClaims {
    /// Issuer URL.
    pub iss: String,

    /// Subject (user UUID).
    pub sub: String,

    /// Audience (the client ID).
    pub aud: String,

    /// Expiration (seconds).
    pub exp: i64,

    /// Issued at (seconds).
    pub iat: i64,

    /// Time of user authentication (seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    /// Nonce from the authorization request, echoed verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Authentication context class reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,

    /// Authentication method references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amr: Option<Vec<String>>,

    /// Authorized party, present when `aud` differs from the presenter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    /// Left half of SHA-256 over the co-issued access token, base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,

    /// Left half of SHA-256 over the authorization code, base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c_hash: Option<String>,

    /// Session ID, enabling back-channel logout by `sid`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

/// Refresh token claims (signed record; the `jti` keys the stored record).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshTokenClaims {
    /// Issuer URL.
    pub iss: String,

    /// Subject.
    pub sub: String,

    /// Audience (the client ID).
    pub aud: String,

    /// Expiration (seconds).
    pub exp: i64,

    /// Issued at (seconds).
    pub iat: i64,

    /// Unique token ID; also the store key.
    pub jti: String,

    /// Scopes the family was granted.
    pub scope: String,

    /// Owning client.
    pub client_id: String,

    /// Rotation family ID.
    pub family: String,
}

/// Back-channel logout token claims (OIDC Back-Channel Logout 1.0 §2.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogoutTokenClaims {
    /// Issuer URL.
    pub iss: String,

    /// Subject; at least one of `sub`/`sid` is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Session ID; at least one of `sub`/`sid` is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Audience (the client ID).
    pub aud: String,

    /// Issued at (seconds).
    pub iat: i64,

    /// Expiration (seconds).
    pub exp: i64,

    /// Unique token ID.
    pub jti: String,

    /// Events claim; carries the back-channel logout member.
    pub events: serde_json::Value,
}

impl LogoutTokenClaims {
    /// Returns `true` if the `events` claim names the back-channel logout
    /// event, per OIDC Back-Channel Logout §2.4.
    #[must_use]
    pub fn is_logout_event(&self) -> bool {
        self.events
            .as_object()
            .is_some_and(|o| o.contains_key(BACKCHANNEL_LOGOUT_EVENT))
    }
}
