//! Wire shapes for the token-family endpoints.

use serde::{Deserialize, Serialize};

/// Token endpoint request (form body). Fields are grant-specific:
///
/// - `authorization_code`: code, redirect_uri, code_verifier
/// - `refresh_token`: refresh_token
/// - `urn:openid:params:grant-type:ciba`: auth_req_id
/// - `urn:ietf:params:oauth:grant-type:device_code`: device_code
/// - `client_credentials`: scope only
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    /// Grant type.
    pub grant_type: String,

    /// Authorization code.
    #[serde(default)]
    pub code: Option<String>,

    /// Redirect URI; must match the authorization request.
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// PKCE verifier.
    #[serde(default)]
    pub code_verifier: Option<String>,

    /// Client ID (public clients / client_secret_post).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (client_secret_post).
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Client assertion type (`private_key_jwt`).
    #[serde(default)]
    pub client_assertion_type: Option<String>,

    /// Client assertion JWT.
    #[serde(default)]
    pub client_assertion: Option<String>,

    /// Refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Requested scope (refresh / client_credentials).
    #[serde(default)]
    pub scope: Option<String>,

    /// CIBA request ID.
    #[serde(default)]
    pub auth_req_id: Option<String>,

    /// Device code.
    #[serde(default)]
    pub device_code: Option<String>,
}

/// Successful token response. `scope` is always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token (JWS).
    pub access_token: String,

    /// Always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Granted scopes, space separated.
    pub scope: String,

    /// ID token, when `openid` was granted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Refresh token, when `offline_access` was granted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    /// Creates a response with required fields.
    #[must_use]
    pub fn new(access_token: String, expires_in: u64, scope: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope,
            id_token: None,
            refresh_token: None,
        }
    }

    /// Sets the ID token.
    #[must_use]
    pub fn with_id_token(mut self, token: String) -> Self {
        self.id_token = Some(token);
        self
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: String) -> Self {
        self.refresh_token = Some(token);
        self
    }
}

/// `POST /par` response (RFC 9126 §2.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParResponse {
    /// The minted request URI.
    pub request_uri: String,

    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// `POST /bc-authorize` response (CIBA Core §7.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CibaAuthorizeResponse {
    /// Handle for polling.
    pub auth_req_id: String,

    /// Request lifetime in seconds.
    pub expires_in: u64,

    /// Minimum polling interval in seconds.
    pub interval: u64,
}

/// `POST /device_authorization` response (RFC 8628 §3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorizationResponse {
    /// Polling credential.
    pub device_code: String,

    /// Code the user types at the verification URI.
    pub user_code: String,

    /// Where the user goes to approve.
    pub verification_uri: String,

    /// Verification URI with the user code pre-filled.
    pub verification_uri_complete: String,

    /// Lifetime in seconds.
    pub expires_in: u64,

    /// Minimum polling interval in seconds.
    pub interval: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_request_form_parsing() {
        let form = "grant_type=authorization_code&code=abc&redirect_uri=https%3A%2F%2Fapp.example%2Fcb&code_verifier=dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk&client_id=public-spa";
        let req: TokenRequest = serde_urlencoded_from_str(form);
        assert_eq!(req.grant_type, "authorization_code");
        assert_eq!(req.code.as_deref(), Some("abc"));
        assert_eq!(req.redirect_uri.as_deref(), Some("https://app.example/cb"));
        assert!(req.refresh_token.is_none());
    }

    // axum's Form extractor does the urlencoded decode in production; tests
    // go through serde_json for the same serde path.
    fn serde_urlencoded_from_str(form: &str) -> TokenRequest {
        let map: std::collections::HashMap<String, String> = form
            .split('&')
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                Some((
                    k.to_string(),
                    percent_decode(v),
                ))
            })
            .collect();
        serde_json::from_value(serde_json::to_value(map).unwrap()).unwrap()
    }

    fn percent_decode(s: &str) -> String {
        let mut out = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c == '%' {
                let hex: String = chars.by_ref().take(2).collect();
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    out.push(byte as char);
                }
            } else if c == '+' {
                out.push(' ');
            } else {
                out.push(c);
            }
        }
        out
    }

    #[test]
    fn test_token_response_scope_always_present() {
        let response = TokenResponse::new("at".into(), 3600, "openid profile".into());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["scope"], "openid profile");
        assert_eq!(json["token_type"], "Bearer");
        assert_eq!(json["expires_in"], 3600);
        assert!(json.get("id_token").is_none());
        assert!(json.get("refresh_token").is_none());
    }

    #[test]
    fn test_token_response_builders() {
        let response = TokenResponse::new("at".into(), 3600, "openid".into())
            .with_id_token("idt".into())
            .with_refresh_token("rt".into());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["id_token"], "idt");
        assert_eq!(json["refresh_token"], "rt");
    }

    #[test]
    fn test_device_response_shape() {
        let response = DeviceAuthorizationResponse {
            device_code: "d".into(),
            user_code: "ABCD-EFGH".into(),
            verification_uri: "https://issuer.example/device".into(),
            verification_uri_complete: "https://issuer.example/device?user_code=ABCD-EFGH".into(),
            expires_in: 600,
            interval: 5,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["user_code"], "ABCD-EFGH");
        assert_eq!(json["interval"], 5);
    }
}
