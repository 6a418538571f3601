//! Token-endpoint client authentication.
//!
//! Supports `client_secret_basic`, `client_secret_post`, `private_key_jwt`
//! (RFC 7523), and `none` (public clients; PKCE carries the proof instead).
//! `tls_client_auth` is resolved at the TLS terminator and arrives here as a
//! pre-verified client ID.
//!
//! Secrets are stored as SHA-256 hashes and compared in constant time; the
//! registered auth method is enforced strictly — a confidential client
//! presenting the wrong credential kind is rejected, not downgraded.

use base64::{Engine, engine::general_purpose::STANDARD};
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use oxidp_core::UnixMillis;

use crate::error::{AuthError, AuthResult};
use crate::oauth::types::TokenRequest;
use crate::types::{ClientAuthMethod, ClientContract};

/// The assertion type for `private_key_jwt`.
const JWT_BEARER: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Credentials extracted from one token-endpoint request.
#[derive(Debug, Clone, Default)]
pub struct ClientCredentials {
    /// Client ID, from Basic auth or the form body.
    pub client_id: Option<String>,

    /// Secret, from Basic auth or the form body.
    pub client_secret: Option<String>,

    /// Signed JWT assertion.
    pub client_assertion: Option<String>,

    /// Assertion type accompanying the assertion.
    pub client_assertion_type: Option<String>,

    /// Whether the secret arrived via the Authorization header.
    pub from_basic_auth: bool,
}

impl ClientCredentials {
    /// Extracts credentials from the Authorization header and form body.
    ///
    /// # Errors
    ///
    /// `invalid_request` for a malformed Basic header or a client ID
    /// mismatch between header and body.
    pub fn extract(
        authorization_header: Option<&str>,
        request: &TokenRequest,
    ) -> AuthResult<Self> {
        let mut credentials = Self {
            client_id: request.client_id.clone(),
            client_secret: request.client_secret.clone(),
            client_assertion: request.client_assertion.clone(),
            client_assertion_type: request.client_assertion_type.clone(),
            from_basic_auth: false,
        };

        if let Some(header) = authorization_header {
            if let Some(encoded) = header.strip_prefix("Basic ") {
                let decoded = STANDARD
                    .decode(encoded.trim())
                    .map_err(|_| AuthError::invalid_request("malformed Basic credentials"))?;
                let decoded = String::from_utf8(decoded)
                    .map_err(|_| AuthError::invalid_request("malformed Basic credentials"))?;
                let (id, secret) = decoded
                    .split_once(':')
                    .ok_or_else(|| AuthError::invalid_request("malformed Basic credentials"))?;

                if let Some(body_id) = &credentials.client_id {
                    if body_id != id {
                        return Err(AuthError::invalid_request(
                            "client_id mismatch between header and body",
                        ));
                    }
                }
                credentials.client_id = Some(id.to_string());
                credentials.client_secret = Some(secret.to_string());
                credentials.from_basic_auth = true;
            }
        }

        Ok(credentials)
    }

    /// The client ID, from wherever it arrived — including the assertion
    /// `iss` for `private_key_jwt` requests that omit `client_id`.
    #[must_use]
    pub fn client_id(&self) -> Option<String> {
        if let Some(id) = &self.client_id {
            return Some(id.clone());
        }
        // RFC 7523: iss identifies the client; read it without verification
        // just to locate the contract. Verification happens afterwards.
        let assertion = self.client_assertion.as_deref()?;
        let payload = assertion.split('.').nth(1)?;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        claims
            .get("iss")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
    }
}

#[derive(Debug, Deserialize)]
struct AssertionClaims {
    iss: String,
    sub: String,
    #[allow(dead_code)]
    aud: serde_json::Value,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    #[allow(dead_code)]
    jti: Option<String>,
}

/// Authenticates clients at the token-family endpoints.
pub struct ClientAuthenticator {
    /// The token endpoint URL — the required assertion audience.
    token_endpoint: String,
}

impl ClientAuthenticator {
    /// Creates an authenticator. `token_endpoint` is the absolute URL
    /// assertions must be addressed to.
    #[must_use]
    pub fn new(token_endpoint: impl Into<String>) -> Self {
        Self {
            token_endpoint: token_endpoint.into(),
        }
    }

    /// Authenticates a client per its registered method.
    ///
    /// # Errors
    ///
    /// `invalid_client` on every authentication failure.
    pub fn authenticate(
        &self,
        client: &ClientContract,
        credentials: &ClientCredentials,
    ) -> AuthResult<()> {
        match client.auth_method {
            ClientAuthMethod::None => {
                if credentials.client_secret.is_some() {
                    return Err(AuthError::invalid_client(
                        "public client must not present a secret",
                    ));
                }
                Ok(())
            }
            ClientAuthMethod::ClientSecretBasic => {
                if !credentials.from_basic_auth {
                    return Err(AuthError::invalid_client(
                        "client registered for client_secret_basic",
                    ));
                }
                self.check_secret(client, credentials)
            }
            ClientAuthMethod::ClientSecretPost => {
                if credentials.from_basic_auth {
                    return Err(AuthError::invalid_client(
                        "client registered for client_secret_post",
                    ));
                }
                self.check_secret(client, credentials)
            }
            ClientAuthMethod::PrivateKeyJwt => self.check_assertion(client, credentials),
            ClientAuthMethod::TlsClientAuth => {
                // The TLS layer verified the certificate; presence of the
                // client ID is all that reaches this layer.
                Ok(())
            }
        }
    }

    fn check_secret(
        &self,
        client: &ClientContract,
        credentials: &ClientCredentials,
    ) -> AuthResult<()> {
        let presented = credentials
            .client_secret
            .as_deref()
            .ok_or_else(|| AuthError::invalid_client("missing client secret"))?;
        let stored_hex = client
            .client_secret_hash
            .as_deref()
            .ok_or_else(|| AuthError::invalid_client("client has no secret registered"))?;
        let stored =
            hex::decode(stored_hex).map_err(|_| AuthError::invalid_client("corrupt secret hash"))?;

        let presented_digest: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        if presented_digest.ct_eq(stored.as_slice()).into() {
            Ok(())
        } else {
            Err(AuthError::invalid_client("client authentication failed"))
        }
    }

    fn check_assertion(
        &self,
        client: &ClientContract,
        credentials: &ClientCredentials,
    ) -> AuthResult<()> {
        if credentials.client_assertion_type.as_deref() != Some(JWT_BEARER) {
            return Err(AuthError::invalid_client(
                "client_assertion_type must be jwt-bearer",
            ));
        }
        let assertion = credentials
            .client_assertion
            .as_deref()
            .ok_or_else(|| AuthError::invalid_client("missing client_assertion"))?;
        let jwks = client
            .jwks
            .as_ref()
            .ok_or_else(|| AuthError::invalid_client("client has no registered JWKS"))?;

        let header = decode_header(assertion)
            .map_err(|e| AuthError::invalid_client(format!("malformed assertion: {e}")))?;
        if !matches!(header.alg, Algorithm::RS256 | Algorithm::ES256) {
            return Err(AuthError::invalid_client("assertion algorithm not allowed"));
        }

        let jwk = match &header.kid {
            Some(kid) => jwks.find(kid),
            None => jwks.find_for_alg(match header.alg {
                Algorithm::ES256 => "ES256",
                _ => "RS256",
            }),
        }
        .ok_or_else(|| AuthError::invalid_client("no matching key in client JWKS"))?;
        let key = jwk.to_decoding_key()?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.token_endpoint]);
        validation.validate_exp = true;
        validation.leeway = 60;

        let data = decode::<AssertionClaims>(assertion, &key, &validation)
            .map_err(|e| AuthError::invalid_client(format!("assertion rejected: {e}")))?;

        let claims = data.claims;
        if claims.iss != client.client_id || claims.sub != client.client_id {
            return Err(AuthError::invalid_client(
                "assertion iss/sub must equal client_id",
            ));
        }
        if let Some(iat) = claims.iat {
            if iat > UnixMillis::now().as_secs() + 60 {
                return Err(AuthError::invalid_client("assertion iat in the future"));
            }
        }
        // exp is validated above; an absurdly distant exp is still rejected.
        if claims.exp > UnixMillis::now().as_secs() + 24 * 3600 {
            return Err(AuthError::invalid_client("assertion lifetime too long"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientType, TenantContract};

    fn tenant() -> TenantContract {
        TenantContract::new("acme", 1, "https://issuer.example")
    }

    fn secret_client(secret: &str, method: ClientAuthMethod) -> ClientContract {
        let t = tenant();
        let mut client =
            ClientContract::public("backend", &t, vec!["https://app.example/cb".to_string()]);
        client.client_type = ClientType::Confidential;
        client.auth_method = method;
        client.client_secret_hash = Some(hex::encode(Sha256::digest(secret.as_bytes())));
        client
    }

    fn request() -> TokenRequest {
        TokenRequest {
            grant_type: "client_credentials".into(),
            code: None,
            redirect_uri: None,
            code_verifier: None,
            client_id: None,
            client_secret: None,
            client_assertion_type: None,
            client_assertion: None,
            refresh_token: None,
            scope: None,
            auth_req_id: None,
            device_code: None,
        }
    }

    #[test]
    fn test_basic_auth_extraction() {
        let header = format!("Basic {}", STANDARD.encode("backend:s3cret"));
        let credentials = ClientCredentials::extract(Some(&header), &request()).unwrap();
        assert_eq!(credentials.client_id.as_deref(), Some("backend"));
        assert_eq!(credentials.client_secret.as_deref(), Some("s3cret"));
        assert!(credentials.from_basic_auth);
    }

    #[test]
    fn test_header_body_mismatch_rejected() {
        let header = format!("Basic {}", STANDARD.encode("backend:s3cret"));
        let mut req = request();
        req.client_id = Some("other".to_string());
        assert!(ClientCredentials::extract(Some(&header), &req).is_err());
    }

    #[test]
    fn test_secret_basic_happy_and_wrong_secret() {
        let authenticator = ClientAuthenticator::new("https://issuer.example/token");
        let client = secret_client("s3cret", ClientAuthMethod::ClientSecretBasic);

        let good = ClientCredentials {
            client_id: Some("backend".into()),
            client_secret: Some("s3cret".into()),
            from_basic_auth: true,
            ..ClientCredentials::default()
        };
        assert!(authenticator.authenticate(&client, &good).is_ok());

        let bad = ClientCredentials {
            client_secret: Some("wrong".into()),
            ..good.clone()
        };
        let err = authenticator.authenticate(&client, &bad).unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_client");
    }

    #[test]
    fn test_method_is_enforced_strictly() {
        let authenticator = ClientAuthenticator::new("https://issuer.example/token");
        // Registered for basic, presents post.
        let client = secret_client("s3cret", ClientAuthMethod::ClientSecretBasic);
        let post = ClientCredentials {
            client_id: Some("backend".into()),
            client_secret: Some("s3cret".into()),
            from_basic_auth: false,
            ..ClientCredentials::default()
        };
        assert!(authenticator.authenticate(&client, &post).is_err());

        // Registered for post, presents basic.
        let client = secret_client("s3cret", ClientAuthMethod::ClientSecretPost);
        let basic = ClientCredentials {
            from_basic_auth: true,
            ..post
        };
        assert!(authenticator.authenticate(&client, &basic).is_err());
    }

    #[test]
    fn test_public_client_none_method() {
        let authenticator = ClientAuthenticator::new("https://issuer.example/token");
        let t = tenant();
        let client =
            ClientContract::public("public-spa", &t, vec!["https://app.example/cb".to_string()]);

        assert!(
            authenticator
                .authenticate(&client, &ClientCredentials::default())
                .is_ok()
        );

        // A public client presenting a secret is suspicious: reject.
        let with_secret = ClientCredentials {
            client_secret: Some("whatever".into()),
            ..ClientCredentials::default()
        };
        assert!(authenticator.authenticate(&client, &with_secret).is_err());
    }

    #[test]
    fn test_assertion_requires_type_and_jwks() {
        let authenticator = ClientAuthenticator::new("https://issuer.example/token");
        let t = tenant();
        let mut client =
            ClientContract::public("backend", &t, vec!["https://app.example/cb".to_string()]);
        client.client_type = ClientType::Confidential;
        client.auth_method = ClientAuthMethod::PrivateKeyJwt;

        let no_type = ClientCredentials {
            client_assertion: Some("x.y.z".into()),
            ..ClientCredentials::default()
        };
        assert!(authenticator.authenticate(&client, &no_type).is_err());

        let with_type = ClientCredentials {
            client_assertion: Some("x.y.z".into()),
            client_assertion_type: Some(JWT_BEARER.into()),
            ..ClientCredentials::default()
        };
        // No JWKS registered.
        assert!(authenticator.authenticate(&client, &with_type).is_err());
    }
}
