//! The token issuer.
//!
//! Signs access, ID, refresh, and logout tokens under the key store's active
//! key and verifies inbound JWTs by `kid`. The issuer is the only component
//! holding the key-manager bearer secret, which makes it the only possible
//! caller of the private-key path.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Header, Validation, decode, decode_header, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use oxidp_core::{UnixMillis, generate_id};

use crate::error::{AuthError, AuthResult};
use crate::keys::KeyStore;
use crate::token::claims::{
    AccessTokenClaims, IdTokenClaims, LogoutTokenClaims, RefreshTokenClaims,
};

/// Computes the base64url-encoded left half of SHA-256 over `input`'s ASCII
/// bytes — the OIDC Core §3.1.3.6 `at_hash` / `c_hash` construction.
#[must_use]
pub fn left_half_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..16])
}

/// Inputs shared by every issuance on one grant.
#[derive(Debug, Clone)]
pub struct IssueContext {
    /// Audience / client.
    pub client_id: String,

    /// Subject.
    pub sub: String,

    /// Granted scopes, space separated.
    pub scope: String,

    /// Time of the underlying user authentication.
    pub auth_time: Option<UnixMillis>,

    /// Authentication context class reference.
    pub acr: Option<String>,

    /// Authentication method references.
    pub amr: Vec<String>,

    /// Session ID for `sid`-based logout, when a browser session exists.
    pub session_id: Option<String>,

    /// Access token lifetime (from the resolved policy).
    pub access_token_ttl: Duration,

    /// ID token lifetime.
    pub id_token_ttl: Duration,

    /// Refresh token lifetime.
    pub refresh_token_ttl: Duration,
}

/// A signed token plus its `jti`.
#[derive(Debug, Clone)]
pub struct SignedToken {
    /// The compact JWS.
    pub jwt: String,

    /// The unique token ID.
    pub jti: String,
}

/// A signed refresh token: the JWS, its `jti`, and its rotation family.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    /// The compact JWS.
    pub jwt: String,

    /// The unique token ID; keys the stored record.
    pub jti: String,

    /// Rotation family ID.
    pub family: String,
}

/// What a verification must check beyond signature, `iss`, `exp`, and `nbf`.
#[derive(Debug, Clone, Default)]
pub struct VerifyExpectations<'a> {
    /// Required audience, when the caller knows it.
    pub audience: Option<&'a str>,

    /// Required authorized party.
    pub azp: Option<&'a str>,

    /// Accept expired tokens (introspection, `id_token_hint` at logout).
    pub allow_expired: bool,
}

/// Signs and verifies JWTs.
pub struct TokenIssuer {
    keystore: Arc<KeyStore>,
    issuer: String,
    manager_secret: String,
    skew: Duration,
}

impl TokenIssuer {
    /// Creates an issuer.
    ///
    /// `manager_secret` is the key-manager bearer; holding it here and
    /// nowhere else is what scopes the private-key path to this component.
    #[must_use]
    pub fn new(
        keystore: Arc<KeyStore>,
        issuer: impl Into<String>,
        manager_secret: impl Into<String>,
        skew: Duration,
    ) -> Self {
        Self {
            keystore,
            issuer: issuer.into(),
            manager_secret: manager_secret.into(),
            skew,
        }
    }

    /// The issuer URL stamped into every token.
    #[must_use]
    pub fn issuer_url(&self) -> &str {
        &self.issuer
    }

    async fn sign<T: Serialize>(&self, claims: &T) -> AuthResult<String> {
        let key = self
            .keystore
            .active_signing_key_with_private(&self.manager_secret)
            .await?;
        let mut header = Header::new(key.algorithm.to_jwt_algorithm());
        header.kid = Some(key.kid.clone());
        encode(&header, claims, &key.encoding_key)
            .map_err(|e| AuthError::server_error(format!("token signing failed: {e}")))
    }

    /// Issues an access token.
    ///
    /// # Errors
    ///
    /// Propagates key-store and signing failures.
    pub async fn issue_access_token(&self, ctx: &IssueContext) -> AuthResult<SignedToken> {
        let now = UnixMillis::now();
        let jti = generate_id(16);
        let claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: ctx.sub.clone(),
            aud: ctx.client_id.clone(),
            exp: (now + ctx.access_token_ttl).as_secs(),
            iat: now.as_secs(),
            jti: jti.clone(),
            scope: ctx.scope.clone(),
            client_id: ctx.client_id.clone(),
            auth_time: ctx.auth_time.map(|t| t.as_secs()),
            acr: ctx.acr.clone(),
            amr: if ctx.amr.is_empty() {
                None
            } else {
                Some(ctx.amr.clone())
            },
        };
        let jwt = self.sign(&claims).await?;
        Ok(SignedToken { jwt, jti })
    }

    /// Issues an ID token.
    ///
    /// `at_hash` is set when an access token is co-issued; `c_hash` when the
    /// token is issued alongside an authorization code (hybrid-style checks);
    /// `nonce` is echoed when the authorization request carried one.
    ///
    /// # Errors
    ///
    /// Propagates key-store and signing failures.
    pub async fn issue_id_token(
        &self,
        ctx: &IssueContext,
        access_token: Option<&str>,
        code: Option<&str>,
        nonce: Option<&str>,
    ) -> AuthResult<String> {
        let now = UnixMillis::now();
        let claims = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: ctx.sub.clone(),
            aud: ctx.client_id.clone(),
            exp: (now + ctx.id_token_ttl).as_secs(),
            iat: now.as_secs(),
            auth_time: ctx.auth_time.map(|t| t.as_secs()),
            nonce: nonce.map(str::to_owned),
            acr: ctx.acr.clone(),
            amr: if ctx.amr.is_empty() {
                None
            } else {
                Some(ctx.amr.clone())
            },
            azp: None,
            at_hash: access_token.map(left_half_hash),
            c_hash: code.map(left_half_hash),
            sid: ctx.session_id.clone(),
        };
        self.sign(&claims).await
    }

    /// Issues a refresh token, minting a new family unless one is supplied
    /// (rotation keeps the family).
    ///
    /// # Errors
    ///
    /// Propagates key-store and signing failures.
    pub async fn issue_refresh_token(
        &self,
        ctx: &IssueContext,
        family: Option<String>,
    ) -> AuthResult<IssuedRefreshToken> {
        let now = UnixMillis::now();
        let jti = generate_id(32);
        let family = family.unwrap_or_else(|| generate_id(16));
        let claims = RefreshTokenClaims {
            iss: self.issuer.clone(),
            sub: ctx.sub.clone(),
            aud: ctx.client_id.clone(),
            exp: (now + ctx.refresh_token_ttl).as_secs(),
            iat: now.as_secs(),
            jti: jti.clone(),
            scope: ctx.scope.clone(),
            client_id: ctx.client_id.clone(),
            family: family.clone(),
        };
        let jwt = self.sign(&claims).await?;
        Ok(IssuedRefreshToken { jwt, jti, family })
    }

    /// Issues a back-channel logout token for one relying party.
    ///
    /// # Errors
    ///
    /// Propagates key-store and signing failures.
    pub async fn issue_logout_token(
        &self,
        client_id: &str,
        sub: Option<&str>,
        sid: Option<&str>,
    ) -> AuthResult<String> {
        let now = UnixMillis::now();
        let claims = LogoutTokenClaims {
            iss: self.issuer.clone(),
            sub: sub.map(str::to_owned),
            sid: sid.map(str::to_owned),
            aud: client_id.to_string(),
            iat: now.as_secs(),
            exp: (now + Duration::from_secs(120)).as_secs(),
            jti: generate_id(16),
            events: serde_json::json!({
                crate::token::claims::BACKCHANNEL_LOGOUT_EVENT: {}
            }),
        };
        self.sign(&claims).await
    }

    /// Signs an arbitrary claim set under the active key — the signed
    /// userinfo response path.
    ///
    /// # Errors
    ///
    /// Propagates key-store and signing failures.
    pub async fn sign_claims<T: Serialize>(&self, claims: &T) -> AuthResult<String> {
        self.sign(claims).await
    }

    /// Verifies a JWT issued by this provider.
    ///
    /// Resolves the verification key by `kid` through the key store, then
    /// checks signature, `iss`, `exp`, `nbf`, bounded `iat` skew, and the
    /// caller's expectations.
    ///
    /// # Errors
    ///
    /// `invalid_token` for any verification failure.
    pub async fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        expect: &VerifyExpectations<'_>,
    ) -> AuthResult<T> {
        let header = decode_header(token)
            .map_err(|e| AuthError::invalid_token(format!("malformed token header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::invalid_token("token header missing kid"))?;
        let key = self.keystore.verify_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = self.skew.as_secs();
        validation.validate_exp = !expect.allow_expired;
        validation.validate_nbf = true;
        match expect.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let data = decode::<serde_json::Value>(token, &key, &validation)
            .map_err(|e| AuthError::invalid_token(e.to_string()))?;

        let claims = data.claims;
        let now = UnixMillis::now().as_secs();
        if let Some(iat) = claims.get("iat").and_then(serde_json::Value::as_i64) {
            if iat > now + self.skew.as_secs() as i64 {
                return Err(AuthError::invalid_token("iat is in the future"));
            }
        }
        if let Some(expected_azp) = expect.azp {
            let azp = claims.get("azp").and_then(serde_json::Value::as_str);
            if azp != Some(expected_azp) {
                return Err(AuthError::invalid_token("azp mismatch"));
            }
        }

        serde_json::from_value(claims)
            .map_err(|e| AuthError::invalid_token(format!("claim shape mismatch: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SigningConfig;
    use crate::keys::{KeyRecord, KeyStorage, RotationReason};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryKeyStorage {
        records: Mutex<HashMap<String, KeyRecord>>,
    }

    #[async_trait]
    impl KeyStorage for MemoryKeyStorage {
        async fn load_all(&self) -> AuthResult<Vec<KeyRecord>> {
            Ok(self.records.lock().unwrap().values().cloned().collect())
        }

        async fn put(&self, record: &KeyRecord) -> AuthResult<()> {
            self.records
                .lock()
                .unwrap()
                .insert(record.kid.clone(), record.clone());
            Ok(())
        }
    }

    const SECRET: &str = "km-secret";
    const ISSUER: &str = "https://issuer.example";

    async fn issuer_with_keystore() -> (TokenIssuer, Arc<KeyStore>) {
        let config = SigningConfig {
            algorithm: "ES256".to_string(),
            ..SigningConfig::default()
        };
        let keystore = Arc::new(
            KeyStore::new(Arc::new(MemoryKeyStorage::default()), Some(SECRET), &config).unwrap(),
        );
        keystore.initialize().await.unwrap();
        let issuer = TokenIssuer::new(
            Arc::clone(&keystore),
            ISSUER,
            SECRET,
            Duration::from_secs(300),
        );
        (issuer, keystore)
    }

    async fn issuer() -> TokenIssuer {
        issuer_with_keystore().await.0
    }

    fn ctx() -> IssueContext {
        IssueContext {
            client_id: "public-spa".to_string(),
            sub: "3d9a9c10-70f4-4b53-9c6d-0f5f4a8f13a7".to_string(),
            scope: "openid profile".to_string(),
            auth_time: Some(UnixMillis::now()),
            acr: Some("urn:oxidp:acr:passkey".to_string()),
            amr: vec!["webauthn".to_string()],
            session_id: Some("sess-1".to_string()),
            access_token_ttl: Duration::from_secs(3600),
            id_token_ttl: Duration::from_secs(3600),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 3600),
        }
    }

    #[test]
    fn test_left_half_hash_matches_oidc_construction() {
        // Independent computation of base64url(SHA256(input)[0..16]).
        let input = "dummy-access-token";
        let digest = Sha256::digest(input.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(&digest[..16]);
        assert_eq!(left_half_hash(input), expected);
        // 16 bytes -> 22 base64url chars.
        assert_eq!(left_half_hash(input).len(), 22);
    }

    #[tokio::test]
    async fn test_access_token_roundtrip() {
        let issuer = issuer().await;
        let token = issuer.issue_access_token(&ctx()).await.unwrap();

        let claims: AccessTokenClaims = issuer
            .verify(
                &token.jwt,
                &VerifyExpectations {
                    audience: Some("public-spa"),
                    ..VerifyExpectations::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.jti, token.jti);
        assert_eq!(claims.scope, "openid profile");
        assert_eq!(claims.amr.as_deref(), Some(&["webauthn".to_string()][..]));
        assert!(claims.exp > claims.iat);
    }

    #[tokio::test]
    async fn test_id_token_at_hash_and_nonce() {
        let issuer = issuer().await;
        let access = issuer.issue_access_token(&ctx()).await.unwrap();
        let id_token = issuer
            .issue_id_token(&ctx(), Some(&access.jwt), None, Some("n-abc"))
            .await
            .unwrap();

        let claims: IdTokenClaims = issuer
            .verify(&id_token, &VerifyExpectations::default())
            .await
            .unwrap();
        assert_eq!(claims.nonce.as_deref(), Some("n-abc"));
        assert_eq!(claims.at_hash.as_deref(), Some(left_half_hash(&access.jwt).as_str()));
        assert!(claims.c_hash.is_none());
        assert_eq!(claims.sid.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn test_refresh_token_family_is_kept_on_rotation() {
        let issuer = issuer().await;
        let first = issuer.issue_refresh_token(&ctx(), None).await.unwrap();
        let rotated = issuer
            .issue_refresh_token(&ctx(), Some(first.family.clone()))
            .await
            .unwrap();
        assert_eq!(first.family, rotated.family);
        assert_ne!(first.jti, rotated.jti);
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_audience() {
        let issuer = issuer().await;
        let token = issuer.issue_access_token(&ctx()).await.unwrap();
        let result: AuthResult<AccessTokenClaims> = issuer
            .verify(
                &token.jwt,
                &VerifyExpectations {
                    audience: Some("another-client"),
                    ..VerifyExpectations::default()
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_verify_fails_after_emergency_rotation() {
        let (issuer, keystore) = issuer_with_keystore().await;
        let token = issuer.issue_access_token(&ctx()).await.unwrap();

        keystore
            .rotate(SECRET, RotationReason::Emergency)
            .await
            .unwrap();

        let result: AuthResult<AccessTokenClaims> =
            issuer.verify(&token.jwt, &VerifyExpectations::default()).await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("invalid_key"));

        // New issuance works under the replacement key.
        assert!(issuer.issue_access_token(&ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_token_carries_event() {
        let issuer = issuer().await;
        let jwt = issuer
            .issue_logout_token("public-spa", Some("u-1"), Some("sess-1"))
            .await
            .unwrap();
        let claims: LogoutTokenClaims = issuer
            .verify(&jwt, &VerifyExpectations::default())
            .await
            .unwrap();
        assert!(claims.is_logout_event());
        assert_eq!(claims.sub.as_deref(), Some("u-1"));
    }
}
