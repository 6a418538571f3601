//! Authorization code records.
//!
//! Codes are single-use and short-lived (TTL ≤ 120 s). Issuance must be
//! durable before `consume` can return the record; the token endpoint only
//! consumes after every token is signed and the refresh record persisted, so
//! a visible token response implies exactly one consumption.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use oxidp_core::UnixMillis;

use crate::error::AuthResult;
use crate::stores::Mutator;

/// A stored authorization code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationCode {
    /// The code value: cryptographically random, ≥ 128 bits.
    pub code: String,

    /// Client the code was issued to.
    pub client_id: String,

    /// Tenant owning the flow.
    pub tenant_id: String,

    /// Redirect URI the code was bound to.
    pub redirect_uri: String,

    /// Granted scopes, space separated.
    pub scope: String,

    /// Authenticated subject.
    pub sub: String,

    /// Nonce from the authorization request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// PKCE challenge, when the request carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// PKCE method; only "S256".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,

    /// When the user authenticated.
    pub auth_time: UnixMillis,

    /// Authentication context class reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,

    /// Authentication method references.
    pub amr: Vec<String>,

    /// Resolution ID of the pinned policy.
    pub resolved_policy_id: String,

    /// Browser session the code was minted under, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Issuance time.
    pub issued_at: UnixMillis,

    /// Expiry; read paths re-check this.
    pub expires_at: UnixMillis,
}

impl AuthorizationCode {
    /// Returns `true` past the TTL.
    #[must_use]
    pub fn is_expired(&self, now: UnixMillis) -> bool {
        !now.is_before(self.expires_at)
    }
}

/// Storage for authorization codes.
#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Stores a code. Must be durable before returning.
    ///
    /// # Errors
    ///
    /// `conflict` when the code value already exists.
    async fn put(&self, record: AuthorizationCode) -> AuthResult<()>;

    /// Looks up a code without consuming it. Expired or consumed codes
    /// return `None`.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn get(&self, code: &str) -> AuthResult<Option<AuthorizationCode>>;

    /// Atomic fetch-and-delete. Exactly one concurrent caller receives the
    /// record; everyone else sees `None`.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn consume(&self, code: &str) -> AuthResult<Option<AuthorizationCode>>;

    /// CAS update (unused on the happy path; kept for parity with the store
    /// contract).
    ///
    /// # Errors
    ///
    /// `contention` after repeated CAS races; backend failures.
    async fn update(
        &self,
        code: &str,
        mutator: Mutator<'_, AuthorizationCode>,
    ) -> AuthResult<AuthorizationCode>;

    /// Terminally revokes a code.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn revoke(&self, code: &str, reason: &str) -> AuthResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_check() {
        let record = AuthorizationCode {
            code: "c".into(),
            client_id: "spa".into(),
            tenant_id: "acme".into(),
            redirect_uri: "https://app.example/cb".into(),
            scope: "openid".into(),
            sub: "u1".into(),
            nonce: None,
            code_challenge: None,
            code_challenge_method: None,
            auth_time: UnixMillis::from_millis(0),
            acr: None,
            amr: vec![],
            resolved_policy_id: "r1".into(),
            session_id: None,
            issued_at: UnixMillis::from_millis(0),
            expires_at: UnixMillis::from_millis(120_000),
        };
        assert!(!record.is_expired(UnixMillis::from_millis(119_999)));
        assert!(record.is_expired(UnixMillis::from_millis(120_000)));
    }
}
