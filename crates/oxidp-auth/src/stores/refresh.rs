//! Refresh token records.
//!
//! Rotation discipline: redeeming a refresh token mints exactly one
//! successor in the same family and marks the predecessor rotated.
//! Presenting a rotated token afterwards means the token leaked — the whole
//! family is revoked and every member fails with `invalid_grant` from then
//! on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use oxidp_core::UnixMillis;

use crate::error::AuthResult;
use crate::stores::Mutator;

/// A stored refresh token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshTokenRecord {
    /// Token ID; matches the JWT `jti`.
    pub jti: String,

    /// Rotation family.
    pub family_id: String,

    /// Owning client.
    pub client_id: String,

    /// Subject.
    pub user_id: String,

    /// Scopes granted to the family.
    pub scope: String,

    /// Issuance time.
    pub issued_at: UnixMillis,

    /// Expiry; read paths re-check this.
    pub expires_at: UnixMillis,

    /// Predecessor `jti` when this token came from a rotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_from: Option<String>,

    /// Set once the token has been rotated away; presenting it afterwards is
    /// the replay signal.
    pub rotated: bool,

    /// Terminal revocation flag.
    pub revoked: bool,
}

impl RefreshTokenRecord {
    /// Returns `true` past the TTL.
    #[must_use]
    pub fn is_expired(&self, now: UnixMillis) -> bool {
        !now.is_before(self.expires_at)
    }

    /// Returns `true` when the token can be redeemed.
    #[must_use]
    pub fn is_redeemable(&self, now: UnixMillis) -> bool {
        !self.revoked && !self.rotated && !self.is_expired(now)
    }
}

/// Storage for refresh tokens.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Stores a token record. Must be durable before the token response is
    /// visible.
    ///
    /// # Errors
    ///
    /// `conflict` on duplicate `jti`.
    async fn put(&self, record: RefreshTokenRecord) -> AuthResult<()>;

    /// Looks up a record by `jti`, including rotated and revoked ones —
    /// the redemption path needs to see those to detect replay.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn get(&self, jti: &str) -> AuthResult<Option<RefreshTokenRecord>>;

    /// CAS update (marks rotation).
    ///
    /// # Errors
    ///
    /// `contention` after repeated CAS races; backend failures.
    async fn update(
        &self,
        jti: &str,
        mutator: Mutator<'_, RefreshTokenRecord>,
    ) -> AuthResult<RefreshTokenRecord>;

    /// Terminally revokes one token.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn revoke(&self, jti: &str, reason: &str) -> AuthResult<()>;

    /// Revokes every token in a family. Returns the number revoked.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn revoke_family(&self, family_id: &str, reason: &str) -> AuthResult<u64>;
}
