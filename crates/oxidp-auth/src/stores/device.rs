//! Device authorization grant records (RFC 8628).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use oxidp_core::UnixMillis;

use crate::error::AuthResult;
use crate::stores::Mutator;
use crate::stores::ciba::CibaStatus;

/// A stored device grant. Shares the CIBA status lifecycle and one-shot
/// consumption invariant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceGrantRecord {
    /// Device code (≥ 128-bit random); the polling credential.
    pub device_code: String,

    /// User code (8-char base32 with separator); what the user types.
    pub user_code: String,

    /// Requesting client.
    pub client_id: String,

    /// Owning tenant.
    pub tenant_id: String,

    /// Requested scopes.
    pub scope: String,

    /// Lifecycle status.
    pub status: CibaStatus,

    /// Current minimum poll interval in seconds.
    pub min_poll_interval_secs: u64,

    /// Last poll observed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll_at: Option<UnixMillis>,

    /// Subject that approved, once approved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_sub: Option<String>,

    /// Resolution ID of the pinned policy.
    pub resolved_policy_id: String,

    /// Creation time.
    pub created_at: UnixMillis,

    /// Expiry; read paths re-check this.
    pub expires_at: UnixMillis,
}

impl DeviceGrantRecord {
    /// Returns `true` past the TTL.
    #[must_use]
    pub fn is_expired(&self, now: UnixMillis) -> bool {
        !now.is_before(self.expires_at)
    }

    /// Whether a poll arriving now is early.
    #[must_use]
    pub fn poll_too_early(&self, now: UnixMillis) -> bool {
        self.last_poll_at.is_some_and(|last| {
            now.millis_since(last) < (self.min_poll_interval_secs as i64).saturating_mul(1000)
        })
    }
}

/// Storage for device grants.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Stores a grant.
    ///
    /// # Errors
    ///
    /// `conflict` on a duplicate device or user code.
    async fn put(&self, record: DeviceGrantRecord) -> AuthResult<()>;

    /// Looks up by device code. Expired records are returned so the poll
    /// path can answer `expired_token`.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn get(&self, device_code: &str) -> AuthResult<Option<DeviceGrantRecord>>;

    /// Looks up by user code (the verification-page path).
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn find_by_user_code(&self, user_code: &str)
    -> AuthResult<Option<DeviceGrantRecord>>;

    /// CAS update.
    ///
    /// # Errors
    ///
    /// `contention` after repeated CAS races; backend failures.
    async fn update(
        &self,
        device_code: &str,
        mutator: Mutator<'_, DeviceGrantRecord>,
    ) -> AuthResult<DeviceGrantRecord>;
}
