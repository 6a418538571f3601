//! User records.
//!
//! The user is split across two partitions sharing one UUID: `UserCore`
//! (operational, non-PII) and `UserPii` (names, addresses). The core record
//! is written first with `pii_status = pending`; the PII write flips it to
//! `active`. GDPR deletion removes the PII row and tombstones the core row.
//!
//! Email lookup never touches the PII partition directly: a deterministic
//! HMAC-SHA256 blind index over the lowercased address is stored on the core
//! record and queried instead.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use oxidp_core::UnixMillis;

/// Operational status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Normal.
    Active,
    /// Blocked by an administrator; authentication denied.
    Suspended,
    /// Tombstoned after GDPR deletion.
    Deleted,
}

/// Status of the PII partition write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiStatus {
    /// Core record exists, PII write not yet confirmed.
    Pending,
    /// PII write confirmed.
    Active,
    /// PII write failed; retryable via the internal admin API.
    Failed,
    /// PII removed (GDPR).
    Deleted,
}

/// Deterministic blind index for email lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailBlindIndex(String);

impl EmailBlindIndex {
    /// Computes the index: hex(HMAC-SHA256(key, lowercase(email))).
    ///
    /// The same key must be used for every computation or lookups silently
    /// miss; it is provider-wide configuration, not per-tenant.
    #[must_use]
    pub fn compute(key: &[u8], email: &str) -> Self {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(email.trim().to_lowercase().as_bytes());
        Self(hex::encode(mac.finalize().into_bytes()))
    }

    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Non-PII user record (core partition).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserCore {
    /// Shared UUID keying both partitions.
    pub user_id: Uuid,

    /// Owning tenant.
    pub tenant_id: String,

    /// Operational status.
    pub status: UserStatus,

    /// PII partition write status.
    pub pii_status: PiiStatus,

    /// Logical partition holding the PII row.
    pub pii_partition: String,

    /// Blind index for email lookup.
    pub email_blind_index: EmailBlindIndex,

    /// Whether the address was proven (first passkey registration or a
    /// verified email code).
    pub email_verified: bool,

    /// Last successful login, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<UnixMillis>,

    /// Count of successful logins.
    pub login_count: u64,

    /// Count of consecutive failed verification attempts.
    pub failed_attempts: u32,

    /// Creation time.
    pub created_at: UnixMillis,
}

impl UserCore {
    /// Creates a new core record in the `pending` PII state.
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        pii_partition: impl Into<String>,
        email_blind_index: EmailBlindIndex,
    ) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            status: UserStatus::Active,
            pii_status: PiiStatus::Pending,
            pii_partition: pii_partition.into(),
            email_blind_index,
            email_verified: false,
            last_login_at: None,
            login_count: 0,
            failed_attempts: 0,
            created_at: UnixMillis::now(),
        }
    }

    /// Returns `true` if the user may authenticate.
    #[must_use]
    pub fn can_authenticate(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Records a successful login.
    pub fn record_login(&mut self, at: UnixMillis) {
        self.last_login_at = Some(at);
        self.login_count += 1;
        self.failed_attempts = 0;
    }

    /// Applies the GDPR tombstone: PII deleted, account unusable.
    pub fn tombstone(&mut self) {
        self.status = UserStatus::Deleted;
        self.pii_status = PiiStatus::Deleted;
    }
}

/// PII record (separate partition, keyed by the same UUID).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPii {
    /// Shared UUID.
    pub user_id: Uuid,

    /// Primary email address.
    pub email: String,

    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Phone number in E.164.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,

    /// Last PII update.
    pub updated_at: UnixMillis,
}

impl UserPii {
    /// Creates a PII record for the given user.
    #[must_use]
    pub fn new(user_id: Uuid, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            name: None,
            phone_number: None,
            updated_at: UnixMillis::now(),
        }
    }
}
