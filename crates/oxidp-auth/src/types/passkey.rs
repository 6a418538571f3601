//! Stored passkey credentials.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use oxidp_core::UnixMillis;

/// A registered WebAuthn credential.
///
/// `counter` must strictly increase on every successful assertion; a
/// non-increasing value is treated as a cloned authenticator and the
/// assertion is rejected as a suspected replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PasskeyCredential {
    /// Credential ID from the authenticator, base64url.
    pub credential_id: String,

    /// Owning user.
    pub user_id: Uuid,

    /// Serialized `webauthn_rs` passkey (COSE public key and metadata).
    pub passkey: serde_json::Value,

    /// Last signature counter observed.
    pub counter: u32,

    /// Transports reported at registration (`usb`, `nfc`, `ble`, `internal`).
    pub transports: Vec<String>,

    /// User-assigned device label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    /// Registration time.
    pub created_at: UnixMillis,

    /// Last successful assertion, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<UnixMillis>,
}

impl PasskeyCredential {
    /// Checks the counter discipline and applies an update.
    ///
    /// Returns `false` (and leaves the record untouched) when the new counter
    /// does not strictly exceed the stored one.
    #[must_use]
    pub fn apply_assertion(&mut self, new_counter: u32, at: UnixMillis) -> bool {
        if new_counter <= self.counter {
            return false;
        }
        self.counter = new_counter;
        self.last_used_at = Some(at);
        true
    }
}
