//! Backchannel authentication request records (CIBA).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use oxidp_core::UnixMillis;

use crate::error::AuthResult;
use crate::stores::Mutator;

/// How tokens reach the client after approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CibaDeliveryMode {
    /// Client polls the token endpoint.
    Poll,
    /// Server pings the notification endpoint; client then polls once.
    Ping,
    /// Server pushes the full token response to the notification endpoint.
    Push,
}

impl fmt::Display for CibaDeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Poll => "poll",
            Self::Ping => "ping",
            Self::Push => "push",
        };
        write!(f, "{s}")
    }
}

/// Parsed `login_hint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum LoginHint {
    /// An email address.
    Email(String),
    /// A phone number (E.164).
    Phone(String),
    /// A subject UUID issued by this provider.
    Subject(String),
    /// A bare username.
    Username(String),
}

impl LoginHint {
    /// Parses a raw hint: `mailto:`/`@` ⇒ email, `tel:`/`+` ⇒ phone, a UUID
    /// ⇒ subject, anything else a username.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("mailto:") {
            return Self::Email(rest.to_string());
        }
        if let Some(rest) = raw.strip_prefix("tel:") {
            return Self::Phone(rest.to_string());
        }
        if raw.contains('@') {
            return Self::Email(raw.to_string());
        }
        if raw.starts_with('+') && raw.len() > 1 && raw[1..].chars().all(|c| c.is_ascii_digit()) {
            return Self::Phone(raw.to_string());
        }
        if uuid::Uuid::parse_str(raw).is_ok() {
            return Self::Subject(raw.to_string());
        }
        Self::Username(raw.to_string())
    }
}

/// Lifecycle status of a backchannel request.
///
/// `pending → {approved | denied | expired}`; `approved → consumed` exactly
/// once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CibaStatus {
    /// Awaiting the user's decision.
    Pending,
    /// Approved; tokens not yet issued.
    Approved,
    /// Denied by the user. Terminal.
    Denied,
    /// TTL elapsed before a decision. Terminal.
    Expired,
    /// Tokens issued exactly once. Terminal.
    Consumed,
}

/// A stored backchannel authentication request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CibaRequest {
    /// Request ID returned to the client.
    pub auth_req_id: String,

    /// Requesting client.
    pub client_id: String,

    /// Owning tenant.
    pub tenant_id: String,

    /// Requested scopes.
    pub scope: String,

    /// Message shown on the authentication device (≤ 140 chars).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding_message: Option<String>,

    /// Short code the user compares across devices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_code: Option<String>,

    /// Parsed login hint.
    pub login_hint: LoginHint,

    /// Delivery mode.
    pub delivery_mode: CibaDeliveryMode,

    /// Lifecycle status.
    pub status: CibaStatus,

    /// Current minimum poll interval in seconds; doubles on early polls.
    pub min_poll_interval_secs: u64,

    /// Last poll observed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll_at: Option<UnixMillis>,

    /// Subject that approved, once approved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_sub: Option<String>,

    /// Resolution ID of the pinned policy.
    pub resolved_policy_id: String,

    /// Client notification endpoint (ping/push).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_endpoint: Option<String>,

    /// Bearer token for notification delivery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_token: Option<String>,

    /// Creation time.
    pub created_at: UnixMillis,

    /// Expiry; read paths re-check this.
    pub expires_at: UnixMillis,
}

impl CibaRequest {
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

/// Storage for backchannel requests.
#[async_trait]
pub trait CibaStore: Send + Sync {
    /// Stores a request.
    ///
    /// # Errors
    ///
    /// `conflict` on duplicate ID; `resource_exhausted` at the tenant cap.
    async fn put(&self, request: CibaRequest) -> AuthResult<()>;

    /// Looks up a request. Expired records are still returned so the poll
    /// path can answer `expired_token` (the status transition is the
    /// caller's CAS).
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn get(&self, auth_req_id: &str) -> AuthResult<Option<CibaRequest>>;

    /// CAS update — the only way status and poll bookkeeping change.
    ///
    /// # Errors
    ///
    /// `contention` after repeated CAS races; backend failures.
    async fn update(
        &self,
        auth_req_id: &str,
        mutator: Mutator<'_, CibaRequest>,
    ) -> AuthResult<CibaRequest>;
}
