//! Event envelope and name catalog.
//!
//! Event names follow `{domain}.{resource}.{action}[.{modifier}]`. The
//! catalog below is the set the core emits; integrations may subscribe to
//! any subset. PII never enters an envelope unless the emitting site opts in
//! explicitly for that event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time::UnixMillis;

/// Catalogued event names emitted by the core.
pub mod names {
    /// A user completed authentication.
    pub const AUTH_LOGIN_SUCCEEDED: &str = "auth.login.succeeded";
    /// A user failed authentication.
    pub const AUTH_LOGIN_FAILED: &str = "auth.login.failed";
    /// An authorization code was issued.
    pub const AUTH_CODE_ISSUED: &str = "auth.code.issued";
    /// An authorization code was redeemed for tokens.
    pub const AUTH_CODE_REDEEMED: &str = "auth.code.redeemed";
    /// Consent was granted by a user.
    pub const CONSENT_GRANT_CREATED: &str = "consent.grant.created";
    /// Consent was revoked.
    pub const CONSENT_GRANT_REVOKED: &str = "consent.grant.revoked";
    /// Tokens were issued at the token endpoint.
    pub const TOKEN_ISSUED: &str = "security.token.issued";
    /// A token (or refresh family) was revoked.
    pub const TOKEN_REVOKED: &str = "security.token.revoked";
    /// A replay was detected (passkey counter, rotated refresh token).
    pub const TOKEN_REPLAY_DETECTED: &str = "security.token.replay_detected";
    /// A signing key was rotated.
    pub const KEY_ROTATED: &str = "security.key.rotated";
    /// A signing key was rotated under emergency.
    pub const KEY_ROTATED_EMERGENCY: &str = "security.key.rotated.emergency";
    /// A session was created.
    pub const SESSION_CREATED: &str = "session.lifecycle.created";
    /// A session was revoked.
    pub const SESSION_REVOKED: &str = "session.lifecycle.revoked";
    /// A passkey was registered.
    pub const PASSKEY_REGISTERED: &str = "auth.passkey.registered";
    /// A backchannel authentication request was created.
    pub const CIBA_REQUEST_CREATED: &str = "auth.ciba.created";
    /// A backchannel authentication request was approved.
    pub const CIBA_REQUEST_APPROVED: &str = "auth.ciba.approved";
    /// A device grant was approved.
    pub const DEVICE_GRANT_APPROVED: &str = "auth.device.approved";
    /// A logout was propagated to relying parties.
    pub const LOGOUT_PROPAGATED: &str = "session.logout.propagated";
}

/// Request-scoped context carried by every event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventContext {
    /// Correlation ID of the triggering request.
    pub request_id: String,

    /// Browser session, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// OAuth client involved, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Remote address, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl EventContext {
    /// Creates a context carrying only a request ID.
    #[must_use]
    pub fn for_request(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    /// Sets the client ID.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the session ID.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the remote address.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }
}

/// The entity performing the action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Actor {
    /// An end user (UUID).
    User(String),
    /// An OAuth client acting on its own behalf.
    Client(String),
    /// The system itself (schedulers, rotation).
    System(String),
}

/// The entity being acted upon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    /// Resource kind, e.g. `session`, `key`, `refresh_token_family`.
    pub kind: String,
    /// Opaque resource ID.
    pub id: String,
}

impl Target {
    /// Creates a target reference.
    #[must_use]
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// A single emitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID.
    pub event_id: String,

    /// Catalogued event name.
    pub event_name: String,

    /// Emission time.
    pub timestamp: UnixMillis,

    /// Owning tenant.
    pub tenant_id: String,

    /// Request-scoped context.
    pub context: EventContext,

    /// Who performed the action, when attributable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,

    /// What was acted upon, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,

    /// Event-specific payload. PII only when the emitting site opts in.
    pub data: Value,
}

impl EventEnvelope {
    /// Creates an envelope with a fresh event ID and current timestamp.
    #[must_use]
    pub fn new(
        event_name: impl Into<String>,
        tenant_id: impl Into<String>,
        context: EventContext,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_name: event_name.into(),
            timestamp: UnixMillis::now(),
            tenant_id: tenant_id.into(),
            context,
            actor: None,
            target: None,
            data: Value::Null,
        }
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Sets the target.
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Returns the `{domain}` segment of the event name.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.event_name.split('.').next().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_construction() {
        let env = EventEnvelope::new(
            names::TOKEN_ISSUED,
            "tenant-1",
            EventContext::for_request("req-1").with_client("spa"),
        )
        .with_actor(Actor::User("u-1".into()))
        .with_target(Target::new("access_token", "jti-1"))
        .with_data(serde_json::json!({"scope": "openid"}));

        assert_eq!(env.event_name, "security.token.issued");
        assert_eq!(env.domain(), "security");
        assert_eq!(env.tenant_id, "tenant-1");
        assert_eq!(env.context.client_id.as_deref(), Some("spa"));
        assert!(!env.event_id.is_empty());
    }

    #[test]
    fn test_envelope_serialization_omits_empty() {
        let env = EventEnvelope::new(names::KEY_ROTATED, "t", EventContext::for_request("r"));
        let json = serde_json::to_string(&env).unwrap();
        assert!(!json.contains("\"actor\""));
        assert!(!json.contains("\"target\""));
        assert!(!json.contains("\"session_id\""));
    }

    #[test]
    fn test_actor_tagged_serialization() {
        let json = serde_json::to_string(&Actor::Client("app".into())).unwrap();
        assert_eq!(json, r#"{"kind":"client","id":"app"}"#);
    }
}
