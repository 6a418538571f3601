//! Browser session records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use oxidp_core::{UnixMillis, generate_id};

use crate::error::AuthResult;
use crate::stores::Mutator;

/// A browser session, created on successful user authentication.
///
/// Once `revoked` is set no operation may reactivate the session; the
/// revocation is the durable fact logout fanout is built on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Random session ID, ≥ 128 bits.
    pub session_id: String,

    /// Authenticated user.
    pub user_id: Uuid,

    /// Owning tenant.
    pub tenant_id: String,

    /// When the user authenticated.
    pub auth_time: UnixMillis,

    /// Methods used to authenticate.
    pub amr: Vec<String>,

    /// Authentication context class reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,

    /// Creation time.
    pub created_at: UnixMillis,

    /// Absolute expiry.
    pub expires_at: UnixMillis,

    /// Idle expiry; activity pushes it forward up to the absolute expiry.
    pub idle_expires_at: UnixMillis,

    /// Last observed activity.
    pub last_active_at: UnixMillis,

    /// Terminal revocation flag.
    pub revoked: bool,

    /// Why the session was revoked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
}

impl Session {
    /// Creates a session for a freshly authenticated user.
    #[must_use]
    pub fn new(
        user_id: Uuid,
        tenant_id: impl Into<String>,
        amr: Vec<String>,
        acr: Option<String>,
        absolute_ttl: Duration,
        idle_ttl: Duration,
    ) -> Self {
        let now = UnixMillis::now();
        Self {
            session_id: generate_id(32),
            user_id,
            tenant_id: tenant_id.into(),
            auth_time: now,
            amr,
            acr,
            created_at: now,
            expires_at: now + absolute_ttl,
            idle_expires_at: now + idle_ttl,
            last_active_at: now,
            revoked: false,
            revocation_reason: None,
        }
    }

    /// Returns `true` when the session can still authenticate requests.
    #[must_use]
    pub fn is_active(&self, now: UnixMillis) -> bool {
        !self.revoked && now.is_before(self.expires_at) && now.is_before(self.idle_expires_at)
    }

    /// Whether `max_age` seconds have elapsed since authentication.
    #[must_use]
    pub fn exceeds_max_age(&self, max_age_secs: u64, now: UnixMillis) -> bool {
        now.millis_since(self.auth_time) > (max_age_secs as i64).saturating_mul(1000)
    }
}

/// Storage for browser sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores a session.
    ///
    /// # Errors
    ///
    /// `conflict` on duplicate ID; `resource_exhausted` at the tenant cap.
    async fn put(&self, session: Session) -> AuthResult<()>;

    /// Looks up a live session. Expired, idle-expired, or revoked sessions
    /// return `None`.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn get(&self, session_id: &str) -> AuthResult<Option<Session>>;

    /// CAS update.
    ///
    /// # Errors
    ///
    /// `contention` after repeated CAS races; backend failures.
    async fn update(
        &self,
        session_id: &str,
        mutator: Mutator<'_, Session>,
    ) -> AuthResult<Session>;

    /// Extends the idle window (bounded by the absolute expiry).
    ///
    /// # Errors
    ///
    /// Backend failures; missing sessions are a no-op.
    async fn extend(&self, session_id: &str, new_idle_expiry: UnixMillis) -> AuthResult<()>;

    /// Terminal revocation. Revoked sessions never reactivate.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn revoke(&self, session_id: &str, reason: &str) -> AuthResult<()>;

    /// Every live session of a user, for logout fanout.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn list_by_user(&self, user_id: Uuid) -> AuthResult<Vec<Session>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            Uuid::new_v4(),
            "acme",
            vec!["webauthn".to_string()],
            None,
            Duration::from_secs(8 * 3600),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn test_activity_windows() {
        let s = session();
        let now = UnixMillis::now();
        assert!(s.is_active(now));
        assert!(!s.is_active(s.idle_expires_at));
        assert!(!s.is_active(s.expires_at));
    }

    #[test]
    fn test_revoked_is_never_active() {
        let mut s = session();
        s.revoked = true;
        s.revocation_reason = Some("logout".to_string());
        assert!(!s.is_active(UnixMillis::now()));
    }

    #[test]
    fn test_max_age() {
        let mut s = session();
        s.auth_time = UnixMillis::now() - Duration::from_secs(600);
        assert!(s.exceeds_max_age(300, UnixMillis::now()));
        assert!(!s.exceeds_max_age(900, UnixMillis::now()));
    }
}
