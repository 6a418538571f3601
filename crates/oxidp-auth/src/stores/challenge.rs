//! Challenge records.
//!
//! A challenge is one in-flight interactive flow: login, consent, an email
//! code, a WebAuthn ceremony. IDs are ≥128-bit random strings; state moves
//! monotonically forward and never back; the pinned `ResolvedPolicy` is
//! immutable once written — CAS updates preserve it by construction because
//! the mutator must return a record with the same `resolution_id`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use oxidp_core::{UnixMillis, generate_id};

use crate::error::{AuthError, AuthResult};
use crate::policy::ResolvedPolicy;
use crate::stores::Mutator;

/// What kind of interaction a challenge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// Interactive authorization (login) flow.
    Login,
    /// Standalone consent flow.
    Consent,
    /// Email one-time-code verification.
    EmailCode,
    /// WebAuthn registration ceremony.
    PasskeyRegister,
    /// WebAuthn authentication ceremony.
    PasskeyAuth,
    /// Backchannel (CIBA) user interaction.
    Ciba,
}

/// Challenge lifecycle state, ordered. Transitions only move to a strictly
/// higher ordinal; `Consumed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeState {
    /// Freshly created.
    Created,
    /// The user is interacting.
    InProgress,
    /// The interaction succeeded; awaiting consumption.
    Verified,
    /// Redeemed exactly once. Terminal.
    Consumed,
    /// The interaction failed. Terminal.
    Failed,
}

impl ChallengeState {
    fn ordinal(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::InProgress => 1,
            Self::Verified => 2,
            Self::Consumed => 3,
            Self::Failed => 4,
        }
    }

    /// Returns `true` if a transition to `next` moves strictly forward.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            // Terminal states accept nothing.
            (Self::Consumed | Self::Failed, _) => false,
            // Failure is reachable from any live state.
            (_, Self::Failed) => true,
            (from, to) => to.ordinal() > from.ordinal(),
        }
    }

    /// Returns `true` for `Consumed` / `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Consumed | Self::Failed)
    }
}

impl fmt::Display for ChallengeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Verified => "verified",
            Self::Consumed => "consumed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One in-flight interactive flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Challenge {
    /// Random ID, ≥ 128 bits.
    pub challenge_id: String,

    /// Owning tenant.
    pub tenant_id: String,

    /// Interaction kind.
    pub kind: ChallengeKind,

    /// Lifecycle state.
    pub state: ChallengeState,

    /// The pinned policy; immutable for the challenge lifetime.
    pub policy: ResolvedPolicy,

    /// Kind-specific payload (flow machine state, ceremony state, code hash).
    pub payload: serde_json::Value,

    /// Creation time.
    pub created_at: UnixMillis,

    /// Expiry; read paths re-check this.
    pub expires_at: UnixMillis,
}

impl Challenge {
    /// Creates a challenge with a fresh random ID.
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        kind: ChallengeKind,
        policy: ResolvedPolicy,
        payload: serde_json::Value,
        ttl: Duration,
    ) -> Self {
        let now = UnixMillis::now();
        Self {
            challenge_id: generate_id(32),
            tenant_id: tenant_id.into(),
            kind,
            state: ChallengeState::Created,
            policy,
            payload,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Returns `true` past the TTL.
    #[must_use]
    pub fn is_expired(&self, now: UnixMillis) -> bool {
        !now.is_before(self.expires_at)
    }

    /// Moves the state forward.
    ///
    /// # Errors
    ///
    /// `invalid_transition` when `next` is not strictly forward.
    pub fn transition(&mut self, next: ChallengeState) -> AuthResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(AuthError::invalid_transition(
                next.to_string(),
                self.state.to_string(),
            ));
        }
        self.state = next;
        Ok(())
    }
}

/// Storage for challenges.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Stores a challenge.
    ///
    /// # Errors
    ///
    /// `conflict` on duplicate ID; `resource_exhausted` when the tenant's
    /// active-challenge cap is hit.
    async fn put(&self, challenge: Challenge) -> AuthResult<()>;

    /// Looks up a challenge. Expired or consumed challenges return `None`.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn get(&self, challenge_id: &str) -> AuthResult<Option<Challenge>>;

    /// Atomic fetch-and-delete for single-use redemption.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn consume(&self, challenge_id: &str) -> AuthResult<Option<Challenge>>;

    /// CAS update. The mutator must preserve `policy` — implementations
    /// reject a changed `resolution_id` as a hard bug.
    ///
    /// # Errors
    ///
    /// `challenge_not_found` / `challenge_expired` for missing records,
    /// `contention` after repeated CAS races, `server_error` on a policy
    /// mutation attempt.
    async fn update(
        &self,
        challenge_id: &str,
        mutator: Mutator<'_, Challenge>,
    ) -> AuthResult<Challenge>;

    /// Terminally revokes a challenge.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    async fn revoke(&self, challenge_id: &str, reason: &str) -> AuthResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_monotonicity() {
        use ChallengeState::*;
        assert!(Created.can_transition_to(InProgress));
        assert!(Created.can_transition_to(Verified));
        assert!(InProgress.can_transition_to(Verified));
        assert!(Verified.can_transition_to(Consumed));
        assert!(InProgress.can_transition_to(Failed));

        // Never backwards.
        assert!(!Verified.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Created));

        // Terminal states accept nothing.
        assert!(!Consumed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(InProgress));
        assert!(Consumed.is_terminal());
        assert!(Failed.is_terminal());
    }

    #[test]
    fn test_transition_enforced() {
        let policy = crate::policy::test_support::policy();
        let mut challenge = Challenge::new(
            "acme",
            ChallengeKind::Login,
            policy,
            serde_json::Value::Null,
            Duration::from_secs(300),
        );
        // 32 bytes of entropy -> 43 chars base64url.
        assert_eq!(challenge.challenge_id.len(), 43);

        challenge.transition(ChallengeState::InProgress).unwrap();
        challenge.transition(ChallengeState::Verified).unwrap();
        let err = challenge.transition(ChallengeState::InProgress).unwrap_err();
        assert!(err.is_flow_local());
        challenge.transition(ChallengeState::Consumed).unwrap();
        assert!(challenge.transition(ChallengeState::Failed).is_err());
    }
}
