//! Email one-time codes.
//!
//! Six digits, five-minute TTL, five attempts. Sends are limited to 3 per
//! 15 minutes per address and verifications to 10 per 15 minutes per
//! challenge. The code itself never touches storage — only its SHA-256 hash
//! does — and transport is behind the [`EmailSender`] adapter so the core
//! never composes message bodies.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use oxidp_core::{UnixMillis, generate_otp};

use crate::config::{PasswordlessConfig, RateLimitConfig};
use crate::error::{AuthError, AuthResult};
use crate::policy::ResolvedPolicy;
use crate::rate_limit::RateLimiter;
use crate::stores::{Challenge, ChallengeKind, ChallengeStore};

/// Outbound email transport boundary. Implementations deliver the code;
/// body composition happens outside the core.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Delivers a one-time code to `email`.
    async fn send_code(&self, email: &str, code: &str) -> AuthResult<()>;
}

/// A verified email code: which user proved control of which mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedEmail {
    /// The user that was being verified.
    pub user_id: Uuid,

    /// The proven address.
    pub email: String,
}

#[derive(Serialize, Deserialize)]
struct OtpCeremony {
    user_id: Uuid,
    email: String,
    code_hash: String,
    attempts: u32,
}

/// Issues and verifies email codes.
pub struct EmailOtpService {
    challenges: Arc<dyn ChallengeStore>,
    sender: Arc<dyn EmailSender>,
    rate_limiter: Arc<RateLimiter>,
    config: PasswordlessConfig,
    limits: RateLimitConfig,
}

impl EmailOtpService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        challenges: Arc<dyn ChallengeStore>,
        sender: Arc<dyn EmailSender>,
        rate_limiter: Arc<RateLimiter>,
        config: PasswordlessConfig,
        limits: RateLimitConfig,
    ) -> Self {
        Self {
            challenges,
            sender,
            rate_limiter,
            config,
            limits,
        }
    }

    /// Generates a code, stores its hash, and hands it to the transport.
    ///
    /// Returns the OTP challenge ID to verify against.
    ///
    /// # Errors
    ///
    /// `RateLimited` past 3 sends / 15 min per address; transport and
    /// storage failures.
    pub async fn send(
        &self,
        policy: &ResolvedPolicy,
        user_id: Uuid,
        email: &str,
    ) -> AuthResult<String> {
        self.rate_limiter.enforce(
            &RateLimiter::key(&policy.tenant_id, "send-email", email),
            &self.limits.send_email,
        )?;

        let code = generate_otp();
        let ceremony = OtpCeremony {
            user_id,
            email: email.to_string(),
            code_hash: hex::encode(Sha256::digest(code.as_bytes())),
            attempts: 0,
        };
        let challenge = Challenge::new(
            policy.tenant_id.clone(),
            ChallengeKind::EmailCode,
            policy.clone(),
            serde_json::to_value(&ceremony)
                .map_err(|e| AuthError::server_error(format!("ceremony encoding: {e}")))?,
            self.config.email_code_ttl,
        );
        let challenge_id = challenge.challenge_id.clone();
        self.challenges.put(challenge).await?;

        // Send after the hash is durable so a verified code always has a
        // record to match.
        self.sender.send_code(email, &code).await?;
        Ok(challenge_id)
    }

    /// Verifies a submitted code.
    ///
    /// Attempts are counted through CAS before comparison, so parallel
    /// guesses cannot dodge the cap. The challenge is consumed on success
    /// and invalidated after the fifth failure.
    ///
    /// # Errors
    ///
    /// `validation_failed` on a wrong code (with attempts left),
    /// `challenge_*` when dead, `RateLimited` past the verify window.
    pub async fn verify(&self, challenge_id: &str, code: &str) -> AuthResult<VerifiedEmail> {
        let challenge = self
            .challenges
            .get(challenge_id)
            .await?
            .ok_or(AuthError::ChallengeNotFound)?;
        if challenge.is_expired(UnixMillis::now()) {
            return Err(AuthError::ChallengeExpired);
        }

        self.rate_limiter.enforce(
            &RateLimiter::key(&challenge.tenant_id, "code-verify", challenge_id),
            &self.limits.code_verify,
        )?;

        let max_attempts = self.config.email_code_max_attempts;

        // Count the attempt first.
        let updated = self
            .challenges
            .update(challenge_id, &move |mut current: Challenge| {
                let mut ceremony: OtpCeremony = serde_json::from_value(current.payload.clone())
                    .map_err(|e| AuthError::server_error(format!("corrupt ceremony: {e}")))?;
                if ceremony.attempts >= max_attempts {
                    return Err(AuthError::validation_failed("too many attempts"));
                }
                ceremony.attempts += 1;
                current.payload = serde_json::to_value(&ceremony)
                    .map_err(|e| AuthError::server_error(format!("ceremony encoding: {e}")))?;
                Ok(current)
            })
            .await;

        let updated = match updated {
            Ok(challenge) => challenge,
            Err(err) => {
                // Attempt cap reached: burn the challenge.
                let _ = self.challenges.revoke(challenge_id, "attempt limit").await;
                return Err(err);
            }
        };

        let ceremony: OtpCeremony = serde_json::from_value(updated.payload.clone())
            .map_err(|e| AuthError::server_error(format!("corrupt ceremony: {e}")))?;

        let presented = hex::encode(Sha256::digest(code.as_bytes()));
        let matches: bool = presented
            .as_bytes()
            .ct_eq(ceremony.code_hash.as_bytes())
            .into();
        if !matches {
            if ceremony.attempts >= max_attempts {
                let _ = self.challenges.revoke(challenge_id, "attempt limit").await;
            }
            return Err(AuthError::validation_failed("incorrect code"));
        }

        // Success consumes the challenge; a second submission of the same
        // code finds nothing.
        self.challenges
            .consume(challenge_id)
            .await?
            .ok_or(AuthError::ChallengeConsumed)?;

        Ok(VerifiedEmail {
            user_id: ceremony.user_id,
            email: ceremony.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::Mutator;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryChallenges(Mutex<HashMap<String, Challenge>>);

    #[async_trait]
    impl ChallengeStore for MemoryChallenges {
        async fn put(&self, challenge: Challenge) -> AuthResult<()> {
            self.0
                .lock()
                .unwrap()
                .insert(challenge.challenge_id.clone(), challenge);
            Ok(())
        }
        async fn get(&self, id: &str) -> AuthResult<Option<Challenge>> {
            Ok(self.0.lock().unwrap().get(id).cloned())
        }
        async fn consume(&self, id: &str) -> AuthResult<Option<Challenge>> {
            Ok(self.0.lock().unwrap().remove(id))
        }
        async fn update(&self, id: &str, mutator: Mutator<'_, Challenge>) -> AuthResult<Challenge> {
            let mut map = self.0.lock().unwrap();
            let current = map.get(id).cloned().ok_or(AuthError::ChallengeNotFound)?;
            let next = mutator(current)?;
            map.insert(id.to_string(), next.clone());
            Ok(next)
        }
        async fn revoke(&self, id: &str, _reason: &str) -> AuthResult<()> {
            self.0.lock().unwrap().remove(id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CapturingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl EmailSender for CapturingSender {
        async fn send_code(&self, email: &str, code: &str) -> AuthResult<()> {
            self.sent
                .lock()
                .unwrap()
                .push((email.to_string(), code.to_string()));
            Ok(())
        }
    }

    fn service(sender: Arc<CapturingSender>) -> EmailOtpService {
        EmailOtpService::new(
            Arc::new(MemoryChallenges::default()),
            sender,
            Arc::new(RateLimiter::new()),
            PasswordlessConfig::default(),
            RateLimitConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_send_and_verify_roundtrip() {
        let sender = Arc::new(CapturingSender::default());
        let service = service(Arc::clone(&sender));
        let policy = crate::policy::test_support::policy();
        let user = Uuid::new_v4();

        let challenge_id = service.send(&policy, user, "a@example.com").await.unwrap();
        let (email, code) = sender.sent.lock().unwrap()[0].clone();
        assert_eq!(email, "a@example.com");
        assert_eq!(code.len(), 6);

        let verified = service.verify(&challenge_id, &code).await.unwrap();
        assert_eq!(verified.user_id, user);
        assert_eq!(verified.email, "a@example.com");

        // Single use: replaying the same code finds nothing.
        assert!(matches!(
            service.verify(&challenge_id, &code).await,
            Err(AuthError::ChallengeNotFound)
        ));
    }

    #[tokio::test]
    async fn test_wrong_code_counts_attempts_then_invalidates() {
        let sender = Arc::new(CapturingSender::default());
        let service = service(Arc::clone(&sender));
        let policy = crate::policy::test_support::policy();

        let challenge_id = service
            .send(&policy, Uuid::new_v4(), "a@example.com")
            .await
            .unwrap();
        let code = sender.sent.lock().unwrap()[0].1.clone();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..5 {
            let err = service.verify(&challenge_id, wrong).await.unwrap_err();
            assert!(matches!(err, AuthError::ValidationFailed { .. }));
        }
        // Fifth failure invalidated the challenge; even the right code is
        // dead now.
        let err = service.verify(&challenge_id, &code).await.unwrap_err();
        assert!(matches!(err, AuthError::ChallengeNotFound));
    }

    #[tokio::test]
    async fn test_send_rate_limit_three_per_window() {
        let sender = Arc::new(CapturingSender::default());
        let service = service(Arc::clone(&sender));
        let policy = crate::policy::test_support::policy();
        let user = Uuid::new_v4();

        for _ in 0..3 {
            service.send(&policy, user, "a@example.com").await.unwrap();
        }
        let err = service.send(&policy, user, "a@example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::RateLimited { .. }));

        // A different address has its own window.
        assert!(service.send(&policy, user, "b@example.com").await.is_ok());
    }
}
