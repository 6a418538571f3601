//! Passkey ceremonies.
//!
//! Registration and authentication ride on `webauthn-rs`; ceremony state is
//! serialized into a challenge record (TTL 5 min) so any worker can finish a
//! ceremony another worker started. The relying-party ID is the issuer URL's
//! host and the expected origin is the issuer origin — `webauthn-rs` enforces
//! both against `clientDataJSON`.
//!
//! Counter discipline is enforced here, on top of the library's checks: a
//! successful assertion must present a counter strictly greater than the
//! stored one. Equal or lower means a cloned authenticator; the assertion is
//! rejected as `suspected_replay`, no session is created, and a
//! `security.token.replay_detected` event is emitted.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use url::Url;
use uuid::Uuid;
use webauthn_rs::prelude::{
    CreationChallengeResponse, Passkey, PasskeyAuthentication, PasskeyRegistration,
    PublicKeyCredential, RegisterPublicKeyCredential, RequestChallengeResponse, Webauthn,
    WebauthnBuilder,
};

use oxidp_core::{EventBus, EventContext, EventEnvelope, UnixMillis, event_names};

use crate::error::{AuthError, AuthResult};
use crate::policy::ResolvedPolicy;
use crate::stores::{Challenge, ChallengeKind, ChallengeStore, PasskeyStore, UserStore};
use crate::types::PasskeyCredential;

/// A successful assertion: who authenticated and with what.
#[derive(Debug, Clone)]
pub struct VerifiedPasskey {
    /// The authenticated user.
    pub user_id: Uuid,

    /// Credential used.
    pub credential_id: String,

    /// Counter after the update.
    pub counter: u32,
}

/// Drives passkey registration and authentication.
pub struct PasskeyService {
    webauthn: Webauthn,
    challenges: Arc<dyn ChallengeStore>,
    passkeys: Arc<dyn PasskeyStore>,
    users: Arc<dyn UserStore>,
    bus: Arc<EventBus>,
    challenge_ttl: Duration,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct RegistrationCeremony {
    user_id: Uuid,
    state: PasskeyRegistration,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct AuthenticationCeremony {
    user_id: Uuid,
    state: PasskeyAuthentication,
}

impl PasskeyService {
    /// Creates the service bound to the issuer origin.
    ///
    /// # Errors
    ///
    /// Configuration errors when the issuer URL has no usable host.
    pub fn new(
        issuer: &str,
        rp_name: &str,
        challenge_ttl: Duration,
        challenges: Arc<dyn ChallengeStore>,
        passkeys: Arc<dyn PasskeyStore>,
        users: Arc<dyn UserStore>,
        bus: Arc<EventBus>,
    ) -> AuthResult<Self> {
        let origin = Url::parse(issuer)
            .map_err(|e| AuthError::configuration(format!("issuer URL invalid: {e}")))?;
        let rp_id = origin
            .host_str()
            .ok_or_else(|| AuthError::configuration("issuer URL has no host"))?
            .to_string();
        let webauthn = WebauthnBuilder::new(&rp_id, &origin)
            .map_err(|e| AuthError::configuration(format!("webauthn setup: {e}")))?
            .rp_name(rp_name)
            .build()
            .map_err(|e| AuthError::configuration(format!("webauthn setup: {e}")))?;

        Ok(Self {
            webauthn,
            challenges,
            passkeys,
            users,
            bus,
            challenge_ttl,
        })
    }

    /// Starts a registration ceremony for a user.
    ///
    /// Returns the challenge ID and the creation options for the client.
    ///
    /// # Errors
    ///
    /// Ceremony setup or storage failures.
    pub async fn begin_registration(
        &self,
        policy: &ResolvedPolicy,
        user_id: Uuid,
        user_name: &str,
        display_name: &str,
    ) -> AuthResult<(String, CreationChallengeResponse)> {
        // Exclude already registered credentials so the authenticator
        // doesn't double-enroll.
        let existing = self.passkeys.list_by_user(user_id).await?;
        let exclude = if existing.is_empty() {
            None
        } else {
            Some(
                existing
                    .iter()
                    .filter_map(|c| URL_SAFE_NO_PAD.decode(&c.credential_id).ok())
                    .map(Into::into)
                    .collect(),
            )
        };

        let (creation, state) = self
            .webauthn
            .start_passkey_registration(user_id, user_name, display_name, exclude)
            .map_err(|e| AuthError::validation_failed(format!("registration setup: {e}")))?;

        let ceremony = RegistrationCeremony { user_id, state };
        let challenge = Challenge::new(
            policy.tenant_id.clone(),
            ChallengeKind::PasskeyRegister,
            policy.clone(),
            serde_json::to_value(&ceremony)
                .map_err(|e| AuthError::server_error(format!("ceremony encoding: {e}")))?,
            self.challenge_ttl,
        );
        let challenge_id = challenge.challenge_id.clone();
        self.challenges.put(challenge).await?;
        Ok((challenge_id, creation))
    }

    /// Finishes a registration ceremony and stores the credential.
    ///
    /// The first successful registration proves control of the mailbox the
    /// account was created with, so it also sets `email_verified`.
    ///
    /// # Errors
    ///
    /// `challenge_not_found` / `challenge_expired` for a dead ceremony;
    /// `validation_failed` when attestation does not verify.
    pub async fn finish_registration(
        &self,
        challenge_id: &str,
        credential: &RegisterPublicKeyCredential,
        device_name: Option<String>,
    ) -> AuthResult<PasskeyCredential> {
        let challenge = self
            .challenges
            .consume(challenge_id)
            .await?
            .ok_or(AuthError::ChallengeNotFound)?;
        if challenge.is_expired(UnixMillis::now()) {
            return Err(AuthError::ChallengeExpired);
        }
        let ceremony: RegistrationCeremony = serde_json::from_value(challenge.payload)
            .map_err(|e| AuthError::server_error(format!("corrupt ceremony state: {e}")))?;

        let passkey = self
            .webauthn
            .finish_passkey_registration(credential, &ceremony.state)
            .map_err(|e| AuthError::validation_failed(format!("attestation rejected: {e}")))?;

        let stored = PasskeyCredential {
            credential_id: URL_SAFE_NO_PAD.encode(passkey.cred_id()),
            user_id: ceremony.user_id,
            passkey: serde_json::to_value(&passkey)
                .map_err(|e| AuthError::server_error(format!("credential encoding: {e}")))?,
            counter: 0,
            transports: Vec::new(),
            device_name,
            created_at: UnixMillis::now(),
            last_used_at: None,
        };
        self.passkeys.put(stored.clone()).await?;

        // First credential: the mailbox is proven.
        let user_id = ceremony.user_id;
        let _ = self
            .users
            .update(user_id, &|mut core| {
                core.email_verified = true;
                Ok(core)
            })
            .await;

        self.bus.emit(
            EventEnvelope::new(
                event_names::PASSKEY_REGISTERED,
                &challenge.tenant_id,
                EventContext::for_request(challenge_id),
            )
            .with_actor(oxidp_core::events::Actor::User(user_id.to_string()))
            .with_target(oxidp_core::events::Target::new(
                "passkey",
                &stored.credential_id,
            )),
        );
        Ok(stored)
    }

    /// Starts an authentication ceremony for an identified user.
    ///
    /// # Errors
    ///
    /// `validation_failed` when the user has no registered passkeys.
    pub async fn begin_authentication(
        &self,
        policy: &ResolvedPolicy,
        user_id: Uuid,
    ) -> AuthResult<(String, RequestChallengeResponse)> {
        let credentials = self.passkeys.list_by_user(user_id).await?;
        if credentials.is_empty() {
            return Err(AuthError::validation_failed("no passkeys registered"));
        }
        let allow: Vec<Passkey> = credentials
            .iter()
            .filter_map(|c| serde_json::from_value(c.passkey.clone()).ok())
            .collect();
        if allow.is_empty() {
            return Err(AuthError::server_error("stored passkeys failed to decode"));
        }

        let (request, state) = self
            .webauthn
            .start_passkey_authentication(&allow)
            .map_err(|e| AuthError::validation_failed(format!("authentication setup: {e}")))?;

        let ceremony = AuthenticationCeremony { user_id, state };
        let challenge = Challenge::new(
            policy.tenant_id.clone(),
            ChallengeKind::PasskeyAuth,
            policy.clone(),
            serde_json::to_value(&ceremony)
                .map_err(|e| AuthError::server_error(format!("ceremony encoding: {e}")))?,
            self.challenge_ttl,
        );
        let challenge_id = challenge.challenge_id.clone();
        self.challenges.put(challenge).await?;
        Ok((challenge_id, request))
    }

    /// Finishes an authentication ceremony.
    ///
    /// The stored counter is checked and updated atomically; a
    /// non-increasing counter fails the whole assertion.
    ///
    /// # Errors
    ///
    /// `suspected_replay` on counter regression; `validation_failed` when
    /// the assertion does not verify.
    pub async fn finish_authentication(
        &self,
        challenge_id: &str,
        credential: &PublicKeyCredential,
    ) -> AuthResult<VerifiedPasskey> {
        let challenge = self
            .challenges
            .consume(challenge_id)
            .await?
            .ok_or(AuthError::ChallengeNotFound)?;
        if challenge.is_expired(UnixMillis::now()) {
            return Err(AuthError::ChallengeExpired);
        }
        let ceremony: AuthenticationCeremony = serde_json::from_value(challenge.payload)
            .map_err(|e| AuthError::server_error(format!("corrupt ceremony state: {e}")))?;

        let result = self
            .webauthn
            .finish_passkey_authentication(credential, &ceremony.state)
            .map_err(|e| AuthError::validation_failed(format!("assertion rejected: {e}")))?;

        let credential_id = URL_SAFE_NO_PAD.encode(result.cred_id());
        let new_counter = result.counter();
        let now = UnixMillis::now();

        // Check-and-update atomically: the mutator fails the update when the
        // counter does not strictly increase, so two racing assertions with
        // the same counter cannot both pass.
        let update = self
            .passkeys
            .update(&credential_id, &move |mut stored: PasskeyCredential| {
                if !stored.apply_assertion(new_counter, now) {
                    return Err(AuthError::SuspectedReplay);
                }
                Ok(stored)
            })
            .await;

        match update {
            Ok(stored) => Ok(VerifiedPasskey {
                user_id: stored.user_id,
                credential_id,
                counter: stored.counter,
            }),
            Err(AuthError::SuspectedReplay) => {
                self.bus.emit(
                    EventEnvelope::new(
                        event_names::TOKEN_REPLAY_DETECTED,
                        &challenge.tenant_id,
                        EventContext::for_request(challenge_id),
                    )
                    .with_target(oxidp_core::events::Target::new("passkey", &credential_id))
                    .with_data(serde_json::json!({ "counter": new_counter })),
                );
                Err(AuthError::SuspectedReplay)
            }
            Err(other) => Err(other),
        }
    }
}
