//! The `/authorize` flow driver.
//!
//! Owns the interactive authorization flow end to end: parameter resolution
//! and validation, session and prompt handling, flow-engine transitions,
//! consent gating, and code issuance with redirect assembly. Verifier
//! services (passkey, email code) report success to
//! [`AuthorizeOrchestrator::authentication_succeeded`]; they never touch the
//! flow state themselves.
//!
//! Every state change is CAS-persisted into the challenge before a response
//! leaves, so a crashed request can be resumed from the stored state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use oxidp_core::{
    EventBus, EventContext, EventEnvelope, UnixMillis, event_names, generate_id,
};

use crate::config::AuthConfig;
use crate::consent::{ConsentDecision, ConsentService};
use crate::error::{AuthError, AuthResult};
use crate::flow::{
    ClientDisplay, FlowContext, FlowEvent, FlowState, UiContext, UiContract, UiError, advance,
    apply_event,
};
use crate::oauth::authorize::{
    self, AuthorizeParams, ValidatedAuthorizeRequest, error_redirect, success_redirect,
};
use crate::oauth::request_object::RequestObjectResolver;
use crate::policy::{ContractRegistry, PolicyResolver, ResolvedPolicy};
use crate::stores::{
    AuthorizationCode, Challenge, ChallengeKind, ChallengeState, ChallengeStore, CodeStore,
    Session, SessionStore, UserStore,
};
use crate::types::EmailBlindIndex;

/// Outcome of driving the flow one step.
#[derive(Debug, Clone)]
pub enum AuthorizeOutcome {
    /// Follow the redirect (success or protocol error).
    Redirect {
        /// Full redirect URL.
        url: String,
        /// Session to set as a cookie, when one was just created.
        set_session: Option<String>,
    },
    /// Render the contract and wait for the user.
    Interact {
        /// Challenge driving the interaction.
        challenge_id: String,
        /// The per-step UI contract.
        contract: UiContract,
    },
}

/// The login challenge's payload: the validated request plus flow state and
/// the facts accumulated along the way. Ceremony state (WebAuthn, OTP) is
/// written into `ceremony` by the verifier services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowPayload {
    /// The validated authorization request.
    pub request: ValidatedAuthorizeRequest,

    /// Current flow-engine state.
    pub state: FlowState,

    /// Located user, once identified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,

    /// Submitted identifier (for code delivery and display masking).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Session covering the flow, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Methods used to authenticate in this flow.
    #[serde(default)]
    pub amr: Vec<String>,

    /// ACR achieved in this flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,

    /// When authentication happened in this flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<UnixMillis>,

    /// Consent already satisfied.
    #[serde(default)]
    pub consent_satisfied: bool,

    /// Scopes missing consent.
    #[serde(default)]
    pub consent_missing: Vec<String>,

    /// Verifier scratch space (serialized ceremony state).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub ceremony: serde_json::Value,

    /// Flow-local error to surface on the next contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl FlowPayload {
    /// Deserializes a payload from a challenge.
    ///
    /// # Errors
    ///
    /// `server_error` when the stored payload does not parse — stored state
    /// is never user input.
    pub fn from_challenge(challenge: &Challenge) -> AuthResult<Self> {
        serde_json::from_value(challenge.payload.clone())
            .map_err(|e| AuthError::server_error(format!("corrupt flow payload: {e}")))
    }

    /// Serializes for storage.
    ///
    /// # Errors
    ///
    /// `server_error` on serialization failure.
    pub fn to_value(&self) -> AuthResult<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| AuthError::server_error(format!("flow payload encoding: {e}")))
    }

    fn flow_context(&self) -> FlowContext {
        FlowContext {
            has_session: self.session_id.is_some(),
            force_login: self.request.prompt_login,
            prompt_none: self.request.prompt_none,
            force_consent: self.request.prompt_consent,
            consent_satisfied: self.consent_satisfied,
            consent_missing: self.consent_missing.clone(),
            user_identified: self.user_id.is_some(),
        }
    }
}

/// Drives `/authorize` flows.
pub struct AuthorizeOrchestrator {
    registry: Arc<ContractRegistry>,
    policy_resolver: Arc<PolicyResolver>,
    request_resolver: Arc<RequestObjectResolver>,
    challenges: Arc<dyn ChallengeStore>,
    codes: Arc<dyn CodeStore>,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    consent: Arc<ConsentService>,
    bus: Arc<EventBus>,
    config: AuthConfig,
    blind_index_key: Vec<u8>,
}

impl AuthorizeOrchestrator {
    /// Wires the orchestrator.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        registry: Arc<ContractRegistry>,
        policy_resolver: Arc<PolicyResolver>,
        request_resolver: Arc<RequestObjectResolver>,
        challenges: Arc<dyn ChallengeStore>,
        codes: Arc<dyn CodeStore>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        consent: Arc<ConsentService>,
        bus: Arc<EventBus>,
        config: AuthConfig,
        blind_index_key: Vec<u8>,
    ) -> Self {
        Self {
            registry,
            policy_resolver,
            request_resolver,
            challenges,
            codes,
            sessions,
            users,
            consent,
            bus,
            config,
            blind_index_key,
        }
    }

    /// Entry point for `GET /authorize`.
    ///
    /// # Errors
    ///
    /// Direct (non-redirect) errors only: unknown client, invalid redirect
    /// URI, unresolvable request references. Everything after redirect
    /// validation comes back as an error redirect.
    pub async fn begin(
        &self,
        params: AuthorizeParams,
        cookie_session: Option<&str>,
    ) -> AuthResult<AuthorizeOutcome> {
        let client_id = params
            .client_id
            .clone()
            .ok_or_else(|| AuthError::invalid_request("client_id is required"))?;
        let (tenant, client) = self.registry.pair(&client_id)?;

        // Resolve PAR / request object references before anything else; a
        // failing reference is a direct error (no redirect validated yet).
        let params = self.request_resolver.resolve(params, &client).await?;

        let policy = self.policy_resolver.resolve(&tenant, &client)?;

        // Redirect URI is validated inside `validate`; a validation failure
        // after that point is redirectable.
        let redirect_validated = params
            .redirect_uri
            .as_deref()
            .is_some_and(|uri| client.has_redirect_uri(uri));

        let request = match authorize::validate(&params, &client, &policy) {
            Ok(request) => request,
            Err(err) if redirect_validated => {
                let url = error_redirect(
                    params.redirect_uri.as_deref().unwrap_or_default(),
                    err.oauth_error_code(),
                    Some(&err.to_string()),
                    params.state.as_deref(),
                )?;
                return Ok(AuthorizeOutcome::Redirect {
                    url,
                    set_session: None,
                });
            }
            Err(err) => return Err(err),
        };

        let mut payload = FlowPayload {
            request,
            state: FlowState::Validating,
            user_id: None,
            email: None,
            session_id: None,
            amr: Vec::new(),
            acr: None,
            auth_time: None,
            consent_satisfied: false,
            consent_missing: Vec::new(),
            ceremony: serde_json::Value::Null,
            last_error: None,
        };

        // Session check, including max_age.
        if let Some(session_id) = cookie_session {
            if let Some(session) = self.sessions.get(session_id).await? {
                let max_age_exceeded = payload
                    .request
                    .max_age
                    .is_some_and(|age| session.exceeds_max_age(age, UnixMillis::now()));
                if !max_age_exceeded || payload.request.prompt_none {
                    payload.session_id = Some(session.session_id.clone());
                    payload.user_id = Some(session.user_id);
                    payload.amr = session.amr.clone();
                    payload.acr = session.acr.clone();
                    payload.auth_time = Some(session.auth_time);
                    // Activity observed: push the idle window forward.
                    self.sessions
                        .extend(
                            &session.session_id,
                            UnixMillis::now() + policy.session_idle_ttl,
                        )
                        .await?;
                }
                if max_age_exceeded {
                    // Covered session, stale authentication.
                    payload.request.prompt_login = true;
                }
            }
        }

        // Consent precheck needs an identified user.
        if let Some(user_id) = payload.user_id {
            self.precheck_consent(&mut payload, user_id, &policy).await?;
        }

        payload.state = advance(FlowState::Validating, &payload.flow_context());
        self.settle(payload, policy).await
    }

    /// `SUBMIT` with an identifier from the identify step.
    ///
    /// # Errors
    ///
    /// Flow-local errors; storage failures.
    pub async fn submit_identifier(
        &self,
        challenge_id: &str,
        identifier: &str,
    ) -> AuthResult<AuthorizeOutcome> {
        let challenge = self.load_challenge(challenge_id).await?;
        let mut payload = FlowPayload::from_challenge(&challenge)?;
        let policy = challenge.policy.clone();

        let index = EmailBlindIndex::compute(&self.blind_index_key, identifier);
        let user = self.users.find_by_email_index(&index).await?;
        match user {
            Some(core) if core.can_authenticate() => {
                payload.user_id = Some(core.user_id);
                payload.email = Some(identifier.to_string());
                payload.last_error = None;
            }
            _ => {
                // Unknown or blocked: same response either way, no oracle.
                payload.user_id = None;
                payload.last_error = Some("unknown_identifier".to_string());
            }
        }

        let ctx = payload.flow_context();
        payload.state = apply_event(&payload.state, &FlowEvent::Submit, &ctx)?;
        self.persist_and_respond(challenge, payload, policy).await
    }

    /// A plain UI event (method selection, back, cancel, resend).
    ///
    /// # Errors
    ///
    /// `invalid_transition` for events the state does not accept.
    pub async fn apply_ui_event(
        &self,
        challenge_id: &str,
        event: FlowEvent,
    ) -> AuthResult<AuthorizeOutcome> {
        let challenge = self.load_challenge(challenge_id).await?;
        let mut payload = FlowPayload::from_challenge(&challenge)?;
        let policy = challenge.policy.clone();

        let ctx = payload.flow_context();
        payload.state = apply_event(&payload.state, &event, &ctx)?;
        self.persist_and_respond(challenge, payload, policy).await
    }

    /// Called by a verifier service after a successful ceremony.
    ///
    /// # Errors
    ///
    /// Flow-local errors; storage failures.
    pub async fn authentication_succeeded(
        &self,
        challenge_id: &str,
        user_id: Uuid,
        amr: Vec<String>,
        acr: Option<String>,
    ) -> AuthResult<AuthorizeOutcome> {
        let challenge = self.load_challenge(challenge_id).await?;
        let mut payload = FlowPayload::from_challenge(&challenge)?;
        let policy = challenge.policy.clone();

        payload.user_id = Some(user_id);
        payload.amr = amr;
        payload.acr = acr;
        payload.auth_time = Some(UnixMillis::now());
        payload.last_error = None;

        // Record the login and create the browser session before the state
        // moves on; the session is the durable fact.
        let session = Session::new(
            user_id,
            challenge.tenant_id.clone(),
            payload.amr.clone(),
            payload.acr.clone(),
            policy.session_absolute_ttl,
            policy.session_idle_ttl,
        );
        let session_id = session.session_id.clone();
        self.sessions.put(session).await?;
        payload.session_id = Some(session_id.clone());

        let _ = self
            .users
            .update(user_id, &|mut core| {
                core.record_login(UnixMillis::now());
                Ok(core)
            })
            .await;

        self.precheck_consent(&mut payload, user_id, &policy).await?;

        self.bus.emit(
            EventEnvelope::new(
                event_names::AUTH_LOGIN_SUCCEEDED,
                &challenge.tenant_id,
                EventContext::for_request(challenge_id)
                    .with_client(&policy.client_id)
                    .with_session(&session_id),
            )
            .with_actor(oxidp_core::events::Actor::User(user_id.to_string()))
            .with_data(serde_json::json!({ "amr": payload.amr })),
        );
        self.bus.emit(EventEnvelope::new(
            event_names::SESSION_CREATED,
            &challenge.tenant_id,
            EventContext::for_request(challenge_id).with_session(&session_id),
        ));

        let ctx = payload.flow_context();
        payload.state = apply_event(&payload.state, &FlowEvent::Confirm, &ctx)?;
        self.persist_and_respond(challenge, payload, policy).await
    }

    /// `APPROVE` / `DENY` on the consent prompt.
    ///
    /// # Errors
    ///
    /// Flow-local errors; storage failures.
    pub async fn consent_decision(
        &self,
        challenge_id: &str,
        approve: bool,
    ) -> AuthResult<AuthorizeOutcome> {
        let challenge = self.load_challenge(challenge_id).await?;
        let mut payload = FlowPayload::from_challenge(&challenge)?;
        let policy = challenge.policy.clone();

        if approve {
            let user_id = payload
                .user_id
                .ok_or_else(|| AuthError::server_error("consent without an identified user"))?;
            self.consent
                .grant(user_id, &policy.client_id, payload.request.scopes.clone())
                .await?;
            payload.consent_satisfied = true;
            payload.consent_missing.clear();
            self.bus.emit(
                EventEnvelope::new(
                    event_names::CONSENT_GRANT_CREATED,
                    &challenge.tenant_id,
                    EventContext::for_request(challenge_id).with_client(&policy.client_id),
                )
                .with_actor(oxidp_core::events::Actor::User(user_id.to_string()))
                .with_data(serde_json::json!({ "scopes": payload.request.scopes })),
            );
        }

        let event = if approve {
            FlowEvent::Approve
        } else {
            FlowEvent::Deny
        };
        let ctx = payload.flow_context();
        payload.state = apply_event(&payload.state, &event, &ctx)?;
        self.persist_and_respond(challenge, payload, policy).await
    }

    /// Rebuilds the current contract without changing state.
    ///
    /// # Errors
    ///
    /// `challenge_not_found` / `challenge_expired`.
    pub async fn contract(&self, challenge_id: &str) -> AuthResult<UiContract> {
        let challenge = self.load_challenge(challenge_id).await?;
        let payload = FlowPayload::from_challenge(&challenge)?;
        self.build_contract(&payload, &challenge.policy)
    }

    /// The identified user and email of a flow, for the verifier endpoints.
    ///
    /// # Errors
    ///
    /// `challenge_not_found` / `challenge_expired`.
    pub async fn flow_user(
        &self,
        challenge_id: &str,
    ) -> AuthResult<(Option<Uuid>, Option<String>, ResolvedPolicy)> {
        let challenge = self.load_challenge(challenge_id).await?;
        let payload = FlowPayload::from_challenge(&challenge)?;
        Ok((payload.user_id, payload.email, challenge.policy))
    }

    /// Stores verifier scratch data (ceremony references) on the flow.
    ///
    /// # Errors
    ///
    /// `challenge_not_found`; CAS `contention`.
    pub async fn attach_ceremony(
        &self,
        challenge_id: &str,
        ceremony: serde_json::Value,
    ) -> AuthResult<()> {
        self.challenges
            .update(challenge_id, &move |mut current: Challenge| {
                let mut payload: FlowPayload = serde_json::from_value(current.payload.clone())
                    .map_err(|e| AuthError::server_error(format!("corrupt flow payload: {e}")))?;
                payload.ceremony = ceremony.clone();
                current.payload = serde_json::to_value(&payload)
                    .map_err(|e| AuthError::server_error(format!("flow payload encoding: {e}")))?;
                Ok(current)
            })
            .await?;
        Ok(())
    }

    /// Reads back verifier scratch data.
    ///
    /// # Errors
    ///
    /// `challenge_not_found` / `challenge_expired`.
    pub async fn ceremony(&self, challenge_id: &str) -> AuthResult<serde_json::Value> {
        let challenge = self.load_challenge(challenge_id).await?;
        let payload = FlowPayload::from_challenge(&challenge)?;
        Ok(payload.ceremony)
    }

    /// Marks a flow-local verification failure so the next contract carries
    /// the error.
    pub async fn note_verification_failure(&self, challenge_id: &str) {
        let _ = self
            .challenges
            .update(challenge_id, &|mut current: Challenge| {
                let mut payload: FlowPayload = serde_json::from_value(current.payload.clone())
                    .map_err(|e| AuthError::server_error(format!("corrupt flow payload: {e}")))?;
                payload.last_error = Some("verification_failed".to_string());
                current.payload = serde_json::to_value(&payload)
                    .map_err(|e| AuthError::server_error(format!("flow payload encoding: {e}")))?;
                Ok(current)
            })
            .await;
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn load_challenge(&self, challenge_id: &str) -> AuthResult<Challenge> {
        let challenge = self
            .challenges
            .get(challenge_id)
            .await?
            .ok_or(AuthError::ChallengeNotFound)?;
        if challenge.is_expired(UnixMillis::now()) {
            return Err(AuthError::ChallengeExpired);
        }
        if challenge.state.is_terminal() {
            return Err(AuthError::ChallengeConsumed);
        }
        Ok(challenge)
    }

    async fn precheck_consent(
        &self,
        payload: &mut FlowPayload,
        user_id: Uuid,
        policy: &ResolvedPolicy,
    ) -> AuthResult<()> {
        match self
            .consent
            .check(user_id, policy, &payload.request.scopes)
            .await?
        {
            ConsentDecision::Granted { .. } => {
                payload.consent_satisfied = true;
                payload.consent_missing.clear();
            }
            ConsentDecision::PromptRequired { missing, .. } => {
                payload.consent_satisfied = false;
                payload.consent_missing = missing;
            }
        }
        Ok(())
    }

    /// First settle: create the challenge when interaction is needed, or
    /// short-circuit to a redirect.
    async fn settle(
        &self,
        payload: FlowPayload,
        policy: ResolvedPolicy,
    ) -> AuthResult<AuthorizeOutcome> {
        match payload.state.clone() {
            FlowState::IssuingCode => {
                // Non-interactive completion (live session + consent).
                let tenant_id = policy.tenant_id.clone();
                self.issue_code_redirect(&tenant_id, payload, &policy, None)
                    .await
            }
            FlowState::Errored { code } => {
                let url = error_redirect(
                    &payload.request.redirect_uri,
                    &code,
                    None,
                    payload.request.state.as_deref(),
                )?;
                Ok(AuthorizeOutcome::Redirect {
                    url,
                    set_session: None,
                })
            }
            _ => {
                let mut challenge = Challenge::new(
                    policy.tenant_id.clone(),
                    ChallengeKind::Login,
                    policy.clone(),
                    payload.to_value()?,
                    self.config.session.idle_ttl.min(std::time::Duration::from_secs(1800)),
                );
                challenge.transition(ChallengeState::InProgress)?;
                let challenge_id = challenge.challenge_id.clone();
                self.challenges.put(challenge).await?;
                debug!(challenge = %challenge_id, state = payload.state.name(), "authorization flow started");
                let contract = self.build_contract(&payload, &policy)?;
                Ok(AuthorizeOutcome::Interact {
                    challenge_id,
                    contract,
                })
            }
        }
    }

    /// Persists the new state (CAS) and renders the outcome. Persistence
    /// happens before any response leaves.
    async fn persist_and_respond(
        &self,
        challenge: Challenge,
        payload: FlowPayload,
        policy: ResolvedPolicy,
    ) -> AuthResult<AuthorizeOutcome> {
        let value = payload.to_value()?;
        let terminal = payload.state.is_terminal() || payload.state == FlowState::IssuingCode;

        let challenge_id = challenge.challenge_id.clone();
        let updated = self
            .challenges
            .update(&challenge_id, &move |mut current: Challenge| {
                current.payload = value.clone();
                Ok(current)
            })
            .await?;

        match payload.state.clone() {
            FlowState::IssuingCode => {
                let tenant_id = updated.tenant_id.clone();
                let outcome = self
                    .issue_code_redirect(&tenant_id, payload, &policy, Some(&challenge_id))
                    .await?;
                Ok(outcome)
            }
            FlowState::Errored { code } => {
                // Terminal: burn the challenge, redirect with the error.
                let _ = self.challenges.consume(&challenge_id).await?;
                let url = error_redirect(
                    &payload.request.redirect_uri,
                    &code,
                    None,
                    payload.request.state.as_deref(),
                )?;
                Ok(AuthorizeOutcome::Redirect {
                    url,
                    set_session: payload.session_id.clone(),
                })
            }
            _ => {
                debug_assert!(!terminal);
                let contract = self.build_contract(&payload, &policy)?;
                Ok(AuthorizeOutcome::Interact {
                    challenge_id,
                    contract,
                })
            }
        }
    }

    fn build_contract(
        &self,
        payload: &FlowPayload,
        policy: &ResolvedPolicy,
    ) -> AuthResult<UiContract> {
        let client = self.registry.client(&policy.client_id);
        let context = UiContext {
            client: client.map(|c| ClientDisplay {
                client_id: c.client_id.clone(),
                client_name: if c.client_name.is_empty() {
                    c.client_id.clone()
                } else {
                    c.client_name.clone()
                },
            }),
            user: payload.email.as_deref().map(mask_email),
            error: payload.last_error.as_ref().map(|code| UiError {
                code: code.clone(),
                message: match code.as_str() {
                    "unknown_identifier" => "We could not find an account for that address".into(),
                    "verification_failed" => "Verification failed, try again".into(),
                    other => other.to_string().replace('_', " "),
                },
            }),
        };
        UiContract::build(&payload.state, policy, context)
    }

    /// Mints the authorization code and assembles the redirect. The code is
    /// durable before the redirect is returned.
    async fn issue_code_redirect(
        &self,
        tenant_id: &str,
        payload: FlowPayload,
        policy: &ResolvedPolicy,
        challenge_id: Option<&str>,
    ) -> AuthResult<AuthorizeOutcome> {
        let sub = payload
            .user_id
            .ok_or_else(|| AuthError::server_error("issuing a code without a user"))?;
        let auth_time = payload.auth_time.unwrap_or_else(UnixMillis::now);
        let now = UnixMillis::now();

        let code = AuthorizationCode {
            code: generate_id(32),
            client_id: payload.request.client_id.clone(),
            tenant_id: tenant_id.to_string(),
            redirect_uri: payload.request.redirect_uri.clone(),
            scope: payload.request.scopes.join(" "),
            sub: sub.to_string(),
            nonce: payload.request.nonce.clone(),
            code_challenge: payload.request.code_challenge.clone(),
            code_challenge_method: payload.request.code_challenge.as_ref().map(|_| "S256".into()),
            auth_time,
            acr: payload.acr.clone(),
            amr: payload.amr.clone(),
            resolved_policy_id: policy.resolution_id.clone(),
            session_id: payload.session_id.clone(),
            issued_at: now,
            expires_at: now + policy.auth_code_ttl,
        };
        let code_value = code.code.clone();
        self.codes.put(code).await?;

        if let Some(challenge_id) = challenge_id {
            // The flow is finished; retire its challenge.
            let _ = self.challenges.consume(challenge_id).await?;
        }

        self.bus.emit(
            EventEnvelope::new(
                event_names::AUTH_CODE_ISSUED,
                tenant_id,
                EventContext::for_request(challenge_id.unwrap_or("direct"))
                    .with_client(&payload.request.client_id),
            )
            .with_actor(oxidp_core::events::Actor::User(sub.to_string())),
        );
        info!(client = %payload.request.client_id, "authorization code issued");

        let url = success_redirect(
            &payload.request.redirect_uri,
            &code_value,
            payload.request.state.as_deref(),
        )?;
        Ok(AuthorizeOutcome::Redirect {
            url,
            set_session: payload.session_id,
        })
    }
}

fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if local.len() > 1 => {
            format!("{}***@{domain}", &local[..1])
        }
        _ => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("alice@example.com"), "a***@example.com");
        assert_eq!(mask_email("a@example.com"), "***");
        assert_eq!(mask_email("not-an-email"), "***");
    }

    #[test]
    fn test_flow_payload_roundtrip() {
        let payload = FlowPayload {
            request: ValidatedAuthorizeRequest {
                client_id: "public-spa".into(),
                redirect_uri: "https://app.example/cb".into(),
                scopes: vec!["openid".into()],
                state: Some("xyz".into()),
                nonce: Some("n-abc".into()),
                code_challenge: None,
                acr_values: None,
                login_hint: None,
                prompt_none: false,
                prompt_login: false,
                prompt_consent: false,
                max_age: None,
            },
            state: FlowState::Validating,
            user_id: None,
            email: None,
            session_id: None,
            amr: vec![],
            acr: None,
            auth_time: None,
            consent_satisfied: false,
            consent_missing: vec![],
            ceremony: serde_json::Value::Null,
            last_error: None,
        };
        let value = payload.to_value().unwrap();
        let challenge = Challenge::new(
            "acme",
            ChallengeKind::Login,
            crate::policy::test_support::policy(),
            value,
            std::time::Duration::from_secs(300),
        );
        let back = FlowPayload::from_challenge(&challenge).unwrap();
        assert_eq!(back.request.client_id, "public-spa");
        assert_eq!(back.state, FlowState::Validating);
    }
}
