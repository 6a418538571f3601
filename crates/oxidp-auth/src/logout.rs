//! Logout propagation.
//!
//! RP-initiated logout validates the `id_token_hint` (expired ID tokens are
//! accepted — the user is logging out), revokes every session of the
//! subject, and propagates: front-channel URIs are returned for the UI to
//! iframe, back-channel URIs receive a signed logout token over POST. The
//! receiving side (`/logout/backchannel`) verifies inbound logout tokens
//! when this provider acts as an RP to an upstream OP.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use oxidp_core::{EventBus, EventContext, EventEnvelope, event_names};

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::policy::ContractRegistry;
use crate::stores::SessionStore;
use crate::token::claims::{IdTokenClaims, LogoutTokenClaims};
use crate::token::issuer::{TokenIssuer, VerifyExpectations};

/// `GET /logout` query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct LogoutParams {
    /// The ID token identifying who is logging out.
    pub id_token_hint: Option<String>,

    /// Where to send the browser afterwards. Must be registered.
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,

    /// Opaque state echoed on the redirect.
    #[serde(default)]
    pub state: Option<String>,
}

/// What the UI should do after logout.
#[derive(Debug, Clone)]
pub struct LogoutResult {
    /// Sessions revoked.
    pub revoked_sessions: u64,

    /// Front-channel logout URIs to load.
    pub frontchannel_uris: Vec<String>,

    /// Redirect target, when a valid `post_logout_redirect_uri` was given.
    pub redirect: Option<String>,
}

/// Coordinates logout across sessions and relying parties.
pub struct LogoutCoordinator {
    registry: Arc<ContractRegistry>,
    sessions: Arc<dyn SessionStore>,
    issuer: Arc<TokenIssuer>,
    http: reqwest::Client,
    bus: Arc<EventBus>,
}

impl LogoutCoordinator {
    /// Wires the coordinator.
    #[must_use]
    pub fn new(
        registry: Arc<ContractRegistry>,
        sessions: Arc<dyn SessionStore>,
        issuer: Arc<TokenIssuer>,
        bus: Arc<EventBus>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            registry,
            sessions,
            issuer,
            http: reqwest::Client::builder()
                .timeout(config.outbound_timeout)
                .build()
                .unwrap_or_default(),
            bus,
        }
    }

    /// Handles RP-initiated logout.
    ///
    /// # Errors
    ///
    /// `invalid_token` when the hint does not verify (signature and issuer
    /// are still enforced; only expiry is waived).
    pub async fn rp_initiated_logout(&self, params: LogoutParams) -> AuthResult<LogoutResult> {
        let hint = params
            .id_token_hint
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("id_token_hint is required"))?;

        let claims: IdTokenClaims = self
            .issuer
            .verify(
                hint,
                &VerifyExpectations {
                    allow_expired: true,
                    ..VerifyExpectations::default()
                },
            )
            .await?;

        let sub = Uuid::parse_str(&claims.sub)
            .map_err(|_| AuthError::invalid_token("id_token_hint subject is not a UUID"))?;

        let client = self.registry.client(&claims.aud);

        // The redirect target must be registered to the hinted client.
        let redirect = match (&params.post_logout_redirect_uri, &client) {
            (Some(uri), Some(client)) if client.has_redirect_uri(uri) => {
                let mut url = url::Url::parse(uri)
                    .map_err(|_| AuthError::invalid_request("post_logout_redirect_uri invalid"))?;
                if let Some(state) = &params.state {
                    url.query_pairs_mut().append_pair("state", state);
                }
                Some(url.to_string())
            }
            (Some(_), _) => None,
            (None, _) => None,
        };

        // Revoke every session of the subject.
        let sessions = self.sessions.list_by_user(sub).await?;
        let mut tenant_id = String::new();
        let mut revoked = 0u64;
        let mut sids: Vec<String> = Vec::new();
        for session in &sessions {
            self.sessions
                .revoke(&session.session_id, "rp_initiated_logout")
                .await?;
            tenant_id = session.tenant_id.clone();
            sids.push(session.session_id.clone());
            revoked += 1;
            self.bus.emit(EventEnvelope::new(
                event_names::SESSION_REVOKED,
                &session.tenant_id,
                EventContext::for_request(&session.session_id).with_session(&session.session_id),
            ));
        }

        // Fan out to every participating relying party of the tenant.
        let mut frontchannel_uris = Vec::new();
        if !tenant_id.is_empty() {
            for participant in self.registry.logout_participants(&tenant_id) {
                if let Some(uri) = &participant.frontchannel_logout_uri {
                    frontchannel_uris.push(uri.clone());
                }
                if let Some(uri) = participant.backchannel_logout_uri.clone() {
                    self.send_logout_token(
                        &participant.client_id,
                        &uri,
                        &claims.sub,
                        sids.first().map(String::as_str),
                    )
                    .await;
                }
            }

            self.bus.emit(
                EventEnvelope::new(
                    event_names::LOGOUT_PROPAGATED,
                    &tenant_id,
                    EventContext::for_request(&claims.sub),
                )
                .with_data(serde_json::json!({
                    "sessions": revoked,
                    "frontchannel": frontchannel_uris.len(),
                })),
            );
        }

        info!(sub = %claims.sub, revoked, "rp-initiated logout completed");
        Ok(LogoutResult {
            revoked_sessions: revoked,
            frontchannel_uris,
            redirect,
        })
    }

    /// Signs and POSTs a back-channel logout token. Failures are logged;
    /// logout never rolls back.
    async fn send_logout_token(
        &self,
        client_id: &str,
        uri: &str,
        sub: &str,
        sid: Option<&str>,
    ) {
        let token = match self.issuer.issue_logout_token(client_id, Some(sub), sid).await {
            Ok(token) => token,
            Err(e) => {
                warn!(client = %client_id, error = %e, "logout token signing failed");
                return;
            }
        };
        let result = self
            .http
            .post(uri)
            .form(&[("logout_token", token.as_str())])
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                info!(client = %client_id, "back-channel logout delivered");
            }
            Ok(response) => {
                warn!(client = %client_id, status = %response.status(), "back-channel logout rejected");
            }
            Err(e) => {
                warn!(client = %client_id, error = %e, "back-channel logout failed");
            }
        }
    }

    /// Handles an inbound logout token when this provider is the RP.
    ///
    /// Returns the number of sessions revoked.
    ///
    /// # Errors
    ///
    /// `invalid_token` for a token without the logout event, with a nonce,
    /// or naming neither `sub` nor `sid`.
    pub async fn receive_backchannel_logout(&self, logout_token: &str) -> AuthResult<u64> {
        let claims: LogoutTokenClaims = self
            .issuer
            .verify(logout_token, &VerifyExpectations::default())
            .await?;

        if !claims.is_logout_event() {
            return Err(AuthError::invalid_token(
                "logout token missing the back-channel logout event",
            ));
        }
        if claims.sub.is_none() && claims.sid.is_none() {
            return Err(AuthError::invalid_token(
                "logout token must carry sub or sid",
            ));
        }

        let mut revoked = 0u64;
        if let Some(sid) = &claims.sid {
            if self.sessions.get(sid).await?.is_some() {
                self.sessions.revoke(sid, "backchannel_logout").await?;
                revoked += 1;
            }
        } else if let Some(sub) = &claims.sub {
            if let Ok(user_id) = Uuid::parse_str(sub) {
                for session in self.sessions.list_by_user(user_id).await? {
                    self.sessions
                        .revoke(&session.session_id, "backchannel_logout")
                        .await?;
                    revoked += 1;
                }
            }
        }
        Ok(revoked)
    }
}
