//! `/token` grant dispatch.
//!
//! One entry point fans out to the five supported grants. The two one-shot
//! disciplines live here:
//!
//! - **Code exchange ordering**: verify → compute hashes → sign every token →
//!   persist the refresh record → only then consume the code. A server-side
//!   failure before consumption leaves the code valid until its TTL; a
//!   client-side validation failure (PKCE mismatch, wrong client) burns the
//!   code. Exactly one concurrent redemption observes the consumed record.
//! - **Async-grant polling**: CIBA and device grants share CAS-driven status
//!   transitions with `slow_down` interval doubling (capped at 30 s) and an
//!   `approved → consumed` transition that succeeds exactly once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use oxidp_core::{EventBus, EventContext, EventEnvelope, UnixMillis, event_names};

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::oauth::client_auth::{ClientAuthenticator, ClientCredentials};
use crate::oauth::pkce::{PkceChallenge, PkceVerifier};
use crate::oauth::types::{TokenRequest, TokenResponse};
use crate::policy::{ContractRegistry, PolicyResolver, ResolvedPolicy};
use crate::stores::{
    CibaDeliveryMode, CibaStatus, CibaStore, CodeStore, DeviceStore, RefreshTokenRecord,
    RefreshTokenStore,
};
use crate::rate_limit::RateLimiter;
use crate::token::claims::RefreshTokenClaims;
use crate::token::issuer::{IssueContext, TokenIssuer, VerifyExpectations};

/// CIBA grant type URN.
pub const GRANT_CIBA: &str = "urn:openid:params:grant-type:ciba";
/// Device grant type URN.
pub const GRANT_DEVICE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Poll interval ceiling after `slow_down` doubling.
const POLL_INTERVAL_CEILING_SECS: u64 = 30;

/// Dispatches token-endpoint requests.
pub struct GrantDispatcher {
    registry: Arc<ContractRegistry>,
    policy_resolver: Arc<PolicyResolver>,
    authenticator: ClientAuthenticator,
    issuer: Arc<TokenIssuer>,
    codes: Arc<dyn CodeStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    ciba_requests: Arc<dyn CibaStore>,
    device_grants: Arc<dyn DeviceStore>,
    rate_limiter: Arc<RateLimiter>,
    bus: Arc<EventBus>,
    config: AuthConfig,
}

impl GrantDispatcher {
    /// Wires the dispatcher.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        registry: Arc<ContractRegistry>,
        policy_resolver: Arc<PolicyResolver>,
        authenticator: ClientAuthenticator,
        issuer: Arc<TokenIssuer>,
        codes: Arc<dyn CodeStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        ciba_requests: Arc<dyn CibaStore>,
        device_grants: Arc<dyn DeviceStore>,
        rate_limiter: Arc<RateLimiter>,
        bus: Arc<EventBus>,
        config: AuthConfig,
    ) -> Self {
        Self {
            registry,
            policy_resolver,
            authenticator,
            issuer,
            codes,
            refresh_tokens,
            ciba_requests,
            device_grants,
            rate_limiter,
            bus,
            config,
        }
    }

    /// Handles one `POST /token`.
    ///
    /// # Errors
    ///
    /// OAuth protocol errors per the registry; async-grant coordination
    /// signals (`authorization_pending`, `slow_down`, `expired_token`).
    pub async fn handle(
        &self,
        authorization_header: Option<&str>,
        request: TokenRequest,
    ) -> AuthResult<TokenResponse> {
        let credentials = ClientCredentials::extract(authorization_header, &request)?;
        let client_id = credentials
            .client_id()
            .ok_or_else(|| AuthError::invalid_client("client identification missing"))?;
        let (tenant, client) = self.registry.pair(&client_id)?;
        let policy = self.policy_resolver.resolve(&tenant, &client)?;

        self.rate_limiter.enforce(
            &RateLimiter::key(&tenant.tenant_id, "token", &client_id),
            &self.config.rate_limits.token,
        )?;

        self.authenticator.authenticate(&client, &credentials)?;

        let supported = [
            "authorization_code",
            "refresh_token",
            "client_credentials",
            GRANT_CIBA,
            GRANT_DEVICE,
        ];
        if !supported.contains(&request.grant_type.as_str()) {
            return Err(AuthError::unsupported_grant_type(&request.grant_type));
        }
        if !policy.allows_grant_type(&request.grant_type) {
            return Err(AuthError::unauthorized_client(format!(
                "grant type '{}' not permitted for this client",
                request.grant_type
            )));
        }

        match request.grant_type.as_str() {
            "authorization_code" => self.exchange_code(&policy, &request).await,
            "refresh_token" => self.redeem_refresh_token(&policy, &request).await,
            "client_credentials" => self.client_credentials(&policy, &request).await,
            GRANT_CIBA => self.poll_ciba(&policy, &request).await,
            GRANT_DEVICE => self.poll_device(&policy, &request).await,
            _ => unreachable!("filtered above"),
        }
    }

    // ------------------------------------------------------------------
    // authorization_code
    // ------------------------------------------------------------------

    async fn exchange_code(
        &self,
        policy: &ResolvedPolicy,
        request: &TokenRequest,
    ) -> AuthResult<TokenResponse> {
        let code_value = request
            .code
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("code is required"))?;

        // (1) Verify the code and its bindings.
        let record = self
            .codes
            .get(code_value)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("unknown or expired code"))?;

        let binding_check = (|| -> AuthResult<()> {
            if record.client_id != policy.client_id {
                return Err(AuthError::invalid_grant("code was issued to another client"));
            }
            if request.redirect_uri.as_deref() != Some(record.redirect_uri.as_str()) {
                return Err(AuthError::invalid_grant("redirect_uri mismatch"));
            }
            match (&record.code_challenge, &request.code_verifier) {
                (Some(challenge), Some(verifier)) => {
                    let challenge = PkceChallenge::new(challenge.clone())
                        .map_err(|e| AuthError::invalid_grant(e.to_string()))?;
                    let verifier = PkceVerifier::new(verifier.clone())
                        .map_err(|e| AuthError::invalid_grant(e.to_string()))?;
                    challenge
                        .verify(&verifier)
                        .map_err(|e| AuthError::invalid_grant(e.to_string()))
                }
                (Some(_), None) => {
                    Err(AuthError::invalid_grant("code_verifier is required"))
                }
                (None, _) if policy.require_pkce => {
                    Err(AuthError::invalid_grant("code was issued without PKCE"))
                }
                (None, _) => Ok(()),
            }
        })();

        if let Err(err) = binding_check {
            // Client-side failure burns the code: single use means a bad
            // redemption attempt spends it.
            let _ = self.codes.consume(code_value).await?;
            return Err(err);
        }

        // (2)–(3) Hashes are computed inside ID-token issuance; sign all
        // tokens.
        let ctx = IssueContext {
            client_id: record.client_id.clone(),
            sub: record.sub.clone(),
            scope: record.scope.clone(),
            auth_time: Some(record.auth_time),
            acr: record.acr.clone(),
            amr: record.amr.clone(),
            session_id: record.session_id.clone(),
            access_token_ttl: policy.access_token_ttl,
            id_token_ttl: policy.id_token_ttl,
            refresh_token_ttl: policy.refresh_token_ttl,
        };
        let access = self.issuer.issue_access_token(&ctx).await?;

        let scopes: Vec<&str> = record.scope.split_whitespace().collect();
        let id_token = if scopes.contains(&"openid") {
            Some(
                self.issuer
                    .issue_id_token(&ctx, Some(&access.jwt), None, record.nonce.as_deref())
                    .await?,
            )
        } else {
            None
        };

        // (4) Persist the refresh record before consumption.
        let refresh = if scopes.contains(&"offline_access") {
            let issued = self.issuer.issue_refresh_token(&ctx, None).await?;
            let now = UnixMillis::now();
            self.refresh_tokens
                .put(RefreshTokenRecord {
                    jti: issued.jti.clone(),
                    family_id: issued.family.clone(),
                    client_id: record.client_id.clone(),
                    user_id: record.sub.clone(),
                    scope: record.scope.clone(),
                    issued_at: now,
                    expires_at: now + policy.refresh_token_ttl,
                    rotated_from: None,
                    rotated: false,
                    revoked: false,
                })
                .await?;
            Some(issued)
        } else {
            None
        };

        // (5) Only now consume. Exactly one concurrent caller wins.
        if self.codes.consume(code_value).await?.is_none() {
            // Lost the race: withdraw the refresh record we persisted.
            if let Some(refresh) = &refresh {
                let _ = self
                    .refresh_tokens
                    .revoke(&refresh.jti, "code exchange lost the redemption race")
                    .await;
            }
            return Err(AuthError::invalid_grant("code already redeemed"));
        }

        self.bus.emit(
            EventEnvelope::new(
                event_names::AUTH_CODE_REDEEMED,
                &record.tenant_id,
                EventContext::for_request(&access.jti).with_client(&record.client_id),
            )
            .with_data(serde_json::json!({ "scope": record.scope })),
        );
        self.emit_token_issued(&record.tenant_id, &record.client_id, &access.jti);
        info!(client = %record.client_id, "authorization code exchanged");

        let mut response = TokenResponse::new(
            access.jwt,
            policy.access_token_ttl.as_secs(),
            record.scope.clone(),
        );
        if let Some(id_token) = id_token {
            response = response.with_id_token(id_token);
        }
        if let Some(refresh) = refresh {
            response = response.with_refresh_token(refresh.jwt);
        }
        Ok(response)
    }

    // ------------------------------------------------------------------
    // refresh_token
    // ------------------------------------------------------------------

    async fn redeem_refresh_token(
        &self,
        policy: &ResolvedPolicy,
        request: &TokenRequest,
    ) -> AuthResult<TokenResponse> {
        let presented = request
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("refresh_token is required"))?;

        let claims: RefreshTokenClaims = self
            .issuer
            .verify(
                presented,
                &VerifyExpectations {
                    audience: Some(&policy.client_id),
                    ..VerifyExpectations::default()
                },
            )
            .await
            .map_err(|_| AuthError::invalid_grant("refresh token rejected"))?;

        let record = self
            .refresh_tokens
            .get(&claims.jti)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("refresh token unknown"))?;

        let now = UnixMillis::now();
        if record.rotated || record.revoked {
            // Replay of a rotated member compromises the family.
            let revoked = self
                .refresh_tokens
                .revoke_family(&record.family_id, "rotated token replayed")
                .await?;
            self.bus.emit(
                EventEnvelope::new(
                    event_names::TOKEN_REPLAY_DETECTED,
                    &policy.tenant_id,
                    EventContext::for_request(&claims.jti).with_client(&policy.client_id),
                )
                .with_data(serde_json::json!({
                    "family": record.family_id,
                    "revoked": revoked,
                })),
            );
            warn!(family = %record.family_id, "refresh token replay; family revoked");
            return Err(AuthError::invalid_grant("refresh token reuse detected"));
        }
        if record.is_expired(now) {
            return Err(AuthError::invalid_grant("refresh token expired"));
        }
        if record.client_id != policy.client_id {
            return Err(AuthError::invalid_grant("refresh token owned by another client"));
        }

        // Optional scope narrowing.
        let granted: Vec<String> = record
            .scope
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        let scope = match &request.scope {
            Some(requested) => {
                let narrowed: Vec<String> = requested
                    .split_whitespace()
                    .filter(|s| granted.iter().any(|g| g == s))
                    .map(str::to_owned)
                    .collect();
                if narrowed.is_empty() {
                    return Err(AuthError::invalid_scope(
                        "requested scope exceeds the original grant",
                    ));
                }
                narrowed.join(" ")
            }
            None => record.scope.clone(),
        };

        let ctx = IssueContext {
            client_id: record.client_id.clone(),
            sub: record.user_id.clone(),
            scope: scope.clone(),
            auth_time: None,
            acr: None,
            amr: Vec::new(),
            session_id: None,
            access_token_ttl: policy.access_token_ttl,
            id_token_ttl: policy.id_token_ttl,
            refresh_token_ttl: policy.refresh_token_ttl,
        };
        let access = self.issuer.issue_access_token(&ctx).await?;
        let next = self
            .issuer
            .issue_refresh_token(&ctx, Some(record.family_id.clone()))
            .await?;

        self.refresh_tokens
            .put(RefreshTokenRecord {
                jti: next.jti.clone(),
                family_id: record.family_id.clone(),
                client_id: record.client_id.clone(),
                user_id: record.user_id.clone(),
                scope: record.scope.clone(),
                issued_at: now,
                expires_at: now + policy.refresh_token_ttl,
                rotated_from: Some(record.jti.clone()),
                rotated: false,
                revoked: false,
            })
            .await?;

        // Mark the predecessor rotated; a CAS race here means the token was
        // double-spent concurrently, which is replay.
        let jti = record.jti.clone();
        let rotation = self
            .refresh_tokens
            .update(&jti, &|mut current: RefreshTokenRecord| {
                if current.rotated || current.revoked {
                    return Err(AuthError::invalid_grant("refresh token reuse detected"));
                }
                current.rotated = true;
                Ok(current)
            })
            .await;

        if let Err(err) = rotation {
            let _ = self
                .refresh_tokens
                .revoke_family(&record.family_id, "concurrent refresh redemption")
                .await;
            let _ = self
                .refresh_tokens
                .revoke(&next.jti, "withdrawn after lost rotation race")
                .await;
            self.bus.emit(EventEnvelope::new(
                event_names::TOKEN_REPLAY_DETECTED,
                &policy.tenant_id,
                EventContext::for_request(&record.jti).with_client(&policy.client_id),
            ));
            return Err(err);
        }

        self.emit_token_issued(&policy.tenant_id, &record.client_id, &access.jti);

        Ok(
            TokenResponse::new(access.jwt, policy.access_token_ttl.as_secs(), scope)
                .with_refresh_token(next.jwt),
        )
    }

    // ------------------------------------------------------------------
    // client_credentials
    // ------------------------------------------------------------------

    async fn client_credentials(
        &self,
        policy: &ResolvedPolicy,
        request: &TokenRequest,
    ) -> AuthResult<TokenResponse> {
        // Machine tokens never carry user-centric scopes.
        let machine_scopes: Vec<String> = policy
            .scopes
            .iter()
            .filter(|s| *s != "openid" && *s != "offline_access")
            .cloned()
            .collect();
        let scope = match &request.scope {
            Some(requested) => {
                let narrowed: Vec<String> = requested
                    .split_whitespace()
                    .filter(|s| machine_scopes.iter().any(|m| m == s))
                    .map(str::to_owned)
                    .collect();
                if narrowed.is_empty() {
                    return Err(AuthError::invalid_scope("no requested scope is permitted"));
                }
                narrowed.join(" ")
            }
            None => machine_scopes.join(" "),
        };

        let ctx = IssueContext {
            client_id: policy.client_id.clone(),
            sub: policy.client_id.clone(),
            scope: scope.clone(),
            auth_time: None,
            acr: None,
            amr: Vec::new(),
            session_id: None,
            access_token_ttl: policy.access_token_ttl,
            id_token_ttl: policy.id_token_ttl,
            refresh_token_ttl: policy.refresh_token_ttl,
        };
        let access = self.issuer.issue_access_token(&ctx).await?;
        self.emit_token_issued(&policy.tenant_id, &policy.client_id, &access.jti);

        Ok(TokenResponse::new(
            access.jwt,
            policy.access_token_ttl.as_secs(),
            scope,
        ))
    }

    // ------------------------------------------------------------------
    // CIBA / device polling
    // ------------------------------------------------------------------

    async fn poll_ciba(
        &self,
        policy: &ResolvedPolicy,
        request: &TokenRequest,
    ) -> AuthResult<TokenResponse> {
        let auth_req_id = request
            .auth_req_id
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("auth_req_id is required"))?;

        let record = self
            .ciba_requests
            .get(auth_req_id)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("unknown auth_req_id"))?;
        if record.client_id != policy.client_id {
            return Err(AuthError::invalid_grant("auth_req_id owned by another client"));
        }

        let now = UnixMillis::now();
        if record.is_expired(now) && record.status == CibaStatus::Pending {
            let _ = self
                .ciba_requests
                .update(auth_req_id, &|mut current| {
                    if current.status == CibaStatus::Pending {
                        current.status = CibaStatus::Expired;
                    }
                    Ok(current)
                })
                .await;
            return Err(AuthError::ExpiredToken);
        }

        match record.status {
            CibaStatus::Pending => {
                if record.poll_too_early(now) {
                    // Double the interval (capped) and record the poll.
                    self.ciba_requests
                        .update(auth_req_id, &move |mut current| {
                            current.min_poll_interval_secs = (current.min_poll_interval_secs * 2)
                                .min(POLL_INTERVAL_CEILING_SECS);
                            current.last_poll_at = Some(now);
                            Ok(current)
                        })
                        .await?;
                    return Err(AuthError::SlowDown);
                }
                self.ciba_requests
                    .update(auth_req_id, &move |mut current| {
                        current.last_poll_at = Some(now);
                        Ok(current)
                    })
                    .await?;
                Err(AuthError::AuthorizationPending)
            }
            CibaStatus::Denied => Err(AuthError::access_denied("the user denied the request")),
            CibaStatus::Expired => Err(AuthError::ExpiredToken),
            CibaStatus::Consumed => {
                if record.delivery_mode == CibaDeliveryMode::Push {
                    // Tokens were already pushed to the client.
                    Err(AuthError::access_denied("tokens were delivered via push"))
                } else {
                    Err(AuthError::invalid_grant("auth_req_id already redeemed"))
                }
            }
            CibaStatus::Approved => {
                // Exactly-once: the CAS to `consumed` picks the winner.
                let consumed = self
                    .ciba_requests
                    .update(auth_req_id, &|mut current| {
                        if current.status != CibaStatus::Approved {
                            return Err(AuthError::invalid_grant("auth_req_id already redeemed"));
                        }
                        current.status = CibaStatus::Consumed;
                        Ok(current)
                    })
                    .await?;

                let sub = consumed
                    .approved_sub
                    .ok_or_else(|| AuthError::server_error("approved request without subject"))?;
                self.mint_for_async_grant(policy, &sub, &consumed.scope, "ciba").await
            }
        }
    }

    async fn poll_device(
        &self,
        policy: &ResolvedPolicy,
        request: &TokenRequest,
    ) -> AuthResult<TokenResponse> {
        let device_code = request
            .device_code
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("device_code is required"))?;

        let record = self
            .device_grants
            .get(device_code)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("unknown device_code"))?;
        if record.client_id != policy.client_id {
            return Err(AuthError::invalid_grant("device_code owned by another client"));
        }

        let now = UnixMillis::now();
        if record.is_expired(now) && record.status == CibaStatus::Pending {
            let _ = self
                .device_grants
                .update(device_code, &|mut current| {
                    if current.status == CibaStatus::Pending {
                        current.status = CibaStatus::Expired;
                    }
                    Ok(current)
                })
                .await;
            return Err(AuthError::ExpiredToken);
        }

        match record.status {
            CibaStatus::Pending => {
                if record.poll_too_early(now) {
                    self.device_grants
                        .update(device_code, &move |mut current| {
                            current.min_poll_interval_secs = (current.min_poll_interval_secs * 2)
                                .min(POLL_INTERVAL_CEILING_SECS);
                            current.last_poll_at = Some(now);
                            Ok(current)
                        })
                        .await?;
                    return Err(AuthError::SlowDown);
                }
                self.device_grants
                    .update(device_code, &move |mut current| {
                        current.last_poll_at = Some(now);
                        Ok(current)
                    })
                    .await?;
                Err(AuthError::AuthorizationPending)
            }
            CibaStatus::Denied => Err(AuthError::access_denied("the user denied the request")),
            CibaStatus::Expired => Err(AuthError::ExpiredToken),
            CibaStatus::Consumed => Err(AuthError::invalid_grant("device_code already redeemed")),
            CibaStatus::Approved => {
                let consumed = self
                    .device_grants
                    .update(device_code, &|mut current| {
                        if current.status != CibaStatus::Approved {
                            return Err(AuthError::invalid_grant("device_code already redeemed"));
                        }
                        current.status = CibaStatus::Consumed;
                        Ok(current)
                    })
                    .await?;

                let sub = consumed
                    .approved_sub
                    .ok_or_else(|| AuthError::server_error("approved grant without subject"))?;
                self.mint_for_async_grant(policy, &sub, &consumed.scope, "device").await
            }
        }
    }

    async fn mint_for_async_grant(
        &self,
        policy: &ResolvedPolicy,
        sub: &str,
        scope: &str,
        amr: &str,
    ) -> AuthResult<TokenResponse> {
        let ctx = IssueContext {
            client_id: policy.client_id.clone(),
            sub: sub.to_string(),
            scope: scope.to_string(),
            auth_time: Some(UnixMillis::now()),
            acr: None,
            amr: vec![amr.to_string()],
            session_id: None,
            access_token_ttl: policy.access_token_ttl,
            id_token_ttl: policy.id_token_ttl,
            refresh_token_ttl: policy.refresh_token_ttl,
        };
        let access = self.issuer.issue_access_token(&ctx).await?;

        let scopes: Vec<&str> = scope.split_whitespace().collect();
        let mut response = TokenResponse::new(
            access.jwt.clone(),
            policy.access_token_ttl.as_secs(),
            scope.to_string(),
        );
        if scopes.contains(&"openid") {
            response = response.with_id_token(
                self.issuer
                    .issue_id_token(&ctx, Some(&access.jwt), None, None)
                    .await?,
            );
        }
        if scopes.contains(&"offline_access") {
            let issued = self.issuer.issue_refresh_token(&ctx, None).await?;
            let now = UnixMillis::now();
            self.refresh_tokens
                .put(RefreshTokenRecord {
                    jti: issued.jti.clone(),
                    family_id: issued.family.clone(),
                    client_id: policy.client_id.clone(),
                    user_id: sub.to_string(),
                    scope: scope.to_string(),
                    issued_at: now,
                    expires_at: now + policy.refresh_token_ttl,
                    rotated_from: None,
                    rotated: false,
                    revoked: false,
                })
                .await?;
            response = response.with_refresh_token(issued.jwt);
        }

        self.emit_token_issued(&policy.tenant_id, &policy.client_id, &access.jti);
        Ok(response)
    }

    fn emit_token_issued(&self, tenant_id: &str, client_id: &str, jti: &str) {
        self.bus.emit(
            EventEnvelope::new(
                event_names::TOKEN_ISSUED,
                tenant_id,
                EventContext::for_request(jti).with_client(client_id),
            )
            .with_target(oxidp_core::events::Target::new("access_token", jti)),
        );
    }

    /// Slow-down ceiling as a duration, for discovery metadata.
    #[must_use]
    pub fn poll_interval_ceiling() -> Duration {
        Duration::from_secs(POLL_INTERVAL_CEILING_SECS)
    }
}
