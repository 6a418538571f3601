//! Backchannel authentication (CIBA).
//!
//! `/bc-authorize` creates a pending request and notifies the user out of
//! band through the [`BackchannelNotifier`] adapter. Approval and denial are
//! CAS transitions; the token-endpoint leg (polling discipline, one-shot
//! consumption) lives with the grant dispatcher.
//!
//! Delivery modes: `poll` (client polls), `ping` (the notification endpoint
//! receives `{auth_req_id}` and the client polls once), `push` (the full
//! token response is POSTed and later polls fail with `access_denied`).
//! Notification failures are logged and never roll back the approval — on a
//! failed ping the client may still poll.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use oxidp_core::{
    EventBus, EventContext, EventEnvelope, UnixMillis, event_names, generate_id,
    generate_user_code,
};

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::oauth::client_auth::{ClientAuthenticator, ClientCredentials};
use crate::oauth::types::{CibaAuthorizeResponse, TokenRequest, TokenResponse};
use crate::policy::{ContractRegistry, PolicyResolver, ResolvedPolicy};
use crate::rate_limit::RateLimiter;
use crate::stores::{
    CibaDeliveryMode, CibaRequest, CibaStatus, CibaStore, LoginHint, RefreshTokenRecord,
    RefreshTokenStore, UserStore,
};
use crate::token::issuer::{IssueContext, TokenIssuer};
use crate::types::EmailBlindIndex;

/// Out-of-band user notification boundary (email / SMS / push providers).
#[async_trait]
pub trait BackchannelNotifier: Send + Sync {
    /// Tells the user an authentication request is waiting.
    async fn notify_user(&self, request: &CibaRequest) -> AuthResult<()>;
}

/// `/bc-authorize` form parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct CibaParams {
    /// Requested scopes.
    pub scope: String,

    /// Who to authenticate.
    pub login_hint: Option<String>,

    /// Message to show on the authentication device.
    #[serde(default)]
    pub binding_message: Option<String>,

    /// Whether the user must type a comparison code.
    #[serde(default)]
    pub user_code: Option<String>,

    /// Client ID (public clients).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (client_secret_post).
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Client assertion type.
    #[serde(default)]
    pub client_assertion_type: Option<String>,

    /// Client assertion.
    #[serde(default)]
    pub client_assertion: Option<String>,
}

/// Runs the backchannel authorization lifecycle.
pub struct CibaRunner {
    registry: Arc<ContractRegistry>,
    policy_resolver: Arc<PolicyResolver>,
    authenticator: ClientAuthenticator,
    requests: Arc<dyn CibaStore>,
    users: Arc<dyn UserStore>,
    issuer: Arc<TokenIssuer>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    notifier: Arc<dyn BackchannelNotifier>,
    rate_limiter: Arc<RateLimiter>,
    http: reqwest::Client,
    bus: Arc<EventBus>,
    config: AuthConfig,
    blind_index_key: Vec<u8>,
}

impl CibaRunner {
    /// Wires the runner.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        registry: Arc<ContractRegistry>,
        policy_resolver: Arc<PolicyResolver>,
        authenticator: ClientAuthenticator,
        requests: Arc<dyn CibaStore>,
        users: Arc<dyn UserStore>,
        issuer: Arc<TokenIssuer>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        notifier: Arc<dyn BackchannelNotifier>,
        rate_limiter: Arc<RateLimiter>,
        bus: Arc<EventBus>,
        config: AuthConfig,
        blind_index_key: Vec<u8>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.outbound_timeout)
            .build()
            .unwrap_or_default();
        Self {
            registry,
            policy_resolver,
            authenticator,
            requests,
            users,
            issuer,
            refresh_tokens,
            notifier,
            rate_limiter,
            http,
            bus,
            config,
            blind_index_key,
        }
    }

    /// Handles `POST /bc-authorize`.
    ///
    /// # Errors
    ///
    /// Protocol errors; `access_denied` when CIBA is disabled for the
    /// tenant.
    pub async fn handle_bc_authorize(
        &self,
        authorization_header: Option<&str>,
        params: CibaParams,
    ) -> AuthResult<CibaAuthorizeResponse> {
        // Reuse the token-request credential surface for extraction.
        let shim = TokenRequest {
            grant_type: String::new(),
            code: None,
            redirect_uri: None,
            code_verifier: None,
            client_id: params.client_id.clone(),
            client_secret: params.client_secret.clone(),
            client_assertion_type: params.client_assertion_type.clone(),
            client_assertion: params.client_assertion.clone(),
            refresh_token: None,
            scope: None,
            auth_req_id: None,
            device_code: None,
        };
        let credentials = ClientCredentials::extract(authorization_header, &shim)?;
        let client_id = credentials
            .client_id()
            .ok_or_else(|| AuthError::invalid_client("client identification missing"))?;
        let (tenant, client) = self.registry.pair(&client_id)?;
        let policy = self.policy_resolver.resolve(&tenant, &client)?;
        self.authenticator.authenticate(&client, &credentials)?;

        if !policy.ciba_enabled {
            return Err(AuthError::access_denied("backchannel authentication disabled"));
        }
        self.rate_limiter.enforce(
            &RateLimiter::key(&tenant.tenant_id, "bc-authorize", &client_id),
            &self.config.rate_limits.bc_authorize,
        )?;

        if let Some(message) = &params.binding_message {
            if message.chars().count() > self.config.ciba.max_binding_message_chars {
                return Err(AuthError::invalid_request(format!(
                    "binding_message exceeds {} characters",
                    self.config.ciba.max_binding_message_chars
                )));
            }
        }

        let hint_raw = params
            .login_hint
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("login_hint is required"))?;
        let login_hint = LoginHint::parse(hint_raw);

        // The hint must resolve to a known user before a request is queued.
        let user = match &login_hint {
            LoginHint::Email(email) => {
                let index = EmailBlindIndex::compute(&self.blind_index_key, email);
                self.users.find_by_email_index(&index).await?
            }
            LoginHint::Subject(sub) => match Uuid::parse_str(sub) {
                Ok(id) => self.users.get(id).await?,
                Err(_) => None,
            },
            LoginHint::Phone(_) | LoginHint::Username(_) => None,
        };
        let user = user
            .filter(|u| u.can_authenticate())
            .ok_or_else(|| AuthError::invalid_request("login_hint did not match a user"))?;

        let scopes = policy.filter_scopes(&params.scope);
        if scopes.is_empty() {
            return Err(AuthError::invalid_scope("no requested scope is permitted"));
        }

        let delivery_mode = match client.ciba_delivery_mode.as_deref() {
            None | Some("poll") => CibaDeliveryMode::Poll,
            Some("ping") => CibaDeliveryMode::Ping,
            Some("push") => CibaDeliveryMode::Push,
            Some(other) => {
                return Err(AuthError::invalid_request(format!(
                    "unknown delivery mode '{other}'"
                )));
            }
        };
        if delivery_mode != CibaDeliveryMode::Poll && client.ciba_notification_endpoint.is_none() {
            return Err(AuthError::invalid_client(
                "ping/push delivery requires a notification endpoint",
            ));
        }

        let now = UnixMillis::now();
        let ttl = policy.ciba_request_ttl.min(self.config.ciba.request_ttl);
        let request = CibaRequest {
            auth_req_id: generate_id(32),
            client_id: client_id.clone(),
            tenant_id: tenant.tenant_id.clone(),
            scope: scopes.join(" "),
            binding_message: params.binding_message.clone(),
            user_code: params
                .user_code
                .is_some()
                .then(generate_user_code),
            login_hint,
            delivery_mode,
            status: CibaStatus::Pending,
            min_poll_interval_secs: self.config.ciba.min_poll_interval.as_secs(),
            last_poll_at: None,
            approved_sub: Some(user.user_id.to_string()),
            resolved_policy_id: policy.resolution_id.clone(),
            notification_endpoint: client.ciba_notification_endpoint.clone(),
            notification_token: (delivery_mode != CibaDeliveryMode::Poll)
                .then(|| generate_id(32)),
            created_at: now,
            expires_at: now + ttl,
        };

        // Pre-hooks may veto the request (quota integrations, fraud rules).
        let envelope = EventEnvelope::new(
            event_names::CIBA_REQUEST_CREATED,
            &tenant.tenant_id,
            EventContext::for_request(&request.auth_req_id).with_client(&client_id),
        )
        .with_data(serde_json::json!({ "delivery_mode": request.delivery_mode.to_string() }));
        self.bus.check(&envelope).await.map_err(AuthError::from)?;

        // approved_sub is prefilled with the resolved user but the status
        // stays pending until that user decides.
        let mut stored = request.clone();
        stored.approved_sub = None;
        self.requests.put(stored).await?;

        if let Err(e) = self.notifier.notify_user(&request).await {
            // The request stands; the user may still find it in their app.
            warn!(auth_req_id = %request.auth_req_id, error = %e, "backchannel notification failed");
        }

        self.bus.emit(envelope);

        Ok(CibaAuthorizeResponse {
            auth_req_id: request.auth_req_id,
            expires_in: ttl.as_secs(),
            interval: self.config.ciba.min_poll_interval.as_secs(),
        })
    }

    /// Records the user's approval and dispatches ping/push notification.
    ///
    /// # Errors
    ///
    /// `invalid_grant` when the request is not pending.
    pub async fn approve(&self, auth_req_id: &str, sub: Uuid) -> AuthResult<()> {
        let sub_string = sub.to_string();
        let approved = self
            .requests
            .update(auth_req_id, &move |mut current: CibaRequest| {
                if current.is_expired(UnixMillis::now()) {
                    return Err(AuthError::ExpiredToken);
                }
                if current.status != CibaStatus::Pending {
                    return Err(AuthError::invalid_grant("request is not pending"));
                }
                current.status = CibaStatus::Approved;
                current.approved_sub = Some(sub_string.clone());
                Ok(current)
            })
            .await?;

        self.bus.emit(
            EventEnvelope::new(
                event_names::CIBA_REQUEST_APPROVED,
                &approved.tenant_id,
                EventContext::for_request(auth_req_id).with_client(&approved.client_id),
            )
            .with_actor(oxidp_core::events::Actor::User(sub.to_string())),
        );

        match approved.delivery_mode {
            CibaDeliveryMode::Poll => {}
            CibaDeliveryMode::Ping => self.ping(&approved).await,
            CibaDeliveryMode::Push => self.push(&approved).await,
        }
        Ok(())
    }

    /// Records the user's denial.
    ///
    /// # Errors
    ///
    /// `invalid_grant` when the request is not pending.
    pub async fn deny(&self, auth_req_id: &str) -> AuthResult<()> {
        self.requests
            .update(auth_req_id, &|mut current: CibaRequest| {
                if current.status != CibaStatus::Pending {
                    return Err(AuthError::invalid_grant("request is not pending"));
                }
                current.status = CibaStatus::Denied;
                Ok(current)
            })
            .await?;
        Ok(())
    }

    /// Ping: POST `{auth_req_id}` with the bearer notification token.
    async fn ping(&self, request: &CibaRequest) {
        let Some(endpoint) = &request.notification_endpoint else {
            return;
        };
        let mut call = self
            .http
            .post(endpoint)
            .json(&serde_json::json!({ "auth_req_id": request.auth_req_id }));
        if let Some(token) = &request.notification_token {
            call = call.bearer_auth(token);
        }
        match call.send().await {
            Ok(response) if response.status().is_success() => {
                info!(auth_req_id = %request.auth_req_id, "ping notification delivered");
            }
            Ok(response) => {
                warn!(auth_req_id = %request.auth_req_id, status = %response.status(), "ping notification rejected");
            }
            Err(e) => {
                // The client may still poll; nothing rolls back.
                warn!(auth_req_id = %request.auth_req_id, error = %e, "ping notification failed");
            }
        }
    }

    /// Push: mint the tokens and POST the full response, then consume.
    async fn push(&self, request: &CibaRequest) {
        let Some(endpoint) = request.notification_endpoint.clone() else {
            return;
        };
        let Some(sub) = request.approved_sub.clone() else {
            return;
        };

        let (tenant, client) = match self.registry.pair(&request.client_id) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(auth_req_id = %request.auth_req_id, error = %e, "push delivery lost its client");
                return;
            }
        };
        let policy = match self.policy_resolver.resolve(&tenant, &client) {
            Ok(policy) => policy,
            Err(e) => {
                warn!(auth_req_id = %request.auth_req_id, error = %e, "push delivery lost its policy");
                return;
            }
        };

        // Consume first: a successful push must make later polls fail.
        let consumed = self
            .requests
            .update(&request.auth_req_id, &|mut current: CibaRequest| {
                if current.status != CibaStatus::Approved {
                    return Err(AuthError::invalid_grant("request is not approved"));
                }
                current.status = CibaStatus::Consumed;
                Ok(current)
            })
            .await;
        if consumed.is_err() {
            return;
        }

        match self.mint(&policy, &sub, &request.scope).await {
            Ok(mut response_body) => {
                let body = serde_json::json!({
                    "auth_req_id": request.auth_req_id,
                    "access_token": response_body.access_token,
                    "token_type": response_body.token_type,
                    "expires_in": response_body.expires_in,
                    "scope": response_body.scope,
                    "id_token": response_body.id_token.take(),
                    "refresh_token": response_body.refresh_token.take(),
                });
                let mut call = self.http.post(&endpoint).json(&body);
                if let Some(token) = &request.notification_token {
                    call = call.bearer_auth(token);
                }
                if let Err(e) = call.send().await {
                    warn!(auth_req_id = %request.auth_req_id, error = %e, "push delivery failed");
                }
            }
            Err(e) => {
                warn!(auth_req_id = %request.auth_req_id, error = %e, "push token minting failed");
            }
        }
    }

    async fn mint(
        &self,
        policy: &ResolvedPolicy,
        sub: &str,
        scope: &str,
    ) -> AuthResult<TokenResponse> {
        let ctx = IssueContext {
            client_id: policy.client_id.clone(),
            sub: sub.to_string(),
            scope: scope.to_string(),
            auth_time: Some(UnixMillis::now()),
            acr: None,
            amr: vec!["ciba".to_string()],
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
        Ok(response)
    }
}
