//! Device authorization grant (RFC 8628).
//!
//! Creates device/user code pairs and records the user's verification-page
//! decision. The polling leg on `/token` shares the CIBA discipline in the
//! grant dispatcher: `authorization_pending`, `slow_down` doubling, and a
//! CAS `approved → consumed` transition that succeeds exactly once.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use oxidp_core::{
    EventBus, EventContext, EventEnvelope, UnixMillis, event_names, generate_id,
    generate_user_code,
};

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::oauth::client_auth::{ClientAuthenticator, ClientCredentials};
use crate::oauth::types::{DeviceAuthorizationResponse, TokenRequest};
use crate::policy::{ContractRegistry, PolicyResolver};
use crate::stores::{CibaStatus, DeviceGrantRecord, DeviceStore};

/// `POST /device_authorization` form parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceParams {
    /// Requested scopes.
    #[serde(default)]
    pub scope: Option<String>,

    /// Client ID (public device clients).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (confidential device clients).
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Runs the device-grant lifecycle.
pub struct DeviceGrantRunner {
    registry: Arc<ContractRegistry>,
    policy_resolver: Arc<PolicyResolver>,
    authenticator: ClientAuthenticator,
    grants: Arc<dyn DeviceStore>,
    bus: Arc<EventBus>,
    config: AuthConfig,
}

impl DeviceGrantRunner {
    /// Wires the runner.
    #[must_use]
    pub fn new(
        registry: Arc<ContractRegistry>,
        policy_resolver: Arc<PolicyResolver>,
        authenticator: ClientAuthenticator,
        grants: Arc<dyn DeviceStore>,
        bus: Arc<EventBus>,
        config: AuthConfig,
    ) -> Self {
        Self {
            registry,
            policy_resolver,
            authenticator,
            grants,
            bus,
            config,
        }
    }

    /// Handles `POST /device_authorization`.
    ///
    /// # Errors
    ///
    /// Protocol errors; `access_denied` when the device flow is disabled.
    pub async fn handle_device_authorization(
        &self,
        authorization_header: Option<&str>,
        params: DeviceParams,
    ) -> AuthResult<DeviceAuthorizationResponse> {
        let shim = TokenRequest {
            grant_type: String::new(),
            code: None,
            redirect_uri: None,
            code_verifier: None,
            client_id: params.client_id.clone(),
            client_secret: params.client_secret.clone(),
            client_assertion_type: None,
            client_assertion: None,
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

        if !policy.device_enabled {
            return Err(AuthError::access_denied("device flow disabled"));
        }

        let scopes = policy.filter_scopes(params.scope.as_deref().unwrap_or("openid"));
        if scopes.is_empty() {
            return Err(AuthError::invalid_scope("no requested scope is permitted"));
        }

        let now = UnixMillis::now();
        let ttl = policy.device_code_ttl.min(self.config.device.code_ttl);
        let record = DeviceGrantRecord {
            device_code: generate_id(32),
            user_code: generate_user_code(),
            client_id: client_id.clone(),
            tenant_id: tenant.tenant_id.clone(),
            scope: scopes.join(" "),
            status: CibaStatus::Pending,
            min_poll_interval_secs: self.config.device.min_poll_interval.as_secs(),
            last_poll_at: None,
            approved_sub: None,
            resolved_policy_id: policy.resolution_id.clone(),
            created_at: now,
            expires_at: now + ttl,
        };
        self.grants.put(record.clone()).await?;

        let verification_uri = format!("{}/device", policy.issuer.trim_end_matches('/'));
        Ok(DeviceAuthorizationResponse {
            device_code: record.device_code,
            verification_uri_complete: format!(
                "{verification_uri}?user_code={}",
                record.user_code
            ),
            user_code: record.user_code,
            verification_uri,
            expires_in: ttl.as_secs(),
            interval: self.config.device.min_poll_interval.as_secs(),
        })
    }

    /// Records the user's approval from the verification page.
    ///
    /// # Errors
    ///
    /// `invalid_grant` for an unknown user code or non-pending grant;
    /// `expired_token` past the TTL.
    pub async fn approve(&self, user_code: &str, sub: Uuid) -> AuthResult<()> {
        let record = self
            .grants
            .find_by_user_code(&normalize_user_code(user_code))
            .await?
            .ok_or_else(|| AuthError::invalid_grant("unknown user code"))?;

        let sub_string = sub.to_string();
        let approved = self
            .grants
            .update(&record.device_code, &move |mut current: DeviceGrantRecord| {
                if current.is_expired(UnixMillis::now()) {
                    return Err(AuthError::ExpiredToken);
                }
                if current.status != CibaStatus::Pending {
                    return Err(AuthError::invalid_grant("grant is not pending"));
                }
                current.status = CibaStatus::Approved;
                current.approved_sub = Some(sub_string.clone());
                Ok(current)
            })
            .await?;

        self.bus.emit(
            EventEnvelope::new(
                event_names::DEVICE_GRANT_APPROVED,
                &approved.tenant_id,
                EventContext::for_request(&approved.device_code)
                    .with_client(&approved.client_id),
            )
            .with_actor(oxidp_core::events::Actor::User(sub.to_string())),
        );
        Ok(())
    }

    /// Records the user's denial from the verification page.
    ///
    /// # Errors
    ///
    /// `invalid_grant` for an unknown user code or non-pending grant.
    pub async fn deny(&self, user_code: &str) -> AuthResult<()> {
        let record = self
            .grants
            .find_by_user_code(&normalize_user_code(user_code))
            .await?
            .ok_or_else(|| AuthError::invalid_grant("unknown user code"))?;

        self.grants
            .update(&record.device_code, &|mut current: DeviceGrantRecord| {
                if current.status != CibaStatus::Pending {
                    return Err(AuthError::invalid_grant("grant is not pending"));
                }
                current.status = CibaStatus::Denied;
                Ok(current)
            })
            .await?;
        Ok(())
    }
}

/// Users type codes sloppily; uppercase and restore the separator.
fn normalize_user_code(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.len() == 8 {
        format!("{}-{}", &cleaned[..4], &cleaned[4..])
    } else {
        raw.to_string()
    }
}
