//! Axum HTTP surface.
//!
//! Every handler borrows a shared [`OpState`]; [`router`] assembles the wire
//! endpoints of §6 plus the flow-interaction endpoints the UI contract is
//! served over.

mod authorize;
mod discovery;
mod flow;
mod jwks;
mod logout;
mod par;
pub mod problem;
mod token;
mod userinfo;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::ciba::CibaRunner;
use crate::config::AuthConfig;
use crate::device::DeviceGrantRunner;
use crate::keys::KeyStore;
use crate::logout::LogoutCoordinator;
use crate::oauth::grants::GrantDispatcher;
use crate::oauth::orchestrator::AuthorizeOrchestrator;
use crate::passwordless::{EmailOtpService, PasskeyService};
use crate::policy::ContractRegistry;
use crate::rate_limit::RateLimiter;
use crate::stores::{ParStore, RefreshTokenStore};
use crate::token::issuer::TokenIssuer;
use crate::userinfo::UserInfoService;

pub use problem::{OAuthErrorBody, ProblemDetails, oauth_error_response, problem_response};

/// Shared state behind every handler.
#[derive(Clone)]
pub struct OpState {
    /// Provider configuration.
    pub config: Arc<AuthConfig>,

    /// Signing-key store (JWKS surface).
    pub keystore: Arc<KeyStore>,

    /// Token issuer (introspection surface).
    pub issuer: Arc<TokenIssuer>,

    /// Interactive flow driver.
    pub orchestrator: Arc<AuthorizeOrchestrator>,

    /// Token-endpoint dispatcher.
    pub grants: Arc<GrantDispatcher>,

    /// Backchannel runner.
    pub ciba: Arc<CibaRunner>,

    /// Device-grant runner.
    pub device: Arc<DeviceGrantRunner>,

    /// Logout coordinator.
    pub logout: Arc<LogoutCoordinator>,

    /// Userinfo service.
    pub userinfo: Arc<UserInfoService>,

    /// Passkey ceremonies.
    pub passkeys: Arc<PasskeyService>,

    /// Email one-time codes.
    pub email_otp: Arc<EmailOtpService>,

    /// PAR storage (for `/par`).
    pub par_store: Arc<dyn ParStore>,

    /// Contract registry.
    pub registry: Arc<ContractRegistry>,

    /// Rate limiter.
    pub rate_limiter: Arc<RateLimiter>,

    /// Refresh-token records (for revocation/introspection).
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
}

/// Builds the provider router.
#[must_use]
pub fn router(state: OpState) -> Router {
    Router::new()
        .route(
            "/.well-known/openid-configuration",
            get(discovery::openid_configuration_handler),
        )
        .route("/.well-known/jwks.json", get(jwks::jwks_handler))
        .route(
            "/authorize",
            get(authorize::authorize_handler).post(authorize::authorize_handler_post),
        )
        .route("/par", post(par::par_handler))
        .route("/token", post(token::token_handler))
        .route("/introspect", post(token::introspect_handler))
        .route("/revoke", post(token::revoke_handler))
        .route(
            "/userinfo",
            get(userinfo::userinfo_handler).post(userinfo::userinfo_handler),
        )
        .route("/bc-authorize", post(authorize::bc_authorize_handler))
        .route(
            "/device_authorization",
            post(authorize::device_authorization_handler),
        )
        .route("/logout", get(logout::logout_handler))
        .route(
            "/logout/backchannel",
            post(logout::backchannel_logout_handler),
        )
        .route("/flow/{challenge_id}", get(flow::contract_handler))
        .route(
            "/flow/{challenge_id}/identifier",
            post(flow::submit_identifier_handler),
        )
        .route("/flow/{challenge_id}/event", post(flow::event_handler))
        .route(
            "/flow/{challenge_id}/passkey/start",
            post(flow::passkey_start_handler),
        )
        .route(
            "/flow/{challenge_id}/passkey/finish",
            post(flow::passkey_finish_handler),
        )
        .route(
            "/flow/{challenge_id}/passkey/register/start",
            post(flow::passkey_register_start_handler),
        )
        .route(
            "/flow/{challenge_id}/passkey/register/finish",
            post(flow::passkey_register_finish_handler),
        )
        .route(
            "/flow/{challenge_id}/email/send",
            post(flow::email_send_handler),
        )
        .route(
            "/flow/{challenge_id}/email/verify",
            post(flow::email_verify_handler),
        )
        .route(
            "/flow/{challenge_id}/consent",
            post(flow::consent_handler),
        )
        .with_state(state)
}
