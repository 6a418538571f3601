//! # oxidp-auth
//!
//! The OpenID Provider core for OxIdP: a multi-tenant OIDC / OAuth 2.0
//! authorization server with passwordless user authentication.
//!
//! This crate provides:
//! - The OAuth 2.0 / OIDC protocol state machine (`/authorize` → `/token` →
//!   `/userinfo`) with PKCE, PAR, Request Objects, and prompt handling
//! - Signing-key lifecycle with scheduled and emergency rotation
//! - RS256/ES256 token issuance with `at_hash`/`c_hash` and optional JWE
//! - Typed, TTL-bounded stores for codes, challenges, sessions, refresh
//!   tokens, CIBA requests, and device grants
//! - Tenant × client policy resolution pinned per flow
//! - A hierarchical flow engine emitting UI-neutral per-step contracts
//! - WebAuthn passkey and email one-time-code verification
//! - CIBA and device-grant coordination, logout propagation, and a
//!   structured event bus boundary
//!
//! ## Modules
//!
//! - [`config`] - Provider configuration
//! - [`error`] - Error types and OAuth registry mapping
//! - [`types`] - Contracts and entities
//! - [`policy`] - Policy resolution and the contract registry
//! - [`keys`] - Signing-key lifecycle
//! - [`token`] - Token issuance and verification
//! - [`stores`] - Storage traits
//! - [`rate_limit`] - Fixed-window rate limiting
//! - [`oauth`] - Protocol surface and the flow orchestrator
//! - [`flow`] - The flow engine and UI contract
//! - [`consent`] - Consent service
//! - [`passwordless`] - Passkey and email-code verifiers
//! - [`ciba`] - Backchannel authentication
//! - [`device`] - Device authorization grant
//! - [`logout`] - Logout coordination
//! - [`userinfo`] - Claim assembly
//! - [`http`] - Axum handlers and the provider router

pub mod ciba;
pub mod config;
pub mod consent;
pub mod device;
pub mod error;
pub mod flow;
pub mod http;
pub mod keys;
pub mod logout;
pub mod oauth;
pub mod passwordless;
pub mod policy;
pub mod rate_limit;
pub mod stores;
pub mod token;
pub mod types;
pub mod userinfo;

pub use ciba::{BackchannelNotifier, CibaParams, CibaRunner};
pub use config::AuthConfig;
pub use consent::{ConsentDecision, ConsentService};
pub use device::{DeviceGrantRunner, DeviceParams};
pub use error::{AuthError, AuthResult, ErrorCategory};
pub use flow::{FlowEvent, FlowState, Intent, UiContract};
pub use http::{OpState, router};
pub use keys::{Jwk, Jwks, KeyStore, KeyStorage, RotationReason, SigningAlg};
pub use logout::{LogoutCoordinator, LogoutParams};
pub use oauth::{
    AuthorizeOrchestrator, AuthorizeOutcome, ClientAuthenticator, GrantDispatcher, TokenRequest,
    TokenResponse,
};
pub use passwordless::{EmailOtpService, EmailSender, PasskeyService};
pub use policy::{ContractRegistry, FlowNode, PolicyResolver, ResolvedPolicy};
pub use rate_limit::{Decision, RateLimiter};
pub use token::issuer::{IssueContext, TokenIssuer, VerifyExpectations};
pub use types::{ClientContract, TenantContract, UserCore, UserPii};
pub use userinfo::{UserInfoResponse, UserInfoService};
