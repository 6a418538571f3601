//! OAuth 2.0 / OIDC protocol surface.
//!
//! - [`pkce`] - RFC 7636, S256 only
//! - [`types`] - Wire request/response shapes for the token endpoints
//! - [`client_auth`] - Token-endpoint client authentication
//! - [`authorize`] - Authorization request validation and redirect assembly
//! - [`request_object`] - PAR and Request Object resolution (RFC 9126 / 9101)
//! - [`orchestrator`] - The interactive `/authorize` flow driver
//! - [`grants`] - `/token` grant dispatch

pub mod authorize;
pub mod client_auth;
pub mod grants;
pub mod orchestrator;
pub mod pkce;
pub mod request_object;
pub mod types;

pub use authorize::{AuthorizeParams, Prompt, ValidatedAuthorizeRequest};
pub use client_auth::{ClientAuthenticator, ClientCredentials};
pub use grants::GrantDispatcher;
pub use orchestrator::{AuthorizeOrchestrator, AuthorizeOutcome, FlowPayload};
pub use pkce::{PkceChallenge, PkceError, PkceVerifier};
pub use request_object::RequestObjectResolver;
pub use types::{
    CibaAuthorizeResponse, DeviceAuthorizationResponse, ParResponse, TokenRequest, TokenResponse,
};
