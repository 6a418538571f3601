//! The resolved per-flow policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use oxidp_core::UnixMillis;

use crate::types::{ConsentMode, SecurityTier, UserAuthMethod};

/// Flow-engine nodes a resolved policy may permit.
///
/// The palette is the complete set of interactive steps the flow engine may
/// enter for one challenge; emitting a capability outside it is a hard bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowNode {
    /// Collect an identifier (email) to locate the user.
    IdentifyUser,
    /// Choose between permitted authentication methods.
    SelectMethod,
    /// WebAuthn assertion ceremony.
    PasskeyAuthenticate,
    /// WebAuthn registration ceremony.
    PasskeyRegister,
    /// Email one-time-code entry.
    EmailCodeVerify,
    /// Scope consent prompt.
    ConsentPrompt,
    /// Forced re-authentication (`prompt=login`, `max_age` elapsed).
    Reauthenticate,
}

/// The immutable composition of one tenant contract and one client contract.
///
/// Every field is effective policy: algorithm/scope/grant intersections,
/// minimum TTLs, maximum security tier, and the union of required
/// capabilities. The struct is a plain value — pinning it in the challenge
/// record is what makes property "resolved policy immutability" hold even
/// when the underlying contracts change mid-flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedPolicy {
    /// HMAC fingerprint of the inputs; doubles as the pin key.
    pub resolution_id: String,

    /// When resolution happened.
    pub resolved_at: UnixMillis,

    /// Tenant the flow belongs to.
    pub tenant_id: String,

    /// Tenant contract version at resolution.
    pub tenant_version: u32,

    /// Client the flow belongs to.
    pub client_id: String,

    /// Client contract version at resolution.
    pub client_version: u32,

    /// Issuer URL for every token issued under this flow.
    pub issuer: String,

    /// Permitted end-user authentication methods (intersection).
    pub auth_methods: Vec<UserAuthMethod>,

    /// Scopes the client may be granted (intersection).
    pub scopes: Vec<String>,

    /// Grant types available (intersection).
    pub grant_types: Vec<String>,

    /// Response types available (intersection).
    pub response_types: Vec<String>,

    /// Effective signing algorithm.
    pub signing_alg: String,

    /// PKCE mandatory (union of requirements; always true for public clients).
    pub require_pkce: bool,

    /// MFA mandatory (union of requirements).
    pub require_mfa: bool,

    /// Effective security tier (maximum).
    pub security_tier: SecurityTier,

    /// Effective consent behavior.
    pub consent_mode: ConsentMode,

    /// Access token lifetime (minimum of contracts).
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    /// ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_ttl: Duration,

    /// Refresh token lifetime (minimum of contracts; spec default 30 d).
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,

    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub auth_code_ttl: Duration,

    /// Session absolute lifetime.
    #[serde(with = "humantime_serde")]
    pub session_absolute_ttl: Duration,

    /// Session idle window.
    #[serde(with = "humantime_serde")]
    pub session_idle_ttl: Duration,

    /// Whether CIBA is available to this client.
    pub ciba_enabled: bool,

    /// CIBA request lifetime.
    #[serde(with = "humantime_serde")]
    pub ciba_request_ttl: Duration,

    /// Whether the device grant is available to this client.
    pub device_enabled: bool,

    /// Device code lifetime.
    #[serde(with = "humantime_serde")]
    pub device_code_ttl: Duration,

    /// The permitted flow-engine nodes.
    pub flow_palette: Vec<FlowNode>,
}

impl ResolvedPolicy {
    /// Returns `true` if the palette permits the given node.
    #[must_use]
    pub fn permits_node(&self, node: FlowNode) -> bool {
        self.flow_palette.contains(&node)
    }

    /// Returns `true` if the scope is within the effective set.
    #[must_use]
    pub fn allows_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Filters a requested scope string down to the effective set, preserving
    /// request order.
    #[must_use]
    pub fn filter_scopes(&self, requested: &str) -> Vec<String> {
        requested
            .split_whitespace()
            .filter(|s| self.allows_scope(s))
            .map(str::to_owned)
            .collect()
    }

    /// Returns `true` if the grant type is available.
    #[must_use]
    pub fn allows_grant_type(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }
}
