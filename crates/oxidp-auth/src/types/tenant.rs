//! Tenant contracts.
//!
//! A tenant contract is the maximal policy envelope for everything a tenant's
//! clients may do. It is strictly an upper bound: a newer version may tighten
//! any field but never loosen one. Client contracts are validated against it
//! (see [`crate::types::ClientContract::validate_against`]) and the two are
//! composed into a `ResolvedPolicy` at flow start.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// End-user authentication methods a tenant may permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAuthMethod {
    /// WebAuthn passkey ceremony.
    Passkey,
    /// Email one-time code.
    EmailCode,
}

impl fmt::Display for UserAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passkey => write!(f, "passkey"),
            Self::EmailCode => write!(f, "email_code"),
        }
    }
}

/// Security tier; policy resolution takes the maximum of tenant and client.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum SecurityTier {
    /// Baseline protections.
    #[default]
    Standard,
    /// Elevated: forces PKCE and short sessions.
    Elevated,
    /// Strict: additionally forces MFA.
    Strict,
}

/// OAuth-category tenant policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OAuthPolicy {
    /// Signing algorithms clients may choose from.
    pub allowed_signing_algs: Vec<String>,

    /// Grant types clients may use.
    pub allowed_grant_types: Vec<String>,

    /// Response types clients may use.
    pub allowed_response_types: Vec<String>,

    /// Scopes clients may request.
    pub allowed_scopes: Vec<String>,

    /// Whether PKCE is mandatory for every client (public clients always
    /// require it regardless).
    pub require_pkce: bool,
}

impl Default for OAuthPolicy {
    fn default() -> Self {
        Self {
            allowed_signing_algs: vec!["RS256".to_string()],
            allowed_grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            allowed_response_types: vec!["code".to_string()],
            allowed_scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "offline_access".to_string(),
            ],
            require_pkce: false,
        }
    }
}

/// Session-category tenant policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionPolicy {
    /// Absolute session lifetime ceiling.
    #[serde(with = "humantime_serde")]
    pub absolute_ttl: Duration,

    /// Idle window ceiling.
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            absolute_ttl: Duration::from_secs(8 * 3600),
            idle_ttl: Duration::from_secs(3600),
        }
    }
}

/// Security-category tenant policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Minimum security tier for all clients.
    pub tier: SecurityTier,

    /// Whether a second factor is mandatory tenant-wide.
    pub require_mfa: bool,
}

/// Token-category tenant policy (ceilings; clients may tighten).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TokenPolicy {
    /// Access token lifetime ceiling.
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    /// ID token lifetime ceiling.
    #[serde(with = "humantime_serde")]
    pub id_token_ttl: Duration,

    /// Refresh token lifetime ceiling.
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(3600),
            id_token_ttl: Duration::from_secs(3600),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Backchannel-authentication tenant policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CibaPolicy {
    /// Whether CIBA is available at all.
    pub enabled: bool,

    /// Request lifetime ceiling.
    #[serde(with = "humantime_serde")]
    pub request_ttl: Duration,
}

impl Default for CibaPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            request_ttl: Duration::from_secs(300),
        }
    }
}

/// Device-flow tenant policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceFlowPolicy {
    /// Whether the device authorization grant is available.
    pub enabled: bool,

    /// Device code lifetime ceiling.
    #[serde(with = "humantime_serde")]
    pub code_ttl: Duration,
}

impl Default for DeviceFlowPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            code_ttl: Duration::from_secs(600),
        }
    }
}

/// Consent-category tenant policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ConsentPolicy {
    /// Whether clients may skip the consent prompt entirely
    /// (first-party clients only).
    pub allow_auto_grant: bool,
}

/// The maximal policy envelope for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantContract {
    /// Tenant identifier.
    pub tenant_id: String,

    /// Contract version; bumped on every admin mutation.
    pub version: u32,

    /// Issuer URL for this tenant.
    pub issuer: String,

    /// Permitted end-user authentication methods.
    pub allowed_auth_methods: Vec<UserAuthMethod>,

    /// OAuth-category policy.
    #[serde(default)]
    pub oauth: OAuthPolicy,

    /// Session-category policy.
    #[serde(default)]
    pub session: SessionPolicy,

    /// Security-category policy.
    #[serde(default)]
    pub security: SecurityPolicy,

    /// Token-category policy.
    #[serde(default)]
    pub tokens: TokenPolicy,

    /// Backchannel-authentication policy.
    #[serde(default)]
    pub ciba: CibaPolicy,

    /// Device-flow policy.
    #[serde(default)]
    pub device_flow: DeviceFlowPolicy,

    /// Consent policy.
    #[serde(default)]
    pub consent: ConsentPolicy,
}

impl TenantContract {
    /// Creates a contract with default category policies.
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, version: u32, issuer: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            version,
            issuer: issuer.into(),
            allowed_auth_methods: vec![UserAuthMethod::Passkey, UserAuthMethod::EmailCode],
            oauth: OAuthPolicy::default(),
            session: SessionPolicy::default(),
            security: SecurityPolicy::default(),
            tokens: TokenPolicy::default(),
            ciba: CibaPolicy::default(),
            device_flow: DeviceFlowPolicy::default(),
            consent: ConsentPolicy::default(),
        }
    }

    /// Returns `true` if the tenant permits the given scope.
    #[must_use]
    pub fn allows_scope(&self, scope: &str) -> bool {
        self.oauth.allowed_scopes.iter().any(|s| s == scope)
    }

    /// Returns `true` if the tenant permits the given grant type.
    #[must_use]
    pub fn allows_grant_type(&self, grant_type: &str) -> bool {
        self.oauth.allowed_grant_types.iter().any(|g| g == grant_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_envelope() {
        let tenant = TenantContract::new("acme", 1, "https://issuer.example");
        assert!(tenant.allows_scope("openid"));
        assert!(tenant.allows_scope("offline_access"));
        assert!(!tenant.allows_scope("admin"));
        assert!(tenant.allows_grant_type("authorization_code"));
        assert!(!tenant.allows_grant_type("password"));
        assert_eq!(tenant.security.tier, SecurityTier::Standard);
    }

    #[test]
    fn test_security_tier_ordering() {
        assert!(SecurityTier::Strict > SecurityTier::Elevated);
        assert!(SecurityTier::Elevated > SecurityTier::Standard);
        assert_eq!(
            SecurityTier::Standard.max(SecurityTier::Strict),
            SecurityTier::Strict
        );
    }

    #[test]
    fn test_serde_snake_case_methods() {
        let json = serde_json::to_string(&UserAuthMethod::EmailCode).unwrap();
        assert_eq!(json, "\"email_code\"");
        let back: UserAuthMethod = serde_json::from_str("\"passkey\"").unwrap();
        assert_eq!(back, UserAuthMethod::Passkey);
    }
}
