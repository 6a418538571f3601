//! Provider configuration.
//!
//! Static process configuration: issuer identity, signing defaults, store
//! TTL ceilings, rate-limit profiles, and outbound timeouts. Per-tenant and
//! per-client behavior lives in the contract registry, not here; these values
//! are the hard ceilings the contracts are clamped to.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth]
//! issuer = "https://issuer.example"
//!
//! [auth.signing]
//! algorithm = "RS256"
//! rotation_overlap = "24h"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Public issuer URL. Must exactly match the `iss` claim in every issued
    /// token; discovery is derived from it.
    pub issuer: String,

    /// OAuth protocol ceilings.
    pub oauth: OAuthConfig,

    /// Signing-key lifecycle settings.
    pub signing: SigningConfig,

    /// Browser session ceilings.
    pub session: SessionConfig,

    /// Backchannel authentication (CIBA) settings.
    pub ciba: CibaConfig,

    /// Device authorization grant settings.
    pub device: DeviceConfig,

    /// Passwordless verifier settings.
    pub passwordless: PasswordlessConfig,

    /// Rate-limit profiles.
    pub rate_limits: RateLimitConfig,

    /// Per-tenant resource caps, enforced at insert time.
    pub limits: ResourceLimits,

    /// Outbound HTTP timeout (request-object fetch, notifications, logout).
    #[serde(with = "humantime_serde")]
    pub outbound_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            oauth: OAuthConfig::default(),
            signing: SigningConfig::default(),
            session: SessionConfig::default(),
            ciba: CibaConfig::default(),
            device: DeviceConfig::default(),
            passwordless: PasswordlessConfig::default(),
            rate_limits: RateLimitConfig::default(),
            limits: ResourceLimits::default(),
            outbound_timeout: Duration::from_secs(3),
        }
    }
}

/// OAuth protocol ceilings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Authorization code lifetime. Hard ceiling 120 s.
    #[serde(with = "humantime_serde")]
    pub authorization_code_ttl: Duration,

    /// Pushed authorization request lifetime. Hard ceiling 60 s.
    #[serde(with = "humantime_serde")]
    pub par_request_ttl: Duration,

    /// Default access token lifetime (contracts may tighten).
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    /// Default ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_ttl: Duration,

    /// Default refresh token lifetime (contracts may tighten).
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,

    /// Clock skew tolerated when verifying inbound JWTs.
    #[serde(with = "humantime_serde")]
    pub verification_skew: Duration,

    /// Maximum accepted request-object / PAR body size in bytes.
    pub max_request_object_bytes: usize,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authorization_code_ttl: Duration::from_secs(120),
            par_request_ttl: Duration::from_secs(60),
            access_token_ttl: Duration::from_secs(3600),
            id_token_ttl: Duration::from_secs(3600),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 3600),
            verification_skew: Duration::from_secs(300),
            max_request_object_bytes: 32 * 1024,
        }
    }
}

/// Signing-key lifecycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Primary signing algorithm: "RS256" (default) or "ES256".
    pub algorithm: String,

    /// How long a superseded key keeps verifying after a scheduled rotation.
    #[serde(with = "humantime_serde")]
    pub rotation_overlap: Duration,

    /// How long retired keys stay persisted before cleanup.
    #[serde(with = "humantime_serde")]
    pub retired_retention: Duration,

    /// Imported-key cache TTL.
    #[serde(with = "humantime_serde")]
    pub key_cache_ttl: Duration,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "RS256".to_string(),
            rotation_overlap: Duration::from_secs(24 * 3600),
            retired_retention: Duration::from_secs(7 * 24 * 3600),
            key_cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Browser session ceilings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Absolute session lifetime.
    #[serde(with = "humantime_serde")]
    pub absolute_ttl: Duration,

    /// Idle window; activity within it extends the session.
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            absolute_ttl: Duration::from_secs(8 * 3600),
            idle_ttl: Duration::from_secs(3600),
        }
    }
}

/// Backchannel authentication settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CibaConfig {
    /// Request lifetime when the contract does not tighten it.
    #[serde(with = "humantime_serde")]
    pub request_ttl: Duration,

    /// Initial minimum poll interval.
    #[serde(with = "humantime_serde")]
    pub min_poll_interval: Duration,

    /// Poll interval ceiling after `slow_down` doubling.
    #[serde(with = "humantime_serde")]
    pub max_poll_interval: Duration,

    /// Maximum `binding_message` length in characters.
    pub max_binding_message_chars: usize,
}

impl Default for CibaConfig {
    fn default() -> Self {
        Self {
            request_ttl: Duration::from_secs(300),
            min_poll_interval: Duration::from_secs(5),
            max_poll_interval: Duration::from_secs(30),
            max_binding_message_chars: 140,
        }
    }
}

/// Device authorization grant settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device code lifetime.
    #[serde(with = "humantime_serde")]
    pub code_ttl: Duration,

    /// Initial minimum poll interval.
    #[serde(with = "humantime_serde")]
    pub min_poll_interval: Duration,

    /// Poll interval ceiling after `slow_down` doubling.
    #[serde(with = "humantime_serde")]
    pub max_poll_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(600),
            min_poll_interval: Duration::from_secs(5),
            max_poll_interval: Duration::from_secs(30),
        }
    }
}

/// Passwordless verifier settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PasswordlessConfig {
    /// WebAuthn ceremony challenge lifetime.
    #[serde(with = "humantime_serde")]
    pub webauthn_challenge_ttl: Duration,

    /// Email one-time-code lifetime.
    #[serde(with = "humantime_serde")]
    pub email_code_ttl: Duration,

    /// Maximum verification attempts before the code is invalidated.
    pub email_code_max_attempts: u32,

    /// Relying-party display name presented by authenticators.
    pub rp_name: String,
}

impl Default for PasswordlessConfig {
    fn default() -> Self {
        Self {
            webauthn_challenge_ttl: Duration::from_secs(300),
            email_code_ttl: Duration::from_secs(300),
            email_code_max_attempts: 5,
            rp_name: "OxIdP".to_string(),
        }
    }
}

/// One fixed-window rate-limit policy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Window length.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Maximum operations per window.
    pub max: u32,
}

impl WindowPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(window: Duration, max: u32) -> Self {
        Self { window, max }
    }
}

/// Per-endpoint rate-limit profiles.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Email code sends, keyed by email.
    pub send_email: WindowPolicy,

    /// Email code verifications, keyed by challenge.
    pub code_verify: WindowPolicy,

    /// Passkey assertions, keyed by IP.
    pub passkey_auth: WindowPolicy,

    /// Token endpoint, keyed by client.
    pub token: WindowPolicy,

    /// Pushed authorization requests, keyed by client.
    pub par: WindowPolicy,

    /// Backchannel authentication requests, keyed by client.
    pub bc_authorize: WindowPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            send_email: WindowPolicy::new(Duration::from_secs(15 * 60), 3),
            code_verify: WindowPolicy::new(Duration::from_secs(15 * 60), 10),
            passkey_auth: WindowPolicy::new(Duration::from_secs(60), 30),
            token: WindowPolicy::new(Duration::from_secs(60), 120),
            par: WindowPolicy::new(Duration::from_secs(60), 60),
            bc_authorize: WindowPolicy::new(Duration::from_secs(60), 30),
        }
    }
}

/// Per-tenant caps enforced when inserting into the short-lived stores.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum in-flight challenges per tenant.
    pub max_active_challenges: u64,

    /// Maximum live sessions per tenant.
    pub max_active_sessions: u64,

    /// Maximum pending CIBA requests per tenant.
    pub max_active_ciba_requests: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_active_challenges: 10_000,
            max_active_sessions: 100_000,
            max_active_ciba_requests: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_respect_spec_ceilings() {
        let config = AuthConfig::default();
        assert!(config.oauth.authorization_code_ttl <= Duration::from_secs(120));
        assert!(config.oauth.par_request_ttl <= Duration::from_secs(60));
        assert_eq!(config.signing.algorithm, "RS256");
        assert_eq!(config.signing.rotation_overlap, Duration::from_secs(86400));
        assert_eq!(config.ciba.max_poll_interval, Duration::from_secs(30));
        assert_eq!(config.ciba.max_binding_message_chars, 140);
        assert_eq!(config.passwordless.email_code_max_attempts, 5);
        assert_eq!(config.oauth.max_request_object_bytes, 32 * 1024);
    }

    #[test]
    fn test_toml_roundtrip_with_humantime() {
        let toml = r#"
            issuer = "https://issuer.example"

            [oauth]
            authorization_code_ttl = "90s"
            refresh_token_ttl = "14d"

            [signing]
            algorithm = "ES256"
            rotation_overlap = "12h"
        "#;
        let config: AuthConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.issuer, "https://issuer.example");
        assert_eq!(config.oauth.authorization_code_ttl, Duration::from_secs(90));
        assert_eq!(
            config.oauth.refresh_token_ttl,
            Duration::from_secs(14 * 24 * 3600)
        );
        assert_eq!(config.signing.algorithm, "ES256");
        assert_eq!(config.signing.rotation_overlap, Duration::from_secs(12 * 3600));
        // Untouched sections keep defaults.
        assert_eq!(config.rate_limits.send_email.max, 3);
    }

    #[test]
    fn test_rate_limit_defaults_match_policy() {
        let limits = RateLimitConfig::default();
        assert_eq!(limits.send_email, WindowPolicy::new(Duration::from_secs(900), 3));
        assert_eq!(limits.code_verify, WindowPolicy::new(Duration::from_secs(900), 10));
    }
}
