//! Client contracts.
//!
//! A client contract names a relying party and selects its behavior from the
//! tenant envelope. Every field must be equal to or more restrictive than the
//! referenced tenant contract; [`ClientContract::validate_against`] enforces
//! the containment and is run on every admin write and again at resolution
//! time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::keys::Jwks;
use crate::types::tenant::{SecurityTier, TenantContract};

/// Whether the client can keep a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// Browser or native app; cannot hold a secret, PKCE mandatory.
    Public,
    /// Server-side app holding credentials.
    Confidential,
}

/// Token-endpoint client authentication methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// HTTP Basic with client_id:client_secret.
    ClientSecretBasic,
    /// client_secret in the form body.
    ClientSecretPost,
    /// Signed JWT assertion (RFC 7523).
    PrivateKeyJwt,
    /// Mutual-TLS bound authentication.
    TlsClientAuth,
    /// No authentication; public clients with PKCE.
    None,
}

impl fmt::Display for ClientAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
            Self::PrivateKeyJwt => "private_key_jwt",
            Self::TlsClientAuth => "tls_client_auth",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}

/// Consent prompting behavior for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsentMode {
    /// Prompt unless a prior grant covers every requested scope.
    #[default]
    Remembered,
    /// Prompt on every authorization.
    Always,
    /// Never prompt; grant silently (first-party, tenant must allow).
    AutoGrant,
}

/// Encrypted-delivery settings for ID tokens and userinfo responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JweDelivery {
    /// Key-management algorithm; only "RSA-OAEP-256" is supported.
    pub alg: String,

    /// Content-encryption algorithm; only "A256GCM" is supported.
    pub enc: String,
}

impl Default for JweDelivery {
    fn default() -> Self {
        Self {
            alg: "RSA-OAEP-256".to_string(),
            enc: "A256GCM".to_string(),
        }
    }
}

/// Reasons a client contract can fail validation against its tenant.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClientValidationError {
    /// The contract references a different tenant contract version.
    #[error("Stale tenant contract reference: client pins v{pinned}, tenant is v{current}")]
    StaleTenantVersion {
        /// Version pinned by the client contract.
        pinned: u32,
        /// Current tenant version.
        current: u32,
    },

    /// A field exceeds the tenant envelope.
    #[error("Field '{field}' exceeds tenant envelope: {detail}")]
    ExceedsEnvelope {
        /// The offending field.
        field: &'static str,
        /// What exceeded the envelope.
        detail: String,
    },

    /// A structural requirement failed.
    #[error("Invalid client contract: {message}")]
    Invalid {
        /// Description of the failure.
        message: String,
    },
}

impl ClientValidationError {
    /// Creates an `ExceedsEnvelope` error.
    #[must_use]
    pub fn exceeds(field: &'static str, detail: impl Into<String>) -> Self {
        Self::ExceedsEnvelope {
            field,
            detail: detail.into(),
        }
    }

    /// Creates an `Invalid` error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// A registered relying party.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientContract {
    /// Client identifier.
    pub client_id: String,

    /// Contract version; bumped on every admin mutation.
    pub version: u32,

    /// Tenant contract version this contract was validated against.
    pub tenant_contract_version: u32,

    /// Owning tenant.
    pub tenant_id: String,

    /// Human-readable name.
    pub client_name: String,

    /// Public or confidential.
    pub client_type: ClientType,

    /// SHA-256 hash of the client secret, hex-encoded. Confidential clients
    /// using a shared secret only; never the secret itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_hash: Option<String>,

    /// Registered redirect URIs; matching is exact-string.
    pub redirect_uris: Vec<String>,

    /// Token-endpoint authentication method.
    pub auth_method: ClientAuthMethod,

    /// Chosen signing algorithm (must be in the tenant set).
    pub signing_alg: String,

    /// Scopes this client may request (subset of tenant scopes).
    pub allowed_scopes: Vec<String>,

    /// Grant types this client may use (subset of tenant grants).
    pub allowed_grant_types: Vec<String>,

    /// Consent behavior.
    #[serde(default)]
    pub consent_mode: ConsentMode,

    /// Security tier; must be equal to or stricter than the tenant's.
    /// Resolution takes the maximum of the two.
    #[serde(default)]
    pub security_tier: SecurityTier,

    /// Access token lifetime; clamped to the tenant ceiling.
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    /// Refresh token lifetime; clamped to the tenant ceiling.
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,

    /// Client's public keys for `private_key_jwt` and request objects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks: Option<Jwks>,

    /// Encrypted delivery of ID tokens / userinfo, when requested. Requires
    /// an encryption key in `jwks`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwe_delivery: Option<JweDelivery>,

    /// Front-channel logout URI, if the client participates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontchannel_logout_uri: Option<String>,

    /// Back-channel logout URI, if the client participates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backchannel_logout_uri: Option<String>,

    /// CIBA client notification endpoint (ping/push modes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ciba_notification_endpoint: Option<String>,

    /// CIBA delivery mode: "poll", "ping", or "push".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ciba_delivery_mode: Option<String>,
}

impl ClientContract {
    /// Creates a public client with sensible defaults.
    #[must_use]
    pub fn public(
        client_id: impl Into<String>,
        tenant: &TenantContract,
        redirect_uris: Vec<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            version: 1,
            tenant_contract_version: tenant.version,
            tenant_id: tenant.tenant_id.clone(),
            client_name: String::new(),
            client_type: ClientType::Public,
            client_secret_hash: None,
            redirect_uris,
            auth_method: ClientAuthMethod::None,
            signing_alg: "RS256".to_string(),
            allowed_scopes: tenant.oauth.allowed_scopes.clone(),
            allowed_grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            consent_mode: ConsentMode::default(),
            security_tier: tenant.security.tier,
            access_token_ttl: tenant.tokens.access_token_ttl,
            refresh_token_ttl: tenant.tokens.refresh_token_ttl,
            jwks: None,
            jwe_delivery: None,
            frontchannel_logout_uri: None,
            backchannel_logout_uri: None,
            ciba_notification_endpoint: None,
            ciba_delivery_mode: None,
        }
    }

    /// Returns `true` if `uri` is a registered redirect URI (exact match).
    #[must_use]
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    /// Returns `true` if the client may request the given scope.
    #[must_use]
    pub fn allows_scope(&self, scope: &str) -> bool {
        self.allowed_scopes.iter().any(|s| s == scope)
    }

    /// Returns `true` if the client may use the given grant type.
    #[must_use]
    pub fn allows_grant_type(&self, grant_type: &str) -> bool {
        self.allowed_grant_types.iter().any(|g| g == grant_type)
    }

    /// Returns `true` if PKCE is mandatory for this client.
    #[must_use]
    pub fn requires_pkce(&self, tenant: &TenantContract) -> bool {
        self.client_type == ClientType::Public || tenant.oauth.require_pkce
    }

    /// Validates containment within the tenant envelope.
    ///
    /// # Errors
    ///
    /// Returns the first violation found: a stale tenant version pin, a field
    /// outside the envelope, or a structurally invalid combination.
    pub fn validate_against(
        &self,
        tenant: &TenantContract,
    ) -> Result<(), ClientValidationError> {
        if self.tenant_contract_version != tenant.version {
            return Err(ClientValidationError::StaleTenantVersion {
                pinned: self.tenant_contract_version,
                current: tenant.version,
            });
        }

        if self.tenant_id != tenant.tenant_id {
            return Err(ClientValidationError::invalid(format!(
                "client belongs to tenant '{}', contract is for '{}'",
                self.tenant_id, tenant.tenant_id
            )));
        }

        if self.redirect_uris.is_empty()
            && self.allowed_grant_types.iter().any(|g| g == "authorization_code")
        {
            return Err(ClientValidationError::invalid(
                "authorization_code clients must register at least one redirect URI",
            ));
        }

        if !tenant
            .oauth
            .allowed_signing_algs
            .iter()
            .any(|a| *a == self.signing_alg)
        {
            return Err(ClientValidationError::exceeds(
                "signing_alg",
                self.signing_alg.clone(),
            ));
        }

        for scope in &self.allowed_scopes {
            if !tenant.allows_scope(scope) {
                return Err(ClientValidationError::exceeds("allowed_scopes", scope.clone()));
            }
        }

        for grant in &self.allowed_grant_types {
            if !tenant.allows_grant_type(grant) {
                return Err(ClientValidationError::exceeds(
                    "allowed_grant_types",
                    grant.clone(),
                ));
            }
        }

        if self.access_token_ttl > tenant.tokens.access_token_ttl {
            return Err(ClientValidationError::exceeds(
                "access_token_ttl",
                format!("{:?}", self.access_token_ttl),
            ));
        }

        if self.refresh_token_ttl > tenant.tokens.refresh_token_ttl {
            return Err(ClientValidationError::exceeds(
                "refresh_token_ttl",
                format!("{:?}", self.refresh_token_ttl),
            ));
        }

        if self.consent_mode == ConsentMode::AutoGrant && !tenant.consent.allow_auto_grant {
            return Err(ClientValidationError::exceeds(
                "consent_mode",
                "auto_grant not permitted by tenant",
            ));
        }

        if self.security_tier < tenant.security.tier {
            return Err(ClientValidationError::exceeds(
                "security_tier",
                format!(
                    "{:?} is below the tenant minimum {:?}",
                    self.security_tier, tenant.security.tier
                ),
            ));
        }

        match self.client_type {
            ClientType::Public => {
                if self.auth_method != ClientAuthMethod::None {
                    return Err(ClientValidationError::invalid(
                        "public clients must use auth_method 'none'",
                    ));
                }
                if self.client_secret_hash.is_some() {
                    return Err(ClientValidationError::invalid(
                        "public clients cannot hold a client secret",
                    ));
                }
            }
            ClientType::Confidential => match self.auth_method {
                ClientAuthMethod::None => {
                    return Err(ClientValidationError::invalid(
                        "confidential clients must authenticate",
                    ));
                }
                ClientAuthMethod::ClientSecretBasic | ClientAuthMethod::ClientSecretPost => {
                    if self.client_secret_hash.is_none() {
                        return Err(ClientValidationError::invalid(
                            "secret-based auth requires a stored secret hash",
                        ));
                    }
                }
                ClientAuthMethod::PrivateKeyJwt => {
                    if self.jwks.is_none() {
                        return Err(ClientValidationError::invalid(
                            "private_key_jwt requires registered client JWKS",
                        ));
                    }
                }
                ClientAuthMethod::TlsClientAuth => {}
            },
        }

        if self.jwe_delivery.is_some() && self.jwks.is_none() {
            return Err(ClientValidationError::invalid(
                "encrypted delivery requires an encryption key in the client JWKS",
            ));
        }

        Ok(())
    }
}
