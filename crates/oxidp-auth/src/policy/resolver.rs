//! Contract composition.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;

use oxidp_core::UnixMillis;

use crate::error::{AuthError, AuthResult};
use crate::policy::resolved::{FlowNode, ResolvedPolicy};
use crate::types::{
    ClientContract, ClientType, ConsentMode, SecurityTier, TenantContract, UserAuthMethod,
};

/// Canonical settings digest input. Field order is fixed by this struct, so
/// serialization is deterministic across processes.
#[derive(Serialize)]
struct CanonicalSettings<'a> {
    issuer: &'a str,
    auth_methods: &'a [UserAuthMethod],
    scopes: &'a [String],
    grant_types: &'a [String],
    signing_alg: &'a str,
    require_pkce: bool,
    require_mfa: bool,
    security_tier: SecurityTier,
    access_token_ttl_ms: u128,
    refresh_token_ttl_ms: u128,
    consent_mode: ConsentMode,
}

/// Composes tenant and client contracts into resolved policies.
pub struct PolicyResolver {
    secret: Vec<u8>,
    auth_code_ttl: Duration,
}

impl PolicyResolver {
    /// Creates a resolver.
    ///
    /// `secret` keys the resolution-ID HMAC; `auth_code_ttl` is the
    /// process-wide code lifetime (≤ 120 s).
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>, auth_code_ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            auth_code_ttl: auth_code_ttl.min(Duration::from_secs(120)),
        }
    }

    /// Resolves the effective policy for one flow.
    ///
    /// Steps, in order: version pin check, set intersections, TTL minimums,
    /// security-tier maximum, capability union, palette computation, and the
    /// HMAC fingerprint over the canonical settings.
    ///
    /// # Errors
    ///
    /// `policy_stale` when the client pins a different tenant contract
    /// version; propagates containment violations as `invalid_client`.
    pub fn resolve(
        &self,
        tenant: &TenantContract,
        client: &ClientContract,
    ) -> AuthResult<ResolvedPolicy> {
        if client.tenant_contract_version != tenant.version {
            return Err(AuthError::PolicyStale {
                expected: client.tenant_contract_version,
                actual: tenant.version,
            });
        }
        client
            .validate_against(tenant)
            .map_err(|e| AuthError::invalid_client(e.to_string()))?;

        // Intersections. Client sets were validated to be subsets, but the
        // intersection is taken regardless so a drifted record cannot widen.
        let scopes: Vec<String> = client
            .allowed_scopes
            .iter()
            .filter(|s| tenant.allows_scope(s))
            .cloned()
            .collect();
        let grant_types: Vec<String> = client
            .allowed_grant_types
            .iter()
            .filter(|g| tenant.allows_grant_type(g))
            .cloned()
            .collect();
        let response_types = tenant.oauth.allowed_response_types.clone();
        let auth_methods = tenant.allowed_auth_methods.clone();

        // TTL minimums.
        let access_token_ttl = client.access_token_ttl.min(tenant.tokens.access_token_ttl);
        let id_token_ttl = tenant.tokens.id_token_ttl;
        let refresh_token_ttl = client
            .refresh_token_ttl
            .min(tenant.tokens.refresh_token_ttl);

        // Capability unions; security tier is the maximum of the two sides.
        let require_pkce = client.requires_pkce(tenant);
        let require_mfa = tenant.security.require_mfa;
        let security_tier = tenant.security.tier.max(client.security_tier);

        let consent_mode = client.consent_mode;

        let flow_palette = Self::palette(&auth_methods, consent_mode, client.client_type);

        let canonical = CanonicalSettings {
            issuer: &tenant.issuer,
            auth_methods: &auth_methods,
            scopes: &scopes,
            grant_types: &grant_types,
            signing_alg: &client.signing_alg,
            require_pkce,
            require_mfa,
            security_tier,
            access_token_ttl_ms: access_token_ttl.as_millis(),
            refresh_token_ttl_ms: refresh_token_ttl.as_millis(),
            consent_mode,
        };
        let resolution_id = self.fingerprint(tenant.version, client.version, &canonical)?;

        Ok(ResolvedPolicy {
            resolution_id,
            resolved_at: UnixMillis::now(),
            tenant_id: tenant.tenant_id.clone(),
            tenant_version: tenant.version,
            client_id: client.client_id.clone(),
            client_version: client.version,
            issuer: tenant.issuer.clone(),
            auth_methods,
            scopes,
            grant_types,
            response_types,
            signing_alg: client.signing_alg.clone(),
            require_pkce,
            require_mfa,
            security_tier,
            consent_mode,
            access_token_ttl,
            id_token_ttl,
            refresh_token_ttl,
            auth_code_ttl: self.auth_code_ttl,
            session_absolute_ttl: tenant.session.absolute_ttl,
            session_idle_ttl: tenant.session.idle_ttl,
            ciba_enabled: tenant.ciba.enabled,
            ciba_request_ttl: tenant.ciba.request_ttl,
            device_enabled: tenant.device_flow.enabled,
            device_code_ttl: tenant.device_flow.code_ttl,
            flow_palette,
        })
    }

    /// The policy-aware node palette.
    fn palette(
        auth_methods: &[UserAuthMethod],
        consent_mode: ConsentMode,
        _client_type: ClientType,
    ) -> Vec<FlowNode> {
        let mut palette = vec![
            FlowNode::IdentifyUser,
            FlowNode::SelectMethod,
            FlowNode::Reauthenticate,
        ];
        if auth_methods.contains(&UserAuthMethod::Passkey) {
            palette.push(FlowNode::PasskeyAuthenticate);
            palette.push(FlowNode::PasskeyRegister);
        }
        if auth_methods.contains(&UserAuthMethod::EmailCode) {
            palette.push(FlowNode::EmailCodeVerify);
        }
        if consent_mode != ConsentMode::AutoGrant {
            palette.push(FlowNode::ConsentPrompt);
        }
        palette
    }

    fn fingerprint(
        &self,
        tenant_version: u32,
        client_version: u32,
        canonical: &CanonicalSettings<'_>,
    ) -> AuthResult<String> {
        let settings = serde_json::to_vec(canonical)
            .map_err(|e| AuthError::server_error(format!("canonical settings: {e}")))?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret)
            .map_err(|e| AuthError::configuration(format!("resolver secret: {e}")))?;
        mac.update(tenant_version.to_be_bytes().as_slice());
        mac.update(client_version.to_be_bytes().as_slice());
        mac.update(&settings);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PolicyResolver {
        PolicyResolver::new(b"resolver-secret".to_vec(), Duration::from_secs(120))
    }

    fn tenant() -> TenantContract {
        TenantContract::new("acme", 3, "https://issuer.example")
    }

    fn client(tenant: &TenantContract) -> ClientContract {
        ClientContract::public(
            "public-spa",
            tenant,
            vec!["https://app.example/cb".to_string()],
        )
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let t = tenant();
        let c = client(&t);
        let r = resolver();
        let a = r.resolve(&t, &c).unwrap();
        let b = r.resolve(&t, &c).unwrap();
        assert_eq!(a.resolution_id, b.resolution_id);
        // 32-byte HMAC, hex.
        assert_eq!(a.resolution_id.len(), 64);
    }

    #[test]
    fn test_resolution_id_changes_with_inputs() {
        let t = tenant();
        let c = client(&t);
        let r = resolver();
        let base = r.resolve(&t, &c).unwrap();

        let mut c2 = c.clone();
        c2.version = 2;
        let bumped = r.resolve(&t, &c2).unwrap();
        assert_ne!(base.resolution_id, bumped.resolution_id);

        let mut c3 = c.clone();
        c3.allowed_scopes.retain(|s| s != "profile");
        let narrowed = r.resolve(&t, &c3).unwrap();
        assert_ne!(base.resolution_id, narrowed.resolution_id);
    }

    #[test]
    fn test_stale_version_fails() {
        let t = tenant();
        let mut c = client(&t);
        c.tenant_contract_version = 2;
        let err = resolver().resolve(&t, &c).unwrap_err();
        assert!(matches!(err, AuthError::PolicyStale { expected: 2, actual: 3 }));
        assert_eq!(err.oauth_error_code(), "invalid_client");
    }

    #[test]
    fn test_ttl_minimum_taken() {
        let t = tenant();
        let mut c = client(&t);
        c.access_token_ttl = Duration::from_secs(600);
        let p = resolver().resolve(&t, &c).unwrap();
        assert_eq!(p.access_token_ttl, Duration::from_secs(600));
        assert_eq!(p.refresh_token_ttl, Duration::from_secs(30 * 24 * 3600));
    }

    #[test]
    fn test_security_tier_takes_maximum() {
        let t = tenant();
        let mut c = client(&t);
        assert_eq!(
            resolver().resolve(&t, &c).unwrap().security_tier,
            SecurityTier::Standard
        );

        // A client opting into a stricter tier raises the effective tier.
        c.security_tier = SecurityTier::Strict;
        assert_eq!(
            resolver().resolve(&t, &c).unwrap().security_tier,
            SecurityTier::Strict
        );

        // An elevated tenant floor carries through; a laxer client pin is
        // rejected outright by containment validation.
        let mut elevated = tenant();
        elevated.security.tier = SecurityTier::Elevated;
        let mut pinned = client(&elevated);
        assert_eq!(
            resolver().resolve(&elevated, &pinned).unwrap().security_tier,
            SecurityTier::Elevated
        );
        pinned.security_tier = SecurityTier::Standard;
        assert!(resolver().resolve(&elevated, &pinned).is_err());
    }

    #[test]
    fn test_public_client_gets_pkce_and_full_palette() {
        let t = tenant();
        let p = resolver().resolve(&t, &client(&t)).unwrap();
        assert!(p.require_pkce);
        assert!(p.permits_node(FlowNode::PasskeyAuthenticate));
        assert!(p.permits_node(FlowNode::EmailCodeVerify));
        assert!(p.permits_node(FlowNode::ConsentPrompt));
    }

    #[test]
    fn test_auto_grant_removes_consent_node() {
        let mut t = tenant();
        t.consent.allow_auto_grant = true;
        let mut c = client(&t);
        c.consent_mode = ConsentMode::AutoGrant;
        let p = resolver().resolve(&t, &c).unwrap();
        assert!(!p.permits_node(FlowNode::ConsentPrompt));
    }

    #[test]
    fn test_method_restriction_narrows_palette() {
        let mut t = tenant();
        t.allowed_auth_methods = vec![UserAuthMethod::Passkey];
        let c = client(&t);
        let p = resolver().resolve(&t, &c).unwrap();
        assert!(p.permits_node(FlowNode::PasskeyAuthenticate));
        assert!(!p.permits_node(FlowNode::EmailCodeVerify));
    }

    #[test]
    fn test_code_ttl_clamped_to_spec_ceiling() {
        let r = PolicyResolver::new(b"s".to_vec(), Duration::from_secs(600));
        let t = tenant();
        let p = r.resolve(&t, &client(&t)).unwrap();
        assert_eq!(p.auth_code_ttl, Duration::from_secs(120));
    }

    #[test]
    fn test_resolved_policy_is_detached_from_contracts() {
        let mut t = tenant();
        let c = client(&t);
        let p = resolver().resolve(&t, &c).unwrap();
        let pinned = p.clone();

        // Mutating the live contract afterwards cannot reach the pinned copy.
        t.oauth.allowed_scopes.clear();
        t.version = 4;
        assert_eq!(pinned, p);
        assert!(pinned.allows_scope("openid"));
    }
}
