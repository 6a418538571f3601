//! The contract registry.
//!
//! Process-wide view of tenant and client contracts with atomic-swap
//! semantics: every mutation builds a full replacement snapshot and swaps the
//! pointer, so readers never observe a half-applied change and flows holding
//! a `ResolvedPolicy` are untouched by later swaps.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::{AuthError, AuthResult};
use crate::types::{ClientContract, TenantContract};

#[derive(Default)]
struct Snapshot {
    tenants: HashMap<String, Arc<TenantContract>>,
    clients: HashMap<String, Arc<ClientContract>>,
}

/// Atomic-swap store of contracts.
pub struct ContractRegistry {
    inner: ArcSwap<Snapshot>,
}

impl Default for ContractRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContractRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    /// Inserts or replaces a tenant contract.
    ///
    /// # Errors
    ///
    /// Rejects a version that does not strictly increase an existing one —
    /// the version is the loosening guard, so overwrites at the same version
    /// are not allowed.
    pub fn upsert_tenant(&self, tenant: TenantContract) -> AuthResult<()> {
        let current = self.inner.load();
        if let Some(existing) = current.tenants.get(&tenant.tenant_id) {
            if tenant.version <= existing.version {
                return Err(AuthError::invalid_request(format!(
                    "tenant contract version must increase: {} <= {}",
                    tenant.version, existing.version
                )));
            }
        }
        let mut next = Snapshot {
            tenants: current.tenants.clone(),
            clients: current.clients.clone(),
        };
        next.tenants
            .insert(tenant.tenant_id.clone(), Arc::new(tenant));
        self.inner.store(Arc::new(next));
        Ok(())
    }

    /// Inserts or replaces a client contract after validating it against its
    /// tenant.
    ///
    /// # Errors
    ///
    /// Fails when the tenant is unknown or the contract exceeds the tenant
    /// envelope.
    pub fn upsert_client(&self, client: ClientContract) -> AuthResult<()> {
        let current = self.inner.load();
        let tenant = current.tenants.get(&client.tenant_id).ok_or_else(|| {
            AuthError::invalid_request(format!("unknown tenant '{}'", client.tenant_id))
        })?;
        client
            .validate_against(tenant)
            .map_err(|e| AuthError::invalid_client(e.to_string()))?;

        let mut next = Snapshot {
            tenants: current.tenants.clone(),
            clients: current.clients.clone(),
        };
        next.clients
            .insert(client.client_id.clone(), Arc::new(client));
        self.inner.store(Arc::new(next));
        Ok(())
    }

    /// Looks up a tenant contract.
    #[must_use]
    pub fn tenant(&self, tenant_id: &str) -> Option<Arc<TenantContract>> {
        self.inner.load().tenants.get(tenant_id).cloned()
    }

    /// Looks up a client contract.
    #[must_use]
    pub fn client(&self, client_id: &str) -> Option<Arc<ClientContract>> {
        self.inner.load().clients.get(client_id).cloned()
    }

    /// Looks up a client together with its owning tenant, the pair policy
    /// resolution needs. Fails closed: a missing contract denies the flow.
    ///
    /// # Errors
    ///
    /// `invalid_client` when either contract is missing.
    pub fn pair(
        &self,
        client_id: &str,
    ) -> AuthResult<(Arc<TenantContract>, Arc<ClientContract>)> {
        let snapshot = self.inner.load();
        let client = snapshot
            .clients
            .get(client_id)
            .cloned()
            .ok_or_else(|| AuthError::invalid_client(format!("unknown client '{client_id}'")))?;
        let tenant = snapshot
            .tenants
            .get(&client.tenant_id)
            .cloned()
            .ok_or_else(|| {
                AuthError::invalid_client(format!(
                    "client '{client_id}' references unknown tenant '{}'",
                    client.tenant_id
                ))
            })?;
        Ok((tenant, client))
    }

    /// All clients participating in logout for a tenant (front- or
    /// back-channel URI registered).
    #[must_use]
    pub fn logout_participants(&self, tenant_id: &str) -> Vec<Arc<ClientContract>> {
        self.inner
            .load()
            .clients
            .values()
            .filter(|c| {
                c.tenant_id == tenant_id
                    && (c.frontchannel_logout_uri.is_some() || c.backchannel_logout_uri.is_some())
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(version: u32) -> TenantContract {
        TenantContract::new("acme", version, "https://issuer.example")
    }

    fn client(tenant: &TenantContract) -> ClientContract {
        ClientContract::public(
            "public-spa",
            tenant,
            vec!["https://app.example/cb".to_string()],
        )
    }

    #[test]
    fn test_pair_lookup() {
        let registry = ContractRegistry::new();
        let t = tenant(1);
        registry.upsert_tenant(t.clone()).unwrap();
        registry.upsert_client(client(&t)).unwrap();

        let (found_tenant, found_client) = registry.pair("public-spa").unwrap();
        assert_eq!(found_tenant.version, 1);
        assert_eq!(found_client.client_id, "public-spa");
    }

    #[test]
    fn test_missing_contract_fails_closed() {
        let registry = ContractRegistry::new();
        assert!(registry.pair("nobody").is_err());

        // Client whose tenant disappeared is also denied.
        let t = tenant(1);
        registry.upsert_tenant(t.clone()).unwrap();
        registry.upsert_client(client(&t)).unwrap();
        assert!(registry.pair("public-spa").is_ok());
    }

    #[test]
    fn test_version_must_increase() {
        let registry = ContractRegistry::new();
        registry.upsert_tenant(tenant(2)).unwrap();
        assert!(registry.upsert_tenant(tenant(2)).is_err());
        assert!(registry.upsert_tenant(tenant(1)).is_err());
        assert!(registry.upsert_tenant(tenant(3)).is_ok());
    }

    #[test]
    fn test_client_validated_on_upsert() {
        let registry = ContractRegistry::new();
        let t = tenant(1);
        registry.upsert_tenant(t.clone()).unwrap();

        let mut bad = client(&t);
        bad.allowed_scopes.push("system:root".to_string());
        assert!(registry.upsert_client(bad).is_err());
    }

    #[test]
    fn test_swap_does_not_disturb_held_references() {
        let registry = ContractRegistry::new();
        let t = tenant(1);
        registry.upsert_tenant(t.clone()).unwrap();
        registry.upsert_client(client(&t)).unwrap();

        let (held, _) = registry.pair("public-spa").unwrap();
        registry.upsert_tenant(tenant(2)).unwrap();

        // The held snapshot keeps its version; fresh reads see the new one.
        assert_eq!(held.version, 1);
        assert_eq!(registry.tenant("acme").unwrap().version, 2);
    }
}
