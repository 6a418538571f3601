//! DashMap-backed record stores.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use oxidp_auth::config::ResourceLimits;
use oxidp_auth::error::{AuthError, AuthResult};
use oxidp_auth::stores::{
    AuthorizationCode, Challenge, ChallengeStore, CibaRequest, CibaStore, CodeStore,
    ConsentRecord, ConsentStore, DeviceGrantRecord, DeviceStore, Mutator, ParRecord, ParStore,
    PasskeyStore, RefreshTokenRecord, RefreshTokenStore, Session, SessionStore, UserStore,
};
use oxidp_auth::types::{EmailBlindIndex, PasskeyCredential, UserCore, UserPii};
use oxidp_core::UnixMillis;

/// The full set of in-memory stores, built together so the server can wire
/// them in one call.
pub struct MemoryStores {
    /// Authorization codes.
    pub codes: Arc<InMemoryCodeStore>,
    /// Pushed authorization requests.
    pub par: Arc<InMemoryParStore>,
    /// Challenges.
    pub challenges: Arc<InMemoryChallengeStore>,
    /// Browser sessions.
    pub sessions: Arc<InMemorySessionStore>,
    /// Refresh tokens.
    pub refresh_tokens: Arc<InMemoryRefreshTokenStore>,
    /// Backchannel requests.
    pub ciba: Arc<InMemoryCibaStore>,
    /// Device grants.
    pub devices: Arc<InMemoryDeviceStore>,
    /// Consent records.
    pub consent: Arc<InMemoryConsentStore>,
    /// Users (both partitions).
    pub users: Arc<InMemoryUserStore>,
    /// Passkey credentials.
    pub passkeys: Arc<InMemoryPasskeyStore>,
}

impl MemoryStores {
    /// Builds every store with the given per-tenant caps.
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        let limits = Arc::new(limits);
        Self {
            codes: Arc::new(InMemoryCodeStore::default()),
            par: Arc::new(InMemoryParStore::default()),
            challenges: Arc::new(InMemoryChallengeStore::new(Arc::clone(&limits))),
            sessions: Arc::new(InMemorySessionStore::new(Arc::clone(&limits))),
            refresh_tokens: Arc::new(InMemoryRefreshTokenStore::default()),
            ciba: Arc::new(InMemoryCibaStore::new(limits)),
            devices: Arc::new(InMemoryDeviceStore::default()),
            consent: Arc::new(InMemoryConsentStore::default()),
            users: Arc::new(InMemoryUserStore::default()),
            passkeys: Arc::new(InMemoryPasskeyStore::default()),
        }
    }
}

// ============================================================================
// CodeStore
// ============================================================================

/// Authorization codes.
#[derive(Default)]
pub struct InMemoryCodeStore {
    records: DashMap<String, AuthorizationCode>,
}

impl InMemoryCodeStore {
    pub(crate) fn sweep(&self) {
        let now = UnixMillis::now();
        self.records.retain(|_, record| !record.is_expired(now));
    }
}

#[async_trait]
impl CodeStore for InMemoryCodeStore {
    async fn put(&self, record: AuthorizationCode) -> AuthResult<()> {
        match self.records.entry(record.code.clone()) {
            Entry::Occupied(_) => Err(AuthError::conflict("authorization code")),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, code: &str) -> AuthResult<Option<AuthorizationCode>> {
        let now = UnixMillis::now();
        Ok(self
            .records
            .get(code)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.clone()))
    }

    async fn consume(&self, code: &str) -> AuthResult<Option<AuthorizationCode>> {
        let now = UnixMillis::now();
        Ok(self
            .records
            .remove(code)
            .map(|(_, record)| record)
            .filter(|record| !record.is_expired(now)))
    }

    async fn update(
        &self,
        code: &str,
        mutator: Mutator<'_, AuthorizationCode>,
    ) -> AuthResult<AuthorizationCode> {
        match self.records.entry(code.to_string()) {
            Entry::Occupied(mut slot) => {
                let next = mutator(slot.get().clone())?;
                slot.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(_) => Err(AuthError::invalid_grant("unknown code")),
        }
    }

    async fn revoke(&self, code: &str, _reason: &str) -> AuthResult<()> {
        self.records.remove(code);
        Ok(())
    }
}

// ============================================================================
// ParStore
// ============================================================================

/// Pushed authorization requests.
#[derive(Default)]
pub struct InMemoryParStore {
    records: DashMap<String, ParRecord>,
}

impl InMemoryParStore {
    pub(crate) fn sweep(&self) {
        let now = UnixMillis::now();
        self.records.retain(|_, record| !record.is_expired(now));
    }
}

#[async_trait]
impl ParStore for InMemoryParStore {
    async fn put(&self, record: ParRecord) -> AuthResult<()> {
        match self.records.entry(record.request_uri.clone()) {
            Entry::Occupied(_) => Err(AuthError::conflict("request_uri")),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn consume(&self, request_uri: &str) -> AuthResult<Option<ParRecord>> {
        let now = UnixMillis::now();
        Ok(self
            .records
            .remove(request_uri)
            .map(|(_, record)| record)
            .filter(|record| !record.is_expired(now)))
    }
}

// ============================================================================
// ChallengeStore
// ============================================================================

/// Challenges, with per-tenant caps.
pub struct InMemoryChallengeStore {
    records: DashMap<String, Challenge>,
    limits: Arc<ResourceLimits>,
}

impl InMemoryChallengeStore {
    pub(crate) fn new(limits: Arc<ResourceLimits>) -> Self {
        Self {
            records: DashMap::new(),
            limits,
        }
    }

    pub(crate) fn sweep(&self) {
        let now = UnixMillis::now();
        self.records.retain(|_, record| !record.is_expired(now));
    }

    fn active_for_tenant(&self, tenant_id: &str) -> u64 {
        let now = UnixMillis::now();
        self.records
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id && !entry.is_expired(now))
            .count() as u64
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn put(&self, challenge: Challenge) -> AuthResult<()> {
        if self.active_for_tenant(&challenge.tenant_id) >= self.limits.max_active_challenges {
            return Err(AuthError::resource_exhausted("active challenges"));
        }
        match self.records.entry(challenge.challenge_id.clone()) {
            Entry::Occupied(_) => Err(AuthError::conflict("challenge")),
            Entry::Vacant(slot) => {
                slot.insert(challenge);
                Ok(())
            }
        }
    }

    async fn get(&self, challenge_id: &str) -> AuthResult<Option<Challenge>> {
        let now = UnixMillis::now();
        Ok(self
            .records
            .get(challenge_id)
            .filter(|record| !record.is_expired(now))
            .filter(|record| !record.state.is_terminal())
            .map(|record| record.clone()))
    }

    async fn consume(&self, challenge_id: &str) -> AuthResult<Option<Challenge>> {
        let now = UnixMillis::now();
        Ok(self
            .records
            .remove(challenge_id)
            .map(|(_, record)| record)
            .filter(|record| !record.is_expired(now)))
    }

    async fn update(
        &self,
        challenge_id: &str,
        mutator: Mutator<'_, Challenge>,
    ) -> AuthResult<Challenge> {
        match self.records.entry(challenge_id.to_string()) {
            Entry::Occupied(mut slot) => {
                let current = slot.get().clone();
                if current.is_expired(UnixMillis::now()) {
                    return Err(AuthError::ChallengeExpired);
                }
                let pinned = current.policy.resolution_id.clone();
                let next = mutator(current)?;
                // The pinned policy is immutable; a changed fingerprint is a
                // programming error, not data.
                if next.policy.resolution_id != pinned {
                    return Err(AuthError::server_error(
                        "challenge update attempted to replace the pinned policy",
                    ));
                }
                slot.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(_) => Err(AuthError::ChallengeNotFound),
        }
    }

    async fn revoke(&self, challenge_id: &str, _reason: &str) -> AuthResult<()> {
        self.records.remove(challenge_id);
        Ok(())
    }
}

// ============================================================================
// SessionStore
// ============================================================================

/// Browser sessions, with per-tenant caps.
pub struct InMemorySessionStore {
    records: DashMap<String, Session>,
    limits: Arc<ResourceLimits>,
}

impl InMemorySessionStore {
    pub(crate) fn new(limits: Arc<ResourceLimits>) -> Self {
        Self {
            records: DashMap::new(),
            limits,
        }
    }

    pub(crate) fn sweep(&self) {
        let now = UnixMillis::now();
        self.records
            .retain(|_, session| now.is_before(session.expires_at));
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, session: Session) -> AuthResult<()> {
        let now = UnixMillis::now();
        let active = self
            .records
            .iter()
            .filter(|entry| entry.tenant_id == session.tenant_id && entry.is_active(now))
            .count() as u64;
        if active >= self.limits.max_active_sessions {
            return Err(AuthError::resource_exhausted("active sessions"));
        }
        match self.records.entry(session.session_id.clone()) {
            Entry::Occupied(_) => Err(AuthError::conflict("session")),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    async fn get(&self, session_id: &str) -> AuthResult<Option<Session>> {
        let now = UnixMillis::now();
        Ok(self
            .records
            .get(session_id)
            .filter(|session| session.is_active(now))
            .map(|session| session.clone()))
    }

    async fn update(
        &self,
        session_id: &str,
        mutator: Mutator<'_, Session>,
    ) -> AuthResult<Session> {
        match self.records.entry(session_id.to_string()) {
            Entry::Occupied(mut slot) => {
                let current = slot.get().clone();
                let was_revoked = current.revoked;
                let next = mutator(current)?;
                // Once revoked, nothing may reactivate.
                if was_revoked && !next.revoked {
                    return Err(AuthError::server_error(
                        "session update attempted to clear revocation",
                    ));
                }
                slot.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(_) => Err(AuthError::invalid_request("unknown session")),
        }
    }

    async fn extend(&self, session_id: &str, new_idle_expiry: UnixMillis) -> AuthResult<()> {
        if let Some(mut entry) = self.records.get_mut(session_id) {
            if !entry.revoked {
                // Idle extension never outlives the absolute expiry.
                entry.idle_expires_at = new_idle_expiry.min(entry.expires_at);
                entry.last_active_at = UnixMillis::now();
            }
        }
        Ok(())
    }

    async fn revoke(&self, session_id: &str, reason: &str) -> AuthResult<()> {
        if let Some(mut entry) = self.records.get_mut(session_id) {
            entry.revoked = true;
            entry.revocation_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn list_by_user(&self, user_id: Uuid) -> AuthResult<Vec<Session>> {
        let now = UnixMillis::now();
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.user_id == user_id && entry.is_active(now))
            .map(|entry| entry.clone())
            .collect())
    }
}

// ============================================================================
// RefreshTokenStore
// ============================================================================

/// Refresh tokens.
#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    records: DashMap<String, RefreshTokenRecord>,
}

impl InMemoryRefreshTokenStore {
    pub(crate) fn sweep(&self) {
        let now = UnixMillis::now();
        self.records.retain(|_, record| !record.is_expired(now));
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn put(&self, record: RefreshTokenRecord) -> AuthResult<()> {
        match self.records.entry(record.jti.clone()) {
            Entry::Occupied(_) => Err(AuthError::conflict("refresh token")),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, jti: &str) -> AuthResult<Option<RefreshTokenRecord>> {
        // Rotated/revoked records are returned on purpose: the redemption
        // path needs them to detect replay.
        Ok(self.records.get(jti).map(|record| record.clone()))
    }

    async fn update(
        &self,
        jti: &str,
        mutator: Mutator<'_, RefreshTokenRecord>,
    ) -> AuthResult<RefreshTokenRecord> {
        match self.records.entry(jti.to_string()) {
            Entry::Occupied(mut slot) => {
                let next = mutator(slot.get().clone())?;
                slot.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(_) => Err(AuthError::invalid_grant("unknown refresh token")),
        }
    }

    async fn revoke(&self, jti: &str, _reason: &str) -> AuthResult<()> {
        if let Some(mut entry) = self.records.get_mut(jti) {
            entry.revoked = true;
        }
        Ok(())
    }

    async fn revoke_family(&self, family_id: &str, _reason: &str) -> AuthResult<u64> {
        let mut revoked = 0;
        for mut entry in self.records.iter_mut() {
            if entry.family_id == family_id && !entry.revoked {
                entry.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

// ============================================================================
// CibaStore
// ============================================================================

/// Backchannel requests, with per-tenant caps.
pub struct InMemoryCibaStore {
    records: DashMap<String, CibaRequest>,
    limits: Arc<ResourceLimits>,
}

impl InMemoryCibaStore {
    pub(crate) fn new(limits: Arc<ResourceLimits>) -> Self {
        Self {
            records: DashMap::new(),
            limits,
        }
    }

    pub(crate) fn sweep(&self) {
        let now = UnixMillis::now();
        // Keep expired records for one extra day so late polls still get
        // `expired_token` rather than `invalid_grant`.
        self.records.retain(|_, record| {
            now.millis_since(record.expires_at) < 24 * 3600 * 1000
        });
    }
}

#[async_trait]
impl CibaStore for InMemoryCibaStore {
    async fn put(&self, request: CibaRequest) -> AuthResult<()> {
        let now = UnixMillis::now();
        let pending = self
            .records
            .iter()
            .filter(|entry| entry.tenant_id == request.tenant_id && !entry.is_expired(now))
            .count() as u64;
        if pending >= self.limits.max_active_ciba_requests {
            return Err(AuthError::resource_exhausted("active backchannel requests"));
        }
        match self.records.entry(request.auth_req_id.clone()) {
            Entry::Occupied(_) => Err(AuthError::conflict("auth_req_id")),
            Entry::Vacant(slot) => {
                slot.insert(request);
                Ok(())
            }
        }
    }

    async fn get(&self, auth_req_id: &str) -> AuthResult<Option<CibaRequest>> {
        Ok(self.records.get(auth_req_id).map(|record| record.clone()))
    }

    async fn update(
        &self,
        auth_req_id: &str,
        mutator: Mutator<'_, CibaRequest>,
    ) -> AuthResult<CibaRequest> {
        match self.records.entry(auth_req_id.to_string()) {
            Entry::Occupied(mut slot) => {
                let next = mutator(slot.get().clone())?;
                slot.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(_) => Err(AuthError::invalid_grant("unknown auth_req_id")),
        }
    }
}

// ============================================================================
// DeviceStore
// ============================================================================

/// Device grants.
#[derive(Default)]
pub struct InMemoryDeviceStore {
    records: DashMap<String, DeviceGrantRecord>,
    by_user_code: DashMap<String, String>,
}

impl InMemoryDeviceStore {
    pub(crate) fn sweep(&self) {
        let now = UnixMillis::now();
        self.records.retain(|_, record| {
            now.millis_since(record.expires_at) < 24 * 3600 * 1000
        });
        self.by_user_code
            .retain(|_, device_code| self.records.contains_key(device_code));
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn put(&self, record: DeviceGrantRecord) -> AuthResult<()> {
        if self.by_user_code.contains_key(&record.user_code) {
            return Err(AuthError::conflict("user code"));
        }
        match self.records.entry(record.device_code.clone()) {
            Entry::Occupied(_) => Err(AuthError::conflict("device code")),
            Entry::Vacant(slot) => {
                self.by_user_code
                    .insert(record.user_code.clone(), record.device_code.clone());
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, device_code: &str) -> AuthResult<Option<DeviceGrantRecord>> {
        Ok(self.records.get(device_code).map(|record| record.clone()))
    }

    async fn find_by_user_code(
        &self,
        user_code: &str,
    ) -> AuthResult<Option<DeviceGrantRecord>> {
        let Some(device_code) = self.by_user_code.get(user_code) else {
            return Ok(None);
        };
        Ok(self
            .records
            .get(device_code.value())
            .map(|record| record.clone()))
    }

    async fn update(
        &self,
        device_code: &str,
        mutator: Mutator<'_, DeviceGrantRecord>,
    ) -> AuthResult<DeviceGrantRecord> {
        match self.records.entry(device_code.to_string()) {
            Entry::Occupied(mut slot) => {
                let next = mutator(slot.get().clone())?;
                slot.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(_) => Err(AuthError::invalid_grant("unknown device code")),
        }
    }
}

// ============================================================================
// ConsentStore
// ============================================================================

/// Consent records keyed by `(user, client)`.
#[derive(Default)]
pub struct InMemoryConsentStore {
    records: DashMap<(Uuid, String), ConsentRecord>,
}

#[async_trait]
impl ConsentStore for InMemoryConsentStore {
    async fn upsert(&self, record: ConsentRecord) -> AuthResult<()> {
        self.records
            .insert((record.user_id, record.client_id.clone()), record);
        Ok(())
    }

    async fn find(&self, user_id: Uuid, client_id: &str) -> AuthResult<Option<ConsentRecord>> {
        Ok(self
            .records
            .get(&(user_id, client_id.to_string()))
            .filter(|record| !record.revoked)
            .map(|record| record.clone()))
    }

    async fn revoke(&self, user_id: Uuid, client_id: &str) -> AuthResult<()> {
        if let Some(mut entry) = self.records.get_mut(&(user_id, client_id.to_string())) {
            entry.revoked = true;
        }
        Ok(())
    }
}

// ============================================================================
// UserStore
// ============================================================================

/// Users, both partitions. The PII map stands in for the separate PII
/// partition; the blind index is the only email-shaped key in the core map.
#[derive(Default)]
pub struct InMemoryUserStore {
    core: DashMap<Uuid, UserCore>,
    by_email_index: DashMap<String, Uuid>,
    pii: DashMap<Uuid, UserPii>,
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, core: UserCore) -> AuthResult<()> {
        if self
            .by_email_index
            .contains_key(core.email_blind_index.as_str())
        {
            return Err(AuthError::conflict("email blind index"));
        }
        match self.core.entry(core.user_id) {
            Entry::Occupied(_) => Err(AuthError::conflict("user")),
            Entry::Vacant(slot) => {
                self.by_email_index
                    .insert(core.email_blind_index.as_str().to_string(), core.user_id);
                slot.insert(core);
                Ok(())
            }
        }
    }

    async fn get(&self, user_id: Uuid) -> AuthResult<Option<UserCore>> {
        Ok(self.core.get(&user_id).map(|record| record.clone()))
    }

    async fn find_by_email_index(
        &self,
        index: &EmailBlindIndex,
    ) -> AuthResult<Option<UserCore>> {
        let Some(user_id) = self.by_email_index.get(index.as_str()) else {
            return Ok(None);
        };
        Ok(self.core.get(&user_id).map(|record| record.clone()))
    }

    async fn update(
        &self,
        user_id: Uuid,
        mutator: Mutator<'_, UserCore>,
    ) -> AuthResult<UserCore> {
        match self.core.entry(user_id) {
            Entry::Occupied(mut slot) => {
                let next = mutator(slot.get().clone())?;
                slot.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(_) => Err(AuthError::invalid_request("unknown user")),
        }
    }

    async fn store_pii(&self, pii: UserPii) -> AuthResult<()> {
        self.pii.insert(pii.user_id, pii);
        Ok(())
    }

    async fn get_pii(&self, user_id: Uuid) -> AuthResult<Option<UserPii>> {
        Ok(self.pii.get(&user_id).map(|record| record.clone()))
    }

    async fn delete_user(&self, user_id: Uuid) -> AuthResult<()> {
        // GDPR: PII row goes away, core row is tombstoned, the blind index
        // is released for reuse.
        self.pii.remove(&user_id);
        if let Some(mut core) = self.core.get_mut(&user_id) {
            self.by_email_index.remove(core.email_blind_index.as_str());
            core.tombstone();
        }
        Ok(())
    }
}

// ============================================================================
// PasskeyStore
// ============================================================================

/// Passkey credentials.
#[derive(Default)]
pub struct InMemoryPasskeyStore {
    records: DashMap<String, PasskeyCredential>,
}

#[async_trait]
impl PasskeyStore for InMemoryPasskeyStore {
    async fn put(&self, credential: PasskeyCredential) -> AuthResult<()> {
        match self.records.entry(credential.credential_id.clone()) {
            Entry::Occupied(_) => Err(AuthError::conflict("passkey credential")),
            Entry::Vacant(slot) => {
                slot.insert(credential);
                Ok(())
            }
        }
    }

    async fn get(&self, credential_id: &str) -> AuthResult<Option<PasskeyCredential>> {
        Ok(self
            .records
            .get(credential_id)
            .map(|record| record.clone()))
    }

    async fn list_by_user(&self, user_id: Uuid) -> AuthResult<Vec<PasskeyCredential>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn update(
        &self,
        credential_id: &str,
        mutator: Mutator<'_, PasskeyCredential>,
    ) -> AuthResult<PasskeyCredential> {
        match self.records.entry(credential_id.to_string()) {
            Entry::Occupied(mut slot) => {
                let next = mutator(slot.get().clone())?;
                slot.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(_) => Err(AuthError::invalid_request("unknown credential")),
        }
    }

    async fn delete(&self, credential_id: &str) -> AuthResult<()> {
        self.records.remove(credential_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidp_auth::stores::ChallengeKind;
    use oxidp_auth::policy::PolicyResolver;
    use oxidp_auth::types::{ClientContract, TenantContract};
    use std::time::Duration;

    fn policy() -> oxidp_auth::policy::ResolvedPolicy {
        let tenant = TenantContract::new("acme", 1, "https://issuer.example");
        let client = ClientContract::public(
            "public-spa",
            &tenant,
            vec!["https://app.example/cb".to_string()],
        );
        PolicyResolver::new(b"s".to_vec(), Duration::from_secs(120))
            .resolve(&tenant, &client)
            .unwrap()
    }

    fn code(value: &str, ttl_ms: i64) -> AuthorizationCode {
        let now = UnixMillis::now();
        AuthorizationCode {
            code: value.to_string(),
            client_id: "public-spa".into(),
            tenant_id: "acme".into(),
            redirect_uri: "https://app.example/cb".into(),
            scope: "openid".into(),
            sub: Uuid::new_v4().to_string(),
            nonce: None,
            code_challenge: None,
            code_challenge_method: None,
            auth_time: now,
            acr: None,
            amr: vec![],
            resolved_policy_id: "r1".into(),
            session_id: None,
            issued_at: now,
            expires_at: UnixMillis::from_millis(now.as_millis() + ttl_ms),
        }
    }

    #[tokio::test]
    async fn test_code_single_use() {
        let store = InMemoryCodeStore::default();
        store.put(code("C1", 120_000)).await.unwrap();

        assert!(store.get("C1").await.unwrap().is_some());
        assert!(store.consume("C1").await.unwrap().is_some());
        // Consumed: both reads answer nothing.
        assert!(store.get("C1").await.unwrap().is_none());
        assert!(store.consume("C1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_code_put_conflict() {
        let store = InMemoryCodeStore::default();
        store.put(code("C1", 120_000)).await.unwrap();
        let err = store.put(code("C1", 120_000)).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_code_expiry_rechecked_on_read() {
        let store = InMemoryCodeStore::default();
        store.put(code("C1", -1)).await.unwrap();
        assert!(store.get("C1").await.unwrap().is_none());
        assert!(store.consume("C1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_consume_exactly_one_winner() {
        let store = Arc::new(InMemoryCodeStore::default());
        store.put(code("RACE", 120_000)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.consume("RACE").await.unwrap().is_some()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_challenge_policy_pin_is_immutable() {
        let limits = Arc::new(ResourceLimits::default());
        let store = InMemoryChallengeStore::new(limits);
        let challenge = Challenge::new(
            "acme",
            ChallengeKind::Login,
            policy(),
            serde_json::Value::Null,
            Duration::from_secs(300),
        );
        let id = challenge.challenge_id.clone();
        store.put(challenge).await.unwrap();

        // Payload updates pass.
        store
            .update(&id, &|mut c| {
                c.payload = serde_json::json!({"step": 1});
                Ok(c)
            })
            .await
            .unwrap();

        // Policy replacement is refused.
        let err = store
            .update(&id, &|mut c| {
                c.policy.resolution_id = "forged".to_string();
                Ok(c)
            })
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "server_error");
    }

    #[tokio::test]
    async fn test_challenge_tenant_cap() {
        let limits = Arc::new(ResourceLimits {
            max_active_challenges: 2,
            ..ResourceLimits::default()
        });
        let store = InMemoryChallengeStore::new(limits);
        for _ in 0..2 {
            store
                .put(Challenge::new(
                    "acme",
                    ChallengeKind::Login,
                    policy(),
                    serde_json::Value::Null,
                    Duration::from_secs(300),
                ))
                .await
                .unwrap();
        }
        let err = store
            .put(Challenge::new(
                "acme",
                ChallengeKind::Login,
                policy(),
                serde_json::Value::Null,
                Duration::from_secs(300),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ResourceExhausted { .. }));

        // Another tenant is unaffected.
        assert!(
            store
                .put(Challenge::new(
                    "zeta",
                    ChallengeKind::Login,
                    policy(),
                    serde_json::Value::Null,
                    Duration::from_secs(300),
                ))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_session_revocation_is_terminal() {
        let store = InMemorySessionStore::new(Arc::new(ResourceLimits::default()));
        let session = Session::new(
            Uuid::new_v4(),
            "acme",
            vec!["webauthn".into()],
            None,
            Duration::from_secs(3600),
            Duration::from_secs(600),
        );
        let id = session.session_id.clone();
        store.put(session).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_some());

        store.revoke(&id, "logout").await.unwrap();
        assert!(store.get(&id).await.unwrap().is_none());

        // Reactivation through update is refused.
        let err = store
            .update(&id, &|mut s| {
                s.revoked = false;
                Ok(s)
            })
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "server_error");
    }

    #[tokio::test]
    async fn test_session_list_and_extend() {
        let store = InMemorySessionStore::new(Arc::new(ResourceLimits::default()));
        let user = Uuid::new_v4();
        for _ in 0..3 {
            store
                .put(Session::new(
                    user,
                    "acme",
                    vec![],
                    None,
                    Duration::from_secs(3600),
                    Duration::from_secs(600),
                ))
                .await
                .unwrap();
        }
        let sessions = store.list_by_user(user).await.unwrap();
        assert_eq!(sessions.len(), 3);

        // Extension is clamped to the absolute expiry.
        let target = &sessions[0];
        let far_future = UnixMillis::now() + Duration::from_secs(100_000);
        store.extend(&target.session_id, far_future).await.unwrap();
        let extended = store.get(&target.session_id).await.unwrap().unwrap();
        assert!(extended.idle_expires_at <= extended.expires_at);
    }

    #[tokio::test]
    async fn test_refresh_family_revocation() {
        let store = InMemoryRefreshTokenStore::default();
        let now = UnixMillis::now();
        for jti in ["a", "b", "c"] {
            store
                .put(RefreshTokenRecord {
                    jti: jti.to_string(),
                    family_id: "fam".into(),
                    client_id: "spa".into(),
                    user_id: "u".into(),
                    scope: "openid".into(),
                    issued_at: now,
                    expires_at: now + Duration::from_secs(3600),
                    rotated_from: None,
                    rotated: false,
                    revoked: false,
                })
                .await
                .unwrap();
        }
        let revoked = store.revoke_family("fam", "replay").await.unwrap();
        assert_eq!(revoked, 3);
        for jti in ["a", "b", "c"] {
            assert!(store.get(jti).await.unwrap().unwrap().revoked);
        }
    }

    #[tokio::test]
    async fn test_user_blind_index_lookup_and_gdpr_delete() {
        let store = InMemoryUserStore::default();
        let index = EmailBlindIndex::compute(b"key", "alice@example.com");
        let core = UserCore::new("acme", "pii-1", index.clone());
        let user_id = core.user_id;
        store.create(core).await.unwrap();
        store
            .store_pii(UserPii::new(user_id, "alice@example.com"))
            .await
            .unwrap();

        assert!(store.find_by_email_index(&index).await.unwrap().is_some());
        assert!(store.get_pii(user_id).await.unwrap().is_some());

        store.delete_user(user_id).await.unwrap();
        assert!(store.get_pii(user_id).await.unwrap().is_none());
        assert!(store.find_by_email_index(&index).await.unwrap().is_none());
        let tombstone = store.get(user_id).await.unwrap().unwrap();
        assert_eq!(tombstone.status, oxidp_auth::types::UserStatus::Deleted);
    }

    #[tokio::test]
    async fn test_device_user_code_lookup() {
        let store = InMemoryDeviceStore::default();
        let now = UnixMillis::now();
        store
            .put(DeviceGrantRecord {
                device_code: "D1".into(),
                user_code: "ABCD-EFGH".into(),
                client_id: "tv".into(),
                tenant_id: "acme".into(),
                scope: "openid".into(),
                status: oxidp_auth::stores::CibaStatus::Pending,
                min_poll_interval_secs: 5,
                last_poll_at: None,
                approved_sub: None,
                resolved_policy_id: "r".into(),
                created_at: now,
                expires_at: now + Duration::from_secs(600),
            })
            .await
            .unwrap();

        let found = store.find_by_user_code("ABCD-EFGH").await.unwrap().unwrap();
        assert_eq!(found.device_code, "D1");
        assert!(store.find_by_user_code("XXXX-XXXX").await.unwrap().is_none());
    }
}
