//! Component wiring.
//!
//! Builds every core component from configuration and hands back the shared
//! [`OpState`]. The wiring order follows ownership: stores first, then the
//! key store and issuer, then policy, then the services that consume them.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, warn};

use oxidp_auth::ciba::{BackchannelNotifier, CibaRunner};
use oxidp_auth::consent::ConsentService;
use oxidp_auth::device::DeviceGrantRunner;
use oxidp_auth::error::AuthResult;
use oxidp_auth::http::OpState;
use oxidp_auth::keys::{KeyStorage, KeyStore};
use oxidp_auth::logout::LogoutCoordinator;
use oxidp_auth::oauth::client_auth::ClientAuthenticator;
use oxidp_auth::oauth::grants::GrantDispatcher;
use oxidp_auth::oauth::orchestrator::AuthorizeOrchestrator;
use oxidp_auth::oauth::request_object::RequestObjectResolver;
use oxidp_auth::passwordless::{EmailOtpService, EmailSender, PasskeyService};
use oxidp_auth::policy::{ContractRegistry, PolicyResolver};
use oxidp_auth::rate_limit::RateLimiter;
use oxidp_auth::stores::CibaRequest;
use oxidp_auth::token::issuer::TokenIssuer;
use oxidp_auth::userinfo::UserInfoService;
use oxidp_core::EventBus;
use oxidp_store_memory::{FileKeyStorage, InMemoryKeyStorage, MemoryStores, spawn_sweeper};

use crate::config::{ContractSeed, ServerConfig};

/// Development email transport: logs delivery at debug level. Production
/// deployments plug an SMTP/SES adapter here.
pub struct DevEmailSender;

#[async_trait]
impl EmailSender for DevEmailSender {
    async fn send_code(&self, email: &str, code: &str) -> AuthResult<()> {
        // Dev transport only: a real adapter must never log the code.
        tracing::debug!(email, code, "dev email transport: one-time code");
        Ok(())
    }
}

/// Development backchannel notifier: logs the notification.
pub struct DevBackchannelNotifier;

#[async_trait]
impl BackchannelNotifier for DevBackchannelNotifier {
    async fn notify_user(&self, request: &CibaRequest) -> AuthResult<()> {
        tracing::debug!(
            auth_req_id = %request.auth_req_id,
            binding_message = request.binding_message.as_deref().unwrap_or(""),
            "dev notifier: backchannel authentication requested"
        );
        Ok(())
    }
}

/// External adapters the server may swap out.
pub struct Adapters {
    /// Email transport.
    pub email: Arc<dyn EmailSender>,

    /// Backchannel user notifier.
    pub notifier: Arc<dyn BackchannelNotifier>,
}

impl Default for Adapters {
    fn default() -> Self {
        Self {
            email: Arc::new(DevEmailSender),
            notifier: Arc::new(DevBackchannelNotifier),
        }
    }
}

/// Everything a running server needs.
pub struct Runtime {
    /// Handler state.
    pub state: OpState,

    /// The in-memory stores (exposed for tests and the sweeper).
    pub stores: Arc<MemoryStores>,

    /// The event bus.
    pub bus: Arc<EventBus>,
}

/// Builds the provider runtime.
///
/// # Errors
///
/// Configuration problems: unparseable contracts, unusable issuer URL, key
/// storage failures.
pub async fn build(config: ServerConfig, adapters: Adapters) -> anyhow::Result<Runtime> {
    let auth_config = config.auth.clone();

    if config.key_manager_secret.is_none() {
        warn!("OXIDP_KEY_MANAGER_SECRET is not set; all privileged key operations will be denied");
    }

    // Stores.
    let stores = Arc::new(MemoryStores::new(auth_config.limits.clone()));
    spawn_sweeper(
        Arc::clone(&stores),
        std::time::Duration::from_secs(config.sweep_interval_secs.max(1)),
    );

    // Keys and issuance.
    let key_storage: Arc<dyn KeyStorage> = match &config.keys_file {
        Some(path) => Arc::new(FileKeyStorage::new(path)),
        None => {
            warn!("no keys_file configured; signing keys will not survive restart");
            Arc::new(InMemoryKeyStorage::default())
        }
    };
    let keystore = Arc::new(
        KeyStore::new(
            key_storage,
            config.key_manager_secret.as_deref(),
            &auth_config.signing,
        )
        .context("key store configuration")?,
    );
    keystore.initialize().await.context("key store bootstrap")?;

    let manager_secret = config.key_manager_secret.clone().unwrap_or_default();
    let issuer = Arc::new(TokenIssuer::new(
        Arc::clone(&keystore),
        auth_config.issuer.clone(),
        manager_secret,
        auth_config.oauth.verification_skew,
    ));

    // Policy.
    let registry = Arc::new(ContractRegistry::new());
    if let Some(path) = &config.contracts_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading contracts file {}", path.display()))?;
        let seed = ContractSeed::from_toml(&raw).context("parsing contracts file")?;
        seed_registry(&registry, seed)?;
    }
    let resolver_secret = config
        .resolver_secret
        .clone()
        .unwrap_or_else(|| "insecure-dev-resolver-secret".to_string());
    let policy_resolver = Arc::new(PolicyResolver::new(
        resolver_secret.into_bytes(),
        auth_config.oauth.authorization_code_ttl,
    ));

    let blind_index_key = config
        .blind_index_key
        .clone()
        .unwrap_or_else(|| "insecure-dev-blind-index-key".to_string())
        .into_bytes();

    // Shared machinery.
    let bus = Arc::new(EventBus::new());
    let rate_limiter = Arc::new(RateLimiter::new());
    let token_endpoint = format!("{}/token", auth_config.issuer.trim_end_matches('/'));

    let request_resolver = Arc::new(RequestObjectResolver::new(
        stores.par.clone(),
        auth_config.outbound_timeout,
        auth_config.oauth.max_request_object_bytes,
    ));
    let consent = Arc::new(ConsentService::new(stores.consent.clone()));

    let orchestrator = Arc::new(AuthorizeOrchestrator::new(
        Arc::clone(&registry),
        Arc::clone(&policy_resolver),
        request_resolver,
        stores.challenges.clone(),
        stores.codes.clone(),
        stores.sessions.clone(),
        stores.users.clone(),
        Arc::clone(&consent),
        Arc::clone(&bus),
        auth_config.clone(),
        blind_index_key.clone(),
    ));

    let grants = Arc::new(GrantDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&policy_resolver),
        ClientAuthenticator::new(token_endpoint.clone()),
        Arc::clone(&issuer),
        stores.codes.clone(),
        stores.refresh_tokens.clone(),
        stores.ciba.clone(),
        stores.devices.clone(),
        Arc::clone(&rate_limiter),
        Arc::clone(&bus),
        auth_config.clone(),
    ));

    let ciba = Arc::new(CibaRunner::new(
        Arc::clone(&registry),
        Arc::clone(&policy_resolver),
        ClientAuthenticator::new(token_endpoint.clone()),
        stores.ciba.clone(),
        stores.users.clone(),
        Arc::clone(&issuer),
        stores.refresh_tokens.clone(),
        adapters.notifier,
        Arc::clone(&rate_limiter),
        Arc::clone(&bus),
        auth_config.clone(),
        blind_index_key.clone(),
    ));

    let device = Arc::new(DeviceGrantRunner::new(
        Arc::clone(&registry),
        Arc::clone(&policy_resolver),
        ClientAuthenticator::new(token_endpoint),
        stores.devices.clone(),
        Arc::clone(&bus),
        auth_config.clone(),
    ));

    let logout = Arc::new(LogoutCoordinator::new(
        Arc::clone(&registry),
        stores.sessions.clone(),
        Arc::clone(&issuer),
        Arc::clone(&bus),
        &auth_config,
    ));

    let userinfo = Arc::new(UserInfoService::new(
        Arc::clone(&issuer),
        stores.users.clone(),
        Arc::clone(&registry),
    ));

    let passkeys = Arc::new(
        PasskeyService::new(
            &auth_config.issuer,
            &auth_config.passwordless.rp_name,
            auth_config.passwordless.webauthn_challenge_ttl,
            stores.challenges.clone(),
            stores.passkeys.clone(),
            stores.users.clone(),
            Arc::clone(&bus),
        )
        .context("passkey service configuration")?,
    );

    let email_otp = Arc::new(EmailOtpService::new(
        stores.challenges.clone(),
        adapters.email,
        Arc::clone(&rate_limiter),
        auth_config.passwordless.clone(),
        auth_config.rate_limits.clone(),
    ));

    info!(issuer = %auth_config.issuer, "provider runtime assembled");

    let state = OpState {
        config: Arc::new(auth_config),
        keystore,
        issuer,
        orchestrator,
        grants,
        ciba,
        device,
        logout,
        userinfo,
        passkeys,
        email_otp,
        par_store: stores.par.clone(),
        registry,
        rate_limiter,
        refresh_tokens: stores.refresh_tokens.clone(),
    };

    Ok(Runtime {
        state,
        stores,
        bus,
    })
}

fn seed_registry(registry: &ContractRegistry, seed: ContractSeed) -> anyhow::Result<()> {
    for tenant in seed.tenants {
        let tenant_id = tenant.tenant_id.clone();
        registry
            .upsert_tenant(tenant)
            .with_context(|| format!("seeding tenant '{tenant_id}'"))?;
    }
    for client in seed.clients {
        let client_id = client.client_id.clone();
        registry
            .upsert_client(client)
            .with_context(|| format!("seeding client '{client_id}'"))?;
    }
    Ok(())
}
