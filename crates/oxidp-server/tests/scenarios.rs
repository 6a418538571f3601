//! End-to-end scenario tests over a fully wired provider runtime.
//!
//! These walk the interactive authorization flow exactly the way the HTTP
//! layer does — orchestrator for flow transitions, verifier services for
//! ceremonies, grant dispatcher for `/token` — and assert the externally
//! visible guarantees: code single-use, at_hash correctness, PKCE burning,
//! CIBA slow_down, PAR single-use, refresh-family revocation, and
//! resolved-policy immutability.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use oxidp_auth::error::{AuthError, AuthResult};
use oxidp_auth::flow::{FlowEvent, Intent};
use oxidp_auth::oauth::authorize::AuthorizeParams;
use oxidp_auth::oauth::grants::{GRANT_CIBA, GRANT_DEVICE};
use oxidp_auth::oauth::orchestrator::AuthorizeOutcome;
use oxidp_auth::oauth::types::TokenRequest;
use oxidp_auth::passwordless::EmailSender;
use oxidp_auth::stores::{
    CibaRequest, CibaStore, DeviceGrantRecord, DeviceStore, ParRecord, ParStore, PasskeyStore,
    SessionStore, UserStore,
};
use oxidp_auth::token::claims::IdTokenClaims;
use oxidp_auth::token::issuer::{VerifyExpectations, left_half_hash};
use oxidp_auth::types::{
    ClientContract, EmailBlindIndex, PasskeyCredential, PiiStatus, TenantContract, UserCore,
    UserPii,
};
use oxidp_core::UnixMillis;
use oxidp_server::{Adapters, Runtime, ServerConfig, build};

const ISSUER: &str = "https://issuer.example";
const REDIRECT_URI: &str = "https://app.example/cb";
const EMAIL: &str = "alice@example.com";
const BLIND_KEY: &[u8] = b"test-blind-index-key";
// RFC 7636 Appendix B pair.
const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

#[derive(Default)]
struct CapturingSender {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl EmailSender for CapturingSender {
    async fn send_code(&self, email: &str, code: &str) -> AuthResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), code.to_string()));
        Ok(())
    }
}

impl CapturingSender {
    fn last_code(&self) -> String {
        self.sent.lock().unwrap().last().unwrap().1.clone()
    }
}

struct TestOp {
    runtime: Runtime,
    sender: Arc<CapturingSender>,
    user_id: Uuid,
}

fn tenant(version: u32) -> TenantContract {
    let mut tenant = TenantContract::new("acme", version, ISSUER);
    tenant.oauth.allowed_grant_types.extend([
        "client_credentials".to_string(),
        GRANT_CIBA.to_string(),
        GRANT_DEVICE.to_string(),
    ]);
    tenant
}

fn spa_client(tenant: &TenantContract) -> ClientContract {
    let mut client =
        ClientContract::public("public-spa", tenant, vec![REDIRECT_URI.to_string()]);
    client.client_name = "Example SPA".to_string();
    client
        .allowed_grant_types
        .extend([GRANT_CIBA.to_string(), GRANT_DEVICE.to_string()]);
    client
}

async fn op() -> TestOp {
    let sender = Arc::new(CapturingSender::default());
    let mut config = ServerConfig::default();
    config.key_manager_secret = Some("km-secret".to_string());
    config.resolver_secret = Some("resolver-secret".to_string());
    config.blind_index_key = Some(String::from_utf8(BLIND_KEY.to_vec()).unwrap());
    config.auth.issuer = ISSUER.to_string();
    // ES256 keeps key generation fast in tests; the hash disciplines under
    // test are identical to RS256.
    config.auth.signing.algorithm = "ES256".to_string();

    let runtime = build(
        config,
        Adapters {
            email: sender.clone(),
            notifier: Arc::new(oxidp_server::DevBackchannelNotifier),
        },
    )
    .await
    .unwrap();

    let t = tenant(1);
    runtime.state.registry.upsert_tenant(t.clone()).unwrap();
    runtime.state.registry.upsert_client(spa_client(&t)).unwrap();

    // One active user with confirmed PII.
    let mut core = UserCore::new("acme", "pii-1", EmailBlindIndex::compute(BLIND_KEY, EMAIL));
    core.pii_status = PiiStatus::Active;
    core.email_verified = true;
    let user_id = core.user_id;
    runtime.stores.users.create(core).await.unwrap();
    runtime
        .stores
        .users
        .store_pii(UserPii::new(user_id, EMAIL))
        .await
        .unwrap();

    TestOp {
        runtime,
        sender,
        user_id,
    }
}

fn authorize_params() -> AuthorizeParams {
    AuthorizeParams {
        client_id: Some("public-spa".to_string()),
        redirect_uri: Some(REDIRECT_URI.to_string()),
        response_type: Some("code".to_string()),
        scope: Some("openid profile".to_string()),
        state: Some("xyz".to_string()),
        nonce: Some("n-abc".to_string()),
        code_challenge: Some(CHALLENGE.to_string()),
        code_challenge_method: Some("S256".to_string()),
        ..AuthorizeParams::default()
    }
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(url).unwrap();
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Drives the interactive flow to a code via the email-OTP method.
async fn obtain_code(op: &TestOp, params: AuthorizeParams) -> (String, String) {
    let state = &op.runtime.state;

    let outcome = state.orchestrator.begin(params, None).await.unwrap();
    let AuthorizeOutcome::Interact {
        challenge_id,
        contract,
    } = outcome
    else {
        panic!("expected interaction");
    };
    assert_eq!(contract.intent, Intent::Identify);

    let outcome = state
        .orchestrator
        .submit_identifier(&challenge_id, EMAIL)
        .await
        .unwrap();
    let AuthorizeOutcome::Interact { contract, .. } = outcome else {
        panic!("expected method selection");
    };
    assert_eq!(contract.intent, Intent::SelectMethod);

    let outcome = state
        .orchestrator
        .apply_ui_event(&challenge_id, FlowEvent::UseEmailCode)
        .await
        .unwrap();
    let AuthorizeOutcome::Interact { contract, .. } = outcome else {
        panic!("expected code entry");
    };
    assert_eq!(contract.intent, Intent::VerifyEmailCode);

    // The verifier leg, exactly as the HTTP layer does it.
    let (user_id, email, policy) = state.orchestrator.flow_user(&challenge_id).await.unwrap();
    let otp_challenge = state
        .email_otp
        .send(&policy, user_id.unwrap(), &email.unwrap())
        .await
        .unwrap();
    let verified = state
        .email_otp
        .verify(&otp_challenge, &op.sender.last_code())
        .await
        .unwrap();
    let outcome = state
        .orchestrator
        .authentication_succeeded(&challenge_id, verified.user_id, vec!["otp".into()], None)
        .await
        .unwrap();
    let AuthorizeOutcome::Interact { contract, .. } = outcome else {
        panic!("expected consent");
    };
    assert_eq!(contract.intent, Intent::Consent);

    let outcome = state
        .orchestrator
        .consent_decision(&challenge_id, true)
        .await
        .unwrap();
    let AuthorizeOutcome::Redirect { url, .. } = outcome else {
        panic!("expected redirect");
    };
    assert!(url.starts_with(REDIRECT_URI));
    let code = query_param(&url, "code").expect("code on redirect");
    let state_param = query_param(&url, "state").expect("state on redirect");
    (code, state_param)
}

fn code_exchange_request(code: &str, verifier: &str) -> TokenRequest {
    TokenRequest {
        grant_type: "authorization_code".to_string(),
        code: Some(code.to_string()),
        redirect_uri: Some(REDIRECT_URI.to_string()),
        code_verifier: Some(verifier.to_string()),
        client_id: Some("public-spa".to_string()),
        client_secret: None,
        client_assertion_type: None,
        client_assertion: None,
        refresh_token: None,
        scope: None,
        auth_req_id: None,
        device_code: None,
    }
}

// ---------------------------------------------------------------------------
// S1 — authorization code happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s1_authorization_code_happy_path() {
    let op = op().await;
    let (code, state_param) = obtain_code(&op, authorize_params()).await;
    assert_eq!(state_param, "xyz");

    let response = op
        .runtime
        .state
        .grants
        .handle(None, code_exchange_request(&code, VERIFIER))
        .await
        .unwrap();

    assert_eq!(response.token_type, "Bearer");
    assert_eq!(response.expires_in, 3600);
    assert_eq!(response.scope, "openid profile");
    let id_token = response.id_token.clone().expect("id_token for openid scope");

    let claims: IdTokenClaims = op
        .runtime
        .state
        .issuer
        .verify(
            &id_token,
            &VerifyExpectations {
                audience: Some("public-spa"),
                ..VerifyExpectations::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(claims.iss, ISSUER);
    assert_eq!(claims.aud, "public-spa");
    assert_eq!(claims.sub, op.user_id.to_string());
    assert_eq!(claims.nonce.as_deref(), Some("n-abc"));
    // Property 2: at_hash is the left half of SHA-256 over the access token.
    assert_eq!(
        claims.at_hash.as_deref(),
        Some(left_half_hash(&response.access_token).as_str())
    );

    // Property 1: the second redemption fails with invalid_grant.
    let err = op
        .runtime
        .state
        .grants
        .handle(None, code_exchange_request(&code, VERIFIER))
        .await
        .unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");
}

// ---------------------------------------------------------------------------
// S2 — PKCE mismatch burns the code
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s2_pkce_mismatch_burns_code() {
    let op = op().await;
    let (code, _) = obtain_code(&op, authorize_params()).await;

    let err = op
        .runtime
        .state
        .grants
        .handle(
            None,
            code_exchange_request(&code, &"wrong".repeat(10)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");

    // Single use: the failed attempt consumed the code, so even the right
    // verifier is too late.
    let err = op
        .runtime
        .state
        .grants
        .handle(None, code_exchange_request(&code, VERIFIER))
        .await
        .unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");
}

// ---------------------------------------------------------------------------
// S3 — CIBA polling discipline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s3_ciba_slow_down_doubles_interval() {
    let op = op().await;
    let state = &op.runtime.state;

    let response = state
        .ciba
        .handle_bc_authorize(
            None,
            oxidp_auth::ciba::CibaParams {
                scope: "openid".to_string(),
                login_hint: Some(EMAIL.to_string()),
                binding_message: Some("Pay invoice #42".to_string()),
                user_code: None,
                client_id: Some("public-spa".to_string()),
                client_secret: None,
                client_assertion_type: None,
                client_assertion: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(response.expires_in, 300);
    assert_eq!(response.interval, 5);

    let poll = |auth_req_id: String| {
        let state = state.clone();
        async move {
            state
                .grants
                .handle(
                    None,
                    TokenRequest {
                        grant_type: GRANT_CIBA.to_string(),
                        code: None,
                        redirect_uri: None,
                        code_verifier: None,
                        client_id: Some("public-spa".to_string()),
                        client_secret: None,
                        client_assertion_type: None,
                        client_assertion: None,
                        refresh_token: None,
                        scope: None,
                        auth_req_id: Some(auth_req_id),
                        device_code: None,
                    },
                )
                .await
        }
    };

    // First poll: pending.
    let err = poll(response.auth_req_id.clone()).await.unwrap_err();
    assert_eq!(err.oauth_error_code(), "authorization_pending");

    // Immediate second poll: slow_down, and the stored interval has at
    // least doubled (capped at 30 s).
    let err = poll(response.auth_req_id.clone()).await.unwrap_err();
    assert_eq!(err.oauth_error_code(), "slow_down");
    let stored = op
        .runtime
        .stores
        .ciba
        .get(&response.auth_req_id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.min_poll_interval_secs >= 10);
    assert!(stored.min_poll_interval_secs <= 30);

    // Approval then redemption: exactly once.
    state
        .ciba
        .approve(&response.auth_req_id, op.user_id)
        .await
        .unwrap();
    // The poll interval still applies; back off before redeeming.
    op.runtime
        .stores
        .ciba
        .update(&response.auth_req_id, &|mut current: CibaRequest| {
            current.last_poll_at = None;
            Ok(current)
        })
        .await
        .unwrap();
    let token = poll(response.auth_req_id.clone()).await.unwrap();
    assert!(!token.access_token.is_empty());
    assert_eq!(token.scope, "openid");

    let err = poll(response.auth_req_id.clone()).await.unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");
}

// ---------------------------------------------------------------------------
// S4 — device authorization grant
// ---------------------------------------------------------------------------

#[tokio::test]
async fn device_grant_approval_and_one_shot_redemption() {
    let op = op().await;
    let state = &op.runtime.state;

    let response = state
        .device
        .handle_device_authorization(
            None,
            oxidp_auth::device::DeviceParams {
                scope: Some("openid".to_string()),
                client_id: Some("public-spa".to_string()),
                client_secret: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(response.user_code.len(), 9);
    assert!(response.verification_uri_complete.contains(&response.user_code));

    let poll_request = TokenRequest {
        grant_type: GRANT_DEVICE.to_string(),
        code: None,
        redirect_uri: None,
        code_verifier: None,
        client_id: Some("public-spa".to_string()),
        client_secret: None,
        client_assertion_type: None,
        client_assertion: None,
        refresh_token: None,
        scope: None,
        auth_req_id: None,
        device_code: Some(response.device_code.clone()),
    };

    // Pending until the user decides; sloppy user-code entry still matches.
    let err = state.grants.handle(None, poll_request.clone()).await.unwrap_err();
    assert_eq!(err.oauth_error_code(), "authorization_pending");
    let sloppy = response.user_code.to_lowercase().replace('-', "");
    state.device.approve(&sloppy, op.user_id).await.unwrap();

    // Clear poll bookkeeping so the interval does not mask approval.
    op.runtime
        .stores
        .devices
        .update(&response.device_code, &|mut current: DeviceGrantRecord| {
            current.last_poll_at = None;
            Ok(current)
        })
        .await
        .unwrap();

    let token = state.grants.handle(None, poll_request.clone()).await.unwrap();
    assert!(!token.access_token.is_empty());

    // One shot: the grant is consumed.
    let err = state.grants.handle(None, poll_request).await.unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");
}

// ---------------------------------------------------------------------------
// S5 — passkey counter replay (store discipline)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s5_passkey_counter_replay_detected() {
    let op = op().await;
    let credential = PasskeyCredential {
        credential_id: "Y3JlZC0x".to_string(),
        user_id: op.user_id,
        passkey: serde_json::json!({}),
        counter: 42,
        transports: vec!["internal".to_string()],
        device_name: None,
        created_at: UnixMillis::now(),
        last_used_at: None,
    };
    op.runtime.stores.passkeys.put(credential).await.unwrap();

    // The verifier's check-and-update path: equal counter fails.
    let err = op
        .runtime
        .stores
        .passkeys
        .update("Y3JlZC0x", &|mut stored: PasskeyCredential| {
            if !stored.apply_assertion(42, UnixMillis::now()) {
                return Err(AuthError::SuspectedReplay);
            }
            Ok(stored)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::SuspectedReplay));

    // The stored counter is untouched; a strictly greater counter passes.
    let updated = op
        .runtime
        .stores
        .passkeys
        .update("Y3JlZC0x", &|mut stored: PasskeyCredential| {
            if !stored.apply_assertion(43, UnixMillis::now()) {
                return Err(AuthError::SuspectedReplay);
            }
            Ok(stored)
        })
        .await
        .unwrap();
    assert_eq!(updated.counter, 43);
}

// ---------------------------------------------------------------------------
// S6 — PAR request_uri is single use
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s6_par_request_uri_single_use() {
    let op = op().await;
    let state = &op.runtime.state;

    let mut parameters = std::collections::HashMap::new();
    for (key, value) in [
        ("client_id", "public-spa"),
        ("redirect_uri", REDIRECT_URI),
        ("response_type", "code"),
        ("scope", "openid"),
        ("state", "par-state"),
        ("code_challenge", CHALLENGE),
        ("code_challenge_method", "S256"),
    ] {
        parameters.insert(key.to_string(), value.to_string());
    }
    let now = UnixMillis::now();
    let request_uri = "urn:ietf:params:oauth:request_uri:abc".to_string();
    op.runtime
        .stores
        .par
        .put(ParRecord {
            request_uri: request_uri.clone(),
            client_id: "public-spa".to_string(),
            parameters,
            created_at: now,
            expires_at: now + std::time::Duration::from_secs(60),
        })
        .await
        .unwrap();

    let params = AuthorizeParams {
        client_id: Some("public-spa".to_string()),
        request_uri: Some(request_uri.clone()),
        ..AuthorizeParams::default()
    };

    // First use resolves to the pushed parameters and starts the flow.
    let outcome = state.orchestrator.begin(params.clone(), None).await.unwrap();
    assert!(matches!(outcome, AuthorizeOutcome::Interact { .. }));

    // Second use: consumed.
    let err = state.orchestrator.begin(params, None).await.unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_request_uri");
}

// ---------------------------------------------------------------------------
// Property 9 — refresh-token family revocation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refresh_replay_revokes_family() {
    let op = op().await;
    let mut params = authorize_params();
    params.scope = Some("openid offline_access".to_string());
    let (code, _) = obtain_code(&op, params).await;

    let first = op
        .runtime
        .state
        .grants
        .handle(None, code_exchange_request(&code, VERIFIER))
        .await
        .unwrap();
    let refresh_one = first.refresh_token.expect("refresh for offline_access");

    let refresh_request = |token: String| TokenRequest {
        grant_type: "refresh_token".to_string(),
        code: None,
        redirect_uri: None,
        code_verifier: None,
        client_id: Some("public-spa".to_string()),
        client_secret: None,
        client_assertion_type: None,
        client_assertion: None,
        refresh_token: Some(token),
        scope: None,
        auth_req_id: None,
        device_code: None,
    };

    // Rotation: one redemption, one successor.
    let second = op
        .runtime
        .state
        .grants
        .handle(None, refresh_request(refresh_one.clone()))
        .await
        .unwrap();
    let refresh_two = second.refresh_token.expect("rotated refresh");

    // Replaying the rotated token poisons the family.
    let err = op
        .runtime
        .state
        .grants
        .handle(None, refresh_request(refresh_one))
        .await
        .unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");

    // Every member is now dead, including the fresh successor.
    let err = op
        .runtime
        .state
        .grants
        .handle(None, refresh_request(refresh_two))
        .await
        .unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");
}

// ---------------------------------------------------------------------------
// Property 8 — resolved policy immutability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resolved_policy_survives_contract_mutation() {
    let op = op().await;
    let state = &op.runtime.state;

    let outcome = state
        .orchestrator
        .begin(authorize_params(), None)
        .await
        .unwrap();
    let AuthorizeOutcome::Interact {
        challenge_id,
        contract,
    } = outcome
    else {
        panic!("expected interaction");
    };
    let pinned_policy = contract.features.policy.clone();
    assert!(contract.features.targets.contains(&"profile".to_string()));

    // Tighten the tenant mid-flight and re-pin the client.
    let mut tightened = tenant(2);
    tightened.oauth.allowed_scopes.retain(|s| s != "profile");
    state.registry.upsert_tenant(tightened.clone()).unwrap();
    let mut repinned = spa_client(&tightened);
    repinned.version = 2;
    repinned.allowed_scopes.retain(|s| s != "profile");
    state.registry.upsert_client(repinned).unwrap();

    // The in-flight flow still sees the policy it was resolved under.
    let contract = state.orchestrator.contract(&challenge_id).await.unwrap();
    assert_eq!(contract.features.policy, pinned_policy);
    assert!(contract.features.targets.contains(&"profile".to_string()));

    // New flows resolve the tightened policy.
    let outcome = state
        .orchestrator
        .begin(authorize_params(), None)
        .await
        .unwrap();
    let AuthorizeOutcome::Interact { contract, .. } = outcome else {
        panic!("expected interaction");
    };
    assert_ne!(contract.features.policy, pinned_policy);
    assert!(!contract.features.targets.contains(&"profile".to_string()));
}

// ---------------------------------------------------------------------------
// prompt=none
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prompt_none_without_session_redirects_login_required() {
    let op = op().await;
    let mut params = authorize_params();
    params.prompt = Some("none".to_string());

    let outcome = op
        .runtime
        .state
        .orchestrator
        .begin(params, None)
        .await
        .unwrap();
    let AuthorizeOutcome::Redirect { url, .. } = outcome else {
        panic!("prompt=none must not interact");
    };
    assert_eq!(query_param(&url, "error").as_deref(), Some("login_required"));
    assert_eq!(query_param(&url, "state").as_deref(), Some("xyz"));
}

// ---------------------------------------------------------------------------
// Session continuity: second authorization skips interaction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_session_and_prior_consent_skip_interaction() {
    let op = op().await;
    let state = &op.runtime.state;

    // First flow establishes session and consent.
    let (code, _) = obtain_code(&op, authorize_params()).await;
    let _ = state
        .grants
        .handle(None, code_exchange_request(&code, VERIFIER))
        .await
        .unwrap();
    let sessions = op
        .runtime
        .stores
        .sessions
        .list_by_user(op.user_id)
        .await
        .unwrap();
    let session_id = sessions[0].session_id.clone();

    // Second authorization with the session cookie: straight to the code.
    let outcome = state
        .orchestrator
        .begin(authorize_params(), Some(&session_id))
        .await
        .unwrap();
    let AuthorizeOutcome::Redirect { url, .. } = outcome else {
        panic!("expected non-interactive completion");
    };
    assert!(query_param(&url, "code").is_some());

    // And prompt=login forces re-authentication despite the session.
    let mut params = authorize_params();
    params.prompt = Some("login".to_string());
    let outcome = state
        .orchestrator
        .begin(params, Some(&session_id))
        .await
        .unwrap();
    let AuthorizeOutcome::Interact { contract, .. } = outcome else {
        panic!("expected re-authentication");
    };
    assert_eq!(contract.intent, Intent::Reauthenticate);
}

// ---------------------------------------------------------------------------
// Logout propagation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn logout_revokes_sessions() {
    let op = op().await;
    let state = &op.runtime.state;

    let (code, _) = obtain_code(&op, authorize_params()).await;
    let response = state
        .grants
        .handle(None, code_exchange_request(&code, VERIFIER))
        .await
        .unwrap();
    let id_token = response.id_token.unwrap();

    let result = state
        .logout
        .rp_initiated_logout(oxidp_auth::logout::LogoutParams {
            id_token_hint: Some(id_token),
            post_logout_redirect_uri: None,
            state: None,
        })
        .await
        .unwrap();
    assert!(result.revoked_sessions >= 1);

    let sessions = op
        .runtime
        .stores
        .sessions
        .list_by_user(op.user_id)
        .await
        .unwrap();
    assert!(sessions.is_empty());
}
