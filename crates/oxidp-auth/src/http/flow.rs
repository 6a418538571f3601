//! Flow-interaction endpoints.
//!
//! The UI walks a challenge through these endpoints, receiving a fresh
//! [`crate::flow::UiContract`] after every step. The verifier endpoints
//! bridge the ceremony services and the orchestrator: a successful ceremony
//! reports into `authentication_succeeded`, never directly into flow state.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use webauthn_rs::prelude::{PublicKeyCredential, RegisterPublicKeyCredential};

use crate::error::{AuthError, AuthResult};
use crate::flow::FlowEvent;
use crate::http::OpState;
use crate::http::authorize::render_outcome;
use crate::http::problem::problem_response;

#[derive(Debug, Deserialize)]
pub(crate) struct IdentifierBody {
    identifier: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventBody {
    /// Typed event name: USE_PASSKEY, USE_EMAIL_CODE, BACK, CANCEL.
    event: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CodeBody {
    code: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConsentBody {
    approve: bool,
}

/// Handler for `GET /flow/{challenge_id}` — the current contract.
pub async fn contract_handler(
    State(state): State<OpState>,
    Path(challenge_id): Path<String>,
) -> Response {
    match state.orchestrator.contract(&challenge_id).await {
        Ok(contract) => (StatusCode::OK, Json(contract)).into_response(),
        Err(err) => problem_response(&err),
    }
}

/// Handler for `POST /flow/{challenge_id}/identifier`.
pub async fn submit_identifier_handler(
    State(state): State<OpState>,
    Path(challenge_id): Path<String>,
    Json(body): Json<IdentifierBody>,
) -> Response {
    match state
        .orchestrator
        .submit_identifier(&challenge_id, &body.identifier)
        .await
    {
        Ok(outcome) => render_outcome(outcome),
        Err(err) => problem_response(&err),
    }
}

/// Handler for `POST /flow/{challenge_id}/event` — plain navigation events.
pub async fn event_handler(
    State(state): State<OpState>,
    Path(challenge_id): Path<String>,
    Json(body): Json<EventBody>,
) -> Response {
    let event = match body.event.as_str() {
        "USE_PASSKEY" => FlowEvent::UsePasskey,
        "USE_EMAIL_CODE" => FlowEvent::UseEmailCode,
        "BACK" => FlowEvent::Back,
        "CANCEL" => FlowEvent::Cancel,
        "RESEND_CODE" => FlowEvent::ResendCode,
        other => {
            return problem_response(&AuthError::invalid_request(format!(
                "unknown event '{other}'"
            )));
        }
    };
    match state.orchestrator.apply_ui_event(&challenge_id, event).await {
        Ok(outcome) => render_outcome(outcome),
        Err(err) => problem_response(&err),
    }
}

/// Handler for `POST /flow/{challenge_id}/passkey/start`.
///
/// Begins the assertion ceremony for the identified user and parks the
/// ceremony reference on the flow.
pub async fn passkey_start_handler(
    State(state): State<OpState>,
    Path(challenge_id): Path<String>,
) -> Response {
    let result: AuthResult<_> = async {
        let (user_id, _, policy) = state.orchestrator.flow_user(&challenge_id).await?;
        let user_id = user_id
            .ok_or_else(|| AuthError::validation_failed("no user identified in this flow"))?;
        let (ceremony_id, options) = state
            .passkeys
            .begin_authentication(&policy, user_id)
            .await?;
        state
            .orchestrator
            .attach_ceremony(
                &challenge_id,
                serde_json::json!({ "passkey_challenge": ceremony_id }),
            )
            .await?;
        Ok(options)
    }
    .await;

    match result {
        Ok(options) => (StatusCode::OK, Json(options)).into_response(),
        Err(err) => problem_response(&err),
    }
}

/// Handler for `POST /flow/{challenge_id}/passkey/finish`.
pub async fn passkey_finish_handler(
    State(state): State<OpState>,
    Path(challenge_id): Path<String>,
    Json(credential): Json<PublicKeyCredential>,
) -> Response {
    let result: AuthResult<_> = async {
        let (_, _, policy) = state.orchestrator.flow_user(&challenge_id).await?;
        state.rate_limiter.enforce(
            &crate::rate_limit::RateLimiter::key(&policy.tenant_id, "passkey-auth", &challenge_id),
            &state.config.rate_limits.passkey_auth,
        )?;
        let ceremony = state.orchestrator.ceremony(&challenge_id).await?;
        let ceremony_id = ceremony
            .get("passkey_challenge")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AuthError::validation_failed("no passkey ceremony in progress"))?;

        let verified = match state
            .passkeys
            .finish_authentication(ceremony_id, &credential)
            .await
        {
            Ok(verified) => verified,
            Err(err) => {
                state.orchestrator.note_verification_failure(&challenge_id).await;
                return Err(err);
            }
        };

        state
            .orchestrator
            .authentication_succeeded(
                &challenge_id,
                verified.user_id,
                vec!["webauthn".to_string()],
                Some("urn:oxidp:acr:passkey".to_string()),
            )
            .await
    }
    .await;

    match result {
        Ok(outcome) => render_outcome(outcome),
        Err(err) => problem_response(&err),
    }
}

/// Handler for `POST /flow/{challenge_id}/email/send`.
pub async fn email_send_handler(
    State(state): State<OpState>,
    Path(challenge_id): Path<String>,
) -> Response {
    let result: AuthResult<_> = async {
        let (user_id, email, policy) = state.orchestrator.flow_user(&challenge_id).await?;
        let user_id = user_id
            .ok_or_else(|| AuthError::validation_failed("no user identified in this flow"))?;
        let email =
            email.ok_or_else(|| AuthError::validation_failed("no address on this flow"))?;
        let otp_challenge = state.email_otp.send(&policy, user_id, &email).await?;
        state
            .orchestrator
            .attach_ceremony(
                &challenge_id,
                serde_json::json!({ "otp_challenge": otp_challenge }),
            )
            .await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => problem_response(&err),
    }
}

/// Handler for `POST /flow/{challenge_id}/email/verify`.
pub async fn email_verify_handler(
    State(state): State<OpState>,
    Path(challenge_id): Path<String>,
    Json(body): Json<CodeBody>,
) -> Response {
    let result: AuthResult<_> = async {
        let ceremony = state.orchestrator.ceremony(&challenge_id).await?;
        let otp_challenge = ceremony
            .get("otp_challenge")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AuthError::validation_failed("no code was sent for this flow"))?;

        let verified = match state.email_otp.verify(otp_challenge, &body.code).await {
            Ok(verified) => verified,
            Err(err) => {
                state.orchestrator.note_verification_failure(&challenge_id).await;
                return Err(err);
            }
        };

        state
            .orchestrator
            .authentication_succeeded(
                &challenge_id,
                verified.user_id,
                vec!["otp".to_string()],
                Some("urn:oxidp:acr:email".to_string()),
            )
            .await
    }
    .await;

    match result {
        Ok(outcome) => render_outcome(outcome),
        Err(err) => problem_response(&err),
    }
}

/// Handler for `POST /flow/{challenge_id}/passkey/register/start`.
///
/// Registers a new passkey for the user authenticated in this flow — the
/// enrollment path right after a first email-code login.
pub async fn passkey_register_start_handler(
    State(state): State<OpState>,
    Path(challenge_id): Path<String>,
) -> Response {
    let result: AuthResult<_> = async {
        let (user_id, email, policy) = state.orchestrator.flow_user(&challenge_id).await?;
        let user_id = user_id
            .ok_or_else(|| AuthError::validation_failed("no user identified in this flow"))?;
        let label = email.unwrap_or_else(|| user_id.to_string());
        let (ceremony_id, options) = state
            .passkeys
            .begin_registration(&policy, user_id, &label, &label)
            .await?;
        state
            .orchestrator
            .attach_ceremony(
                &challenge_id,
                serde_json::json!({ "passkey_registration": ceremony_id }),
            )
            .await?;
        Ok(options)
    }
    .await;

    match result {
        Ok(options) => (StatusCode::OK, Json(options)).into_response(),
        Err(err) => problem_response(&err),
    }
}

/// Handler for `POST /flow/{challenge_id}/passkey/register/finish`.
pub async fn passkey_register_finish_handler(
    State(state): State<OpState>,
    Path(challenge_id): Path<String>,
    Json(credential): Json<RegisterPublicKeyCredential>,
) -> Response {
    let result: AuthResult<_> = async {
        let ceremony = state.orchestrator.ceremony(&challenge_id).await?;
        let ceremony_id = ceremony
            .get("passkey_registration")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                AuthError::validation_failed("no registration ceremony in progress")
            })?;
        let stored = state
            .passkeys
            .finish_registration(ceremony_id, &credential, None)
            .await?;
        Ok(stored.credential_id)
    }
    .await;

    match result {
        Ok(credential_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "credential_id": credential_id })),
        )
            .into_response(),
        Err(err) => problem_response(&err),
    }
}

/// Handler for `POST /flow/{challenge_id}/consent`.
pub async fn consent_handler(
    State(state): State<OpState>,
    Path(challenge_id): Path<String>,
    Json(body): Json<ConsentBody>,
) -> Response {
    match state
        .orchestrator
        .consent_decision(&challenge_id, body.approve)
        .await
    {
        Ok(outcome) => render_outcome(outcome),
        Err(err) => problem_response(&err),
    }
}
