//! State machines and transitions.
//!
//! Two layers: the authorization machine owns the overall flow
//! (validate → session check → authenticate → consent → issue), and the
//! authentication sub-machine owns the interactive steps inside it. States
//! either auto-advance ([`advance`]) or wait for a typed event
//! ([`apply_event`]). Both functions are pure over a [`FlowContext`] of
//! precomputed facts; neither performs I/O or authorization logic.

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::flow::intent::{
    Action, Actions, Capability, CapabilityKind, Intent, Stability, StateMeta,
};
use crate::policy::ResolvedPolicy;

/// Interactive steps of the authentication sub-machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStep {
    /// Collecting the identifier.
    IdentifyingUser,
    /// Choosing a method.
    SelectingMethod,
    /// Passkey ceremony in progress.
    Passkey,
    /// Email code sent, awaiting entry.
    EmailCode,
}

/// States of the authorization machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "name", content = "data")]
pub enum FlowState {
    /// Request parameters are being validated.
    Validating,
    /// Looking for an existing browser session.
    CheckingSession,
    /// The authentication sub-machine is running.
    Authenticating {
        /// Current interactive step.
        step: AuthStep,
        /// Whether this is a forced re-authentication of a known user.
        reauth: bool,
    },
    /// Consent state is being computed.
    CheckingConsent,
    /// The user must approve scopes.
    NeedsConsent {
        /// Scopes awaiting a decision.
        missing: Vec<String>,
    },
    /// Authentication and consent are settled; the code is being minted.
    IssuingCode,
    /// Terminal: redirect with the code.
    Complete,
    /// Terminal: surface the error.
    Errored {
        /// OAuth error code.
        code: String,
    },
}

impl FlowState {
    /// Stable wire name for logging and the contract's `state` field.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::CheckingSession => "checking_session",
            Self::Authenticating { reauth: false, step } => match step {
                AuthStep::IdentifyingUser => "auth.identifying_user",
                AuthStep::SelectingMethod => "auth.selecting_method",
                AuthStep::Passkey => "auth.passkey",
                AuthStep::EmailCode => "auth.email_code",
            },
            Self::Authenticating { reauth: true, step } => match step {
                AuthStep::IdentifyingUser => "reauth.identifying_user",
                AuthStep::SelectingMethod => "reauth.selecting_method",
                AuthStep::Passkey => "reauth.passkey",
                AuthStep::EmailCode => "reauth.email_code",
            },
            Self::CheckingConsent => "checking_consent",
            Self::NeedsConsent { .. } => "needs_consent",
            Self::IssuingCode => "issuing_code",
            Self::Complete => "complete",
            Self::Errored { .. } => "error",
        }
    }

    /// Returns `true` for `Complete` / `Errored`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Errored { .. })
    }
}

/// Typed events the UI (or the orchestrator on its behalf) submits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum FlowEvent {
    /// Submit collected fields (identifier, code).
    Submit,
    /// Choose the passkey method.
    UsePasskey,
    /// Choose the email-code method.
    UseEmailCode,
    /// The chosen ceremony/verification succeeded (applied by the
    /// orchestrator after the verifier reports success).
    Confirm,
    /// Approve the consent prompt.
    Approve,
    /// Deny the consent prompt.
    Deny,
    /// Abandon the flow.
    Cancel,
    /// Step back.
    Back,
    /// Ask for a fresh email code.
    ResendCode,
}

impl FlowEvent {
    /// Wire name for errors and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit => "SUBMIT",
            Self::UsePasskey => "USE_PASSKEY",
            Self::UseEmailCode => "USE_EMAIL_CODE",
            Self::Confirm => "CONFIRM",
            Self::Approve => "APPROVE",
            Self::Deny => "DENY",
            Self::Cancel => "CANCEL",
            Self::Back => "BACK",
            Self::ResendCode => "RESEND_CODE",
        }
    }
}

/// Precomputed facts the machine consults. Guards read these and nothing
/// else; whoever builds the context has already asked the policy resolver
/// and consent service.
#[derive(Debug, Clone, Default)]
pub struct FlowContext {
    /// A live browser session covers this flow.
    pub has_session: bool,

    /// `prompt=login` or `max_age` exceeded: force re-authentication.
    pub force_login: bool,

    /// `prompt=none`: interaction is forbidden.
    pub prompt_none: bool,

    /// `prompt=consent`: force the consent prompt.
    pub force_consent: bool,

    /// Consent already satisfied (prior grant or auto-grant).
    pub consent_satisfied: bool,

    /// Scopes missing a consent decision.
    pub consent_missing: Vec<String>,

    /// The user was located from the submitted identifier.
    pub user_identified: bool,
}

/// Resolves automatic states until an interactive or terminal one.
#[must_use]
pub fn advance(state: FlowState, ctx: &FlowContext) -> FlowState {
    let mut current = state;
    loop {
        current = match current {
            FlowState::Validating => FlowState::CheckingSession,
            FlowState::CheckingSession => {
                if ctx.has_session && !ctx.force_login {
                    FlowState::CheckingConsent
                } else if ctx.prompt_none {
                    FlowState::Errored {
                        code: "login_required".to_string(),
                    }
                } else if ctx.has_session {
                    // Known user, forced re-authentication: skip identify.
                    FlowState::Authenticating {
                        step: AuthStep::SelectingMethod,
                        reauth: true,
                    }
                } else {
                    FlowState::Authenticating {
                        step: AuthStep::IdentifyingUser,
                        reauth: false,
                    }
                }
            }
            FlowState::CheckingConsent => {
                if ctx.consent_satisfied && !ctx.force_consent {
                    FlowState::IssuingCode
                } else if ctx.prompt_none {
                    FlowState::Errored {
                        code: "consent_required".to_string(),
                    }
                } else {
                    FlowState::NeedsConsent {
                        missing: ctx.consent_missing.clone(),
                    }
                }
            }
            interactive => return interactive,
        };
    }
}

/// Applies a UI event.
///
/// # Errors
///
/// `invalid_transition` when the event is not valid in the current state.
pub fn apply_event(
    state: &FlowState,
    event: &FlowEvent,
    ctx: &FlowContext,
) -> AuthResult<FlowState> {
    let invalid =
        || Err(AuthError::invalid_transition(event.name(), state.name()));

    let next = match (state, event) {
        // Cancel abandons any non-terminal state.
        (s, FlowEvent::Cancel) if !s.is_terminal() => FlowState::Errored {
            code: "access_denied".to_string(),
        },

        (FlowState::Authenticating { step, reauth }, event) => {
            let reauth = *reauth;
            match (step, event) {
                (AuthStep::IdentifyingUser, FlowEvent::Submit) => {
                    if ctx.user_identified {
                        FlowState::Authenticating {
                            step: AuthStep::SelectingMethod,
                            reauth,
                        }
                    } else {
                        // Unknown identifier: stay put; the contract carries
                        // the error.
                        FlowState::Authenticating {
                            step: AuthStep::IdentifyingUser,
                            reauth,
                        }
                    }
                }
                (AuthStep::SelectingMethod, FlowEvent::UsePasskey) => FlowState::Authenticating {
                    step: AuthStep::Passkey,
                    reauth,
                },
                (AuthStep::SelectingMethod, FlowEvent::UseEmailCode) => {
                    FlowState::Authenticating {
                        step: AuthStep::EmailCode,
                        reauth,
                    }
                }
                (AuthStep::SelectingMethod, FlowEvent::Back) if !reauth => {
                    FlowState::Authenticating {
                        step: AuthStep::IdentifyingUser,
                        reauth,
                    }
                }
                (AuthStep::Passkey | AuthStep::EmailCode, FlowEvent::Back) => {
                    FlowState::Authenticating {
                        step: AuthStep::SelectingMethod,
                        reauth,
                    }
                }
                (AuthStep::Passkey | AuthStep::EmailCode, FlowEvent::Confirm) => {
                    FlowState::CheckingConsent
                }
                (AuthStep::EmailCode, FlowEvent::ResendCode) => FlowState::Authenticating {
                    step: AuthStep::EmailCode,
                    reauth,
                },
                _ => return invalid(),
            }
        }

        (FlowState::NeedsConsent { .. }, FlowEvent::Approve) => FlowState::IssuingCode,
        (FlowState::NeedsConsent { .. }, FlowEvent::Deny) => FlowState::Errored {
            code: "access_denied".to_string(),
        },

        _ => return invalid(),
    };

    Ok(advance(next, ctx))
}

/// The meta for a state, drawn from the policy palette.
#[must_use]
pub fn meta(state: &FlowState, policy: &ResolvedPolicy) -> StateMeta {
    match state {
        FlowState::Authenticating { step, reauth } => {
            let intent = if *reauth {
                Intent::Reauthenticate
            } else {
                match step {
                    AuthStep::IdentifyingUser => Intent::Identify,
                    AuthStep::SelectingMethod => Intent::SelectMethod,
                    AuthStep::Passkey => Intent::AuthenticatePasskey,
                    AuthStep::EmailCode => Intent::VerifyEmailCode,
                }
            };
            match step {
                AuthStep::IdentifyingUser => StateMeta {
                    intent,
                    stability: Stability::Stable,
                    capabilities: vec![
                        Capability::required(CapabilityKind::CollectIdentifier, "identifier")
                            .with_hints(serde_json::json!({ "format": "email" }))
                            .with_validation("^.+@.+$"),
                    ],
                    actions: Actions {
                        primary: Action::new("SUBMIT", "Continue"),
                        secondary: vec![Action::new("CANCEL", "Cancel")],
                    },
                    registering: false,
                },
                AuthStep::SelectingMethod => StateMeta {
                    intent,
                    stability: Stability::Stable,
                    capabilities: vec![
                        Capability::required(CapabilityKind::SelectAuthMethod, "method")
                            .with_hints(serde_json::json!({
                                "methods": policy.auth_methods,
                            })),
                    ],
                    actions: Actions {
                        primary: Action::new("USE_PASSKEY", "Use a passkey"),
                        secondary: vec![
                            Action::new("USE_EMAIL_CODE", "Email me a code"),
                            Action::new("BACK", "Back"),
                            Action::new("CANCEL", "Cancel"),
                        ],
                    },
                    registering: false,
                },
                AuthStep::Passkey => StateMeta {
                    intent,
                    stability: Stability::Stable,
                    capabilities: vec![Capability::required(
                        CapabilityKind::VerifyPossession,
                        "assertion",
                    )],
                    actions: Actions {
                        primary: Action::new("CONFIRM", "Continue"),
                        secondary: vec![Action::new("BACK", "Back"), Action::new("CANCEL", "Cancel")],
                    },
                    registering: false,
                },
                AuthStep::EmailCode => StateMeta {
                    intent,
                    stability: Stability::Stable,
                    capabilities: vec![
                        Capability::required(CapabilityKind::EnterCode, "code")
                            .with_hints(serde_json::json!({ "digits": 6 }))
                            .with_validation("^[0-9]{6}$"),
                    ],
                    actions: Actions {
                        primary: Action::new("SUBMIT", "Verify"),
                        secondary: vec![
                            Action::new("RESEND_CODE", "Resend code"),
                            Action::new("BACK", "Back"),
                            Action::new("CANCEL", "Cancel"),
                        ],
                    },
                    registering: false,
                },
            }
        }
        FlowState::NeedsConsent { missing } => StateMeta {
            intent: Intent::Consent,
            stability: Stability::Stable,
            capabilities: vec![
                Capability::required(CapabilityKind::ConfirmConsent, "consent")
                    .with_hints(serde_json::json!({ "scopes": missing })),
            ],
            actions: Actions {
                primary: Action::new("APPROVE", "Allow"),
                secondary: vec![Action::new("DENY", "Deny")],
            },
            registering: false,
        },
        FlowState::Complete => StateMeta {
            intent: Intent::Redirect,
            stability: Stability::Stable,
            capabilities: vec![],
            actions: Actions {
                primary: Action::new("CONFIRM", "Continue"),
                secondary: vec![],
            },
            registering: false,
        },
        FlowState::Errored { .. } => StateMeta {
            intent: Intent::Error,
            stability: Stability::Stable,
            capabilities: vec![],
            actions: Actions {
                primary: Action::new("CONFIRM", "Close"),
                secondary: vec![],
            },
            registering: false,
        },
        // Automatic states.
        _ => StateMeta {
            intent: Intent::Processing,
            stability: Stability::Transient,
            capabilities: vec![],
            actions: Actions {
                primary: Action::new("CONFIRM", "Continue"),
                secondary: vec![],
            },
            registering: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> FlowContext {
        FlowContext::default()
    }

    #[test]
    fn test_fresh_flow_lands_on_identify() {
        let state = advance(FlowState::Validating, &ctx());
        assert_eq!(
            state,
            FlowState::Authenticating {
                step: AuthStep::IdentifyingUser,
                reauth: false
            }
        );
    }

    #[test]
    fn test_session_skips_to_consent_check() {
        let context = FlowContext {
            has_session: true,
            consent_satisfied: true,
            ..ctx()
        };
        let state = advance(FlowState::Validating, &context);
        assert_eq!(state, FlowState::IssuingCode);
    }

    #[test]
    fn test_prompt_none_without_session_errors() {
        let context = FlowContext {
            prompt_none: true,
            ..ctx()
        };
        let state = advance(FlowState::Validating, &context);
        assert_eq!(
            state,
            FlowState::Errored {
                code: "login_required".to_string()
            }
        );
    }

    #[test]
    fn test_prompt_none_needing_consent_errors() {
        let context = FlowContext {
            has_session: true,
            prompt_none: true,
            consent_satisfied: false,
            ..ctx()
        };
        let state = advance(FlowState::Validating, &context);
        assert_eq!(
            state,
            FlowState::Errored {
                code: "consent_required".to_string()
            }
        );
    }

    #[test]
    fn test_forced_reauth_skips_identify() {
        let context = FlowContext {
            has_session: true,
            force_login: true,
            ..ctx()
        };
        let state = advance(FlowState::Validating, &context);
        assert_eq!(
            state,
            FlowState::Authenticating {
                step: AuthStep::SelectingMethod,
                reauth: true
            }
        );
    }

    #[test]
    fn test_full_interactive_walk() {
        let mut context = ctx();
        let mut state = advance(FlowState::Validating, &context);

        context.user_identified = true;
        state = apply_event(&state, &FlowEvent::Submit, &context).unwrap();
        assert_eq!(state.name(), "auth.selecting_method");

        state = apply_event(&state, &FlowEvent::UsePasskey, &context).unwrap();
        assert_eq!(state.name(), "auth.passkey");

        // Ceremony verified; consent still missing.
        context.consent_missing = vec!["openid".to_string()];
        state = apply_event(&state, &FlowEvent::Confirm, &context).unwrap();
        assert_eq!(
            state,
            FlowState::NeedsConsent {
                missing: vec!["openid".to_string()]
            }
        );

        state = apply_event(&state, &FlowEvent::Approve, &context).unwrap();
        assert_eq!(state, FlowState::IssuingCode);
    }

    #[test]
    fn test_back_navigation() {
        let context = ctx();
        let state = FlowState::Authenticating {
            step: AuthStep::EmailCode,
            reauth: false,
        };
        let state = apply_event(&state, &FlowEvent::Back, &context).unwrap();
        assert_eq!(state.name(), "auth.selecting_method");
        let state = apply_event(&state, &FlowEvent::Back, &context).unwrap();
        assert_eq!(state.name(), "auth.identifying_user");
    }

    #[test]
    fn test_reauth_cannot_step_back_to_identify() {
        let context = ctx();
        let state = FlowState::Authenticating {
            step: AuthStep::SelectingMethod,
            reauth: true,
        };
        assert!(apply_event(&state, &FlowEvent::Back, &context).is_err());
    }

    #[test]
    fn test_deny_and_cancel_are_access_denied() {
        let context = ctx();
        let state = FlowState::NeedsConsent { missing: vec![] };
        assert_eq!(
            apply_event(&state, &FlowEvent::Deny, &context).unwrap(),
            FlowState::Errored {
                code: "access_denied".to_string()
            }
        );

        let state = FlowState::Authenticating {
            step: AuthStep::Passkey,
            reauth: false,
        };
        assert_eq!(
            apply_event(&state, &FlowEvent::Cancel, &context).unwrap(),
            FlowState::Errored {
                code: "access_denied".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_events_rejected() {
        let context = ctx();
        let state = FlowState::Authenticating {
            step: AuthStep::IdentifyingUser,
            reauth: false,
        };
        let err = apply_event(&state, &FlowEvent::Approve, &context).unwrap_err();
        assert!(err.is_flow_local());
        assert!(err.to_string().contains("APPROVE"));

        // Terminal states accept nothing.
        let done = FlowState::Complete;
        assert!(apply_event(&done, &FlowEvent::Confirm, &context).is_err());
        assert!(apply_event(&done, &FlowEvent::Cancel, &context).is_err());
    }

    #[test]
    fn test_unknown_identifier_stays_put() {
        let context = ctx(); // user_identified = false
        let state = FlowState::Authenticating {
            step: AuthStep::IdentifyingUser,
            reauth: false,
        };
        let next = apply_event(&state, &FlowEvent::Submit, &context).unwrap();
        assert_eq!(next.name(), "auth.identifying_user");
    }

    #[test]
    fn test_meta_intents_differ_from_state_names() {
        let policy = crate::policy::test_support::policy();
        let normal = FlowState::Authenticating {
            step: AuthStep::Passkey,
            reauth: false,
        };
        let reauth = FlowState::Authenticating {
            step: AuthStep::Passkey,
            reauth: true,
        };
        assert_eq!(meta(&normal, &policy).intent, Intent::AuthenticatePasskey);
        assert_eq!(meta(&reauth, &policy).intent, Intent::Reauthenticate);
        assert_ne!(normal.name(), reauth.name());
    }

    #[test]
    fn test_state_serde_roundtrip() {
        let state = FlowState::Authenticating {
            step: AuthStep::EmailCode,
            reauth: true,
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: FlowState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
