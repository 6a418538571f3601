//! Flow intents, capabilities, and state meta.

use serde::{Deserialize, Serialize};

use crate::policy::FlowNode;

/// The stable semantic label clients branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Collect an identifier to locate the user.
    Identify,
    /// Choose between available authentication methods.
    SelectMethod,
    /// Perform a passkey assertion.
    AuthenticatePasskey,
    /// Register a new passkey.
    RegisterPasskey,
    /// Enter an emailed one-time code.
    VerifyEmailCode,
    /// Re-authenticate an already known user.
    Reauthenticate,
    /// Approve or deny requested scopes.
    Consent,
    /// Nothing to collect; the flow is progressing server-side.
    Processing,
    /// Terminal: follow the redirect.
    Redirect,
    /// Terminal: surface the error.
    Error,
}

/// Whether a state is expected to persist long enough to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    /// Interactive; render and wait for the user.
    Stable,
    /// Auto-advancing; the next contract follows immediately.
    Transient,
}

/// Named UI interaction patterns a state may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// A text input for an identifier (email).
    CollectIdentifier,
    /// A chooser over permitted authentication methods.
    SelectAuthMethod,
    /// A WebAuthn ceremony (assertion or registration).
    VerifyPossession,
    /// A one-time-code input.
    EnterCode,
    /// A scope-approval panel.
    ConfirmConsent,
}

impl CapabilityKind {
    /// The policy-palette node this capability requires.
    #[must_use]
    pub fn required_node(self, registering: bool) -> FlowNode {
        match self {
            Self::CollectIdentifier => FlowNode::IdentifyUser,
            Self::SelectAuthMethod => FlowNode::SelectMethod,
            Self::VerifyPossession => {
                if registering {
                    FlowNode::PasskeyRegister
                } else {
                    FlowNode::PasskeyAuthenticate
                }
            }
            Self::EnterCode => FlowNode::EmailCodeVerify,
            Self::ConfirmConsent => FlowNode::ConsentPrompt,
        }
    }
}

/// One capability requested from the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Interaction pattern.
    #[serde(rename = "type")]
    pub kind: CapabilityKind,

    /// Field/ceremony identifier the UI submits back under.
    pub id: String,

    /// Whether the flow cannot proceed without it.
    pub required: bool,

    /// Free-form rendering hints (placeholder text, allowed methods).
    #[serde(skip_serializing_if = "serde_json::Value::is_null", default)]
    pub hints: serde_json::Value,

    /// Validation pattern the UI may pre-apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
}

impl Capability {
    /// Creates a required capability without hints.
    #[must_use]
    pub fn required(kind: CapabilityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            required: true,
            hints: serde_json::Value::Null,
            validation: None,
        }
    }

    /// Attaches rendering hints.
    #[must_use]
    pub fn with_hints(mut self, hints: serde_json::Value) -> Self {
        self.hints = hints;
        self
    }

    /// Attaches a validation pattern.
    #[must_use]
    pub fn with_validation(mut self, pattern: impl Into<String>) -> Self {
        self.validation = Some(pattern.into());
        self
    }
}

/// A UI action (button).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Event identifier submitted back to the flow.
    pub id: String,

    /// Default label; UIs may localize.
    pub label: String,
}

impl Action {
    /// Creates an action.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// The actions available in a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actions {
    /// The default action.
    pub primary: Action,

    /// Alternatives (back, cancel, resend).
    #[serde(default)]
    pub secondary: Vec<Action>,
}

/// Per-state meta the UI contract is serialized from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMeta {
    /// Stable semantic label.
    pub intent: Intent,

    /// Render stability.
    pub stability: Stability,

    /// Capabilities the UI must provide.
    pub capabilities: Vec<Capability>,

    /// Available actions.
    pub actions: Actions,

    /// Whether `VerifyPossession` means registration (palette check).
    #[serde(default)]
    pub registering: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_node_mapping() {
        assert_eq!(
            CapabilityKind::CollectIdentifier.required_node(false),
            FlowNode::IdentifyUser
        );
        assert_eq!(
            CapabilityKind::VerifyPossession.required_node(false),
            FlowNode::PasskeyAuthenticate
        );
        assert_eq!(
            CapabilityKind::VerifyPossession.required_node(true),
            FlowNode::PasskeyRegister
        );
        assert_eq!(
            CapabilityKind::ConfirmConsent.required_node(false),
            FlowNode::ConsentPrompt
        );
    }

    #[test]
    fn test_capability_serialization_uses_type_tag() {
        let cap = Capability::required(CapabilityKind::EnterCode, "code")
            .with_validation("^[0-9]{6}$");
        let json = serde_json::to_value(&cap).unwrap();
        assert_eq!(json["type"], "enter_code");
        assert_eq!(json["id"], "code");
        assert_eq!(json["validation"], "^[0-9]{6}$");
        assert!(json.get("hints").is_none());
    }
}
