//! The UI contract.
//!
//! One contract per state, serialized from the state's meta. The `state`
//! field is diagnostic; `intent` is the stable label clients branch on.
//! Every capability is checked against the resolved policy's node palette —
//! a capability outside the palette is a hard bug and fails the request
//! rather than leaking a step policy forbids.

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::flow::engine::FlowState;
use crate::flow::intent::{Actions, Capability, Intent, Stability};
use crate::policy::ResolvedPolicy;
use crate::types::UserAuthMethod;

/// Client identity shown by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDisplay {
    /// Client ID.
    pub client_id: String,

    /// Display name.
    pub client_name: String,
}

/// A flow-local error surfaced through the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiError {
    /// Stable error code.
    pub code: String,

    /// Human-readable description.
    pub message: String,
}

/// Contextual data for rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiContext {
    /// The requesting client, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientDisplay>,

    /// Masked identifier of the user being authenticated, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Flow-local error to display, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UiError>,
}

/// Policy-derived features the UI may branch on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiFeatures {
    /// The pinned policy's resolution ID.
    pub policy: String,

    /// Scopes in play.
    pub targets: Vec<String>,

    /// Authentication methods the policy permits.
    pub auth_methods: Vec<UserAuthMethod>,
}

/// The per-step contract handed to a UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiContract {
    /// Contract schema version.
    pub version: u32,

    /// Diagnostic state name. Never branch on this.
    pub state: String,

    /// Stable semantic label. Branch on this.
    pub intent: Intent,

    /// Render stability.
    pub stability: Stability,

    /// Policy-derived features.
    pub features: UiFeatures,

    /// Capabilities the UI must provide.
    pub capabilities: Vec<Capability>,

    /// Rendering context.
    pub context: UiContext,

    /// Available actions.
    pub actions: Actions,
}

impl UiContract {
    /// Builds the contract for a state.
    ///
    /// # Errors
    ///
    /// `server_error` when a capability requires a node outside the policy
    /// palette — that is a programming error, not a user condition.
    pub fn build(
        state: &FlowState,
        policy: &ResolvedPolicy,
        context: UiContext,
    ) -> AuthResult<Self> {
        let meta = crate::flow::engine::meta(state, policy);

        for capability in &meta.capabilities {
            let node = capability.kind.required_node(meta.registering);
            if !policy.permits_node(node) {
                debug_assert!(false, "capability {:?} outside policy palette", capability.kind);
                return Err(AuthError::server_error(format!(
                    "state '{}' requested capability outside the policy palette",
                    state.name()
                )));
            }
        }

        Ok(Self {
            version: 1,
            state: state.name().to_string(),
            intent: meta.intent,
            stability: meta.stability,
            features: UiFeatures {
                policy: policy.resolution_id.clone(),
                targets: policy.scopes.clone(),
                auth_methods: policy.auth_methods.clone(),
            },
            capabilities: meta.capabilities,
            context,
            actions: meta.actions,
        })
    }
}
