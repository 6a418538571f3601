//! The consent service.
//!
//! Computes the delta between what a client requests and what the user has
//! already granted, honoring the resolved policy's consent mode. The flow
//! engine receives the decision as precomputed data — it never evaluates
//! consent itself.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::AuthResult;
use crate::policy::ResolvedPolicy;
use crate::stores::{ConsentRecord, ConsentStore};
use crate::types::ConsentMode;

/// Outcome of a consent check for one authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentDecision {
    /// Prior grants cover everything (or policy auto-grants); no prompt.
    Granted {
        /// The effective scopes.
        scopes: Vec<String>,
    },
    /// The user must be prompted.
    PromptRequired {
        /// Scopes already covered by prior grants.
        already_granted: Vec<String>,
        /// Scopes needing a decision.
        missing: Vec<String>,
    },
}

impl ConsentDecision {
    /// Returns `true` when no interaction is needed.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// Materialized-consent operations.
pub struct ConsentService {
    store: Arc<dyn ConsentStore>,
}

impl ConsentService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn ConsentStore>) -> Self {
        Self { store }
    }

    /// Computes the consent decision for a request.
    ///
    /// `requested` must already be filtered to the policy's effective scope
    /// set.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    pub async fn check(
        &self,
        user_id: Uuid,
        policy: &ResolvedPolicy,
        requested: &[String],
    ) -> AuthResult<ConsentDecision> {
        match policy.consent_mode {
            ConsentMode::AutoGrant => Ok(ConsentDecision::Granted {
                scopes: requested.to_vec(),
            }),
            ConsentMode::Always => Ok(ConsentDecision::PromptRequired {
                already_granted: Vec::new(),
                missing: requested.to_vec(),
            }),
            ConsentMode::Remembered => {
                let prior = self.store.find(user_id, &policy.client_id).await?;
                match prior {
                    Some(record) if record.covers(requested) => Ok(ConsentDecision::Granted {
                        scopes: requested.to_vec(),
                    }),
                    Some(record) => {
                        let (granted, missing): (Vec<String>, Vec<String>) = requested
                            .iter()
                            .cloned()
                            .partition(|s| record.granted_scopes.contains(s));
                        Ok(ConsentDecision::PromptRequired {
                            already_granted: granted,
                            missing,
                        })
                    }
                    None => Ok(ConsentDecision::PromptRequired {
                        already_granted: Vec::new(),
                        missing: requested.to_vec(),
                    }),
                }
            }
        }
    }

    /// Records the user's approval, merging with any prior grant.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    pub async fn grant(
        &self,
        user_id: Uuid,
        client_id: &str,
        scopes: Vec<String>,
    ) -> AuthResult<()> {
        let merged = match self.store.find(user_id, client_id).await? {
            Some(prior) => {
                let mut all = prior.granted_scopes;
                for scope in scopes {
                    if !all.contains(&scope) {
                        all.push(scope);
                    }
                }
                all
            }
            None => scopes,
        };
        self.store
            .upsert(ConsentRecord::new(user_id, client_id, merged))
            .await
    }

    /// Revokes the grant for a user/client pair.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    pub async fn revoke(&self, user_id: Uuid, client_id: &str) -> AuthResult<()> {
        self.store.revoke(user_id, client_id).await
    }
}
