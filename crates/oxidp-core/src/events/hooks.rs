//! Hook traits for the event bus.
//!
//! Pre-hooks run synchronously before the guarded operation and may abort it
//! by returning an error. Post-hooks observe committed events; their failures
//! are logged and never propagate to the event source.

use async_trait::async_trait;

use super::types::EventEnvelope;

/// Error type for hook execution.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Hook vetoed the operation (pre-hooks only).
    #[error("Operation rejected: {0}")]
    Rejected(String),

    /// Hook execution failed.
    #[error("Hook execution failed: {0}")]
    Execution(String),

    /// Hook failed to deliver to a downstream channel or endpoint.
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

impl HookError {
    /// Create a rejection (used by pre-hooks to abort the operation).
    #[must_use]
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Create an execution error.
    #[must_use]
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a delivery error.
    #[must_use]
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }
}

/// A synchronous pre-hook.
///
/// Runs before the guarded operation commits. Returning an error aborts the
/// flow; the caller surfaces the abort to the client.
#[async_trait]
pub trait PreHook: Send + Sync {
    /// Unique name for this hook (for logging and abort attribution).
    fn name(&self) -> &str;

    /// Event name prefixes this hook wants. Empty slice matches everything.
    fn event_prefixes(&self) -> &[&str] {
        &[]
    }

    /// Inspect the pending event. `Err` aborts the operation.
    async fn before(&self, event: &EventEnvelope) -> Result<(), HookError>;

    /// Returns `true` if this hook should see the given event.
    fn matches(&self, event: &EventEnvelope) -> bool {
        let prefixes = self.event_prefixes();
        prefixes.is_empty() || prefixes.iter().any(|p| event.event_name.starts_with(p))
    }
}

/// A post-hook, run after the operation committed.
///
/// Post-hooks should be quick; heavy work belongs behind an internal channel.
/// Errors are logged by the bus and never affect the originating request.
#[async_trait]
pub trait PostHook: Send + Sync {
    /// Unique name for this hook.
    fn name(&self) -> &str;

    /// Event name prefixes this hook wants. Empty slice matches everything.
    fn event_prefixes(&self) -> &[&str] {
        &[]
    }

    /// Handle a committed event.
    async fn after(&self, event: &EventEnvelope) -> Result<(), HookError>;

    /// Returns `true` if this hook should see the given event.
    fn matches(&self, event: &EventEnvelope) -> bool {
        let prefixes = self.event_prefixes();
        prefixes.is_empty() || prefixes.iter().any(|p| event.event_name.starts_with(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{EventContext, names};

    struct SecurityOnly;

    #[async_trait]
    impl PostHook for SecurityOnly {
        fn name(&self) -> &str {
            "security_only"
        }

        fn event_prefixes(&self) -> &[&str] {
            &["security."]
        }

        async fn after(&self, _event: &EventEnvelope) -> Result<(), HookError> {
            Ok(())
        }
    }

    #[test]
    fn test_prefix_matching() {
        let hook = SecurityOnly;
        let security = EventEnvelope::new(
            names::TOKEN_REPLAY_DETECTED,
            "t",
            EventContext::for_request("r"),
        );
        let session =
            EventEnvelope::new(names::SESSION_CREATED, "t", EventContext::for_request("r"));

        assert!(hook.matches(&security));
        assert!(!hook.matches(&session));
    }

    #[test]
    fn test_hook_error_display() {
        assert_eq!(
            HookError::rejected("quota exceeded").to_string(),
            "Operation rejected: quota exceeded"
        );
        assert_eq!(
            HookError::delivery("connection refused").to_string(),
            "Delivery failed: connection refused"
        );
    }
}
