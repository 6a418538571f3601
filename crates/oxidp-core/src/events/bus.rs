//! The event bus.
//!
//! A process-wide registry of pre- and post-hooks. `emit_guarded` runs
//! pre-hooks synchronously and propagates the first rejection; `emit` runs
//! post-hooks, spawning the asynchronous ones so emitters never block on
//! fanout.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CoreError, Result};

use super::hooks::{PostHook, PreHook};
use super::types::EventEnvelope;

/// Dispatches events to registered hooks.
///
/// The bus is append-only after startup: hooks are registered during
/// bootstrap and the bus is then shared immutably behind an `Arc`.
#[derive(Default)]
pub struct EventBus {
    pre_hooks: Vec<Arc<dyn PreHook>>,
    post_hooks: Vec<Arc<dyn PostHook>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pre-hook.
    pub fn register_pre(&mut self, hook: Arc<dyn PreHook>) {
        self.pre_hooks.push(hook);
    }

    /// Registers a post-hook.
    pub fn register_post(&mut self, hook: Arc<dyn PostHook>) {
        self.post_hooks.push(hook);
    }

    /// Number of registered hooks (pre, post).
    #[must_use]
    pub fn hook_counts(&self) -> (usize, usize) {
        (self.pre_hooks.len(), self.post_hooks.len())
    }

    /// Runs pre-hooks for `event`; the first rejection aborts.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HookAborted`] carrying the hook name and reason.
    pub async fn check(&self, event: &EventEnvelope) -> Result<()> {
        for hook in &self.pre_hooks {
            if !hook.matches(event) {
                continue;
            }
            if let Err(e) = hook.before(event).await {
                warn!(hook = hook.name(), event = %event.event_name, error = %e, "pre-hook aborted operation");
                return Err(CoreError::hook_aborted(hook.name(), e.to_string()));
            }
        }
        Ok(())
    }

    /// Emits a committed event to all matching post-hooks.
    ///
    /// Hooks run in registration order on a spawned task; failures are logged
    /// and do not affect the emitter.
    pub fn emit(self: &Arc<Self>, event: EventEnvelope) {
        debug!(event = %event.event_name, tenant = %event.tenant_id, "event emitted");
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            for hook in &bus.post_hooks {
                if !hook.matches(&event) {
                    continue;
                }
                if let Err(e) = hook.after(&event).await {
                    warn!(hook = hook.name(), event = %event.event_name, error = %e, "post-hook failed");
                }
            }
        });
    }

    /// Emits an event and waits for all post-hooks to finish.
    ///
    /// Used on paths that must observe hook completion (tests, shutdown
    /// flushing). Failures are still only logged.
    pub async fn emit_sync(&self, event: EventEnvelope) {
        for hook in &self.post_hooks {
            if !hook.matches(&event) {
                continue;
            }
            if let Err(e) = hook.after(&event).await {
                warn!(hook = hook.name(), event = %event.event_name, error = %e, "post-hook failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::hooks::HookError;
    use crate::events::types::{EventContext, names};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl PostHook for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn after(&self, _event: &EventEnvelope) -> std::result::Result<(), HookError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Veto;

    #[async_trait]
    impl PreHook for Veto {
        fn name(&self) -> &str {
            "veto"
        }

        fn event_prefixes(&self) -> &[&str] {
            &["auth.ciba."]
        }

        async fn before(&self, _event: &EventEnvelope) -> std::result::Result<(), HookError> {
            Err(HookError::rejected("tenant quota exhausted"))
        }
    }

    fn event(name: &str) -> EventEnvelope {
        EventEnvelope::new(name, "t1", EventContext::for_request("r1"))
    }

    #[tokio::test]
    async fn test_post_hooks_receive_events() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut bus = EventBus::new();
        bus.register_post(counter.clone());

        bus.emit_sync(event(names::TOKEN_ISSUED)).await;
        bus.emit_sync(event(names::SESSION_CREATED)).await;

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pre_hook_abort_carries_name() {
        let mut bus = EventBus::new();
        bus.register_pre(Arc::new(Veto));

        let err = bus.check(&event(names::CIBA_REQUEST_CREATED)).await.unwrap_err();
        assert!(err.is_hook_abort());
        assert!(err.to_string().contains("veto"));

        // Non-matching events pass.
        assert!(bus.check(&event(names::TOKEN_ISSUED)).await.is_ok());
    }

    #[tokio::test]
    async fn test_spawned_emit_completes() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut bus = EventBus::new();
        bus.register_post(counter.clone());
        let bus = Arc::new(bus);

        bus.emit(event(names::TOKEN_ISSUED));
        // Let the spawned task run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
